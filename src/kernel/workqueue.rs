//! 进程上下文的工作项和 DMA 完成消息队列
//!
//! - `Work`: 可在进程上下文中阻塞的延后工作, `flush` 会就地执行尚未运行的工作
//! - `WorkList`: 固定容量的消息环, 中断上下文生产, 工作函数消费

use alloc::collections::VecDeque;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct Work {
    name: &'static str,
    pending: AtomicBool,
    running: AtomicBool,
    runs: AtomicU64,
}

impl Work {
    pub const fn new(name: &'static str) -> Self {
        Work {
            name,
            pending: AtomicBool::new(false),
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 排队, 已在队列中时返回 false
    pub fn schedule(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// 工作线程调用: 若已排队则执行一次
    pub fn run<F: FnOnce()>(&self, body: F) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        if !self.pending.swap(false, Ordering::AcqRel) {
            self.running.store(false, Ordering::Release);
            return false;
        }

        body();
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::Release);
        true
    }

    /// 等待正在运行的工作结束, 尚未运行的工作在调用者上下文中执行
    pub fn flush<F: FnOnce()>(&self, body: F) -> bool {
        while self.running.load(Ordering::Acquire) {
            spin_loop();
        }
        self.run(body)
    }
}

/// DMA 完成消息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkMsg {
    pub instance: u32,
    /// 虚拟通道
    pub param1: u32,
    /// WDMA 下标
    pub param2: u32,
    pub fcount: u32,
}

/// 固定容量的消息队列
pub struct WorkList {
    inner: spin::Mutex<VecDeque<WorkMsg>>,
    capacity: spin::Mutex<usize>,
}

impl WorkList {
    pub fn new(capacity: usize) -> Self {
        WorkList {
            inner: spin::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: spin::Mutex::new(capacity),
        }
    }

    /// 清空并重设容量
    pub fn init(&self, capacity: usize) {
        *self.capacity.lock() = capacity;
        let mut q = self.inner.lock();
        q.clear();
        q.reserve(capacity);
    }

    /// 入队, 队列满时把消息还给调用者
    pub fn push(&self, msg: WorkMsg) -> Result<(), WorkMsg> {
        let cap = *self.capacity.lock();
        let mut q = self.inner.lock();
        if q.len() >= cap {
            return Err(msg);
        }
        q.push_back(msg);
        Ok(())
    }

    pub fn pop(&self) -> Option<WorkMsg> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(vc: u32) -> WorkMsg {
        WorkMsg {
            instance: 0,
            param1: vc,
            param2: 0,
            fcount: vc,
        }
    }

    #[test]
    fn test_work_list_fifo() {
        let list = WorkList::new(4);
        for vc in 0..3 {
            list.push(msg(vc)).unwrap();
        }
        assert_eq!(list.pop().map(|m| m.param1), Some(0));
        assert_eq!(list.pop().map(|m| m.param1), Some(1));
        assert_eq!(list.pop().map(|m| m.param1), Some(2));
        assert!(list.pop().is_none());
    }

    #[test]
    fn test_work_list_overflow() {
        let list = WorkList::new(2);
        list.push(msg(0)).unwrap();
        list.push(msg(1)).unwrap();
        assert_eq!(list.push(msg(2)), Err(msg(2)));
        list.pop();
        assert!(list.push(msg(2)).is_ok());

        list.init(1);
        assert!(list.is_empty());
        list.push(msg(3)).unwrap();
        assert!(list.push(msg(4)).is_err());
    }

    #[test]
    fn test_work_flush_runs_pending() {
        let w = Work::new("csis_dma");
        let mut hits = 0;
        assert!(!w.flush(|| hits += 1));
        w.schedule();
        assert!(!w.schedule());
        assert!(w.flush(|| hits += 1));
        assert_eq!(hits, 1);
        assert!(!w.is_pending());
        assert_eq!(w.run_count(), 1);
    }
}
