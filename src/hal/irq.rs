//! 中断号到处理函数的注册表
//!
//! 每个中断号可以挂多个共享处理函数 (`IRQF_SHARED`), 分发时依次调用,
//! 调用前先把处理函数列表拷贝出锁, 处理函数里可以再次注册或注销.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{CsiError, CsiResult};

/// 中断处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// 允许与其他处理函数共享同一中断号
pub const IRQF_SHARED: u32 = 1 << 0;

pub type IrqHandler = Arc<dyn Fn(u32) -> IrqReturn + Send + Sync>;

struct IrqAction {
    name: String,
    flags: u32,
    cookie: usize,
    handler: IrqHandler,
}

/// 中断注册表
pub struct IrqDomain {
    actions: spin::Mutex<BTreeMap<u32, Vec<IrqAction>>>,
}

impl IrqDomain {
    pub fn new() -> Self {
        IrqDomain {
            actions: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// 注册处理函数, `cookie` 用于注销时识别调用者
    pub fn request_irq(
        &self,
        irq: u32,
        handler: IrqHandler,
        name: &str,
        flags: u32,
        cookie: usize,
    ) -> CsiResult<()> {
        let mut actions = self.actions.lock();
        let list = actions.entry(irq).or_insert_with(Vec::new);

        if let Some(first) = list.first() {
            if first.flags & flags & IRQF_SHARED == 0 {
                kerr!("[IRQ] irq {} busy ({} vs {})", irq, first.name, name);
                return Err(CsiError::Busy);
            }
        }

        list.push(IrqAction {
            name: String::from(name),
            flags,
            cookie,
            handler,
        });
        Ok(())
    }

    /// 注销 `cookie` 在 `irq` 上注册的处理函数
    pub fn free_irq(&self, irq: u32, cookie: usize) {
        let mut actions = self.actions.lock();
        if let Some(list) = actions.get_mut(&irq) {
            list.retain(|a| a.cookie != cookie);
            if list.is_empty() {
                actions.remove(&irq);
            }
        }
    }

    pub fn is_requested(&self, irq: u32) -> bool {
        self.actions.lock().contains_key(&irq)
    }

    pub fn handler_count(&self, irq: u32) -> usize {
        self.actions.lock().get(&irq).map(|l| l.len()).unwrap_or(0)
    }

    /// 分发一次中断
    pub fn dispatch(&self, irq: u32) -> IrqReturn {
        let handlers: Vec<IrqHandler> = match self.actions.lock().get(&irq) {
            Some(list) => list.iter().map(|a| a.handler.clone()).collect(),
            None => return IrqReturn::None,
        };

        let mut ret = IrqReturn::None;
        for handler in handlers {
            if handler(irq) == IrqReturn::Handled {
                ret = IrqReturn::Handled;
            }
        }
        ret
    }
}

impl Default for IrqDomain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn counter_handler(counter: Arc<AtomicU32>) -> IrqHandler {
        Arc::new(move |_irq| {
            counter.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        })
    }

    #[test]
    fn test_request_and_dispatch() {
        let domain = IrqDomain::new();
        let hits = Arc::new(AtomicU32::new(0));
        domain.request_irq(40, counter_handler(hits.clone()), "CSI0", 0, 1).unwrap();

        assert_eq!(domain.dispatch(40), IrqReturn::Handled);
        assert_eq!(domain.dispatch(41), IrqReturn::None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exclusive_irq_is_busy() {
        let domain = IrqDomain::new();
        let hits = Arc::new(AtomicU32::new(0));
        domain.request_irq(40, counter_handler(hits.clone()), "CSI0", 0, 1).unwrap();
        assert_eq!(
            domain.request_irq(40, counter_handler(hits), "CSI1", 0, 2),
            Err(CsiError::Busy)
        );
    }

    #[test]
    fn test_shared_irq_and_free() {
        let domain = IrqDomain::new();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        domain.request_irq(7, counter_handler(a.clone()), "EBUF-0", IRQF_SHARED, 1).unwrap();
        domain.request_irq(7, counter_handler(b.clone()), "EBUF-1", IRQF_SHARED, 2).unwrap();
        assert_eq!(domain.handler_count(7), 2);

        domain.dispatch(7);
        domain.free_irq(7, 1);
        domain.dispatch(7);

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        domain.free_irq(7, 2);
        assert!(!domain.is_requested(7));
    }
}
