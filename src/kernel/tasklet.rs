//! 软中断上下文的小任务 (tasklet)
//!
//! 硬中断只负责把 tasklet 标记为待运行; 宿主在软中断上下文里调用 `run`
//! 执行函数体. 同一个 tasklet 不会并发运行, 运行期间再次调度会在下一轮执行.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const TASKLET_STATE_SCHED: u32 = 1 << 0;
const TASKLET_STATE_RUN: u32 = 1 << 1;

pub struct Tasklet {
    name: &'static str,
    state: AtomicU32,
    runs: AtomicU64,
}

impl Tasklet {
    pub const fn new(name: &'static str) -> Self {
        Tasklet {
            name,
            state: AtomicU32::new(0),
            runs: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 标记为待运行, 已经在等待时返回 false
    pub fn schedule(&self) -> bool {
        self.state.fetch_or(TASKLET_STATE_SCHED, Ordering::AcqRel) & TASKLET_STATE_SCHED == 0
    }

    pub fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) & TASKLET_STATE_SCHED != 0
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) & TASKLET_STATE_RUN != 0
    }

    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// 若已调度则执行一次函数体, 返回是否执行
    pub fn run<F: FnOnce()>(&self, body: F) -> bool {
        if self.state.fetch_or(TASKLET_STATE_RUN, Ordering::AcqRel) & TASKLET_STATE_RUN != 0 {
            // 另一个 CPU 正在运行
            return false;
        }

        let prev = self.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
        if prev & TASKLET_STATE_SCHED == 0 {
            self.state.fetch_and(!TASKLET_STATE_RUN, Ordering::AcqRel);
            return false;
        }

        body();
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.state.fetch_and(!TASKLET_STATE_RUN, Ordering::AcqRel);
        true
    }

    /// 丢弃未运行的调度并等待正在运行的函数体结束
    pub fn kill(&self) {
        self.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
        while self.is_running() {
            spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn test_schedule_once() {
        let t = Tasklet::new("csis_end");
        assert!(t.schedule());
        assert!(!t.schedule());
        assert!(t.is_scheduled());

        let hits = Cell::new(0);
        assert!(t.run(|| hits.set(hits.get() + 1)));
        assert!(!t.run(|| hits.set(hits.get() + 1)));
        assert_eq!(hits.get(), 1);
        assert_eq!(t.run_count(), 1);
    }

    #[test]
    fn test_kill_drops_pending() {
        let t = Tasklet::new("csis_line");
        t.schedule();
        t.kill();
        assert!(!t.is_scheduled());
        assert!(!t.run(|| panic!("killed tasklet must not run")));
    }

    #[test]
    fn test_reschedule_from_body() {
        let t = Tasklet::new("otf_cfg");
        t.schedule();
        t.run(|| {
            assert!(t.is_running());
            assert!(t.schedule());
        });
        assert!(t.is_scheduled());
        assert!(t.run(|| {}));
    }
}
