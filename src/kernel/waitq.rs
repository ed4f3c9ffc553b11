//! 带超时的等待标志
//!
//! 等待方先 `arm`, 中断上下文 `clear` 唤醒; 等待方按毫秒轮询,
//! 每轮通过平台延时让出时间.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::hal::platform::Platform;

pub struct WaitFlag {
    flag: AtomicBool,
    wakeups: AtomicU32,
}

impl WaitFlag {
    pub const fn new() -> Self {
        WaitFlag {
            flag: AtomicBool::new(false),
            wakeups: AtomicU32::new(0),
        }
    }

    pub fn arm(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 清除标志并唤醒等待方, 返回之前是否处于等待状态
    pub fn clear(&self) -> bool {
        let was = self.flag.swap(false, Ordering::SeqCst);
        if was {
            self.wakeups.fetch_add(1, Ordering::Relaxed);
        }
        was
    }

    pub fn wakeups(&self) -> u32 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// 等待标志被清除, 成功时返回剩余的毫秒数, 超时返回 None
    pub fn wait_clear(&self, platform: &dyn Platform, timeout_ms: u32) -> Option<u32> {
        let mut remain = timeout_ms;
        loop {
            if !self.is_armed() {
                return Some(remain);
            }
            if remain == 0 {
                return None;
            }
            platform.mdelay(1);
            remain -= 1;
        }
    }
}

impl Default for WaitFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::sim::SimPlatform;

    #[test]
    fn test_wait_times_out() {
        let platform = SimPlatform::new();
        let flag = WaitFlag::new();
        flag.arm();
        assert_eq!(flag.wait_clear(&platform, 5), None);
        assert_eq!(platform.elapsed_ms(), 5);
    }

    #[test]
    fn test_wait_woken_by_clear() {
        let platform = SimPlatform::new();
        let flag = alloc::sync::Arc::new(WaitFlag::new());
        flag.arm();

        let waker = flag.clone();
        platform.on_delay(move |ms| {
            if ms == 3 {
                waker.clear();
            }
        });

        assert_eq!(flag.wait_clear(&platform, 250), Some(247));
        assert_eq!(flag.wakeups(), 1);
    }

    #[test]
    fn test_clear_without_waiter() {
        let flag = WaitFlag::new();
        assert!(!flag.clear());
        assert_eq!(flag.wakeups(), 0);
    }
}
