//! 内核日志
//!
//! 包含:
//! - 分级日志 (Error/Warn/Info/Debug/Trace)
//! - 可插拔的输出端 (UART、环形缓冲或测试捕获)
//! - 丢帧日志限速器

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use lazy_static::lazy_static;

/// 日志级别
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Error => "E",
            Level::Warn => "W",
            Level::Info => "I",
            Level::Debug => "D",
            Level::Trace => "T",
        }
    }

    fn from_u8(v: u8) -> Level {
        match v {
            0 | 1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

/// 日志输出端
pub trait LogSink: Send {
    fn write_record(&mut self, level: Level, args: fmt::Arguments);
}

/// 把日志写入任意 `fmt::Write` (串口、字符串)
pub struct WriterSink<W: fmt::Write + Send> {
    writer: W,
}

impl<W: fmt::Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    pub fn inner(&self) -> &W {
        &self.writer
    }
}

impl<W: fmt::Write + Send> LogSink for WriterSink<W> {
    fn write_record(&mut self, level: Level, args: fmt::Arguments) {
        let _ = write!(self.writer, "<{}> ", level.tag());
        let _ = self.writer.write_fmt(args);
        let _ = self.writer.write_str("\n");
    }
}

pub struct Logger {
    sink: Option<Box<dyn LogSink>>,
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

lazy_static! {
    pub static ref LOGGER: spin::Mutex<Logger> = spin::Mutex::new(Logger { sink: None });
}

/// 安装日志输出端, 返回旧的输出端
pub fn set_sink(sink: Box<dyn LogSink>) -> Option<Box<dyn LogSink>> {
    LOGGER.lock().sink.replace(sink)
}

pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn log(level: Level, args: fmt::Arguments) {
    if !enabled(level) {
        return;
    }

    let mut logger = LOGGER.lock();
    if let Some(sink) = logger.sink.as_mut() {
        sink.write_record(level, args);
    }
}

#[macro_export]
macro_rules! klog {
    ($lvl:expr, $($arg:tt)*) => {
        $crate::klog::log($lvl, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerr {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdbg {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Trace, $($arg)*) };
}

// ============ 限速器 ============

/// 前 `interval` 次全部放行, 之后每 `interval` 次放行一次
pub struct RateLimiter {
    interval: u32,
    count: AtomicU32,
}

impl RateLimiter {
    pub const fn new(interval: u32) -> Self {
        RateLimiter {
            interval: if interval == 0 { 1 } else { interval },
            count: AtomicU32::new(0),
        }
    }

    /// 记录一次事件, 返回本次是否应当打印
    pub fn should_log(&self) -> bool {
        let cnt = self.count.fetch_add(1, Ordering::Relaxed);
        cnt < self.interval || cnt % self.interval == 0
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    #[test]
    fn test_rate_limiter_burst_then_interval() {
        let limiter = RateLimiter::new(30);
        let printed: u32 = (0..120).map(|_| limiter.should_log() as u32).sum();
        // 0..29 全部, 然后 30, 60, 90
        assert_eq!(printed, 33);
        assert_eq!(limiter.count(), 120);
    }

    #[test]
    fn test_rate_limiter_reset() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.should_log());
        assert!(limiter.should_log());
        assert!(!limiter.should_log());
        limiter.reset();
        assert!(limiter.should_log());
    }

    #[test]
    fn test_writer_sink_format() {
        let mut sink = WriterSink::new(String::new());
        sink.write_record(Level::Warn, format_args!("[CSI{}] lost end", 2));
        assert_eq!(sink.inner().as_str(), "<W> [CSI2] lost end\n");
    }

    #[test]
    fn test_level_order() {
        assert!(Level::Error < Level::Trace);
        assert_eq!(Level::from_u8(9), Level::Trace);
    }
}
