//! CSI 核心错误类型

use core::fmt;

/// 进程上下文操作的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiError {
    /// 参数或配置无效
    InvalidArgument,
    /// 依赖的硬件块不存在 (WDMA、PDP_TOP 等)
    NoDevice,
    /// 内部缓冲分配失败
    NoMemory,
    /// 资源被占用 (IRQ 已被非共享注册)
    Busy,
    AlreadyStarted,
    NotStarted,
    Timeout,
    /// entry id 或虚拟通道越界
    OutOfRange,
    Permission,
}

impl CsiError {
    /// 转换为内核风格的负错误码
    pub fn to_errno(self) -> i32 {
        match self {
            CsiError::InvalidArgument => -22,
            CsiError::NoDevice => -19,
            CsiError::NoMemory => -12,
            CsiError::Busy => -16,
            CsiError::AlreadyStarted => -114,
            CsiError::NotStarted => -22,
            CsiError::Timeout => -110,
            CsiError::OutOfRange => -34,
            CsiError::Permission => -1,
        }
    }
}

impl fmt::Display for CsiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CsiError::InvalidArgument => write!(f, "invalid argument"),
            CsiError::NoDevice => write!(f, "no such device"),
            CsiError::NoMemory => write!(f, "out of memory"),
            CsiError::Busy => write!(f, "resource busy"),
            CsiError::AlreadyStarted => write!(f, "already started"),
            CsiError::NotStarted => write!(f, "not started"),
            CsiError::Timeout => write!(f, "timed out"),
            CsiError::OutOfRange => write!(f, "index out of range"),
            CsiError::Permission => write!(f, "operation not permitted"),
        }
    }
}

pub type CsiResult<T> = Result<T, CsiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(CsiError::InvalidArgument.to_errno(), -22);
        assert_eq!(CsiError::NoDevice.to_errno(), -19);
        assert_eq!(CsiError::Timeout.to_errno(), -110);
    }

    #[test]
    fn test_display() {
        assert_eq!(CsiError::OutOfRange.to_string(), "index out of range");
    }
}
