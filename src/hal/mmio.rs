//! 32 位寄存器组访问
//!
//! 包含:
//! - `RegisterBank` 抽象 (一段连续的 32 位寄存器)
//! - `MmioBank`: 真实硬件, 通过 `volatile` 访问
//! - `SimBank`: 内存模拟, 支持写 1 清零 (W1C) 的中断源寄存器

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use volatile::Volatile;

/// 一段 32 位寄存器
pub trait RegisterBank: Send + Sync {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
    /// 寄存器组大小 (字节)
    fn size(&self) -> usize;
}

/// 内存映射的硬件寄存器组
pub struct MmioBank {
    base: usize,
    size: usize,
}

impl MmioBank {
    /// 创建寄存器组
    ///
    /// # Safety
    /// `base..base + size` 必须是已映射且独占的设备内存
    pub const unsafe fn new(base: usize, size: usize) -> Self {
        MmioBank { base, size }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBank for MmioBank {
    fn read32(&self, offset: usize) -> u32 {
        if offset + 4 > self.size {
            return 0;
        }
        let ptr = (self.base + offset) as *const u32;
        unsafe { Volatile::new_read_only(&*ptr).read() }
    }

    fn write32(&self, offset: usize, value: u32) {
        if offset + 4 > self.size {
            return;
        }
        let ptr = (self.base + offset) as *mut u32;
        unsafe { Volatile::new(&mut *ptr).write(value) }
    }

    fn size(&self) -> usize {
        self.size
    }
}

// ============ 模拟寄存器组 ============

/// 模拟寄存器组
///
/// 普通寄存器按写入值保存; W1C 寄存器写 1 清除对应位,
/// 由 `raise` 模拟硬件置位.
pub struct SimBank {
    regs: Vec<AtomicU32>,
    writes: Vec<AtomicU32>,
    w1c: Vec<usize>,
}

impl SimBank {
    pub fn new(size: usize) -> Self {
        let words = (size + 3) / 4;
        SimBank {
            regs: (0..words).map(|_| AtomicU32::new(0)).collect(),
            writes: (0..words).map(|_| AtomicU32::new(0)).collect(),
            w1c: Vec::new(),
        }
    }

    /// 标记一组写 1 清零的寄存器
    pub fn with_w1c(mut self, offsets: &[usize]) -> Self {
        self.w1c.extend_from_slice(offsets);
        self
    }

    /// 模拟硬件置位 (中断源等)
    pub fn raise(&self, offset: usize, bits: u32) {
        if let Some(reg) = self.regs.get(offset / 4) {
            reg.fetch_or(bits, Ordering::SeqCst);
        }
    }

    /// 直接设置寄存器值, 不计入写次数
    pub fn poke(&self, offset: usize, value: u32) {
        if let Some(reg) = self.regs.get(offset / 4) {
            reg.store(value, Ordering::SeqCst);
        }
    }

    /// 某个寄存器被软件写过的次数
    pub fn write_count(&self, offset: usize) -> u32 {
        self.writes
            .get(offset / 4)
            .map(|w| w.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl RegisterBank for SimBank {
    fn read32(&self, offset: usize) -> u32 {
        self.regs
            .get(offset / 4)
            .map(|r| r.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn write32(&self, offset: usize, value: u32) {
        let idx = offset / 4;
        let Some(reg) = self.regs.get(idx) else {
            return;
        };
        if self.w1c.contains(&offset) {
            reg.fetch_and(!value, Ordering::SeqCst);
        } else {
            reg.store(value, Ordering::SeqCst);
        }
        self.writes[idx].fetch_add(1, Ordering::SeqCst);
    }

    fn size(&self) -> usize {
        self.regs.len() * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_bank_plain_register() {
        let bank = SimBank::new(0x100);
        bank.write32(0x10, 0xdead_beef);
        assert_eq!(bank.read32(0x10), 0xdead_beef);
        assert_eq!(bank.write_count(0x10), 1);
        assert_eq!(bank.read32(0x400), 0);
    }

    #[test]
    fn test_sim_bank_w1c() {
        let bank = SimBank::new(0x100).with_w1c(&[0x14]);
        bank.raise(0x14, 0b1011);
        assert_eq!(bank.read32(0x14), 0b1011);
        bank.write32(0x14, 0b0011);
        assert_eq!(bank.read32(0x14), 0b1000);
    }

    #[test]
    fn test_mmio_bank_on_memory() {
        let mut backing = [0u32; 4];
        let bank = unsafe { MmioBank::new(backing.as_mut_ptr() as usize, 16) };
        bank.write32(8, 0x55);
        assert_eq!(bank.read32(8), 0x55);
        assert_eq!(bank.read32(16), 0);
        assert_eq!(backing[2], 0x55);
    }
}
