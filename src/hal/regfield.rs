//! 寄存器字段表
//!
//! 每个字段由 (寄存器偏移, 起始位, 位宽, 访问方式, 复位值) 描述,
//! 重复的寄存器数组 (按 VC、按 LC) 额外带一个步长.
//! 位运算本身交给 `tock-registers` 的 `Field` / `FieldValue`.

use tock_registers::fields::{Field, FieldValue};

use super::mmio::RegisterBank;

/// 访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Rw,
    Ro,
}

/// 寄存器字段描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegField {
    pub name: &'static str,
    pub offset: usize,
    pub bit_start: u32,
    pub bit_width: u32,
    pub access: Access,
    pub reset: u32,
    /// 重复寄存器数组的步长, 0 表示单个寄存器
    pub stride: usize,
}

impl RegField {
    pub const fn rw(name: &'static str, offset: usize, bit_start: u32, bit_width: u32) -> Self {
        assert!(bit_width > 0 && bit_start + bit_width <= 32);
        RegField {
            name,
            offset,
            bit_start,
            bit_width,
            access: Access::Rw,
            reset: 0,
            stride: 0,
        }
    }

    pub const fn ro(name: &'static str, offset: usize, bit_start: u32, bit_width: u32) -> Self {
        let mut f = RegField::rw(name, offset, bit_start, bit_width);
        f.access = Access::Ro;
        f
    }

    pub const fn with_reset(mut self, reset: u32) -> Self {
        self.reset = reset;
        self
    }

    pub const fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// 第 `index` 个重复寄存器中的同名字段
    pub const fn at(self, index: usize) -> Self {
        let mut f = self;
        f.offset = reg_offset(&self, index);
        f.stride = 0;
        f
    }

    /// 未移位的字段掩码
    pub const fn mask(&self) -> u32 {
        if self.bit_width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_width) - 1
        }
    }

    fn field(&self) -> Field<u32, ()> {
        Field::<u32, ()>::new(self.mask(), self.bit_start as usize)
    }

    /// 从寄存器原始值中取出字段
    pub fn extract(&self, value: u32) -> u32 {
        self.field().read(value)
    }

    /// 把 `new` 截断到字段宽度后合入 `value`
    pub fn insert(&self, value: u32, new: u32) -> u32 {
        FieldValue::<u32, ()>::new(self.mask(), self.bit_start as usize, new).modify(value)
    }
}

/// 重复寄存器数组中第 `index` 个寄存器的偏移
pub const fn reg_offset(field: &RegField, index: usize) -> usize {
    field.offset + field.stride * index
}

/// 读字段
pub fn get(base: &dyn RegisterBank, field: &RegField) -> u32 {
    field.extract(base.read32(field.offset))
}

/// 在寄存器值上设置字段, 返回新值, 由调用者负责写回
pub fn set(value: u32, field: &RegField, new: u32) -> u32 {
    field.insert(value, new)
}

/// 读-改-写一个字段
pub fn write(base: &dyn RegisterBank, field: &RegField, new: u32) {
    if field.access == Access::Ro {
        kerr!("[RegField] write to read-only field {}", field.name);
        return;
    }
    let val = base.read32(field.offset);
    base.write32(field.offset, field.insert(val, new));
}

pub fn read_reg(base: &dyn RegisterBank, offset: usize) -> u32 {
    base.read32(offset)
}

pub fn write_reg(base: &dyn RegisterBank, offset: usize, value: u32) {
    base.write32(offset, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mmio::SimBank;

    const F_LOW: RegField = RegField::rw("LOW", 0x0, 0, 4);
    const F_MID: RegField = RegField::rw("MID", 0x0, 8, 6);
    const F_FULL: RegField = RegField::rw("FULL", 0x4, 0, 32);
    const F_RO: RegField = RegField::ro("VERSION", 0x8, 0, 32);
    const F_VC: RegField = RegField::rw("VC_EN", 0x20, 1, 1).with_stride(0x10);

    #[test]
    fn test_set_get_round_trip() {
        let bank = SimBank::new(0x100);
        for field in [F_LOW, F_MID, F_FULL] {
            for x in [0u32, 1, 5, 0x3f, 0x1234, u32::MAX] {
                let v = set(bank.read32(field.offset), &field, x);
                bank.write32(field.offset, v);
                let expected = if field.bit_width == 32 {
                    x
                } else {
                    x % (1u32 << field.bit_width)
                };
                assert_eq!(get(&bank, &field), expected, "{} <- {:#x}", field.name, x);
            }
        }
    }

    #[test]
    fn test_set_does_not_touch_neighbours() {
        let v = set(0xffff_ffff, &F_MID, 0);
        assert_eq!(v, 0xffff_c0ff);
        // 超宽值被截断
        let v = set(0, &F_LOW, 0x1f);
        assert_eq!(v, 0xf);
        assert_eq!(F_MID.extract(set(0, &F_MID, 0x2a)), 0x2a);
    }

    #[test]
    fn test_read_only_field_is_not_written() {
        let bank = SimBank::new(0x100);
        bank.poke(0x8, 0x0501_0000);
        write(&bank, &F_RO, 0);
        assert_eq!(get(&bank, &F_RO), 0x0501_0000);
    }

    #[test]
    fn test_replicated_offsets() {
        assert_eq!(reg_offset(&F_VC, 0), 0x20);
        assert_eq!(reg_offset(&F_VC, 3), 0x50);
        let bank = SimBank::new(0x100);
        write(&bank, &F_VC.at(2), 1);
        assert_eq!(bank.read32(0x40), 0b10);
        assert_eq!(get(&bank, &F_VC.at(2)), 1);
        assert_eq!(get(&bank, &F_VC.at(1)), 0);
    }
}
