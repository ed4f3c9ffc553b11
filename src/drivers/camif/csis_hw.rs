//! CSIS 链路寄存器层
//!
//! 包含:
//! - 链路控制 (使能、复位、lane、交织、LRTE、解扰)
//! - 每个 VC 的输入格式配置
//! - 中断源读取与清除, 每个 VC 的错误 id
//! - 帧计数器
//! - 错误 id 定义 (链路侧与 DMA 侧)

use crate::config::CSI_VIRTUAL_CH_MAX;
use crate::drivers::camif::sensor_cfg::{InterleaveMode, VciConfig};
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

/// 硬件版本号编码
pub const fn csis_version(a: u32, b: u32, c: u32, d: u32) -> u32 {
    (a << 24) | (b << 16) | (c << 8) | d
}

pub const CSIS_V5_4: u32 = csis_version(5, 4, 0, 0);

// ============ 寄存器表 ============

pub const CSIS_REG_SIZE: usize = 0x200;

pub const CSIS_R_VERSION: usize = 0x000;
pub const CSIS_R_CMN_CTRL: usize = 0x004;
pub const CSIS_R_INT_MSK0: usize = 0x010;
pub const CSIS_R_INT_SRC0: usize = 0x014;
pub const CSIS_R_LINE_INTR: usize = 0x018;
pub const CSIS_R_DBG_LOST_FS: usize = 0x020;
pub const CSIS_R_DBG_LOST_FE: usize = 0x024;
pub const CSIS_R_DBG_VRESOL: usize = 0x028;
pub const CSIS_R_DBG_HRESOL: usize = 0x02c;
pub const CSIS_R_ERR_MSK: usize = 0x03c;
pub const CSIS_R_ERR_SRC_VC0: usize = 0x040;
pub const CSIS_R_FCNT_VC0: usize = 0x080;
pub const CSIS_R_ISP_CONFIG_CH0: usize = 0x100;

pub const CSIS_F_VERSION: RegField = RegField::ro("CSIS_VERSION", CSIS_R_VERSION, 0, 32);

pub const CSIS_F_ENABLE: RegField = RegField::rw("CSI_EN", CSIS_R_CMN_CTRL, 0, 1);
pub const CSIS_F_SW_RESET: RegField = RegField::rw("SW_RESET", CSIS_R_CMN_CTRL, 1, 1);
pub const CSIS_F_DESCRAMBLE: RegField = RegField::rw("DESCRAMBLE_EN", CSIS_R_CMN_CTRL, 4, 1);
pub const CSIS_F_LANE_NUMBER: RegField = RegField::rw("LANE_NUMBER", CSIS_R_CMN_CTRL, 8, 2);
pub const CSIS_F_INTERLEAVE: RegField = RegField::rw("INTERLEAVE_MODE", CSIS_R_CMN_CTRL, 10, 2);
pub const CSIS_F_PIXEL_ALIGN: RegField = RegField::rw("PIXEL_ALIGN", CSIS_R_CMN_CTRL, 12, 1);
pub const CSIS_F_LRTE: RegField = RegField::rw("LRTE_CONFIG", CSIS_R_CMN_CTRL, 14, 2);
pub const CSIS_F_PHY_SEL: RegField = RegField::rw("PHY_SEL_CPHY", CSIS_R_CMN_CTRL, 16, 1);

pub const CSIS_F_MSK_FS: RegField = RegField::rw("MSK_FRAMESTART", CSIS_R_INT_MSK0, 0, 10);
pub const CSIS_F_MSK_FE: RegField = RegField::rw("MSK_FRAMEEND", CSIS_R_INT_MSK0, 10, 10);
pub const CSIS_F_MSK_LINE: RegField = RegField::rw("MSK_LINE_END", CSIS_R_INT_MSK0, 20, 10);
pub const CSIS_F_MSK_ERR: RegField = RegField::rw("MSK_ERR", CSIS_R_INT_MSK0, 31, 1);

pub const CSIS_F_SRC_FS: RegField = RegField::rw("FRAMESTART", CSIS_R_INT_SRC0, 0, 10);
pub const CSIS_F_SRC_FE: RegField = RegField::rw("FRAMEEND", CSIS_R_INT_SRC0, 10, 10);
pub const CSIS_F_SRC_LINE: RegField = RegField::rw("LINE_END", CSIS_R_INT_SRC0, 20, 10);

pub const CSIS_F_LINE_RATIO: RegField = RegField::rw("LINE_RATIO", CSIS_R_LINE_INTR, 0, 16);

pub const CSIS_F_ERR_SRC_VC: RegField =
    RegField::rw("ERR_SRC_VC", CSIS_R_ERR_SRC_VC0, 0, 16).with_stride(4);
pub const CSIS_F_FCNT_VC: RegField = RegField::rw("FCNT_VC", CSIS_R_FCNT_VC0, 0, 32).with_stride(4);

pub const CSIS_F_DATAFORMAT: RegField =
    RegField::rw("DATAFORMAT", CSIS_R_ISP_CONFIG_CH0, 0, 6).with_stride(0x10);
pub const CSIS_F_VIRTUAL_CH: RegField =
    RegField::rw("VIRTUAL_CHANNEL", CSIS_R_ISP_CONFIG_CH0, 8, 4).with_stride(0x10);
pub const CSIS_F_POTF_EN: RegField =
    RegField::rw("POTF_EN", CSIS_R_ISP_CONFIG_CH0, 16, 1).with_stride(0x10);
pub const CSIS_F_HRESOL: RegField =
    RegField::rw("HRESOL", CSIS_R_ISP_CONFIG_CH0 + 0x4, 0, 16).with_stride(0x10);
pub const CSIS_F_VRESOL: RegField =
    RegField::rw("VRESOL", CSIS_R_ISP_CONFIG_CH0 + 0x4, 16, 16).with_stride(0x10);
pub const CSIS_F_DUMMY: RegField =
    RegField::rw("DUMMY_PIXEL", CSIS_R_ISP_CONFIG_CH0 + 0x8, 0, 16).with_stride(0x10);

/// 中断源寄存器中的 W1C 寄存器
pub fn w1c_registers() -> [usize; 1 + CSI_VIRTUAL_CH_MAX] {
    let mut regs = [0; 1 + CSI_VIRTUAL_CH_MAX];
    regs[0] = CSIS_R_INT_SRC0;
    for (vc, reg) in regs[1..].iter_mut().enumerate() {
        *reg = CSIS_F_ERR_SRC_VC.at(vc).offset;
    }
    regs
}

// ============ 错误 id ============

/// 链路错误 (ERR_SRC_VC 中的位)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsisErr {
    Id = 0,
    Crc = 1,
    Ecc = 2,
    WrongCfg = 3,
    OverflowVc = 4,
    LostFeVc = 5,
    LostFsVc = 6,
    SotVc = 7,
    InvalidCodeHs = 8,
    SotSyncHs = 9,
    DeskewOver = 10,
    Skew = 11,
    MalCrc = 12,
    VresolMismatch = 13,
    HresolMismatch = 14,
    CrcCphy = 15,
}

impl CsisErr {
    pub const ALL: [CsisErr; 16] = [
        CsisErr::Id,
        CsisErr::Crc,
        CsisErr::Ecc,
        CsisErr::WrongCfg,
        CsisErr::OverflowVc,
        CsisErr::LostFeVc,
        CsisErr::LostFsVc,
        CsisErr::SotVc,
        CsisErr::InvalidCodeHs,
        CsisErr::SotSyncHs,
        CsisErr::DeskewOver,
        CsisErr::Skew,
        CsisErr::MalCrc,
        CsisErr::VresolMismatch,
        CsisErr::HresolMismatch,
        CsisErr::CrcCphy,
    ];

    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            CsisErr::Id => "ID",
            CsisErr::Crc => "CRC",
            CsisErr::Ecc => "ECC",
            CsisErr::WrongCfg => "WRONG_CFG",
            CsisErr::OverflowVc => "OVERFLOW_VC",
            CsisErr::LostFeVc => "LOST_FE_VC",
            CsisErr::LostFsVc => "LOST_FS_VC",
            CsisErr::SotVc => "SOT_VC",
            CsisErr::InvalidCodeHs => "INVALID_CODE_HS",
            CsisErr::SotSyncHs => "SOT_SYNC_HS",
            CsisErr::DeskewOver => "DESKEW_OVER",
            CsisErr::Skew => "SKEW",
            CsisErr::MalCrc => "MAL_CRC",
            CsisErr::VresolMismatch => "VRESOL_MISMATCH",
            CsisErr::HresolMismatch => "HRESOL_MISMATCH",
            CsisErr::CrcCphy => "CRC_CPHY",
        }
    }

    /// 按位号从小到大列出 `mask` 中的错误
    pub fn iter_bits(mask: u32) -> impl Iterator<Item = CsisErr> {
        Self::ALL.into_iter().filter(move |e| mask & e.bit() != 0)
    }
}

pub const CSIS_CRC_ERR_MASK: u32 = CsisErr::Crc.bit() | CsisErr::MalCrc.bit() | CsisErr::CrcCphy.bit();

/// DMA 错误 (WDMA ERR_SRC_VC 中的位)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaErr {
    OtfOverlapVc = 0,
    DmaFifoFull = 1,
    AbortDone = 2,
    FrameDropVc = 3,
    LastDataError = 4,
    LastAddrError = 5,
    FstartInFlushVc = 6,
    C2comLostFlushVc = 7,
}

impl DmaErr {
    pub const ALL: [DmaErr; 8] = [
        DmaErr::OtfOverlapVc,
        DmaErr::DmaFifoFull,
        DmaErr::AbortDone,
        DmaErr::FrameDropVc,
        DmaErr::LastDataError,
        DmaErr::LastAddrError,
        DmaErr::FstartInFlushVc,
        DmaErr::C2comLostFlushVc,
    ];

    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            DmaErr::OtfOverlapVc => "DMA_OTF_OVERLAP_VC",
            DmaErr::DmaFifoFull => "DMA_DMAFIFO_FULL",
            DmaErr::AbortDone => "DMA_ABORT_DONE",
            DmaErr::FrameDropVc => "DMA_FRAME_DROP_VC",
            DmaErr::LastDataError => "DMA_LASTDATA_ERROR",
            DmaErr::LastAddrError => "DMA_LASTADDR_ERROR",
            DmaErr::FstartInFlushVc => "DMA_FSTART_IN_FLUSH_VC",
            DmaErr::C2comLostFlushVc => "DMA_C2COM_LOST_FLUSH_VC",
        }
    }

    pub fn iter_bits(mask: u32) -> impl Iterator<Item = DmaErr> {
        Self::ALL.into_iter().filter(move |e| mask & e.bit() != 0)
    }
}

// ============ 中断源 ============

/// 一次链路中断读取到的中断源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsisIrqSrc {
    pub raw: u32,
    pub otf_start: u32,
    pub otf_end: u32,
    pub line_end: u32,
    pub err_flag: bool,
    pub err_id: [u32; CSI_VIRTUAL_CH_MAX],
}

/// 链路错误快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbgIrqInfo {
    pub time_ns: u64,
    pub err_src0: u32,
    pub err_src1: u32,
    pub lost_fs: u32,
    pub lost_fe: u32,
    pub vresol: u32,
    pub hresol: u32,
}

/// 读取中断源, `clear` 时写回清除
pub fn g_irq_src(base: &dyn RegisterBank, clear: bool) -> CsisIrqSrc {
    let raw = base.read32(CSIS_R_INT_SRC0);
    if clear && raw != 0 {
        base.write32(CSIS_R_INT_SRC0, raw);
    }

    let mut src = CsisIrqSrc {
        raw,
        otf_start: CSIS_F_SRC_FS.extract(raw),
        otf_end: CSIS_F_SRC_FE.extract(raw),
        line_end: CSIS_F_SRC_LINE.extract(raw),
        ..Default::default()
    };

    for vc in 0..CSI_VIRTUAL_CH_MAX {
        let reg = CSIS_F_ERR_SRC_VC.at(vc).offset;
        let err = base.read32(reg);
        if err != 0 {
            if clear {
                base.write32(reg, err);
            }
            src.err_id[vc] = CSIS_F_ERR_SRC_VC.extract(err);
            src.err_flag = true;
        }
    }
    src
}

pub fn g_dbg_snapshot(base: &dyn RegisterBank, src: &CsisIrqSrc, time_ns: u64) -> DbgIrqInfo {
    DbgIrqInfo {
        time_ns,
        err_src0: src.raw,
        err_src1: src.err_id.iter().fold(0, |acc, e| acc | e),
        lost_fs: base.read32(CSIS_R_DBG_LOST_FS),
        lost_fe: base.read32(CSIS_R_DBG_LOST_FE),
        vresol: base.read32(CSIS_R_DBG_VRESOL),
        hresol: base.read32(CSIS_R_DBG_HRESOL),
    }
}

/// 链路中断屏蔽; 使用帧 id 解码时帧起止由 DMA 中断给出
pub fn s_irq_msk(base: &dyn RegisterBank, enable: bool, f_id_dec: bool) {
    let mut val = base.read32(CSIS_R_INT_MSK0);
    let frame_bits = if enable && !f_id_dec { CSIS_F_MSK_FS.mask() } else { 0 };
    val = regfield::set(val, &CSIS_F_MSK_FS, frame_bits);
    val = regfield::set(val, &CSIS_F_MSK_FE, frame_bits);
    val = regfield::set(val, &CSIS_F_MSK_ERR, enable as u32);
    if !enable {
        val = regfield::set(val, &CSIS_F_MSK_LINE, 0);
    }
    base.write32(CSIS_R_INT_MSK0, val);
    base.write32(CSIS_R_ERR_MSK, if enable { 0xffff } else { 0 });
}

pub fn irq_masked(base: &dyn RegisterBank) -> bool {
    base.read32(CSIS_R_INT_MSK0) == 0 && base.read32(CSIS_R_ERR_MSK) == 0
}

// ============ 链路控制 ============

/// 链路控制项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsisCtrl {
    InterleaveMode,
    PixelAlign,
    Lrte,
    Descramble,
    LineRatio,
    EnableLineIrq,
}

pub fn get_version(base: &dyn RegisterBank) -> u32 {
    regfield::get(base, &CSIS_F_VERSION)
}

pub fn enable(base: &dyn RegisterBank, use_cphy: bool) {
    regfield::write(base, &CSIS_F_PHY_SEL, use_cphy as u32);
    regfield::write(base, &CSIS_F_ENABLE, 1);
}

pub fn disable(base: &dyn RegisterBank) {
    regfield::write(base, &CSIS_F_ENABLE, 0);
}

pub fn is_enabled(base: &dyn RegisterBank) -> bool {
    regfield::get(base, &CSIS_F_ENABLE) != 0
}

/// 软件复位脉冲
pub fn reset(base: &dyn RegisterBank) {
    regfield::write(base, &CSIS_F_SW_RESET, 1);
    regfield::write(base, &CSIS_F_SW_RESET, 0);
}

pub fn s_lane(base: &dyn RegisterBank, lanes: u32, use_cphy: bool) {
    let lanes = lanes.clamp(1, 4);
    regfield::write(base, &CSIS_F_LANE_NUMBER, lanes - 1);
    regfield::write(base, &CSIS_F_PHY_SEL, use_cphy as u32);
}

pub fn interleave_code(mode: InterleaveMode) -> u32 {
    match mode {
        InterleaveMode::Ch0Only => 0,
        InterleaveMode::Dt => 1,
        InterleaveMode::Vc => 2,
        InterleaveMode::DtVc => 3,
    }
}

pub fn s_control(base: &dyn RegisterBank, ctrl: CsisCtrl, value: u32) {
    match ctrl {
        CsisCtrl::InterleaveMode => regfield::write(base, &CSIS_F_INTERLEAVE, value),
        CsisCtrl::PixelAlign => regfield::write(base, &CSIS_F_PIXEL_ALIGN, value),
        CsisCtrl::Lrte => regfield::write(base, &CSIS_F_LRTE, value),
        CsisCtrl::Descramble => regfield::write(base, &CSIS_F_DESCRAMBLE, value),
        CsisCtrl::LineRatio => regfield::write(base, &CSIS_F_LINE_RATIO, value),
        CsisCtrl::EnableLineIrq => {
            regfield::write(base, &CSIS_F_MSK_LINE, if value != 0 { 1 } else { 0 })
        }
    }
}

/// 配置一个链路 VC 的输入格式
pub fn s_config(base: &dyn RegisterBank, vc: usize, vci: &VciConfig, potf: bool) {
    if vc >= CSI_VIRTUAL_CH_MAX {
        return;
    }
    regfield::write(base, &CSIS_F_DATAFORMAT.at(vc), vci.hwformat.data_type());
    regfield::write(base, &CSIS_F_VIRTUAL_CH.at(vc), vc as u32);
    regfield::write(base, &CSIS_F_POTF_EN.at(vc), potf as u32);
    regfield::write(base, &CSIS_F_HRESOL.at(vc), vci.width);
    regfield::write(base, &CSIS_F_VRESOL.at(vc), vci.height);
    regfield::write(base, &CSIS_F_DUMMY.at(vc), vci.dummy_pixel);
}

pub fn g_fcount(base: &dyn RegisterBank, vc: usize) -> u32 {
    regfield::get(base, &CSIS_F_FCNT_VC.at(vc))
}

/// 设置帧计数器, 返回旧值
pub fn s_fcount(base: &dyn RegisterBank, vc: usize, count: u32) -> u32 {
    let prev = g_fcount(base, vc);
    regfield::write(base, &CSIS_F_FCNT_VC.at(vc), count);
    prev
}

// ============ FRO ============

pub const FRO_REG_SIZE: usize = 0x40;
pub const PHY_REG_SIZE: usize = 0x100;

/// 每个 OTF 通道: 帧号解码模式下只把预览帧送给 OTF
pub const FRO_F_OTF_PREVIEW_ONLY: RegField =
    RegField::rw("OTF_PREVIEW_ONLY", 0x00, 0, 1).with_stride(4);

pub fn s_otf_preview_only(fro: &dyn RegisterBank, otf_ch: usize, on: bool) {
    regfield::write(fro, &FRO_F_OTF_PREVIEW_ONLY.at(otf_ch), on as u32);
}

// ============ dump ============

/// 按 4 个字一行打印寄存器组的前 `len` 字节
pub fn dump_bank(tag: &str, bank: &dyn RegisterBank, len: usize) {
    let len = len.min(bank.size());
    kinfo!("[{}] SFR DUMP ({:#x} bytes)", tag, len);
    let mut off = 0;
    while off < len {
        kinfo!(
            "[{}] {:04x}: {:08x} {:08x} {:08x} {:08x}",
            tag,
            off,
            bank.read32(off),
            bank.read32(off + 4),
            bank.read32(off + 8),
            bank.read32(off + 12)
        );
        off += 16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::sensor_cfg::HwFormat;
    use crate::hal::mmio::SimBank;

    fn link_bank() -> SimBank {
        SimBank::new(CSIS_REG_SIZE).with_w1c(&w1c_registers())
    }

    #[test]
    fn test_irq_src_decode_and_clear() {
        let bank = link_bank();
        bank.raise(CSIS_R_INT_SRC0, 1 << 0 | 1 << 10 | 1 << 20);
        bank.raise(CSIS_F_ERR_SRC_VC.at(2).offset, CsisErr::Ecc.bit());

        let src = g_irq_src(&bank, true);
        assert_eq!(src.otf_start, 1);
        assert_eq!(src.otf_end, 1);
        assert_eq!(src.line_end, 1);
        assert!(src.err_flag);
        assert_eq!(src.err_id[2], CsisErr::Ecc.bit());

        let again = g_irq_src(&bank, true);
        assert_eq!(again, CsisIrqSrc::default());
    }

    #[test]
    fn test_irq_mask_with_frame_id_decoder() {
        let bank = link_bank();
        s_irq_msk(&bank, true, false);
        assert_eq!(regfield::get(&bank, &CSIS_F_MSK_FS), 0x3ff);
        s_irq_msk(&bank, true, true);
        assert_eq!(regfield::get(&bank, &CSIS_F_MSK_FS), 0);
        assert_eq!(regfield::get(&bank, &CSIS_F_MSK_ERR), 1);
        s_irq_msk(&bank, false, false);
        assert!(irq_masked(&bank));
    }

    #[test]
    fn test_config_and_fcount() {
        let bank = link_bank();
        s_config(&bank, 1, &VciConfig::image(1920, 1080, HwFormat::Raw10), false);
        assert_eq!(regfield::get(&bank, &CSIS_F_HRESOL.at(1)), 1920);
        assert_eq!(regfield::get(&bank, &CSIS_F_VRESOL.at(1)), 1080);
        assert_eq!(regfield::get(&bank, &CSIS_F_DATAFORMAT.at(1)), 0x2b);
        assert_eq!(regfield::get(&bank, &CSIS_F_HRESOL.at(0)), 0);

        bank.poke(CSIS_F_FCNT_VC.at(0).offset, 41);
        assert_eq!(s_fcount(&bank, 0, 0), 41);
        assert_eq!(g_fcount(&bank, 0), 0);
    }

    #[test]
    fn test_error_bit_iteration() {
        let mask = CsisErr::LostFeVc.bit() | CsisErr::Crc.bit();
        let errs: alloc::vec::Vec<_> = CsisErr::iter_bits(mask).collect();
        assert_eq!(errs, [CsisErr::Crc, CsisErr::LostFeVc]);
        assert_eq!(DmaErr::iter_bits(DmaErr::AbortDone.bit()).count(), 1);
        assert_eq!(csis_version(5, 4, 0, 0), 0x0504_0000);
    }

    #[test]
    fn test_lane_and_enable() {
        let bank = link_bank();
        s_lane(&bank, 4, true);
        assert_eq!(regfield::get(&bank, &CSIS_F_LANE_NUMBER), 3);
        enable(&bank, true);
        assert!(is_enabled(&bank));
        disable(&bank);
        assert!(!is_enabled(&bank));
    }
}
