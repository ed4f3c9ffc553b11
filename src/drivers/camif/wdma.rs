//! WDMA 通道管理
//!
//! 包含:
//! - `WdmaModule`: 多个通道共享的公共块 (公共复位、SBWC、帧 id 解码、测试图样)
//! - `WdmaChannel`: 一个写 DMA 引擎, 每个 VC 一组寄存器
//! - `WdmaPool`: 全部通道的池, stream on 时借出, stream off 时归还

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use super::pdp_top::pattern_timing;
use super::sensor_cfg::{ExtFormat, HwFormat};
use super::subdev::SbwcType;
use crate::config::{CSIS_MAX_DMA_SLOT, DMA_VIRTUAL_CH_MAX};
use crate::error::{CsiError, CsiResult};
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

// ============ 通道控制寄存器 ============

pub const WDMA_CTL_SIZE: usize = 0x100;

pub const DMA_R_CTRL: usize = 0x00;
pub const DMA_R_INT_MSK: usize = 0x04;
pub const DMA_R_INT_SRC: usize = 0x08;
pub const DMA_R_ERR_SRC_VC0: usize = 0x40;
pub const DMA_R_FRO_CNT_VC0: usize = 0x80;
pub const DMA_R_INPUT_MUX: usize = 0xc0;
pub const DMA_R_INPUT_VC_LIST: usize = 0xc4;

pub const DMA_F_ABORT_REQ: RegField = RegField::rw("ABORT_REQ", DMA_R_CTRL, 0, 1);

pub const DMA_F_START: RegField = RegField::rw("DMA_START", DMA_R_INT_SRC, 0, 10);
pub const DMA_F_END: RegField = RegField::rw("DMA_END", DMA_R_INT_SRC, 10, 10);
pub const DMA_F_ABORT_DONE: RegField = RegField::rw("ABORT_DONE", DMA_R_INT_SRC, 20, 1);

pub const DMA_F_ERR_SRC_VC: RegField =
    RegField::rw("DMA_ERR_SRC_VC", DMA_R_ERR_SRC_VC0, 0, 8).with_stride(4);
pub const DMA_F_FRO_NUM_VC: RegField =
    RegField::rw("FRO_NUM", DMA_R_FRO_CNT_VC0, 0, 8).with_stride(4);

pub const DMA_F_MUX_SRC_CSI: RegField =
    RegField::rw("MUX_SRC_CSI", DMA_R_INPUT_MUX, 0, 6).with_reset(0x3f);
pub const DMA_F_MUX_BNS_EN: RegField = RegField::rw("MUX_BNS_EN", DMA_R_INPUT_MUX, 8, 1);
pub const DMA_F_MUX_BNS_SEL: RegField = RegField::rw("MUX_BNS_SEL", DMA_R_INPUT_MUX, 9, 3);
pub const DMA_F_MUX_OTF_CH: RegField = RegField::rw("MUX_OTF_CH", DMA_R_INPUT_MUX, 12, 4);
pub const DMA_F_VC_LIST: RegField = RegField::rw("INPUT_VC_LIST", DMA_R_INPUT_VC_LIST, 0, 10);

// ============ 每个 VC 的寄存器 ============

pub const WDMA_VC_STRIDE: usize = 0x200;
pub const WDMA_VC_SIZE: usize = WDMA_VC_STRIDE * DMA_VIRTUAL_CH_MAX;

const VC_R_CTRL: usize = 0x00;
const VC_R_FMT: usize = 0x04;
const VC_R_RESOL: usize = 0x08;
const VC_R_STRIDE: usize = 0x0c;
const VC_R_FRAMEPTR: usize = 0x10;
const VC_R_MULTIBUF: usize = 0x14;
const VC_R_FCNT_SEQ: usize = 0x18;
const VC_R_ADDR0: usize = 0x20;
const VC_R_HDR_ADDR0: usize = 0xa0;

pub const VC_F_OUT_EN: RegField = RegField::rw("OUT_EN", VC_R_CTRL, 0, 1).with_stride(WDMA_VC_STRIDE);
pub const VC_F_CUR_EN: RegField = RegField::ro("CUR_EN", VC_R_CTRL, 1, 1).with_stride(WDMA_VC_STRIDE);
pub const VC_F_SW_RESET: RegField =
    RegField::rw("VC_SW_RESET", VC_R_CTRL, 2, 1).with_stride(WDMA_VC_STRIDE);

pub const VC_F_DATAFORMAT: RegField =
    RegField::rw("DATAFORMAT", VC_R_FMT, 0, 6).with_stride(WDMA_VC_STRIDE);
pub const VC_F_BITWIDTH: RegField =
    RegField::rw("BITWIDTH", VC_R_FMT, 8, 5).with_stride(WDMA_VC_STRIDE);
pub const VC_F_PACKED: RegField = RegField::rw("PACKED", VC_R_FMT, 13, 1).with_stride(WDMA_VC_STRIDE);
pub const VC_F_SBWC: RegField = RegField::rw("SBWC_TYPE", VC_R_FMT, 16, 2).with_stride(WDMA_VC_STRIDE);
pub const VC_F_POTF: RegField = RegField::rw("POTF_EN", VC_R_FMT, 18, 1).with_stride(WDMA_VC_STRIDE);
pub const VC_F_OTF_FMT: RegField =
    RegField::rw("OTF_FORMAT", VC_R_FMT, 20, 6).with_stride(WDMA_VC_STRIDE);

pub const VC_F_WIDTH: RegField = RegField::rw("WIDTH", VC_R_RESOL, 0, 16).with_stride(WDMA_VC_STRIDE);
pub const VC_F_HEIGHT: RegField =
    RegField::rw("HEIGHT", VC_R_RESOL, 16, 16).with_stride(WDMA_VC_STRIDE);
pub const VC_F_STRIDE: RegField =
    RegField::rw("STRIDE", VC_R_STRIDE, 0, 32).with_stride(WDMA_VC_STRIDE);

pub const VC_F_FRAMEPTR: RegField =
    RegField::rw("FRAMEPTR", VC_R_FRAMEPTR, 0, 6).with_stride(WDMA_VC_STRIDE);
pub const VC_F_FRAMEPTR_CLR: RegField =
    RegField::rw("FRAMEPTR_CLR", VC_R_FRAMEPTR, 8, 1).with_stride(WDMA_VC_STRIDE);

pub const VC_F_MULTIBUF_EN: RegField =
    RegField::rw("MULTIBUF_EN", VC_R_MULTIBUF, 0, 1).with_stride(WDMA_VC_STRIDE);
pub const VC_F_MULTIBUF_NUM: RegField =
    RegField::rw("MULTIBUF_NUM", VC_R_MULTIBUF, 8, 5).with_stride(WDMA_VC_STRIDE);
pub const VC_F_FCNT_SEQ: RegField =
    RegField::rw("FCNT_SEQ_ADDR", VC_R_FCNT_SEQ, 0, 32).with_stride(WDMA_VC_STRIDE);

/// 地址寄存器保存 DVA[35:4]
const DMA_ADDR_SHIFT: u32 = 4;

fn addr_reg(base: usize, vc: usize, slot: usize) -> usize {
    vc * WDMA_VC_STRIDE + base + slot * 4
}

// ============ 公共块寄存器 ============

pub const WDMA_CMN_SIZE: usize = 0x100;

const CMN_R_CTRL: usize = 0x00;
const CMN_R_SBWC: usize = 0x04;
const CMN_R_FID_DEC: usize = 0x08;
const CMN_R_FRAME_ID0: usize = 0x10;
const CMN_R_FRAME_ID1: usize = 0x14;
const CMN_R_PTRN_CTRL: usize = 0x20;
const CMN_R_PTRN_SIZE: usize = 0x24;
const CMN_R_PTRN_HBLANK: usize = 0x28;
const CMN_R_PTRN_VBLANK: usize = 0x2c;
const CMN_R_PTRN_D2D: usize = 0x30;
const CMN_R_FRO_CLR: usize = 0x40;

pub const CMN_F_IP_PROCESSING: RegField = RegField::rw("IP_PROCESSING", CMN_R_CTRL, 0, 1);
pub const CMN_F_SBWC_CH: RegField = RegField::rw("SBWC_CH", CMN_R_SBWC, 0, 4);
pub const CMN_F_FID_DEC_EN: RegField = RegField::rw("FID_DEC_EN", CMN_R_FID_DEC, 0, 8);
pub const CMN_F_PTRN_EN: RegField = RegField::rw("PTRN_EN", CMN_R_PTRN_CTRL, 0, 1);
pub const CMN_F_PTRN_WIDTH: RegField = RegField::rw("PTRN_WIDTH", CMN_R_PTRN_SIZE, 0, 16);
pub const CMN_F_PTRN_HEIGHT: RegField = RegField::rw("PTRN_HEIGHT", CMN_R_PTRN_SIZE, 16, 16);
pub const CMN_F_PTRN_HBLANK: RegField = RegField::rw("PTRN_HBLANK", CMN_R_PTRN_HBLANK, 0, 16);
pub const CMN_F_PTRN_VBLANK: RegField = RegField::rw("PTRN_VBLANK", CMN_R_PTRN_VBLANK, 0, 24);
pub const CMN_F_PTRN_D2D: RegField = RegField::rw("PTRN_D2D", CMN_R_PTRN_D2D, 0, 16);
pub const CMN_F_FRO_CLR: RegField = RegField::rw("FRO_CLR", CMN_R_FRO_CLR, 0, 8);

/// 公共块带有自己的测试图样发生器
pub const WDMA_MODULE_QUIRK_HAS_TEST_PATTERN_GEN: u32 = 1 << 0;

/// WDMA 公共块
pub struct WdmaModule {
    pub id: u32,
    pub regs: Arc<dyn RegisterBank>,
    /// 电源引用计数
    pub active_cnt: AtomicI32,
    quirks: u32,
}

impl WdmaModule {
    pub fn new(id: u32, regs: Arc<dyn RegisterBank>, quirks: u32) -> Self {
        WdmaModule {
            id,
            regs,
            active_cnt: AtomicI32::new(0),
            quirks,
        }
    }

    pub fn test_quirk(&self, quirk: u32) -> bool {
        self.quirks & quirk != 0
    }

    /// 公共块 IP processing 开关
    pub fn common_reset(&self, on: bool) {
        regfield::write(&*self.regs, &CMN_F_IP_PROCESSING, on as u32);
    }

    pub fn ip_processing(&self) -> bool {
        regfield::get(&*self.regs, &CMN_F_IP_PROCESSING) != 0
    }

    pub fn s_sbwc_ch(&self, ch: u32) {
        regfield::write(&*self.regs, &CMN_F_SBWC_CH, ch);
    }

    pub fn s_frame_id_decoder(&self, ch: u32, enable: bool) {
        let cur = regfield::get(&*self.regs, &CMN_F_FID_DEC_EN);
        let bit = 1 << (ch % 8);
        let val = if enable { cur | bit } else { cur & !bit };
        regfield::write(&*self.regs, &CMN_F_FID_DEC_EN, val);
    }

    pub fn frame_id_decoder_enabled(&self, ch: u32) -> bool {
        regfield::get(&*self.regs, &CMN_F_FID_DEC_EN) & (1 << (ch % 8)) != 0
    }

    /// 帧 id 解码器锁存的 64 位帧 id
    pub fn g_frame_id(&self) -> u64 {
        let lo = self.regs.read32(CMN_R_FRAME_ID0) as u64;
        let hi = self.regs.read32(CMN_R_FRAME_ID1) as u64;
        (hi << 32) | lo
    }

    pub fn clear_fro_count(&self, ch: u32) {
        regfield::write(&*self.regs, &CMN_F_FRO_CLR, 1 << (ch % 8));
    }

    pub fn pattern_enable(&self, width: u32, height: u32, fps: u32, clk_hz: u32) -> CsiResult<()> {
        if !self.test_quirk(WDMA_MODULE_QUIRK_HAS_TEST_PATTERN_GEN) {
            return Err(CsiError::NoDevice);
        }
        if width == 0 || height == 0 {
            return Err(CsiError::InvalidArgument);
        }

        let t = pattern_timing(width, height, fps, clk_hz);
        let regs = &*self.regs;
        regfield::write(regs, &CMN_F_PTRN_WIDTH, width);
        regfield::write(regs, &CMN_F_PTRN_HEIGHT, height);
        regfield::write(regs, &CMN_F_PTRN_HBLANK, t.hblank.min(CMN_F_PTRN_HBLANK.mask()));
        regfield::write(regs, &CMN_F_PTRN_VBLANK, t.vblank.min(CMN_F_PTRN_VBLANK.mask()));
        regfield::write(regs, &CMN_F_PTRN_D2D, t.d2d);
        regfield::write(regs, &CMN_F_PTRN_EN, 1);
        kinfo!("[WDMA-MOD{}] pattern {}x{}@{} vblank {}", self.id, width, height, fps, t.vblank);
        Ok(())
    }

    pub fn pattern_disable(&self) {
        regfield::write(&*self.regs, &CMN_F_PTRN_EN, 0);
    }

    pub fn pattern_enabled(&self) -> bool {
        regfield::get(&*self.regs, &CMN_F_PTRN_EN) != 0
    }

    pub fn dump(&self) {
        super::csis_hw::dump_bank("WDMA-CMN", &*self.regs, WDMA_CMN_SIZE);
    }
}

// ============ 通道 ============

/// 一次 DMA 中断读到的中断源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaIrqSrc {
    pub dma_start: u32,
    pub dma_end: u32,
    pub dma_abort: bool,
    pub err_flag: bool,
    pub err_id: [u32; DMA_VIRTUAL_CH_MAX],
}

impl DmaIrqSrc {
    /// 合并 stat WDMA 的中断源
    pub fn merge(&mut self, other: &DmaIrqSrc) {
        self.dma_start |= other.dma_start;
        self.dma_end |= other.dma_end;
        self.dma_abort |= other.dma_abort;
        self.err_flag |= other.err_flag;
        for (a, b) in self.err_id.iter_mut().zip(other.err_id.iter()) {
            *a |= *b;
        }
    }
}

/// DMA 输出配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaConfig {
    pub width: u32,
    pub height: u32,
    pub hwformat: HwFormat,
    pub bitwidth: u32,
    pub packed: bool,
    pub stride: u32,
    pub sbwc: SbwcType,
}

/// 写 DMA 通道
pub struct WdmaChannel {
    pub ch: u32,
    pub irq: u32,
    pub irq_name: String,
    pub regs_ctl: Arc<dyn RegisterBank>,
    pub regs_vc: Arc<dyn RegisterBank>,
    /// 所属公共块编号
    pub module_id: u32,
    dbg_start: [AtomicU32; DMA_VIRTUAL_CH_MAX],
    dbg_end: [AtomicU32; DMA_VIRTUAL_CH_MAX],
}

impl WdmaChannel {
    pub fn new(
        ch: u32,
        irq: u32,
        regs_ctl: Arc<dyn RegisterBank>,
        regs_vc: Arc<dyn RegisterBank>,
        module_id: u32,
    ) -> Self {
        WdmaChannel {
            ch,
            irq,
            irq_name: alloc::format!("CSIS-DMA{}", ch),
            regs_ctl,
            regs_vc,
            module_id,
            dbg_start: Default::default(),
            dbg_end: Default::default(),
        }
    }

    fn vc_regs(&self) -> &dyn RegisterBank {
        &*self.regs_vc
    }

    fn ctl_regs(&self) -> &dyn RegisterBank {
        &*self.regs_ctl
    }

    /// 复位一个 VC 的 FIFO 和状态
    pub fn reset_dma(&self, vc: usize) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        let regs = self.vc_regs();
        regfield::write(regs, &VC_F_OUT_EN.at(vc), 0);
        regfield::write(regs, &VC_F_SW_RESET.at(vc), 1);
        regfield::write(regs, &VC_F_SW_RESET.at(vc), 0);
        regfield::write(regs, &VC_F_FRAMEPTR.at(vc), 0);
    }

    pub fn set_fro_count(&self, batch_count: u32, vc: usize) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        // 硬件按 batch - 1 计数
        regfield::write(self.ctl_regs(), &DMA_F_FRO_NUM_VC.at(vc), batch_count.saturating_sub(1));
    }

    pub fn fro_count(&self, vc: usize) -> u32 {
        regfield::get(self.ctl_regs(), &DMA_F_FRO_NUM_VC.at(vc)) + 1
    }

    pub fn set_output_enable(&self, vc: usize, enable: bool) {
        if vc < DMA_VIRTUAL_CH_MAX {
            regfield::write(self.vc_regs(), &VC_F_OUT_EN.at(vc), enable as u32);
        }
    }

    /// 下一帧的输出使能
    pub fn output_enabled(&self, vc: usize) -> bool {
        vc < DMA_VIRTUAL_CH_MAX && regfield::get(self.vc_regs(), &VC_F_OUT_EN.at(vc)) != 0
    }

    /// 当前帧硬件锁存的输出使能
    pub fn cur_output_enabled(&self, vc: usize) -> bool {
        vc < DMA_VIRTUAL_CH_MAX && regfield::get(self.vc_regs(), &VC_F_CUR_EN.at(vc)) != 0
    }

    pub fn set_frame_pointer(&self, vc: usize, ptr: u32, clear: bool) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        let regs = self.vc_regs();
        regfield::write(regs, &VC_F_FRAMEPTR_CLR.at(vc), clear as u32);
        regfield::write(regs, &VC_F_FRAMEPTR.at(vc), ptr);
    }

    pub fn frame_pointer(&self, vc: usize) -> u32 {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return 0;
        }
        regfield::get(self.vc_regs(), &VC_F_FRAMEPTR.at(vc))
    }

    pub fn set_dma_address(&self, vc: usize, slot: usize, dva: u64) {
        if vc >= DMA_VIRTUAL_CH_MAX || slot >= CSIS_MAX_DMA_SLOT {
            kerr!("[WDMA{}][VC{}] invalid dma slot {}", self.ch, vc, slot);
            return;
        }
        self.vc_regs()
            .write32(addr_reg(VC_R_ADDR0, vc, slot), (dva >> DMA_ADDR_SHIFT) as u32);
    }

    pub fn dma_address(&self, vc: usize, slot: usize) -> u64 {
        if vc >= DMA_VIRTUAL_CH_MAX || slot >= CSIS_MAX_DMA_SLOT {
            return 0;
        }
        (self.vc_regs().read32(addr_reg(VC_R_ADDR0, vc, slot)) as u64) << DMA_ADDR_SHIFT
    }

    /// SBWC 头地址
    pub fn set_header_address(&self, vc: usize, slot: usize, dva: u64) {
        if vc >= DMA_VIRTUAL_CH_MAX || slot >= CSIS_MAX_DMA_SLOT {
            kerr!("[WDMA{}][VC{}] invalid header slot {}", self.ch, vc, slot);
            return;
        }
        self.vc_regs()
            .write32(addr_reg(VC_R_HDR_ADDR0, vc, slot), (dva >> DMA_ADDR_SHIFT) as u32);
    }

    pub fn header_address(&self, vc: usize, slot: usize) -> u64 {
        if vc >= DMA_VIRTUAL_CH_MAX || slot >= CSIS_MAX_DMA_SLOT {
            return 0;
        }
        (self.vc_regs().read32(addr_reg(VC_R_HDR_ADDR0, vc, slot)) as u64) << DMA_ADDR_SHIFT
    }

    /// PD 缓冲屏蔽: 按帧计数序列选择写入的缓冲
    pub fn s_multibuf_fcntseq(&self, vc: usize, buffer_num: u32, seq_dva: u64, enable: bool) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        let regs = self.vc_regs();
        regfield::write(regs, &VC_F_MULTIBUF_NUM.at(vc), buffer_num);
        regfield::write(regs, &VC_F_FCNT_SEQ.at(vc), (seq_dva >> DMA_ADDR_SHIFT) as u32);
        regfield::write(regs, &VC_F_MULTIBUF_EN.at(vc), enable as u32);
    }

    pub fn request_abort(&self) {
        regfield::write(self.ctl_regs(), &DMA_F_ABORT_REQ, 1);
    }

    pub fn s_irq_msk(&self, enable: bool) {
        self.ctl_regs()
            .write32(DMA_R_INT_MSK, if enable { 0x003f_ffff } else { 0 });
    }

    pub fn irq_masked(&self) -> bool {
        self.ctl_regs().read32(DMA_R_INT_MSK) == 0
    }

    /// 读取并清除中断源
    pub fn irq_src(&self, clear: bool) -> DmaIrqSrc {
        let regs = self.ctl_regs();
        let raw = regs.read32(DMA_R_INT_SRC);
        if clear && raw != 0 {
            regs.write32(DMA_R_INT_SRC, raw);
        }

        let mut src = DmaIrqSrc {
            dma_start: DMA_F_START.extract(raw),
            dma_end: DMA_F_END.extract(raw),
            dma_abort: DMA_F_ABORT_DONE.extract(raw) != 0,
            ..Default::default()
        };
        for vc in 0..DMA_VIRTUAL_CH_MAX {
            let reg = DMA_F_ERR_SRC_VC.at(vc).offset;
            let err = regs.read32(reg);
            if err != 0 {
                if clear {
                    regs.write32(reg, err);
                }
                src.err_id[vc] = DMA_F_ERR_SRC_VC.extract(err);
                src.err_flag = true;
            }
        }
        src
    }

    /// 清除残留的错误源
    pub fn clear_errors(&self) {
        let regs = self.ctl_regs();
        for vc in 0..DMA_VIRTUAL_CH_MAX {
            let reg = DMA_F_ERR_SRC_VC.at(vc).offset;
            let err = regs.read32(reg);
            if err != 0 {
                regs.write32(reg, err);
            }
        }
    }

    pub fn dbg_cnt(&self, vc: usize, src: &DmaIrqSrc) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        if src.dma_start & (1 << vc) != 0 {
            self.dbg_start[vc].fetch_add(1, Ordering::Relaxed);
        }
        if src.dma_end & (1 << vc) != 0 {
            self.dbg_end[vc].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (start, end) 调试计数
    pub fn dbg_counts(&self, vc: usize) -> (u32, u32) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return (0, 0);
        }
        (
            self.dbg_start[vc].load(Ordering::Relaxed),
            self.dbg_end[vc].load(Ordering::Relaxed),
        )
    }

    pub fn s_config(&self, vc: usize, cfg: &DmaConfig) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        let regs = self.vc_regs();
        regfield::write(regs, &VC_F_DATAFORMAT.at(vc), cfg.hwformat.data_type());
        regfield::write(regs, &VC_F_BITWIDTH.at(vc), cfg.bitwidth);
        regfield::write(regs, &VC_F_PACKED.at(vc), cfg.packed as u32);
        regfield::write(regs, &VC_F_SBWC.at(vc), cfg.sbwc.code());
        regfield::write(regs, &VC_F_WIDTH.at(vc), cfg.width);
        regfield::write(regs, &VC_F_HEIGHT.at(vc), cfg.height);
        regfield::write(regs, &VC_F_STRIDE.at(vc), cfg.stride);
    }

    /// OTF 侧格式与 pOTF
    pub fn s_config_cmn(&self, vc: usize, extformat: ExtFormat, hwformat: HwFormat, potf: bool) {
        if vc >= DMA_VIRTUAL_CH_MAX {
            return;
        }
        let regs = self.vc_regs();
        regfield::write(regs, &VC_F_OTF_FMT.at(vc), hwformat.data_type());
        regfield::write(regs, &VC_F_POTF.at(vc), (potf || extformat.is_potf()) as u32);
    }

    pub fn dma_width(&self, vc: usize) -> u32 {
        regfield::get(self.vc_regs(), &VC_F_WIDTH.at(vc))
    }

    /// 输入 mux: CSI 链路、BNS 以及使用的链路 VC
    pub fn s_input_mux(&self, csi_ch: u32, bns: Option<u32>, otf_ch: u32, link_vc_list: u32) {
        let regs = self.ctl_regs();
        regfield::write(regs, &DMA_F_MUX_SRC_CSI, csi_ch);
        regfield::write(regs, &DMA_F_MUX_BNS_EN, bns.is_some() as u32);
        regfield::write(regs, &DMA_F_MUX_BNS_SEL, bns.unwrap_or(0));
        regfield::write(regs, &DMA_F_MUX_OTF_CH, otf_ch);
        regfield::write(regs, &DMA_F_VC_LIST, link_vc_list);
    }

    pub fn init_input_mux(&self) {
        let regs = self.ctl_regs();
        regfield::write(regs, &DMA_F_MUX_SRC_CSI, DMA_F_MUX_SRC_CSI.reset);
        regfield::write(regs, &DMA_F_MUX_BNS_EN, 0);
        regfield::write(regs, &DMA_F_VC_LIST, 0);
    }

    pub fn input_mux_src(&self) -> u32 {
        regfield::get(self.ctl_regs(), &DMA_F_MUX_SRC_CSI)
    }

    pub fn dump(&self) {
        let tag = alloc::format!("WDMA{}", self.ch);
        super::csis_hw::dump_bank(&tag, self.ctl_regs(), WDMA_CTL_SIZE);
        super::csis_hw::dump_bank(&tag, self.vc_regs(), 0x40);
    }
}

/// 所有 WDMA 通道的 W1C 寄存器
pub fn w1c_registers() -> [usize; 1 + DMA_VIRTUAL_CH_MAX] {
    let mut regs = [0; 1 + DMA_VIRTUAL_CH_MAX];
    regs[0] = DMA_R_INT_SRC;
    for (vc, reg) in regs[1..].iter_mut().enumerate() {
        *reg = DMA_F_ERR_SRC_VC.at(vc).offset;
    }
    regs
}

// ============ 通道池 ============

struct PoolSlot {
    chan: Arc<WdmaChannel>,
    in_use: bool,
}

/// WDMA 通道池, 由子系统上下文持有并注入每个 CSI 设备
pub struct WdmaPool {
    slots: spin::Mutex<Vec<PoolSlot>>,
    modules: spin::RwLock<Vec<Arc<WdmaModule>>>,
}

impl WdmaPool {
    pub fn new() -> Self {
        WdmaPool {
            slots: spin::Mutex::new(Vec::new()),
            modules: spin::RwLock::new(Vec::new()),
        }
    }

    pub fn register_module(&self, module: Arc<WdmaModule>) {
        self.modules.write().push(module);
    }

    pub fn register(&self, chan: Arc<WdmaChannel>) {
        self.slots.lock().push(PoolSlot { chan, in_use: false });
    }

    /// 借出一个空闲通道; `hint` 指定的通道空闲时优先使用
    pub fn acquire(&self, hint: Option<u32>) -> Option<Arc<WdmaChannel>> {
        let mut slots = self.slots.lock();

        let preferred = hint.and_then(|h| slots.iter().position(|s| !s.in_use && s.chan.ch == h));
        let pos = preferred.or_else(|| slots.iter().position(|s| !s.in_use))?;

        slots[pos].in_use = true;
        Some(slots[pos].chan.clone())
    }

    pub fn release(&self, chan: &Arc<WdmaChannel>) {
        let mut slots = self.slots.lock();
        match slots.iter_mut().find(|s| Arc::ptr_eq(&s.chan, chan)) {
            Some(slot) if slot.in_use => slot.in_use = false,
            Some(_) => kwarn!("[WDMA{}] released twice", chan.ch),
            None => kerr!("[WDMA{}] not from this pool", chan.ch),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.lock().iter().filter(|s| !s.in_use).count()
    }

    pub fn module(&self, id: u32) -> Option<Arc<WdmaModule>> {
        self.modules.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn module_of(&self, chan: &WdmaChannel) -> Option<Arc<WdmaModule>> {
        self.module(chan.module_id)
    }

    pub fn channels(&self) -> Vec<Arc<WdmaChannel>> {
        self.slots.lock().iter().map(|s| s.chan.clone()).collect()
    }
}

impl Default for WdmaPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::csis_hw::DmaErr;
    use crate::hal::mmio::SimBank;

    fn channel(ch: u32) -> Arc<WdmaChannel> {
        Arc::new(WdmaChannel::new(
            ch,
            100 + ch,
            Arc::new(SimBank::new(WDMA_CTL_SIZE).with_w1c(&w1c_registers())),
            Arc::new(SimBank::new(WDMA_VC_SIZE)),
            0,
        ))
    }

    fn pool(n: u32) -> WdmaPool {
        let pool = WdmaPool::new();
        for ch in 0..n {
            pool.register(channel(ch));
        }
        pool
    }

    #[test]
    fn test_pool_hint_and_fallback() {
        let pool = pool(3);
        let a = pool.acquire(Some(2)).unwrap();
        assert_eq!(a.ch, 2);
        let b = pool.acquire(Some(2)).unwrap();
        assert_eq!(b.ch, 0);
        let c = pool.acquire(None).unwrap();
        assert_eq!(c.ch, 1);
        assert!(pool.acquire(None).is_none());
        assert_eq!(pool.available(), 0);

        pool.release(&a);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire(None).map(|w| w.ch), Some(2));
    }

    #[test]
    fn test_pool_double_release_is_harmless() {
        let pool = pool(1);
        let a = pool.acquire(None).unwrap();
        pool.release(&a);
        pool.release(&a);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_dma_address_slots() {
        let w = channel(0);
        w.set_dma_address(1, 17, 0x1_2345_6780);
        assert_eq!(w.dma_address(1, 17), 0x1_2345_6780);
        assert_eq!(w.dma_address(1, 16), 0);
        w.set_header_address(0, 0, 0x8000);
        assert_eq!(w.header_address(0, 0), 0x8000);
        // 越界槽位被忽略
        w.set_dma_address(1, CSIS_MAX_DMA_SLOT, 0x40);
        assert_eq!(w.dma_address(1, CSIS_MAX_DMA_SLOT), 0);
    }

    #[test]
    fn test_output_enable_and_frameptr() {
        let w = channel(0);
        w.set_output_enable(3, true);
        assert!(w.output_enabled(3));
        assert!(!w.output_enabled(2));
        w.set_frame_pointer(3, 16, true);
        assert_eq!(w.frame_pointer(3), 16);
        w.reset_dma(3);
        assert!(!w.output_enabled(3));
        assert_eq!(w.frame_pointer(3), 0);
    }

    #[test]
    fn test_irq_src_and_merge() {
        let w = channel(0);
        let bank = SimBank::new(WDMA_CTL_SIZE).with_w1c(&w1c_registers());
        bank.raise(DMA_R_INT_SRC, 1 << 0 | 1 << 11 | 1 << 20);
        bank.raise(DMA_F_ERR_SRC_VC.at(1).offset, DmaErr::DmaFifoFull.bit());
        let stat = WdmaChannel::new(1, 101, Arc::new(bank), Arc::new(SimBank::new(WDMA_VC_SIZE)), 0);

        let mut src = w.irq_src(true);
        assert_eq!(src, DmaIrqSrc::default());
        src.merge(&stat.irq_src(true));
        assert_eq!(src.dma_start, 1);
        assert_eq!(src.dma_end, 0b10);
        assert!(src.dma_abort);
        assert_eq!(src.err_id[1], DmaErr::DmaFifoFull.bit());
        assert_eq!(stat.irq_src(true), DmaIrqSrc::default());
    }

    #[test]
    fn test_fro_count_and_module_ops() {
        let w = channel(0);
        w.set_fro_count(16, 0);
        assert_eq!(w.fro_count(0), 16);
        w.set_fro_count(1, 0);
        assert_eq!(w.fro_count(0), 1);

        let module = WdmaModule::new(0, Arc::new(SimBank::new(WDMA_CMN_SIZE)), 0);
        module.s_frame_id_decoder(2, true);
        assert!(module.frame_id_decoder_enabled(2));
        module.s_frame_id_decoder(2, false);
        assert!(!module.frame_id_decoder_enabled(2));
        assert_eq!(module.pattern_enable(64, 64, 30, 533_000_000), Err(CsiError::NoDevice));
    }
}
