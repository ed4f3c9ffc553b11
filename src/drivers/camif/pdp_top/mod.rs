//! CSIS_PDP_TOP: OTF 输出 mux 与 IBUF
//!
//! 决定每个 OTF 输出通道由哪些链路 VC 供给, 编程 mux 选择器,
//! 并配置每个 line context (LC) 的宽高、位宽和格式.
//! 不同硬件代的寄存器排布不同, 通过 `PdpTopOps` 在构造时选择实现.

mod banked;
mod interleaved;

pub use banked::BankedTop;
pub use interleaved::InterleavedTop;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::{CSIS_OTF_CH_LC_NUM, MAX_NUM_CSIS_OTF_CH};
use crate::drivers::camif::sensor_cfg::{HwFormat, SensorConfig};
use crate::error::{CsiError, CsiResult};
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

// ============ OTF 输出 ============

pub const CAMIF_OTF_OUT_SINGLE: usize = 0;
pub const CAMIF_OTF_OUT_SHORT: usize = 1;
pub const CAMIF_OTF_OUT_MID: usize = 2;
pub const CAMIF_OTF_OUT_MAX: usize = 3;

pub const CAMIF_VC_IMG: usize = 0;
pub const CAMIF_VC_HPD: usize = 1;
pub const CAMIF_VC_VPD: usize = 2;
pub const CAMIF_VC_ID_NUM: usize = 3;

/// link_vc_list 中未使用的槽
pub const LINK_VC_NONE: u8 = 0xff;
/// 未映射的 LC
pub const OTF_LC_NONE: u32 = 0xf;
/// mux 选择器 "无输入"
pub const OTF_MUX_NONE: u32 = 0x3f;

pub type LinkVcList = [u8; CSIS_OTF_CH_LC_NUM];

/// 一个 CSI 设备的 OTF 路由信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtfInfo {
    pub csi_ch: u32,
    pub otf_out_ch: [u32; CAMIF_OTF_OUT_MAX],
    pub otf_out_num: usize,
    /// 链路 VC 个数
    pub max_vc_num: u32,
    pub link_vc: [[u32; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX],
    pub otf_lc: [[u32; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX],
    pub link_vc_list: [LinkVcList; CAMIF_OTF_OUT_MAX],
    /// 只由 OTF 配置 tasklet 修改 `act_otf_out_num`
    pub req_otf_out_num: usize,
    pub act_otf_out_num: usize,
}

impl OtfInfo {
    pub fn new(csi_ch: u32) -> Self {
        OtfInfo {
            csi_ch,
            otf_out_ch: [0; CAMIF_OTF_OUT_MAX],
            otf_out_num: 0,
            max_vc_num: 0,
            link_vc: [[0; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX],
            otf_lc: [[OTF_LC_NONE; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX],
            link_vc_list: [[LINK_VC_NONE; CSIS_OTF_CH_LC_NUM]; CAMIF_OTF_OUT_MAX],
            req_otf_out_num: 0,
            act_otf_out_num: 0,
        }
    }

    /// 链路 VC 在某个 OTF 输出中的 LC 位置
    pub fn lc_of(&self, otf_out_id: usize, link_vc: u32) -> Option<usize> {
        self.link_vc_list
            .get(otf_out_id)?
            .iter()
            .position(|&vc| vc != LINK_VC_NONE && vc as u32 == link_vc)
    }
}

// ============ 寄存器表 ============

pub const PDP_TOP_REG_SIZE: usize = 0x100 + 0x100 * MAX_NUM_CSIS_OTF_CH;

pub const TOP_R_VERSION: usize = 0x00;
pub const TOP_R_QCH: usize = 0x04;
pub const TOP_R_IRQ_MSK: usize = 0x08;
pub const TOP_R_IRQ_SRC: usize = 0x0c;
pub const TOP_R_IRQ_CFG: usize = 0x10;
pub const TOP_R_OTF_MUX: usize = 0x20;
pub const TOP_R_FRAME_ID_EN: usize = 0x30;
pub const TOP_R_LC_MAP0: usize = 0x40;
pub const TOP_R_IBUF0: usize = 0x100;

const IBUF_STRIDE: usize = 0x100;
const IBUF_LC_STRIDE: usize = 0x10;
/// 每个 IBUF 块内可容纳的 LC 块数
const IBUF_LC_SLOTS: usize = IBUF_STRIDE / IBUF_LC_STRIDE;

pub const TOP_F_VERSION: RegField = RegField::ro("TOP_VERSION", TOP_R_VERSION, 0, 32);
pub const TOP_F_QACTIVE_ON: RegField = RegField::rw("QACTIVE_ON", TOP_R_QCH, 0, 1);
pub const TOP_F_IRQ_AUTO_CLR: RegField = RegField::rw("IRQ_AUTO_CLR", TOP_R_IRQ_CFG, 0, 1);
pub const TOP_F_FRAME_ID_EN: RegField =
    RegField::rw("FRAME_ID_EN", TOP_R_FRAME_ID_EN, 0, MAX_NUM_CSIS_OTF_CH as u32);

pub const TOP_F_LC_IMG: RegField = RegField::rw("LC_IMG", TOP_R_LC_MAP0, 0, 4).with_stride(4);
pub const TOP_F_LC_HPD: RegField = RegField::rw("LC_HPD", TOP_R_LC_MAP0, 4, 4).with_stride(4);
pub const TOP_F_LC_VPD: RegField = RegField::rw("LC_VPD", TOP_R_LC_MAP0, 8, 4).with_stride(4);

/// IBUF 使能, 每位一个 LC
pub const IBUF_F_EN: RegField =
    RegField::rw("IBUF_EN", TOP_R_IBUF0, 0, CSIS_OTF_CH_LC_NUM as u32).with_stride(IBUF_STRIDE);

// 下面的 LC 字段用 `lc_field(f, ch, lc)` 取得
const IBUF_F_WIDTH: RegField =
    RegField::rw("IBUF_WIDTH", TOP_R_IBUF0 + 0x10, 0, 16).with_stride(IBUF_LC_STRIDE);
const IBUF_F_HEIGHT: RegField =
    RegField::rw("IBUF_HEIGHT", TOP_R_IBUF0 + 0x10, 16, 16).with_stride(IBUF_LC_STRIDE);
const IBUF_F_BIT_MODE: RegField =
    RegField::rw("IBUF_BIT_MODE", TOP_R_IBUF0 + 0x14, 0, 2).with_stride(IBUF_LC_STRIDE);
const IBUF_F_USER_EMB: RegField =
    RegField::rw("IBUF_USER_EMB", TOP_R_IBUF0 + 0x14, 4, 1).with_stride(IBUF_LC_STRIDE);
const IBUF_F_POTF: RegField =
    RegField::rw("IBUF_POTF", TOP_R_IBUF0 + 0x14, 5, 1).with_stride(IBUF_LC_STRIDE);

pub const IBUF_F_PTRN_EN: RegField =
    RegField::rw("PTRN_EN", TOP_R_IBUF0 + 0x80, 0, 1).with_stride(IBUF_STRIDE);
pub const IBUF_F_PTRN_WIDTH: RegField =
    RegField::rw("PTRN_WIDTH", TOP_R_IBUF0 + 0x84, 0, 16).with_stride(IBUF_STRIDE);
pub const IBUF_F_PTRN_HEIGHT: RegField =
    RegField::rw("PTRN_HEIGHT", TOP_R_IBUF0 + 0x84, 16, 16).with_stride(IBUF_STRIDE);
pub const IBUF_F_PTRN_HBLANK: RegField =
    RegField::rw("PTRN_HBLANK", TOP_R_IBUF0 + 0x88, 0, 16).with_stride(IBUF_STRIDE);
pub const IBUF_F_PTRN_VBLANK: RegField =
    RegField::rw("PTRN_VBLANK", TOP_R_IBUF0 + 0x8c, 0, 24).with_stride(IBUF_STRIDE);
pub const IBUF_F_PTRN_D2D: RegField =
    RegField::rw("PTRN_D2D", TOP_R_IBUF0 + 0x90, 0, 16).with_stride(IBUF_STRIDE);

fn lc_field(field: RegField, otf_ch: usize, lc: usize) -> RegField {
    field.at(otf_ch * IBUF_LC_SLOTS + lc)
}

/// LC 字段的寄存器偏移, 供测试与 dump 使用
pub fn ibuf_lc_offset(otf_ch: usize, lc: usize) -> usize {
    lc_field(IBUF_F_WIDTH, otf_ch, lc).offset
}

pub fn ibuf_width(regs: &dyn RegisterBank, otf_ch: usize, lc: usize) -> u32 {
    regfield::get(regs, &lc_field(IBUF_F_WIDTH, otf_ch, lc))
}

pub fn ibuf_height(regs: &dyn RegisterBank, otf_ch: usize, lc: usize) -> u32 {
    regfield::get(regs, &lc_field(IBUF_F_HEIGHT, otf_ch, lc))
}

pub fn ibuf_bit_mode(regs: &dyn RegisterBank, otf_ch: usize, lc: usize) -> u32 {
    regfield::get(regs, &lc_field(IBUF_F_BIT_MODE, otf_ch, lc))
}

pub fn ibuf_enable_mask(regs: &dyn RegisterBank, otf_ch: usize) -> u32 {
    regfield::get(regs, &IBUF_F_EN.at(otf_ch))
}

/// IRQ 源中每个 OTF 通道 4 位
const IBUF_IRQ_BITS: u32 = 4;
pub const IBUF_IRQ_ERR_OVERFLOW: u32 = 1 << 0;
pub const IBUF_IRQ_ERR_STUCK: u32 = 1 << 1;
pub const IBUF_IRQ_ERR_PROTOCOL: u32 = 1 << 2;
pub const IBUF_IRQ_ERR_WRONG_SIZE: u32 = 1 << 3;

/// `err_status` 中 wrong-size 错误的起始位
pub const IBUF0_ERR_WRONGSIZE: u32 = 0;

pub fn ibuf_irq_bits(otf_ch: usize, bits: u32) -> u32 {
    bits << (otf_ch as u32 * IBUF_IRQ_BITS)
}

/// 按 OTF 通道解码的 IBUF 中断
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IbufIrq {
    pub raw: u32,
    /// 以下均为 OTF 通道位图
    pub overflow: u32,
    pub stuck: u32,
    pub protocol: u32,
    pub wrong_size: u32,
}

impl IbufIrq {
    pub fn decode(raw: u32) -> Self {
        let mut irq = IbufIrq {
            raw,
            ..Default::default()
        };
        for ch in 0..MAX_NUM_CSIS_OTF_CH {
            let bits = (raw >> (ch as u32 * IBUF_IRQ_BITS)) & 0xf;
            let bit = 1 << ch;
            if bits & IBUF_IRQ_ERR_OVERFLOW != 0 {
                irq.overflow |= bit;
            }
            if bits & IBUF_IRQ_ERR_STUCK != 0 {
                irq.stuck |= bit;
            }
            if bits & IBUF_IRQ_ERR_PROTOCOL != 0 {
                irq.protocol |= bit;
            }
            if bits & IBUF_IRQ_ERR_WRONG_SIZE != 0 {
                irq.wrong_size |= bit;
            }
        }
        irq
    }

    pub fn is_empty(&self) -> bool {
        self.raw == 0
    }
}

// ============ 测试图样时序 ============

/// 水平消隐下限 (时钟)
pub const PTRN_HBLANK_MIN: u32 = 32;
/// 垂直消隐字段可表示的最大值
pub const PTRN_VBLANK_MAX: u32 = (1 << 24) - 1;
/// 帧间 data-to-data 消隐
pub const PTRN_D2D_BLANK: u32 = 64;
/// 每时钟 4 个像素
const PTRN_PIXELS_PER_CLK: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternTiming {
    pub hvalid: u32,
    pub hblank: u32,
    pub vvalid: u32,
    pub vblank: u32,
    pub d2d: u32,
}

/// 由目标帧率和时钟计算消隐
pub fn pattern_timing(width: u32, height: u32, fps: u32, clk_hz: u32) -> PatternTiming {
    let hvalid = (width + PTRN_PIXELS_PER_CLK - 1) / PTRN_PIXELS_PER_CLK;
    let hblank = PTRN_HBLANK_MIN.max(hvalid / 10);
    let line = hvalid as u64 + hblank as u64;
    let vvalid = line * height as u64;
    let frame = clk_hz as u64 / fps.max(1) as u64;
    let vblank = frame.saturating_sub(vvalid).min(PTRN_VBLANK_MAX as u64);

    PatternTiming {
        hvalid,
        hblank,
        vvalid: vvalid.min(u32::MAX as u64) as u32,
        vblank: vblank as u32,
        d2d: PTRN_D2D_BLANK,
    }
}

/// RAW 格式对应的 IBUF bit_mode
pub fn bit_mode(hwformat: HwFormat) -> Option<u32> {
    match hwformat {
        HwFormat::Raw8 => Some(0),
        HwFormat::Raw10 => Some(1),
        HwFormat::Raw12 => Some(2),
        HwFormat::Raw14 => Some(3),
        _ => None,
    }
}

// ============ 硬件代 ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopVersion {
    V5_0,
    V5_20,
    V6_0,
    V6_1,
    V8_0,
    V13_0,
}

impl TopVersion {
    /// 交织排布: 链路 VC 按奇偶分给不同 OTF 输出
    pub fn is_interleaved(self) -> bool {
        matches!(self, TopVersion::V8_0 | TopVersion::V13_0)
    }

    pub fn name(self) -> &'static str {
        match self {
            TopVersion::V5_0 => "v5.0",
            TopVersion::V5_20 => "v5.20",
            TopVersion::V6_0 => "v6.0",
            TopVersion::V6_1 => "v6.1",
            TopVersion::V8_0 => "v8.0",
            TopVersion::V13_0 => "v13.0",
        }
    }
}

/// 每代硬件的 PDP_TOP 操作
///
/// 公共部分以默认方法给出, mux 与 link_vc_list 由各代实现.
pub trait PdpTopOps: Send + Sync {
    /// 某个 OTF 输出使用的链路 VC
    fn link_vc_list(&self, max_vc_num: u32, otf_out_id: usize) -> LinkVcList;

    /// 写 mux 选择器
    fn s_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize, sel: u32, otf_out_id: usize);

    fn g_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize) -> u32;

    fn s_link_vc_list(&self, info: &mut OtfInfo, otf_out_id: usize) {
        if otf_out_id < CAMIF_OTF_OUT_MAX {
            info.link_vc_list[otf_out_id] = self.link_vc_list(info.max_vc_num, otf_out_id);
        }
    }

    fn frame_id_en(&self, regs: &dyn RegisterBank, otf_ch: usize, enable: bool) {
        let cur = regfield::get(regs, &TOP_F_FRAME_ID_EN);
        let bit = 1 << otf_ch;
        let val = if enable { cur | bit } else { cur & !bit };
        regfield::write(regs, &TOP_F_FRAME_ID_EN, val);
    }

    fn qch_cfg(&self, regs: &dyn RegisterBank, on: bool) {
        regfield::write(regs, &TOP_F_QACTIVE_ON, on as u32);
    }

    fn irq_msk(&self, regs: &dyn RegisterBank, otf_ch: usize, on: bool) {
        let bits = ibuf_irq_bits(otf_ch, 0xf);
        let cur = regs.read32(TOP_R_IRQ_MSK);
        regs.write32(TOP_R_IRQ_MSK, if on { cur | bits } else { cur & !bits });
    }

    /// 读取中断源; 未配置自动清除时写回清除
    fn irq_src(&self, regs: &dyn RegisterBank) -> u32 {
        let raw = regs.read32(TOP_R_IRQ_SRC);
        if raw != 0 && regfield::get(regs, &TOP_F_IRQ_AUTO_CLR) == 0 {
            regs.write32(TOP_R_IRQ_SRC, raw);
        }
        raw
    }

    fn s_otf_lc(&self, regs: &dyn RegisterBank, otf_ch: usize, lc: &[u32; CAMIF_VC_ID_NUM]) {
        regfield::write(regs, &TOP_F_LC_IMG.at(otf_ch), lc[CAMIF_VC_IMG]);
        regfield::write(regs, &TOP_F_LC_HPD.at(otf_ch), lc[CAMIF_VC_HPD]);
        regfield::write(regs, &TOP_F_LC_VPD.at(otf_ch), lc[CAMIF_VC_VPD]);
    }

    /// 配置一个 OTF 输出的 IBUF, 返回写入的使能位图
    fn set_ibuf(
        &self,
        regs: &dyn RegisterBank,
        info: &OtfInfo,
        otf_out_id: usize,
        cfg: &SensorConfig,
        potf: bool,
    ) -> u32 {
        let otf_ch = info.otf_out_ch[otf_out_id] as usize;
        let mut en_mask = 0;

        for (lc, &link_vc) in info.link_vc_list[otf_out_id].iter().enumerate() {
            if link_vc == LINK_VC_NONE {
                continue;
            }
            let Some(vci) = cfg.input.get(link_vc as usize) else {
                continue;
            };
            if vci.width == 0 {
                continue;
            }

            regfield::write(regs, &lc_field(IBUF_F_WIDTH, otf_ch, lc), vci.width);
            regfield::write(regs, &lc_field(IBUF_F_HEIGHT, otf_ch, lc), vci.height);
            regfield::write(
                regs,
                &lc_field(IBUF_F_USER_EMB, otf_ch, lc),
                vci.extformat.is_user_embedded() as u32,
            );
            regfield::write(regs, &lc_field(IBUF_F_POTF, otf_ch, lc), potf as u32);

            match bit_mode(vci.hwformat) {
                Some(mode) => {
                    regfield::write(regs, &lc_field(IBUF_F_BIT_MODE, otf_ch, lc), mode);
                    en_mask |= 1 << lc;
                }
                None => {
                    let latched = regfield::get(regs, &lc_field(IBUF_F_BIT_MODE, otf_ch, lc));
                    kwarn!(
                        "[IBUF{}][LC{}] invalid hwformat({:#x}), keep bit_mode {}",
                        otf_ch,
                        lc,
                        vci.hwformat.data_type(),
                        latched
                    );
                }
            }
        }

        regfield::write(regs, &IBUF_F_EN.at(otf_ch), en_mask);
        en_mask
    }

    fn enable_ibuf_ptrn_gen(
        &self,
        regs: &dyn RegisterBank,
        otf_ch: usize,
        cfg: &SensorConfig,
        fps: u32,
        clk_hz: u32,
        on: bool,
    ) -> CsiResult<()> {
        if !on {
            regfield::write(regs, &IBUF_F_PTRN_EN.at(otf_ch), 0);
            return Ok(());
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(CsiError::InvalidArgument);
        }

        let t = pattern_timing(cfg.width, cfg.height, fps, clk_hz);
        regfield::write(regs, &IBUF_F_PTRN_WIDTH.at(otf_ch), cfg.width);
        regfield::write(regs, &IBUF_F_PTRN_HEIGHT.at(otf_ch), cfg.height);
        regfield::write(regs, &IBUF_F_PTRN_HBLANK.at(otf_ch), t.hblank);
        regfield::write(regs, &IBUF_F_PTRN_VBLANK.at(otf_ch), t.vblank);
        regfield::write(regs, &IBUF_F_PTRN_D2D.at(otf_ch), t.d2d);
        regfield::write(regs, &IBUF_F_PTRN_EN.at(otf_ch), 1);
        Ok(())
    }

    fn dump(&self, regs: &dyn RegisterBank) {
        crate::drivers::camif::csis_hw::dump_bank("PDP_TOP", regs, PDP_TOP_REG_SIZE);
    }
}

/// CSIS_PDP_TOP, 由所有 CSI 设备共享
pub struct PdpTop {
    pub version: TopVersion,
    regs: Arc<dyn RegisterBank>,
    ops: Box<dyn PdpTopOps>,
    /// 按 OTF 通道锁存的 wrong-size 错误
    err_status: AtomicU32,
    overflow_cnt: AtomicU32,
    lock: spin::Mutex<()>,
}

impl PdpTop {
    pub fn new(version: TopVersion, regs: Arc<dyn RegisterBank>) -> Self {
        let ops: Box<dyn PdpTopOps> = if version.is_interleaved() {
            Box::new(InterleavedTop)
        } else {
            Box::new(BankedTop)
        };
        kinfo!("[PDP_TOP] {} layout", version.name());
        PdpTop {
            version,
            regs,
            ops,
            err_status: AtomicU32::new(0),
            overflow_cnt: AtomicU32::new(0),
            lock: spin::Mutex::new(()),
        }
    }

    pub fn regs(&self) -> &dyn RegisterBank {
        &*self.regs
    }

    pub fn get_version(&self) -> u32 {
        regfield::get(&*self.regs, &TOP_F_VERSION)
    }

    pub fn compute_link_vc_list(&self, max_vc_num: u32, otf_out_id: usize) -> LinkVcList {
        self.ops.link_vc_list(max_vc_num, otf_out_id)
    }

    pub fn s_link_vc_list(&self, info: &mut OtfInfo, otf_out_id: usize) {
        self.ops.s_link_vc_list(info, otf_out_id);
    }

    /// 直接编程一个 OTF 通道的 mux
    pub fn set_otf_mux(&self, csi_ch: u32, otf_ch: usize, enable: bool) {
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            kerr!("[PDP_TOP] invalid otf_ch {}", otf_ch);
            return;
        }
        let _guard = self.lock.lock();
        let sel = if enable { csi_ch } else { OTF_MUX_NONE };
        self.ops.s_otf_mux_sel(&*self.regs, otf_ch, sel, CAMIF_OTF_OUT_SINGLE);
    }

    /// 所有 OTF 通道的 mux 置为无输入
    pub fn reset_mux(&self) {
        let _guard = self.lock.lock();
        for otf_ch in 0..MAX_NUM_CSIS_OTF_CH {
            self.ops
                .s_otf_mux_sel(&*self.regs, otf_ch, OTF_MUX_NONE, CAMIF_OTF_OUT_SINGLE);
        }
    }

    pub fn otf_mux(&self, otf_ch: usize) -> u32 {
        self.ops.g_otf_mux_sel(&*self.regs, otf_ch)
    }

    /// 打开或关闭一个 OTF 输出路径
    pub fn s_otf_out_mux(&self, info: &OtfInfo, otf_out_id: usize, enable: bool) {
        if otf_out_id >= CAMIF_OTF_OUT_MAX {
            kerr!("[PDP_TOP] invalid otf_out_id {}", otf_out_id);
            return;
        }
        let otf_ch = info.otf_out_ch[otf_out_id] as usize;
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            kerr!("[PDP_TOP] invalid otf_ch {}", otf_ch);
            return;
        }

        let regs = &*self.regs;
        let _guard = self.lock.lock();
        if enable {
            self.ops.s_otf_mux_sel(regs, otf_ch, info.csi_ch, otf_out_id);
            self.ops.s_otf_lc(regs, otf_ch, &info.otf_lc[otf_out_id]);
            self.ops.irq_msk(regs, otf_ch, true);
        } else {
            self.ops.irq_msk(regs, otf_ch, false);
            regfield::write(regs, &IBUF_F_EN.at(otf_ch), 0);
            self.ops.s_otf_lc(regs, otf_ch, &[OTF_LC_NONE; CAMIF_VC_ID_NUM]);
            self.ops.s_otf_mux_sel(regs, otf_ch, OTF_MUX_NONE, otf_out_id);
        }
        kdbg!(
            "[PDP_TOP] CSI{} -> OTF{} ({}) {}",
            info.csi_ch,
            otf_ch,
            otf_out_id,
            if enable { "on" } else { "off" }
        );
    }

    pub fn configure_ibuf(&self, info: &OtfInfo, otf_out_id: usize, cfg: &SensorConfig, potf: bool) -> u32 {
        if otf_out_id >= CAMIF_OTF_OUT_MAX
            || info.otf_out_ch[otf_out_id] as usize >= MAX_NUM_CSIS_OTF_CH
        {
            kerr!("[PDP_TOP] invalid otf_out_id {}", otf_out_id);
            return 0;
        }
        let _guard = self.lock.lock();
        self.ops.set_ibuf(&*self.regs, info, otf_out_id, cfg, potf)
    }

    pub fn enable_pattern_generator(
        &self,
        otf_ch: usize,
        cfg: &SensorConfig,
        fps: u32,
        clk_hz: u32,
        on: bool,
    ) -> CsiResult<()> {
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            return Err(CsiError::OutOfRange);
        }
        let _guard = self.lock.lock();
        self.ops.enable_ibuf_ptrn_gen(&*self.regs, otf_ch, cfg, fps, clk_hz, on)
    }

    pub fn pattern_enabled(&self, otf_ch: usize) -> bool {
        regfield::get(&*self.regs, &IBUF_F_PTRN_EN.at(otf_ch)) != 0
    }

    pub fn frame_id_en(&self, otf_ch: usize, enable: bool) {
        let _guard = self.lock.lock();
        self.ops.frame_id_en(&*self.regs, otf_ch, enable);
    }

    pub fn qch_cfg(&self, on: bool) {
        self.ops.qch_cfg(&*self.regs, on);
    }

    pub fn set_irq_auto_clear(&self, on: bool) {
        regfield::write(&*self.regs, &TOP_F_IRQ_AUTO_CLR, on as u32);
    }

    /// 读取并解码 IBUF 中断源
    pub fn read_irq_source(&self) -> IbufIrq {
        let irq = IbufIrq::decode(self.ops.irq_src(&*self.regs));
        if irq.is_empty() {
            return irq;
        }

        if irq.overflow != 0 {
            let cnt = self.overflow_cnt.fetch_add(1, Ordering::Relaxed) + 1;
            kwarn!("[PDP_TOP] IBUF overflow {:#x} (total {})", irq.overflow, cnt);
        }
        if irq.stuck != 0 || irq.protocol != 0 {
            kerr!("[PDP_TOP] IBUF stuck {:#x} protocol {:#x}", irq.stuck, irq.protocol);
        }
        if irq.wrong_size != 0 {
            kerr!("[PDP_TOP] IBUF wrong size {:#x}", irq.wrong_size);
            self.err_status
                .fetch_or(irq.wrong_size << IBUF0_ERR_WRONGSIZE, Ordering::SeqCst);
        }
        irq
    }

    /// 取出并清除某个 OTF 通道的 wrong-size 错误
    pub fn take_wrong_size(&self, otf_ch: usize) -> bool {
        let bit = 1 << (otf_ch as u32 + IBUF0_ERR_WRONGSIZE);
        self.err_status.fetch_and(!bit, Ordering::SeqCst) & bit != 0
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow_cnt.load(Ordering::Relaxed)
    }

    pub fn dump(&self) {
        self.ops.dump(&*self.regs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::sensor_cfg::VciConfig;
    use crate::hal::mmio::SimBank;

    fn top(version: TopVersion) -> (Arc<SimBank>, PdpTop) {
        let bank = Arc::new(SimBank::new(PDP_TOP_REG_SIZE).with_w1c(&[TOP_R_IRQ_SRC]));
        let top = PdpTop::new(version, bank.clone());
        (bank, top)
    }

    fn info_with_lists(top: &PdpTop, max_vc_num: u32) -> OtfInfo {
        let mut info = OtfInfo::new(2);
        info.max_vc_num = max_vc_num;
        info.otf_out_num = 1;
        top.s_link_vc_list(&mut info, CAMIF_OTF_OUT_SINGLE);
        info
    }

    #[test]
    fn test_pattern_vblank_monotonic_in_fps() {
        let clk = 533_000_000;
        let mut prev = u32::MAX;
        for fps in 1..=240 {
            let t = pattern_timing(1920, 1080, fps, clk);
            assert!(t.vblank <= prev, "fps {} vblank {} > {}", fps, t.vblank, prev);
            prev = t.vblank;
        }
    }

    #[test]
    fn test_pattern_closed_form() {
        let t = pattern_timing(1920, 1080, 60, 533_000_000);
        assert_eq!(t.hvalid, 480);
        assert_eq!(t.hblank, 48);
        assert_eq!(t.vvalid, 528 * 1080);
        assert_eq!(t.vblank, 533_000_000 / 60 - 528 * 1080);
        assert_eq!(t.d2d, PTRN_D2D_BLANK);

        // 窄图样使用最小水平消隐, 低帧率时垂直消隐被截断
        let t = pattern_timing(64, 4, 1, 533_000_000);
        assert_eq!(t.hblank, PTRN_HBLANK_MIN);
        assert_eq!(t.vblank, PTRN_VBLANK_MAX);

        // 帧时间小于有效区时消隐为 0
        assert_eq!(pattern_timing(4000, 3000, 1000, 1_000_000).vblank, 0);
    }

    #[test]
    fn test_ibuf_bit_mode_and_enable_mask() {
        let (bank, top) = top(TopVersion::V6_0);
        let mut cfg = SensorConfig::single(1920, 1080, HwFormat::Raw10, 30);
        cfg.input[1] = VciConfig::image(240, 1080, HwFormat::Raw12);
        cfg.input[2] = VciConfig::image(64, 2, HwFormat::Embedded8);
        cfg.max_vc = 2;

        let info = info_with_lists(&top, 3);
        // 先锁存一个 bit_mode, 未知格式时保留
        regfield::write(&*bank, &lc_field(IBUF_F_BIT_MODE, 0, 2), 3);

        let mask = top.configure_ibuf(&info, CAMIF_OTF_OUT_SINGLE, &cfg, false);
        assert_eq!(mask, 0b011);
        assert_eq!(ibuf_enable_mask(&*bank, 0), 0b011);
        assert_eq!(ibuf_bit_mode(&*bank, 0, 0), 1);
        assert_eq!(ibuf_bit_mode(&*bank, 0, 1), 2);
        assert_eq!(ibuf_bit_mode(&*bank, 0, 2), 3);
        assert_eq!(ibuf_width(&*bank, 0, 0), 1920);
        assert_eq!(ibuf_height(&*bank, 0, 1), 1080);
        assert_eq!(bank.write_count(IBUF_F_EN.at(0).offset), 1);
    }

    #[test]
    fn test_otf_out_mux_enable_disable() {
        let (_bank, top) = top(TopVersion::V8_0);
        let mut info = info_with_lists(&top, 1);
        info.otf_out_ch[CAMIF_OTF_OUT_SINGLE] = 1;
        info.otf_lc[CAMIF_OTF_OUT_SINGLE] = [0, OTF_LC_NONE, OTF_LC_NONE];

        top.reset_mux();
        top.s_otf_out_mux(&info, CAMIF_OTF_OUT_SINGLE, true);
        assert_eq!(top.otf_mux(1), 2);
        assert_eq!(top.otf_mux(0), OTF_MUX_NONE);
        top.s_otf_out_mux(&info, CAMIF_OTF_OUT_SINGLE, false);
        assert_eq!(top.otf_mux(1), OTF_MUX_NONE);
    }

    #[test]
    fn test_irq_source_decode_and_wrong_size_latch() {
        let (bank, top) = top(TopVersion::V6_1);
        bank.raise(
            TOP_R_IRQ_SRC,
            ibuf_irq_bits(0, IBUF_IRQ_ERR_OVERFLOW) | ibuf_irq_bits(2, IBUF_IRQ_ERR_WRONG_SIZE),
        );
        let irq = top.read_irq_source();
        assert_eq!(irq.overflow, 0b001);
        assert_eq!(irq.wrong_size, 0b100);
        assert_eq!(top.overflow_count(), 1);
        // 已清除
        assert!(top.read_irq_source().is_empty());

        assert!(top.take_wrong_size(2));
        assert!(!top.take_wrong_size(2));
        assert!(!top.take_wrong_size(0));
    }

    #[test]
    fn test_irq_source_auto_clear_keeps_register() {
        let (bank, top) = top(TopVersion::V6_1);
        top.set_irq_auto_clear(true);
        bank.raise(TOP_R_IRQ_SRC, ibuf_irq_bits(1, IBUF_IRQ_ERR_STUCK));
        assert_eq!(top.read_irq_source().stuck, 0b10);
        assert_eq!(bank.read32(TOP_R_IRQ_SRC), ibuf_irq_bits(1, IBUF_IRQ_ERR_STUCK));
    }

    #[test]
    fn test_ibuf_pattern_generator() {
        let (bank, top) = top(TopVersion::V13_0);
        let cfg = SensorConfig::single(1920, 1080, HwFormat::Raw10, 30);
        top.enable_pattern_generator(3, &cfg, 30, 533_000_000, true).unwrap();
        assert!(top.pattern_enabled(3));
        assert_eq!(regfield::get(&*bank, &IBUF_F_PTRN_HBLANK.at(3)), 48);
        top.enable_pattern_generator(3, &cfg, 30, 533_000_000, false).unwrap();
        assert!(!top.pattern_enabled(3));
        assert_eq!(
            top.enable_pattern_generator(4, &cfg, 30, 1, true),
            Err(CsiError::OutOfRange)
        );
    }

    #[test]
    fn test_lc_position_lookup() {
        let (_bank, top) = top(TopVersion::V8_0);
        let mut info = OtfInfo::new(0);
        info.max_vc_num = 10;
        top.s_link_vc_list(&mut info, CAMIF_OTF_OUT_SINGLE);
        top.s_link_vc_list(&mut info, CAMIF_OTF_OUT_SHORT);
        assert_eq!(info.lc_of(CAMIF_OTF_OUT_SINGLE, 4), Some(2));
        assert_eq!(info.lc_of(CAMIF_OTF_OUT_SHORT, 7), Some(3));
        assert_eq!(info.lc_of(CAMIF_OTF_OUT_SHORT, 4), None);
    }
}
