//! CSI 设备共享的附属硬件块
//!
//! - `Ebuf`: OTF 输出前的缓冲, 传感器中止时补发假帧
//! - `Mcb`: Q-channel 门控与 FIFO 复位
//! - `Bns`: 输入缩小器

use alloc::sync::Arc;

use crate::config::MAX_NUM_CSIS_OTF_CH;
use crate::drivers::camif::sensor_cfg::SensorConfig;
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

// ============ EBUF ============

pub const EBUF_REG_SIZE: usize = 0x100;

const EBUF_CH_STRIDE: usize = 0x10;
pub const EBUF_R_INT_SRC: usize = 0x80;

const EBUF_F_EN: RegField = RegField::rw("EBUF_EN", 0x00, 0, 1).with_stride(EBUF_CH_STRIDE);
const EBUF_F_AUTO_MODE: RegField = RegField::rw("EBUF_AUTO", 0x00, 1, 1).with_stride(EBUF_CH_STRIDE);
const EBUF_F_NUM: RegField = RegField::rw("EBUF_NUM", 0x00, 4, 4).with_stride(EBUF_CH_STRIDE);
const EBUF_F_FAKE_DONE_OFS: RegField =
    RegField::rw("FAKE_DONE_OFFSET", 0x00, 8, 5).with_stride(EBUF_CH_STRIDE);
const EBUF_F_VC0_WIDTH: RegField = RegField::rw("VC0_WIDTH", 0x04, 0, 16).with_stride(EBUF_CH_STRIDE);
const EBUF_F_VC0_HEIGHT: RegField = RegField::rw("VC0_HEIGHT", 0x04, 16, 16).with_stride(EBUF_CH_STRIDE);
const EBUF_F_VC1_WIDTH: RegField = RegField::rw("VC1_WIDTH", 0x08, 0, 16).with_stride(EBUF_CH_STRIDE);
const EBUF_F_VC1_HEIGHT: RegField = RegField::rw("VC1_HEIGHT", 0x08, 16, 16).with_stride(EBUF_CH_STRIDE);
const EBUF_F_FAKE_SIGN: RegField = RegField::rw("FAKE_SIGN", 0x0c, 0, 1).with_stride(EBUF_CH_STRIDE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbufMode {
    Auto,
    Manual,
}

/// EBUF 中断解码结果, 均为 EBUF 通道位图
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EbufIrq {
    pub sensor_abort: u32,
    pub fake_frame_done: u32,
}

pub struct Ebuf {
    pub regs: Arc<dyn RegisterBank>,
    pub irq: u32,
    pub num_of_ebuf: u32,
    /// 中断源中 fake frame done 位的起始位置
    pub fake_done_offset: u32,
    lock: spin::Mutex<()>,
}

impl Ebuf {
    pub fn new(regs: Arc<dyn RegisterBank>, irq: u32, num_of_ebuf: u32, fake_done_offset: u32) -> Self {
        Ebuf {
            regs,
            irq,
            num_of_ebuf,
            fake_done_offset,
            lock: spin::Mutex::new(()),
        }
    }

    pub fn s_enable(&self, on: bool, otf_ch: usize, mode: EbufMode) {
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            return;
        }
        let regs = &*self.regs;
        let _guard = self.lock.lock();
        if on {
            regfield::write(regs, &EBUF_F_AUTO_MODE.at(otf_ch), (mode == EbufMode::Auto) as u32);
            regfield::write(regs, &EBUF_F_NUM.at(otf_ch), self.num_of_ebuf);
            regfield::write(regs, &EBUF_F_FAKE_DONE_OFS.at(otf_ch), self.fake_done_offset);
        }
        regfield::write(regs, &EBUF_F_EN.at(otf_ch), on as u32);
    }

    /// 关闭后重新打开
    pub fn reset(&self, otf_ch: usize) {
        self.s_enable(false, otf_ch, EbufMode::Auto);
        self.s_enable(true, otf_ch, EbufMode::Auto);
    }

    pub fn is_enabled(&self, otf_ch: usize) -> bool {
        otf_ch < MAX_NUM_CSIS_OTF_CH && regfield::get(&*self.regs, &EBUF_F_EN.at(otf_ch)) != 0
    }

    /// 配置 VC0 / VC1 的尺寸, EBUF 只支持两个 VC
    pub fn s_cfg(&self, otf_ch: usize, vc: usize, width: u32, height: u32) {
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            return;
        }
        let regs = &*self.regs;
        let (w, h) = match vc {
            0 => (EBUF_F_VC0_WIDTH, EBUF_F_VC0_HEIGHT),
            1 => (EBUF_F_VC1_WIDTH, EBUF_F_VC1_HEIGHT),
            _ => return,
        };
        regfield::write(regs, &w.at(otf_ch), width);
        regfield::write(regs, &h.at(otf_ch), height);
    }

    /// 读取并清除中断源
    pub fn irq_src(&self) -> u32 {
        let raw = self.regs.read32(EBUF_R_INT_SRC);
        if raw != 0 {
            self.regs.write32(EBUF_R_INT_SRC, raw);
        }
        raw
    }

    pub fn decode(&self, status: u32) -> EbufIrq {
        let num = self.num_of_ebuf.min(16);
        let mask = if num == 0 { 0 } else { (1u32 << num) - 1 };
        EbufIrq {
            sensor_abort: status & mask,
            fake_frame_done: status.checked_shr(self.fake_done_offset).unwrap_or(0) & mask,
        }
    }

    pub fn s_fake_sign(&self, ebuf_ch: usize) {
        if ebuf_ch < MAX_NUM_CSIS_OTF_CH {
            regfield::write(&*self.regs, &EBUF_F_FAKE_SIGN.at(ebuf_ch), 1);
        }
    }

    pub fn fake_signed(&self, ebuf_ch: usize) -> bool {
        regfield::get(&*self.regs, &EBUF_F_FAKE_SIGN.at(ebuf_ch)) != 0
    }

    pub fn dump(&self) {
        super::csis_hw::dump_bank("EBUF", &*self.regs, EBUF_REG_SIZE);
    }
}

// ============ MCB ============

pub const MCB_REG_SIZE: usize = 0x40;

const MCB_F_QCH: RegField = RegField::rw("MCB_QCH_EN", 0x00, 0, 1);
const MCB_F_FIFO_RESET: RegField = RegField::rw("FIFO_RESET", 0x04, 0, MAX_NUM_CSIS_OTF_CH as u32);
const MCB_F_POTF_CTRL: RegField = RegField::rw("POTF_CTRL", 0x08, 0, 1);

pub struct Mcb {
    pub regs: Arc<dyn RegisterBank>,
    /// 使用 MCB 的 OTF 通道位图
    active_ch: spin::Mutex<u32>,
}

impl Mcb {
    pub fn new(regs: Arc<dyn RegisterBank>) -> Self {
        Mcb {
            regs,
            active_ch: spin::Mutex::new(0),
        }
    }

    /// 第一个使用者打开 Q-channel
    pub fn attach(&self, otf_ch: usize) {
        let mut active = self.active_ch.lock();
        if *active == 0 {
            regfield::write(&*self.regs, &MCB_F_QCH, 1);
        }
        *active |= 1 << otf_ch;
    }

    /// 最后一个使用者关闭 Q-channel, 然后复位该通道 FIFO
    pub fn detach(&self, otf_ch: usize) {
        {
            let mut active = self.active_ch.lock();
            *active &= !(1 << otf_ch);
            if *active == 0 {
                regfield::write(&*self.regs, &MCB_F_QCH, 0);
            }
        }
        self.fifo_reset(otf_ch);
    }

    pub fn active_ch(&self) -> u32 {
        *self.active_ch.lock()
    }

    pub fn qch_enabled(&self) -> bool {
        regfield::get(&*self.regs, &MCB_F_QCH) != 0
    }

    pub fn fifo_reset(&self, otf_ch: usize) {
        let bit = 1 << otf_ch;
        let cur = regfield::get(&*self.regs, &MCB_F_FIFO_RESET);
        regfield::write(&*self.regs, &MCB_F_FIFO_RESET, cur | bit);
        regfield::write(&*self.regs, &MCB_F_FIFO_RESET, cur & !bit);
    }

    pub fn potf_ctrl(&self) {
        regfield::write(&*self.regs, &MCB_F_POTF_CTRL, 1);
    }

    pub fn dump(&self) {
        super::csis_hw::dump_bank("MCB", &*self.regs, MCB_REG_SIZE);
    }
}

// ============ BNS ============

pub const BNS_REG_SIZE: usize = 0x40;

const BNS_F_EN: RegField = RegField::rw("BNS_EN", 0x00, 0, 1);
const BNS_F_SRC_OTF: RegField = RegField::rw("BNS_SRC_OTF", 0x00, 4, 4);
const BNS_F_WIDTH: RegField = RegField::rw("BNS_IN_WIDTH", 0x04, 0, 16);
const BNS_F_HEIGHT: RegField = RegField::rw("BNS_IN_HEIGHT", 0x04, 16, 16);

pub struct Bns {
    pub regs: Arc<dyn RegisterBank>,
    pub id: u32,
}

impl Bns {
    pub fn new(id: u32, regs: Arc<dyn RegisterBank>) -> Self {
        Bns { regs, id }
    }

    pub fn cfg(&self, cfg: &SensorConfig, otf_ch: u32) {
        let regs = &*self.regs;
        regfield::write(regs, &BNS_F_SRC_OTF, otf_ch);
        regfield::write(regs, &BNS_F_WIDTH, cfg.input[0].width);
        regfield::write(regs, &BNS_F_HEIGHT, cfg.input[0].height);
        regfield::write(regs, &BNS_F_EN, 1);
    }

    pub fn reset(&self) {
        regfield::write(&*self.regs, &BNS_F_EN, 0);
    }

    pub fn is_enabled(&self) -> bool {
        regfield::get(&*self.regs, &BNS_F_EN) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mmio::SimBank;

    #[test]
    fn test_ebuf_irq_decode() {
        let bank = Arc::new(SimBank::new(EBUF_REG_SIZE).with_w1c(&[EBUF_R_INT_SRC]));
        let ebuf = Ebuf::new(bank.clone(), 40, 4, 8);
        bank.raise(EBUF_R_INT_SRC, 0b0010 | 0b0100 << 8);

        let status = ebuf.irq_src();
        let irq = ebuf.decode(status);
        assert_eq!(irq.sensor_abort, 0b0010);
        assert_eq!(irq.fake_frame_done, 0b0100);
        assert_eq!(ebuf.irq_src(), 0);
    }

    #[test]
    fn test_ebuf_enable_and_cfg() {
        let ebuf = Ebuf::new(Arc::new(SimBank::new(EBUF_REG_SIZE)), 40, 4, 8);
        ebuf.s_enable(true, 1, EbufMode::Auto);
        assert!(ebuf.is_enabled(1));
        ebuf.s_cfg(1, 0, 1920, 1080);
        ebuf.s_cfg(1, 2, 1, 1);
        assert_eq!(regfield::get(&*ebuf.regs, &EBUF_F_VC0_WIDTH.at(1)), 1920);
        ebuf.reset(1);
        assert!(ebuf.is_enabled(1));
        ebuf.s_enable(false, 1, EbufMode::Auto);
        assert!(!ebuf.is_enabled(1));
    }

    #[test]
    fn test_mcb_qch_refcount() {
        let mcb = Mcb::new(Arc::new(SimBank::new(MCB_REG_SIZE)));
        mcb.attach(0);
        mcb.attach(2);
        assert!(mcb.qch_enabled());
        mcb.detach(0);
        assert!(mcb.qch_enabled());
        mcb.detach(2);
        assert!(!mcb.qch_enabled());
        assert_eq!(mcb.active_ch(), 0);
    }

    #[test]
    fn test_bns_cfg_reset() {
        let bns = Bns::new(0, Arc::new(SimBank::new(BNS_REG_SIZE)));
        let cfg = SensorConfig::single(4000, 3000, crate::drivers::camif::sensor_cfg::HwFormat::Raw10, 30);
        bns.cfg(&cfg, 1);
        assert!(bns.is_enabled());
        bns.reset();
        assert!(!bns.is_enabled());
    }
}
