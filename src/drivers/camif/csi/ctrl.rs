//! 上层控制命令

use core::sync::atomic::Ordering;

use super::CsiDevice;
use crate::config::{CSI_VIRTUAL_CH_MAX, CSI_VVALID_WAIT_MAX_MS, DMA_VIRTUAL_CH_MAX};
use crate::drivers::camif::csis_hw;
use crate::drivers::camif::pdp_top::{CAMIF_OTF_OUT_MAX, CAMIF_OTF_OUT_SINGLE};
use crate::drivers::camif::wdma::WDMA_MODULE_QUIRK_HAS_TEST_PATTERN_GEN;
use crate::error::{CsiError, CsiResult};

/// 读控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiCtrl {
    /// 某个链路 VC 的硬件帧指针
    VcFramePtr(u32),
}

/// 私有命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiIoctl {
    /// 终止所有 DMA 并关闭输出
    DmaCancel,
    PatternEnable,
    PatternDisable,
    GetFrameId,
    /// 按目标帧率设置 DMA 批大小
    SetFrsControl(u32),
    GetHwFcount,
    GetVcFramePtr(u32),
    DmaAttach,
    GetDmaCh,
    SetOtfOut(usize),
    /// TAILPDAF VC 的帧计数序列缓冲
    SetPdBufMasking { dva: u64, enable: bool },
    SetChainFcount(u32),
    GetErrorCode,
    ClearErrorCode,
}

impl CsiDevice {
    pub fn g_ctrl(&self, ctrl: CsiCtrl) -> CsiResult<u32> {
        match ctrl {
            CsiCtrl::VcFramePtr(link_vc) => self.g_vc_frame_ptr(link_vc),
        }
    }

    fn g_vc_frame_ptr(&self, link_vc: u32) -> CsiResult<u32> {
        if link_vc == 0 || link_vc as usize >= CSI_VIRTUAL_CH_MAX {
            kerr!("[{}] invalid link vc {}", self.name, link_vc);
            return Err(CsiError::InvalidArgument);
        }
        let cfg = self.sensor_cfg().ok_or(CsiError::InvalidArgument)?;

        let mut frameptr = 0;
        for (idx, vc) in cfg.dma_targets(link_vc) {
            let Some(wdma) = self.attached_wdma(idx) else {
                kerr!("[{}][DMA{}] wdma is NULL", self.name, idx);
                return Err(CsiError::NoDevice);
            };
            frameptr = wdma.frame_pointer(vc);
        }
        Ok(frameptr)
    }

    /// 执行命令, 有返回值的命令返回 `Some`
    pub fn ioctl(&self, cmd: CsiIoctl) -> CsiResult<Option<u64>> {
        match cmd {
            CsiIoctl::DmaCancel => {
                for idx in 0..self.wdma_max() {
                    let Some(wdma) = self.attached_wdma(idx) else {
                        kerr!("[{}][DMA{}] wdma is NULL", self.name, idx);
                        return Err(CsiError::NoDevice);
                    };
                    wdma.request_abort();
                    for vc in 0..DMA_VIRTUAL_CH_MAX {
                        self.s_output_dma(idx, vc, false);
                    }
                }
                Ok(None)
            }
            CsiIoctl::PatternEnable => self.pattern(true).map(|_| None),
            CsiIoctl::PatternDisable => self.pattern(false).map(|_| None),
            CsiIoctl::GetFrameId => {
                if !self.f_id_dec() {
                    return Ok(None);
                }
                let module = self.rta.read().wdma_mod[0].clone().ok_or(CsiError::NoDevice)?;
                Ok(Some(module.g_frame_id()))
            }
            CsiIoctl::SetFrsControl(fps) => {
                let batch = match fps {
                    960 => 960 / 60,
                    480 => 480 / 60,
                    _ => return Ok(None),
                };
                self.dma_batch_num.store(batch, Ordering::SeqCst);
                kinfo!("[{}] FRS control {}fps, dma_batch_num {}", self.name, fps, batch);

                // 没有影子寄存器的版本需要立即改写 FRO 计数
                if csis_hw::get_version(&*self.base_reg) < csis_hw::CSIS_V5_4 {
                    if let Some(wdma) = self.attached_wdma(0) {
                        wdma.set_fro_count(batch, 0);
                    }
                }
                Ok(None)
            }
            CsiIoctl::GetHwFcount => Ok(Some(csis_hw::g_fcount(&*self.base_reg, 0) as u64)),
            CsiIoctl::GetVcFramePtr(link_vc) => self.g_vc_frame_ptr(link_vc).map(|p| Some(p as u64)),
            CsiIoctl::DmaAttach => self.dma_attach().map(|_| None),
            CsiIoctl::GetDmaCh => {
                let wdma = self.attached_wdma(0).ok_or(CsiError::NoDevice)?;
                Ok(Some(wdma.ch as u64))
            }
            CsiIoctl::SetOtfOut(num) => {
                if num == 0 || num > CAMIF_OTF_OUT_MAX {
                    return Err(CsiError::InvalidArgument);
                }
                let mut info = self.otf_info.lock();
                let num = num.min(info.otf_out_num.max(1));
                kinfo!("[{}] request OTF out {} -> {}", self.name, info.req_otf_out_num, num);
                info.req_otf_out_num = num;
                Ok(None)
            }
            CsiIoctl::SetPdBufMasking { dva, enable } => {
                self.set_using_vc_buffer(dva, enable);
                Ok(None)
            }
            CsiIoctl::SetChainFcount(fcount) => {
                self.sync_chain_fcount(fcount);
                Ok(None)
            }
            CsiIoctl::GetErrorCode => Ok(Some(self.g_error_code() as u64)),
            CsiIoctl::ClearErrorCode => {
                self.errors.lock().error_id_last = [0; CSI_VIRTUAL_CH_MAX];
                Ok(None)
            }
        }
    }

    /// 测试图样: 公共块自带发生器时用公共块, 否则用 PDP_TOP 的 IBUF 发生器
    fn pattern(&self, on: bool) -> CsiResult<()> {
        let module = self.rta.read().wdma_mod[0].clone().ok_or_else(|| {
            kerr!("[{}] wdma_mod is NULL", self.name);
            CsiError::NoDevice
        })?;
        let cfg = self.sensor_cfg().ok_or(CsiError::InvalidArgument)?;
        let debug = self.camsys.debug();

        if on {
            let mut waited = 0;
            while self.vvalid() && waited < CSI_VVALID_WAIT_MAX_MS {
                self.platform().mdelay(1);
                waited += 1;
            }
            if self.vvalid() {
                kwarn!("[{}] vvalid still high after {}ms", self.name, waited);
            }
        }

        let fps = if debug.pattern_fps != 0 { debug.pattern_fps } else { cfg.framerate };

        if module.test_quirk(WDMA_MODULE_QUIRK_HAS_TEST_PATTERN_GEN) {
            if on {
                module.pattern_enable(cfg.input[0].width, cfg.input[0].height, fps, debug.pattern_clk_hz)?;
            } else {
                module.pattern_disable();
            }
        } else if let Some(top) = self.camsys.top() {
            let otf_ch = self.otf_info.lock().otf_out_ch[CAMIF_OTF_OUT_SINGLE] as usize;
            top.enable_pattern_generator(otf_ch, &cfg, fps, self.platform().csis_clk_hz(), on)?;
        } else {
            kerr!("[{}] no pattern generator", self.name);
            return Err(CsiError::NoDevice);
        }

        kinfo!("[{}] pattern {} ({}fps)", self.name, if on { "on" } else { "off" }, fps);
        Ok(())
    }
}
