//! 帧起止处理与 tasklet
//!
//! 帧起止既可以来自链路中断, 也可以来自帧 id 解码模式下的 DMA 中断,
//! 或者 fake OTF 的软件仿真.

use core::sync::atomic::Ordering;

use super::{
    CsiDevice, CSIS_BUF_ERR_VC0, CSIS_START_STREAM, EXPECT_FRAME_END, EXPECT_FRAME_START,
};
use crate::config::{CSI_VIRTUAL_CH_MAX, DEBUG_FRAME_COUNT, IS_TIMESTAMP_HASH_KEY};
use crate::drivers::camif::csis_hw;
use crate::drivers::camif::frame::{BufState, FrameState, ShotResult};
use crate::drivers::camif::notify::CsiEvent;

/// fake OTF 仿真的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VvalidEvent {
    /// 帧有效期开始
    Valid,
    /// 进入消隐
    Blank,
}

const VC0_BIT: u32 = 1 << 0;

impl CsiDevice {
    // ============ 帧开始 ============

    pub(super) fn frame_start_inline(&self, fs_bits: u32) {
        self.sw_checker.store(EXPECT_FRAME_END, Ordering::SeqCst);
        self.vvalid.store(true, Ordering::SeqCst);

        if fs_bits & VC0_BIT == 0 {
            return;
        }

        let mut inc = 1;
        if !self.f_id_dec() {
            let chain_fcount = self.chain_fcount.load(Ordering::SeqCst);
            let cur = self.fcount.load(Ordering::SeqCst);
            if chain_fcount > cur {
                inc = chain_fcount - cur;
            }
            if inc != 1 {
                kwarn!("[{}] fcount is increased ({}->{})", self.name, cur, chain_fcount);
            }

            let hw_fcount = csis_hw::g_fcount(&*self.base_reg, 0);
            let prev = self.hw_fcount.swap(hw_fcount, Ordering::SeqCst);
            let delta = hw_fcount.wrapping_sub(prev);
            if delta > 1 {
                kwarn!(
                    "[{}] lost {} frame start (hw fcount {} -> {})",
                    self.name,
                    delta - 1,
                    prev,
                    hw_fcount
                );
            } else if delta == 0 {
                kdbg!("[{}] hw fcount not increased ({})", self.name, hw_fcount);
            }

            // 软件 FRO: 每个批次只报一次帧开始
            let batch = self.otf_batch_num();
            if batch > 1 && hw_fcount % batch != 1 {
                return;
            }
        }

        let fcount = self.fcount.fetch_add(inc, Ordering::SeqCst).wrapping_add(inc);
        if self.camsys.debug().csi_level > 0 {
            ktrace!("[{}][F{}] S", self.name, fcount);
        }

        // 消费线程可能晚一两帧才读取, 提前写好后两个槽位
        let timestamp = self.platform().ktime_ns();
        let timestampboot = self.platform().boottime_ns();
        {
            let mut ts = self.ts.lock();
            for ahead in 0..3 {
                let key = (fcount as usize + ahead) % IS_TIMESTAMP_HASH_KEY;
                ts.timestamp[key] = timestamp;
                ts.timestampboot[key] = timestampboot;
            }
        }

        {
            let mut info = self.debug_info.lock();
            let slot = &mut info[fcount as usize % DEBUG_FRAME_COUNT];
            slot.fcount = fcount;
            slot.instance = self.instance();
            slot.cpu = self.platform().cpu_id();
            slot.time_start_ns = timestamp;
        }

        self.host.notify(CsiEvent::Vsync { fcount });

        self.check_vc_dma_buf();
        self.s_vc_dma_multibuf();

        self.host.notify(CsiEvent::FrameStart { fcount });
        self.trigger_gtask(fcount);

        if self.f_id_dec() {
            let Some(module) = self.rta.read().wdma_mod[0].clone() else {
                kerr!("[{}] wdma_mod is NULL", self.name);
                return;
            };
            let frame_id = module.g_frame_id();
            self.ts.lock().frame_id[fcount as usize % IS_TIMESTAMP_HASH_KEY] = frame_id;
        }
    }

    /// 触发传感器组的下一个 shot, 没有待处理请求时限速打印丢帧
    fn trigger_gtask(&self, fcount: u32) {
        if self.host.trigger_shot(fcount) {
            self.drop_log.reset();
        } else if self.drop_log.should_log() {
            kinfo!(
                "[{}] no pending request, frame drop (fcount {}, drops {})",
                self.name,
                fcount,
                self.drop_log.count()
            );
        }
    }

    // ============ 帧结束 ============

    pub(super) fn frame_end_inline(&self, fe_bits: u32) {
        let fcount = self.fcount();

        self.sw_checker.store(EXPECT_FRAME_START, Ordering::SeqCst);
        self.vvalid.store(false, Ordering::SeqCst);

        {
            let info = self.otf_info.lock();
            if info.req_otf_out_num != info.act_otf_out_num {
                self.tasklet_otf_cfg.schedule();
            }
        }

        if fe_bits & VC0_BIT == 0 {
            return;
        }

        if !self.f_id_dec() {
            let batch = self.otf_batch_num();
            if batch > 1 && self.hw_fcount.load(Ordering::SeqCst) % batch != 0 {
                return;
            }
        }

        if self.camsys.debug().csi_level > 0 {
            ktrace!("[{}][F{}] E", self.name, fcount);
        }

        self.vblank_count.store(fcount, Ordering::SeqCst);
        self.host.notify(CsiEvent::Vblank { fcount });

        self.tasklet_end.schedule();

        let now = self.platform().ktime_ns();
        let mut info = self.debug_info.lock();
        info[fcount as usize % DEBUG_FRAME_COUNT].time_end_ns = now;
    }

    pub(super) fn frame_line_inline(&self) {
        self.tasklet_line.schedule();
    }

    /// fake OTF 模式下由上层补发帧起止
    pub fn emulate_irq(&self, event: VvalidEvent) {
        match event {
            VvalidEvent::Blank => self.frame_end_inline(VC0_BIT),
            VvalidEvent::Valid => self.frame_start_inline(VC0_BIT),
        }
    }

    // ============ 外部 VC 的 DMA 检查 ============

    /// 帧开始时检查外部 VC: 没有启动过 DMA 的 PROCESS 帧以错误完成
    pub(super) fn check_vc_dma_buf(&self) {
        if !self.test_bit(CSIS_START_STREAM) {
            return;
        }

        let fcount = self.fcount();
        for idx in 0..self.wdma_max() {
            for vc in 0..crate::config::DMA_VIRTUAL_CH_MAX {
                let Some(subdev) = self.dma_subdev(idx, vc) else {
                    continue;
                };
                if !subdev.is_open() {
                    continue;
                }
                let Some(wdma) = self.wdma_for(idx, vc) else {
                    kerr!("[{}][DMA{}][VC{}] wdma is NULL", self.name, idx, vc);
                    continue;
                };

                let mut ndone = None;
                {
                    let mut fm = subdev.framemgr.lock();
                    let mut en = self.dma_en.lock();

                    if let Some(index) = fm.peek(FrameState::Process) {
                        let pre = en.pre[idx][vc];
                        let cur = en.cur[idx][vc];
                        let hw_off = !wdma.cur_output_enabled(vc);

                        if let Some(frame) = fm.frame_mut(index) {
                            if pre == 0 && !cur {
                                kinfo!(
                                    "[{}][WDMA{}][VC{}] wq_csis_dma is being delayed",
                                    self.name,
                                    wdma.ch,
                                    vc
                                );
                                if hw_off {
                                    frame.result = ShotResult::Timeout;
                                }
                            }

                            if frame.result != ShotResult::Success {
                                kerr!(
                                    "[{}][F{}] NDONE({}, {:?})",
                                    subdev.name(),
                                    frame.fcount,
                                    index,
                                    frame.result
                                );
                                if fm.trans(index, FrameState::Complete).is_ok() {
                                    ndone = Some(index);
                                }
                            }
                        }
                    }

                    let cur = en.cur[idx][vc];
                    if en.pre[idx][vc] != cur as i8 {
                        let (req, pro, com) = Self::queued_counts(&fm);
                        kinfo!(
                            "[{}][WDMA{}][VC{}][F{}] DMA {} [{}/{}/{}]",
                            self.name,
                            wdma.ch,
                            vc,
                            fcount,
                            if cur { "on" } else { "off" },
                            req,
                            pro,
                            com
                        );
                        en.pre[idx][vc] = cur as i8;
                    }
                    en.cur[idx][vc] = false;
                }

                if let Some(index) = ndone {
                    subdev.buffer_done(index, BufState::Error);
                }
            }
        }
    }

    // ============ tasklet ============

    /// 在帧间隙应用 OTF 输出个数的变化
    pub(super) fn otf_cfg_tasklet(&self) {
        if !self.test_bit(CSIS_START_STREAM) || self.vvalid() {
            return;
        }
        let Some(top) = self.camsys.top() else {
            return;
        };
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };
        let potf = self.potf.load(Ordering::SeqCst);

        let mut info = self.otf_info.lock();
        let act = info.act_otf_out_num;
        let req = info.req_otf_out_num;

        if req > act {
            for id in act..req {
                top.s_otf_out_mux(&info, id, true);
                top.configure_ibuf(&info, id, &cfg, potf);
            }
        } else {
            for id in (req..act).rev() {
                top.s_otf_out_mux(&info, id, false);
            }
        }

        info.act_otf_out_num = req;
        kinfo!("[{}] OTF out {} -> {}", self.name, act, req);
    }

    /// 汇总本帧错误并上报帧结束
    pub(super) fn end_tasklet(&self) {
        let dma_num = self.wdma_max();
        let err_flag = {
            let errors = self.errors.lock();
            let dma = errors.dma_error_id[..dma_num]
                .iter()
                .flatten()
                .fold(0, |acc, e| acc | e);
            errors.link_any() | dma
        };

        if err_flag != 0 {
            self.err_handle();
        } else {
            self.error_count.store(0, Ordering::SeqCst);
            self.error_count_vc_overlap.store(0, Ordering::SeqCst);
        }

        let mut status = ShotResult::Success;
        for vc in 0..CSI_VIRTUAL_CH_MAX as u32 {
            if self.test_and_clear_bit(CSIS_BUF_ERR_VC0 + vc) {
                status = ShotResult::Corrupted;
            }
        }

        self.host.notify(CsiEvent::FrameEnd {
            fcount: self.fcount(),
            status,
        });
    }

    pub(super) fn line_tasklet(&self) {
        self.host.notify(CsiEvent::Line { fcount: self.fcount() });
    }
}
