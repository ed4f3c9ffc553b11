//! 链路与 DMA 错误的累计、打印与升级

use core::sync::atomic::Ordering;

use super::{CsiDevice, CSIS_BUF_ERR_VC0};
use crate::config::{
    PhyTune, CSI_ERR_COUNT, CSI_ERR_DUMP_INTERVAL, CSI_VIRTUAL_CH_MAX, DMA_VIRTUAL_CH_MAX,
};
use crate::drivers::camif::csis_hw::{self, CsisErr, DmaErr, CSIS_CRC_ERR_MASK};
use crate::drivers::camif::frame::{BufState, FrameState};
use crate::drivers::camif::notify::TelemetryEvent;

impl CsiDevice {
    fn abort_all_dma(&self) {
        let rta = self.rta.read();
        for wdma in rta.wdma.iter().flatten() {
            wdma.request_abort();
        }
        if let Some(stat) = &rta.stat {
            stat.request_abort();
        }
    }

    fn phy_tuning(&self) -> bool {
        self.camsys.debug().phy_tune != PhyTune::Disable
    }

    /// 累计链路错误; 本帧第一次出错时终止所有 DMA
    pub(super) fn err_check(&self, err_id: &[u32; CSI_VIRTUAL_CH_MAX]) {
        let prev = {
            let mut errors = self.errors.lock();
            let prev = errors.link_any();
            for (acc, e) in errors.error_id.iter_mut().zip(err_id.iter()) {
                *acc |= e;
            }
            prev
        };
        if prev == 0 && err_id.iter().any(|&e| e != 0) {
            self.abort_all_dma();
        }

        let cfg = self.sensor_cfg();
        for err in CsisErr::iter_bits(err_id[0]) {
            match err {
                CsisErr::LostFeVc => {
                    // 缺失的帧结束由软件补齐, 再按新的一帧开始
                    if let Some(cfg) = &cfg {
                        for (idx, vc) in cfg.dma_targets(0) {
                            self.s_output_dma(idx, vc, false);
                        }
                    }
                    self.frame_end_inline(1);
                    self.frame_start_inline(1);
                    self.crc_flag.store(true, Ordering::SeqCst);
                }
                CsisErr::LostFsVc => {
                    if let Some(cfg) = &cfg {
                        for (idx, vc) in cfg.dma_targets(0) {
                            self.s_output_dma(idx, vc, false);
                        }
                    }
                    self.crc_flag.store(true, Ordering::SeqCst);
                }
                CsisErr::Crc | CsisErr::MalCrc | CsisErr::CrcCphy => {
                    if self.phy_tuning() {
                        continue;
                    }
                    self.crc_flag.store(true, Ordering::SeqCst);
                    kerr!("[{}][F{}] {} error", self.name, self.fcount(), err.name());

                    // 同一帧只 dump 一次传感器
                    if prev & CSIS_CRC_ERR_MASK == 0 {
                        self.host.dump();
                    }
                    self.host.report_event(TelemetryEvent::LinkCrc);
                }
                CsisErr::OverflowVc | CsisErr::DeskewOver => {
                    kerr!("[{}][F{}] {} error", self.name, self.fcount(), err.name());
                    self.host.report_event(TelemetryEvent::CsiOverflow);
                }
                _ => {}
            }
        }
    }

    /// 累计某个 WDMA 的错误; 第一次出错时终止该 WDMA
    pub(super) fn dma_err_check(&self, err_id: &[u32; DMA_VIRTUAL_CH_MAX], idx: usize) {
        let prev = {
            let mut errors = self.errors.lock();
            let Some(slot) = errors.dma_error_id.get_mut(idx) else {
                return;
            };
            let prev = slot.iter().fold(0, |acc, e| acc | e);
            for (acc, e) in slot.iter_mut().zip(err_id.iter()) {
                *acc |= e;
            }
            prev
        };

        if prev == 0 {
            let rta = self.rta.read();
            if let Some(wdma) = &rta.wdma[idx] {
                wdma.request_abort();
            }
            if let Some(stat) = &rta.stat {
                stat.request_abort();
            }
        }
    }

    fn err_print(&self) {
        let fcount = self.fcount();
        let (error_id, dma_error_id) = {
            let errors = self.errors.lock();
            (errors.error_id, errors.dma_error_id)
        };

        for (vc, &err) in error_id.iter().enumerate() {
            for e in CsisErr::iter_bits(err) {
                kerr!(
                    "[{}][LINK][VC{}][F{}] Occurred the {}(ID {})",
                    self.name,
                    vc,
                    fcount,
                    e.name(),
                    e as u32
                );
            }
        }

        for (idx, errs) in dma_error_id.iter().enumerate() {
            let ch = self.attached_wdma(idx).map_or(u32::MAX, |w| w.ch);
            for (vc, &err) in errs.iter().enumerate() {
                for e in DmaErr::iter_bits(err) {
                    kerr!(
                        "[{}][DMA{}][VC{}][F{}] Occurred the {}(ID {})",
                        self.name,
                        ch,
                        vc,
                        fcount,
                        e.name(),
                        e as u32
                    );
                    if e == DmaErr::DmaFifoFull {
                        self.host.report_event(TelemetryEvent::DmaFifoFull);
                    }
                }
            }
        }
    }

    /// v5.4 上单独出现的 OTF overlap 交给下游排查
    fn err_handle_ext(&self, dma_all: u32) {
        if csis_hw::get_version(&*self.base_reg) != csis_hw::CSIS_V5_4 {
            return;
        }
        if dma_all != DmaErr::OtfOverlapVc.bit() {
            return;
        }

        let count = self.error_count_vc_overlap.fetch_add(1, Ordering::SeqCst) + 1;
        kinfo!("[{}][F{}] OTF overlap ({})", self.name, self.fcount(), count);
        self.host.debug_otf();

        if count >= CSI_ERR_COUNT - 1 {
            kerr!("[{}] OTF overlap occurred {} times in a row", self.name, count);
        }
    }

    /// 帧结束时处理本帧累计的错误
    pub(super) fn err_handle(&self) {
        self.err_print();

        let error_id = {
            let mut errors = self.errors.lock();
            let snapshot = errors.error_id;
            // 最近一次出错帧的完整快照, 本帧干净的 VC 也覆盖为 0
            errors.error_id_last = snapshot;
            errors.error_id = [0; CSI_VIRTUAL_CH_MAX];
            snapshot
        };

        if let Some(cfg) = self.sensor_cfg() {
            for (link_vc, &err) in error_id.iter().enumerate() {
                if err == 0 {
                    continue;
                }
                for (idx, vc) in cfg.dma_targets(link_vc as u32) {
                    self.flush_vc_buf_done(idx, vc, FrameState::Process, BufState::Error);
                    self.flush_vc_multibuf(idx, vc);
                    kerr!(
                        "[{}][LINK_VC{}][F{}] frame was done with error",
                        self.name,
                        link_vc,
                        self.fcount()
                    );
                }
                self.set_bit(CSIS_BUF_ERR_VC0 + link_vc as u32);
            }
        }

        let dma_all = {
            let mut errors = self.errors.lock();
            let all = errors.dma_any();
            errors.dma_error_id = Default::default();
            all
        };
        // OTF overlap 由 WDMA 上报, 只在 DMA 错误汇总里出现
        self.err_handle_ext(dma_all);

        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.phy_tuning() {
            return;
        }

        if count >= CSI_ERR_COUNT {
            if !self.escalated.swap(true, Ordering::SeqCst) {
                kerr!("[{}] error count {}, stop the sensor", self.name, count);
                self.host.request_snr_stop();
                csis_hw::disable(&*self.base_reg);

                let rta = self.rta.read();
                for wdma in rta.wdma.iter().flatten() {
                    wdma.s_irq_msk(false);
                }
                if let Some(stat) = &rta.stat {
                    stat.s_irq_msk(false);
                }
                drop(rta);
                csis_hw::s_irq_msk(&*self.base_reg, false, self.f_id_dec());
            }

            if count == CSI_ERR_COUNT || count % CSI_ERR_DUMP_INTERVAL == 0 {
                self.dump_all();
            }
        }
    }
}
