//! 硬中断处理与 IRQ 注册

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use super::{CsiDevice, EXPECT_FRAME_END, EXPECT_FRAME_START};
use crate::config::{PhyTune, CSI_VIRTUAL_CH_MAX, DBG_IRQ_INFO_MAX, DMA_VIRTUAL_CH_MAX};
use crate::drivers::camif::csis_hw::{self, CsisErr, DmaErr};
use crate::drivers::camif::notify::TelemetryEvent;
use crate::drivers::camif::pdp_top::{IbufIrq, CAMIF_OTF_OUT_SINGLE, CAMIF_VC_IMG};
use crate::drivers::camif::sensor_cfg::VcType;
use crate::error::CsiResult;
use crate::hal::irq::{IrqHandler, IrqReturn, IRQF_SHARED};

const VC0_BIT: u32 = 1 << 0;

impl CsiDevice {
    // ============ 链路中断 ============

    /// 记录链路错误快照; IBUF 报告 wrong-size 时打印积累的快照并调度链路 dump
    fn log_link_interrupt(&self, src: &csis_hw::CsisIrqSrc) {
        let otf_ch = self.otf_info.lock().otf_out_ch[CAMIF_OTF_OUT_SINGLE] as usize;

        if let Some(top) = self.camsys.top() {
            if top.take_wrong_size(otf_ch) {
                let mut fifo = self.dbg_irq.lock();
                while let Some(info) = fifo.pop_front() {
                    kinfo!(
                        "[{}] err_src0 {:#010x}, err_src1 {:#010x}, lost_fs {:#010x}, lost_fe {:#010x}, vresol {:#010x}, hresol {:#010x}",
                        self.name,
                        info.err_src0,
                        info.err_src1,
                        info.lost_fs,
                        info.lost_fe,
                        info.vresol,
                        info.hresol
                    );
                }
                drop(fifo);

                if !self.wq_link_dump.is_pending() {
                    self.wq_link_dump.schedule();
                }
            }
        }

        let snapshot = csis_hw::g_dbg_snapshot(&*self.base_reg, src, self.platform().ktime_ns());
        let mut fifo = self.dbg_irq.lock();
        if fifo.len() >= DBG_IRQ_INFO_MAX {
            fifo.pop_front();
        }
        fifo.push_back(snapshot);
    }

    pub(super) fn isr_link(&self) -> IrqReturn {
        let src = csis_hw::g_irq_src(&*self.base_reg, true);

        if src.err_flag {
            self.log_link_interrupt(&src);
        }

        let err = match self.camsys.debug().phy_tune {
            PhyTune::Dphy => src.err_id[0] & (CsisErr::Ecc.bit() | CsisErr::Crc.bit()),
            PhyTune::Cphy => src.err_id.iter().fold(0, |acc, e| acc | e),
            PhyTune::Disable => src.err_id[0],
        };
        if err != 0 {
            self.state_cnt.err.fetch_add(1, Ordering::Relaxed);
        }
        if src.otf_start & VC0_BIT != 0 {
            self.state_cnt.start.fetch_add(1, Ordering::Relaxed);
        }
        if src.otf_end & VC0_BIT != 0 {
            self.state_cnt.end.fetch_add(1, Ordering::Relaxed);
        }

        if self.camsys.debug().csi_level > 1 {
            ktrace!(
                "[{}] link: ERR({:#x}, {:#x}, {:#x}, {:#x}) S({:#x}) L({:#x}) E({:#x})",
                self.name,
                src.err_id[0],
                src.err_id[1],
                src.err_id[2],
                src.err_id[3],
                src.otf_start,
                src.line_end,
                src.otf_end
            );
        }

        // 每个 OTF 输出的图像 VC 决定帧起止; 没有 OTF 输出时以 VC0 为准
        let (mut frame_start, mut frame_end) = (0, 0);
        {
            let info = self.otf_info.lock();
            if info.otf_out_num == 0 {
                frame_start = src.otf_start & VC0_BIT;
                frame_end = src.otf_end & VC0_BIT;
            }
            for ch in 0..info.otf_out_num {
                let img_vc = info.link_vc[ch][CAMIF_VC_IMG];
                if img_vc as usize >= CSI_VIRTUAL_CH_MAX {
                    continue;
                }
                frame_start |= src.otf_start & (1 << img_vc);
                frame_end |= src.otf_end & (1 << img_vc);
            }
        }

        if src.line_end & VC0_BIT != 0 {
            self.frame_line_inline();
        }

        if frame_start != 0 && frame_end != 0 {
            kwarn!("[{}] start/end overlapped", self.name);
            if self.sw_checker() == EXPECT_FRAME_START {
                self.frame_start_inline(frame_start);
                self.frame_end_inline(frame_end);
            } else {
                self.frame_end_inline(frame_end);
                self.frame_start_inline(frame_start);
            }
        } else if frame_start != 0 {
            if self.sw_checker() != EXPECT_FRAME_START {
                // 帧计数仍然前进, 与下游保持一致
                kwarn!("[{}] Lost end interrupt", self.name);
                self.fcount.fetch_add(1, Ordering::SeqCst);
                return IrqReturn::Handled;
            }
            self.frame_start_inline(frame_start);
        } else if frame_end != 0 {
            if self.sw_checker() != EXPECT_FRAME_END {
                kwarn!("[{}] Lost start interrupt", self.name);
                self.fcount.fetch_add(1, Ordering::SeqCst);

                // LOST_FS 时只有结束中断, 在这里做错误处理
                if self.errors.lock().link_any() != 0 {
                    self.err_handle();
                }
                return IrqReturn::Handled;
            }
            self.frame_end_inline(frame_end);
            self.host.frame_end_emul();
        }

        if src.err_flag {
            self.err_check(&src.err_id);
        }

        IrqReturn::Handled
    }

    // ============ DMA 中断 ============

    pub(super) fn isr_dma(&self, irq: u32) -> IrqReturn {
        let Some(cfg) = self.sensor_cfg() else {
            kerr!("[{}] sensor_cfg is null", self.name);
            return IrqReturn::Handled;
        };

        let found = {
            let _irq_guard = self.dma_irq_slock.lock();
            let rta = self.rta.read();

            let hit = (0..self.wdma_max()).find_map(|idx| {
                rta.wdma[idx]
                    .as_ref()
                    .filter(|w| w.irq == irq)
                    .map(|w| (idx, w.clone(), rta.wdma_mod[idx].clone()))
            });

            hit.map(|(idx, wdma, module)| {
                let mut src = wdma.irq_src(true);
                if let Some(stat) = &rta.stat {
                    src.merge(&stat.irq_src(true));
                }
                (idx, wdma, module, src)
            })
        };

        let Some((idx, wdma, module, src)) = found else {
            kerr!("[{}] wdma is NULL (irq {})", self.name, irq);
            return IrqReturn::Handled;
        };

        let level = self.camsys.debug().csi_level;
        if src.dma_start != 0 && level > 0 {
            ktrace!("[{}] DMA{} DS {:#x}", self.name, wdma.ch, src.dma_start);
        }
        if src.dma_end != 0 && level > 0 {
            ktrace!("[{}] DMA{} DE {:#x}", self.name, wdma.ch, src.dma_end);
        }

        if src.dma_abort {
            kdbg!("[{}] DMA{} ABORT DONE", self.name, wdma.ch);
            self.flush_wait.clear();
        }

        let f_id_dec = self.f_id_dec();
        let pre_shadow = csis_hw::get_version(&*self.base_reg) < csis_hw::CSIS_V5_4;

        for vc in 0..DMA_VIRTUAL_CH_MAX {
            wdma.dbg_cnt(vc, &src);
            let fid_anchor = f_id_dec && cfg.link_vc[idx][vc] == 0;

            if src.dma_end & (1 << vc) != 0 {
                if fid_anchor {
                    if pre_shadow {
                        match &module {
                            Some(module) => module.clear_fro_count(wdma.ch),
                            None => kwarn!("[{}] wdma_mod is NULL", self.name),
                        }
                    }
                    self.frame_end_inline(VC0_BIT);
                }

                // 帧号要先于传感器的 DM tag 更新, 嵌入数据直接在中断里完成
                match cfg.output[idx][vc].vc_type {
                    VcType::Embedded | VcType::Embedded2 => match self.get_vc_framemgr(idx, vc) {
                        Some(fm) => self.dma_tag(&fm, idx, vc),
                        None => kerr!("[{}][VC{}] framemgr is NULL", self.name, vc),
                    },
                    _ => self.do_dma_done_work(idx, vc),
                }
            }

            if src.dma_start & (1 << vc) != 0 {
                if fid_anchor {
                    self.frame_start_inline(VC0_BIT);
                }

                if self.internal_subdev(idx, vc).is_some() {
                    self.s_vc_dma_frobuf(idx, vc);
                    continue;
                }

                // 外部 VC 每帧重新提交缓冲
                self.s_output_dma(idx, vc, false);
            }
        }

        if src.err_flag {
            for (vc, &err) in src.err_id.iter().enumerate() {
                if err & !DmaErr::AbortDone.bit() != 0 {
                    kinfo!("[{}][WDMA{}][VC{}] CSIS_ERR_DMA ID({:#010x})", self.name, wdma.ch, vc, err);
                }
            }
            self.dma_err_check(&src.err_id, idx);
        }

        IrqReturn::Handled
    }

    // ============ EBUF 中断 ============

    pub(super) fn isr_ebuf(&self) -> IrqReturn {
        let Some(ebuf) = self.camsys.ebuf() else {
            return IrqReturn::None;
        };

        let status = ebuf.irq_src();
        if status == 0 {
            return IrqReturn::None;
        }
        if ebuf.num_of_ebuf == 0 || ebuf.num_of_ebuf > u32::BITS {
            kerr!("[{}] num_of_ebuf({}) is invalid", self.name, ebuf.num_of_ebuf);
            return IrqReturn::Handled;
        }

        let irq = ebuf.decode(status);
        for ch in (0..ebuf.num_of_ebuf).filter(|ch| irq.sensor_abort & (1 << ch) != 0) {
            kinfo!("[{}] sensor_abort(EBUF #{})", self.name, ch);
            ebuf.s_fake_sign(ch as usize);
        }

        for ch in (0..ebuf.num_of_ebuf).filter(|ch| irq.fake_frame_done & (1 << ch) != 0) {
            kinfo!("[{}] fake_frame_done(EBUF #{})", self.name, ch);
            if !self.wq_ebuf_reset.is_pending() {
                self.wq_ebuf_reset.schedule();
            }
        }

        IrqReturn::Handled
    }

    /// PDP_TOP 的 IBUF 中断由子系统读出后分发给每个链路
    pub(crate) fn isr_ibuf(&self, irq: &IbufIrq) {
        if !self.is_streaming() {
            return;
        }
        let otf_ch = self.otf_info.lock().otf_out_ch[CAMIF_OTF_OUT_SINGLE];
        if irq.overflow & (1 << otf_ch) != 0 {
            kerr!("[{}][F{}] IBUF{} overflow", self.name, self.fcount(), otf_ch);
            self.host.report_event(TelemetryEvent::IbufOverflow);
        }
    }

    // ============ 工作函数 ============

    pub(super) fn link_dump_fn(&self) {
        csis_hw::dump_bank(&self.name, &*self.base_reg, csis_hw::CSIS_REG_SIZE);
        if let Some(phy) = &self.phy_reg {
            csis_hw::dump_bank("PHY", &**phy, csis_hw::PHY_REG_SIZE);
        }
    }

    /// 传感器停流, EBUF 关闭再打开, 传感器重新出流
    pub(super) fn ebuf_reset_fn(&self) {
        let (otf_out_num, otf_ch) = {
            let info = self.otf_info.lock();
            (info.otf_out_num, info.otf_out_ch[CAMIF_OTF_OUT_SINGLE] as usize)
        };
        if !self.host.is_streaming() || otf_out_num == 0 {
            return;
        }
        let Some(ebuf) = self.camsys.ebuf() else {
            return;
        };

        kinfo!("[{}] ebuf reset", self.name);
        if let Err(e) = self.host.s_stream(false) {
            kerr!("[{}] sensor s_stream(off) is fail({})", self.name, e);
        }

        self.platform().mdelay(1000);
        ebuf.reset(otf_ch);

        if let Err(e) = self.host.s_stream(true) {
            kerr!("[{}] sensor s_stream(on) is fail({})", self.name, e);
        }
    }

    // ============ IRQ 注册 ============

    fn handler<F>(&self, body: F) -> IrqHandler
    where
        F: Fn(&CsiDevice, u32) -> IrqReturn + Send + Sync + 'static,
    {
        let me = self.me.clone();
        Arc::new(move |irq| match me.upgrade() {
            Some(csi) => body(&csi, irq),
            None => IrqReturn::None,
        })
    }

    pub(super) fn request_irq(&self) -> CsiResult<()> {
        let ret = self.request_irq_inner();
        if ret.is_err() {
            self.free_irq();
        }
        ret
    }

    fn request_irq_inner(&self) -> CsiResult<()> {
        let domain = self.camsys.irq();
        let cookie = self.cookie();

        domain
            .request_irq(self.irq, self.handler(|csi, _| csi.isr_link()), &self.irq_name, 0, cookie)
            .map_err(|e| {
                kerr!("[{}] failed to request IRQ for CSI({}): {}", self.name, self.irq, e);
                e
            })?;
        csis_hw::s_irq_msk(&*self.base_reg, true, self.f_id_dec());

        let (wdmas, stat) = {
            let rta = self.rta.read();
            let wdmas: alloc::vec::Vec<_> = rta.wdma.iter().flatten().cloned().collect();
            (wdmas, rta.stat.clone())
        };

        for wdma in wdmas.iter().chain(stat.iter()) {
            domain
                .request_irq(
                    wdma.irq,
                    self.handler(|csi, irq| csi.isr_dma(irq)),
                    &wdma.irq_name,
                    IRQF_SHARED,
                    cookie,
                )
                .map_err(|e| {
                    kerr!(
                        "[{}] failed to request IRQ({}) for DMA#{}: {}",
                        self.name,
                        wdma.irq,
                        wdma.ch,
                        e
                    );
                    e
                })?;
            wdma.s_irq_msk(true);
        }

        if let Some(ebuf) = self.camsys.ebuf() {
            domain
                .request_irq(ebuf.irq, self.handler(|csi, _| csi.isr_ebuf()), "CSI_EBUF", IRQF_SHARED, cookie)
                .map_err(|e| {
                    kerr!("[{}] failed to request IRQ for CSI_EBUF({}): {}", self.name, ebuf.irq, e);
                    e
                })?;
        }
        Ok(())
    }

    pub(super) fn free_irq(&self) {
        let domain = self.camsys.irq();
        let cookie = self.cookie();

        if let Some(ebuf) = self.camsys.ebuf() {
            domain.free_irq(ebuf.irq, cookie);
        }

        {
            let rta = self.rta.read();
            for wdma in rta.wdma.iter().flatten().chain(rta.stat.iter()) {
                wdma.s_irq_msk(false);
                domain.free_irq(wdma.irq, cookie);
            }
        }

        csis_hw::s_irq_msk(&*self.base_reg, false, self.f_id_dec());
        domain.free_irq(self.irq, cookie);
    }
}
