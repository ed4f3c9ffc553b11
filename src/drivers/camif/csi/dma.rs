//! WDMA 挂接、地址编程与缓冲完成
//!
//! 外部 VC 的缓冲由 `s_buffer` 逐帧提交; 内部 VC 的缓冲在 stream on 时
//! 一次性写入多缓冲槽, FRO VC 则在每次 DMA 开始时按环的半区重新编程.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::{CsiDevice, CSIS_SET_MULTIBUF_DMA0};
use crate::config::{BUF_SWAP_CNT, CSIS_MAX_NUM_DMA_ATTACH, DMA_VIRTUAL_CH_MAX};
use crate::drivers::camif::csis_hw;
use crate::drivers::camif::frame::{BufState, FrameState, SharedFrameManager, ShotResult};
use crate::drivers::camif::notify::CsiEvent;
use crate::drivers::camif::pdp_top::{CAMIF_OTF_OUT_SINGLE, LINK_VC_NONE};
use crate::drivers::camif::sensor_cfg::{entry_to_channel, ExMode, VcType};
use crate::drivers::camif::subdev::{img_stride, DmaSubdev, SbwcType};
use crate::drivers::camif::wdma::{DmaConfig, WdmaChannel};
use crate::error::{CsiError, CsiResult};
use crate::kernel::WorkMsg;

impl CsiDevice {
    /// VC0 以外的 VC 在有 stat WDMA 时走 stat WDMA
    pub(super) fn wdma_for(&self, idx: usize, vc: usize) -> Option<Arc<WdmaChannel>> {
        let rta = self.rta.read();
        if vc != 0 {
            if let Some(stat) = &rta.stat {
                return Some(stat.clone());
            }
        }
        rta.wdma.get(idx).cloned().flatten()
    }

    // ============ 挂接 ============

    /// 从通道池借出 WDMA, 中途失败时归还已借出的通道
    pub(super) fn dma_attach(&self) -> CsiResult<()> {
        let _seq = self.dma_seq_slock.lock();
        let mut rta = self.rta.write();

        if rta.wdma[0].is_some() {
            kwarn!("[{}] DMA is already attached", self.name);
            return Ok(());
        }

        let cfg = self.sensor_cfg();
        let hint = cfg
            .as_ref()
            .and_then(|c| c.wdma_ch_hint)
            .or(self.wdma_ch_hint);
        let pool = self.camsys.pool();

        for idx in 0..self.wdma_max() {
            let Some(wdma) = pool.acquire(hint) else {
                kerr!("[{}] failed to get WDMA for idx {}", self.name, idx);
                for slot in rta.wdma.iter_mut() {
                    if let Some(chan) = slot.take() {
                        pool.release(&chan);
                    }
                }
                rta.wdma_mod = Default::default();
                return Err(CsiError::NoDevice);
            };
            for vc in 0..DMA_VIRTUAL_CH_MAX {
                wdma.reset_dma(vc);
                wdma.set_fro_count(1, vc);
            }
            rta.wdma_mod[idx] = pool.module_of(&wdma);
            kdbg!("[{}] attach WDMA{} at idx {}", self.name, wdma.ch, idx);
            rta.wdma[idx] = Some(wdma);
        }

        let want_stat = cfg
            .as_ref()
            .map_or(false, |c| c.ex_mode == ExMode::PdstatOff && c.any_output_width());
        if want_stat {
            if let Some(stat) = pool.acquire(None) {
                for vc in 0..DMA_VIRTUAL_CH_MAX {
                    stat.reset_dma(vc);
                    stat.set_fro_count(1, vc);
                }
                rta.stat_mod = pool.module_of(&stat);
                kinfo!("[{}] attach stat WDMA{}", self.name, stat.ch);
                rta.stat = Some(stat);
            }
        }
        Ok(())
    }

    /// 归还所有 WDMA
    pub(super) fn dma_detach(&self) {
        let pool = self.camsys.pool();
        let mut rta = self.rta.write();

        for slot in rta.wdma.iter_mut() {
            if let Some(chan) = slot.take() {
                pool.release(&chan);
            }
        }
        rta.wdma_mod = Default::default();

        if let Some(stat) = rta.stat.take() {
            pool.release(&stat);
        }
        rta.stat_mod = None;
    }

    /// 帧 id 解码器与 FRO 计数
    pub(super) fn s_fro(&self, otf_ch: usize) -> CsiResult<()> {
        let cfg = self.sensor_cfg().ok_or(CsiError::InvalidArgument)?;
        let f_id_dec = self.f_id_dec();
        let dma_batch = self.dma_batch_num();
        let otf_batch = self.otf_batch_num();
        let pre_shadow = csis_hw::get_version(&*self.base_reg) < csis_hw::CSIS_V5_4;

        {
            let rta = self.rta.read();
            for idx in 0..self.wdma_max() {
                let (Some(wdma), Some(module)) = (&rta.wdma[idx], &rta.wdma_mod[idx]) else {
                    kerr!("[{}][DMA{}] wdma_mod is NULL", self.name, idx);
                    return Err(CsiError::NoDevice);
                };

                for vc in 0..DMA_VIRTUAL_CH_MAX {
                    if cfg.output[idx][vc].vc_type == VcType::Fro {
                        module.s_frame_id_decoder(wdma.ch, f_id_dec);
                    }
                }

                if (f_id_dec && pre_shadow) || otf_batch > 1 {
                    for vc in 0..DMA_VIRTUAL_CH_MAX {
                        wdma.set_fro_count(dma_batch, vc);
                    }
                }
            }
        }

        if let Some(fro) = &self.fro_reg {
            csis_hw::s_otf_preview_only(&**fro, otf_ch, f_id_dec);
        }

        kinfo!(
            "[{}] fro batch_num (otf:{}, dma:{})",
            self.name,
            otf_batch,
            dma_batch
        );
        Ok(())
    }

    // ============ 帧指针 / 地址 ============

    /// 翻转 FRO 环并把 VC0 的帧指针指向新的半区
    pub(crate) fn s_frameptr(&self, idx: usize, vc: usize, clear: bool) {
        if !self.f_id_dec() && self.otf_batch_num() < 2 {
            return;
        }
        if vc != 0 {
            return;
        }
        let Some(wdma) = self.attached_wdma(idx) else {
            kerr!("[{}][WDMA_IDX{}][VC{}] wdma is NULL", self.name, idx, vc);
            return;
        };

        let ring = self.bufring_cnt.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let frameptr = (ring % BUF_SWAP_CNT) * self.dma_batch_num();
        wdma.set_frame_pointer(vc, frameptr, clear);
    }

    /// 停流或格式变化后重置环: VC0 为 FRO 输出时从 0 开始, 否则从 1
    pub fn rst_bufring_cnt(&self) {
        let fro = self
            .sensor_cfg()
            .map_or(false, |cfg| cfg.output[0][0].vc_type == VcType::Fro);
        self.bufring_cnt.store(if fro { 0 } else { 1 }, Ordering::SeqCst);
    }

    pub(super) fn s_output_dma(&self, idx: usize, vc: usize, enable: bool) {
        let Some(wdma) = self.wdma_for(idx, vc) else {
            kerr!("[{}][DMA{}][VC{}] wdma is NULL", self.name, idx, vc);
            return;
        };
        if enable && idx < CSIS_MAX_NUM_DMA_ATTACH && vc < DMA_VIRTUAL_CH_MAX {
            self.dma_en.lock().cur[idx][vc] = true;
        }
        wdma.set_output_enable(vc, enable);
    }

    /// 写入一帧的 DMA 地址; 多缓冲帧按环的半区偏移
    fn s_buf_addr(&self, dva: &[u64], num_buffers: u32, idx: usize, vc: usize, sbwc: Option<(u32, u32, u32)>) {
        let Some(wdma) = self.wdma_for(idx, vc) else {
            kerr!("[{}] wdma is NULL", self.name);
            return;
        };

        let num = if self.f_id_dec() {
            self.dma_batch_num()
        } else {
            num_buffers
        }
        .max(1);
        let frameptr = if num > 1 {
            num * (self.bufring_cnt.load(Ordering::SeqCst) % BUF_SWAP_CNT)
        } else {
            0
        };

        let _seq = self.dma_seq_slock.lock();
        for i in 0..num {
            let addr = dva.get(i as usize).copied().unwrap_or(0);
            if addr == 0 {
                kinfo!("[{}][WDMA{}][VC{}] dvaddr is null", self.name, wdma.ch, vc);
                continue;
            }
            let slot = (i + frameptr) as usize;
            wdma.set_dma_address(vc, slot, addr);
            kdbg!("[{}][WDMA{}][VC{}] [I{}] dva {:#x}", self.name, wdma.ch, vc, slot, addr);

            // 只有 VC0 有 SBWC
            if vc == 0 {
                let header = match sbwc {
                    Some((width, height, bitwidth)) => addr + (img_stride(width, bitwidth) * height) as u64,
                    None => addr,
                };
                wdma.set_header_address(vc, slot, header);
            }
        }
    }

    /// 把内部 VC 的所有缓冲写入多缓冲槽并打开输出
    pub(super) fn s_vc_dma_multibuf(&self) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };

        for idx in 0..self.wdma_max() {
            if self.test_bit(CSIS_SET_MULTIBUF_DMA0 + idx as u32) {
                continue;
            }

            let mut set_buf = false;
            for vc in 0..DMA_VIRTUAL_CH_MAX {
                let Some(isd) = self.internal_buf_only(&cfg, idx, vc) else {
                    continue;
                };
                let Some(wdma) = self.wdma_for(idx, vc) else {
                    continue;
                };

                let mut fm = isd.framemgr.lock();
                for i in 0..fm.num_frames() {
                    let dva = fm.frame(i).and_then(|f| f.dva.first().copied()).unwrap_or(0);
                    wdma.set_dma_address(vc, i, dva);
                    self.s_output_dma(idx, vc, true);
                    let _ = fm.trans(i, FrameState::Free);
                }
                set_buf = true;
            }

            if set_buf {
                self.set_bit(CSIS_SET_MULTIBUF_DMA0 + idx as u32);
            }
        }
    }

    /// DMA 开始时为 FRO VC 编程下一半环的地址
    pub(super) fn s_vc_dma_frobuf(&self, idx: usize, vc: usize) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };
        if !Self::is_fro_out(&cfg, idx, vc) {
            return;
        }
        let (Some(isd), Some(wdma)) = (self.internal_subdev(idx, vc), self.attached_wdma(idx)) else {
            return;
        };

        self.s_frameptr(idx, vc, false);
        let batch = self.dma_batch_num();
        let frameptr = batch * (self.bufring_cnt.load(Ordering::SeqCst) % BUF_SWAP_CNT);

        for b in 0..batch {
            let Some(buf) = isd.buffer(b as usize % isd.num_buffers.max(1) as usize) else {
                continue;
            };
            let slot = (b + frameptr) as usize;
            wdma.set_dma_address(vc, slot, buf.dva);

            if vc == 0 && isd.sbwc.is_comp() {
                let p_size = img_stride(isd.width, isd.memory_bitwidth) * isd.height;
                wdma.set_header_address(vc, slot, buf.dva + p_size as u64);
            }
        }

        self.s_output_dma(idx, vc, true);
    }

    // ============ DMA 配置 ============

    /// 输入 mux 先于 DMA 格式配置
    pub(super) fn s_config_dma(&self) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };
        let info = self.otf_info();
        let potf = self.potf.load(Ordering::SeqCst);
        let bns = self
            .camsys
            .bns()
            .filter(|b| b.is_enabled())
            .map(|b| b.id);

        let rta = self.rta.read();
        for idx in 0..self.wdma_max() {
            let Some(wdma) = rta.wdma[idx].clone() else {
                continue;
            };

            let otf_out_id = cfg.otf_out_id[idx].min(info.otf_out_ch.len() - 1);
            let otf_ch = info.otf_out_ch[otf_out_id];
            let vc_list = info.link_vc_list[otf_out_id]
                .iter()
                .filter(|&&vc| vc != LINK_VC_NONE)
                .fold(0u32, |acc, &vc| acc | 1 << vc);
            wdma.s_input_mux(info.csi_ch, bns, otf_ch, vc_list);

            if otf_out_id == CAMIF_OTF_OUT_SINGLE {
                if let Some(stat) = &rta.stat {
                    stat.s_input_mux(info.csi_ch, None, otf_ch, 0);
                }
            }

            for vc in 0..DMA_VIRTUAL_CH_MAX {
                let vci = &cfg.output[idx][vc];
                let (chan, module) = match (&rta.stat, vc) {
                    (Some(stat), v) if v != 0 => (stat.clone(), rta.stat_mod.clone()),
                    _ => (wdma.clone(), rta.wdma_mod[idx].clone()),
                };
                let Some(module) = module else {
                    kerr!("[{}] failed to get wdma_module", self.name);
                    return;
                };

                let mut dcfg = if let Some(isd) = self.internal_subdev(idx, vc) {
                    DmaConfig {
                        width: isd.width,
                        height: isd.height,
                        hwformat: vci.hwformat,
                        bitwidth: isd.memory_bitwidth,
                        packed: vci.extformat.is_packed(),
                        stride: vci.stride,
                        sbwc: isd.sbwc,
                    }
                } else {
                    let Some(subdev) = self.dma_subdev(idx, vc).filter(|s| s.is_started()) else {
                        continue;
                    };
                    let fmt = subdev.format();
                    DmaConfig {
                        width: fmt.width,
                        height: fmt.height,
                        hwformat: vci.hwformat,
                        bitwidth: fmt.memory_bitwidth,
                        packed: vci.extformat.is_packed(),
                        stride: vci.stride,
                        sbwc: fmt.sbwc,
                    }
                };
                if vci.width != 0 {
                    dcfg.width = vci.width;
                    dcfg.height = vci.height;
                }

                chan.s_config(vc, &dcfg);
                if idx == 0 && dcfg.sbwc != SbwcType::None {
                    module.s_sbwc_ch(chan.ch);
                }

                kinfo!(
                    "[{}][VC{}] DMA CH{} VC{} OUT size {}x{} format {:#x} SBWC {:?}",
                    self.name,
                    cfg.link_vc[idx][vc],
                    chan.ch,
                    vc,
                    dcfg.width,
                    dcfg.height,
                    vci.extformat.0,
                    dcfg.sbwc
                );

                chan.s_config_cmn(vc, vci.extformat, vci.hwformat, potf);
            }
        }
    }

    // ============ 完成 ============

    pub(super) fn get_vc_framemgr(&self, idx: usize, vc: usize) -> Option<SharedFrameManager> {
        if vc >= DMA_VIRTUAL_CH_MAX || idx >= CSIS_MAX_NUM_DMA_ATTACH {
            kerr!("[{}] VC({} of {}) is out-of-range", self.name, vc, DMA_VIRTUAL_CH_MAX);
            return None;
        }
        let cfg = self.sensor_cfg()?;
        if let Some(isd) = self.internal_buf_only(&cfg, idx, vc) {
            return Some(isd.framemgr.clone());
        }
        self.dma_subdev(idx, vc)
            .filter(|s| s.is_started())
            .map(|s| s.framemgr.clone())
    }

    /// DMA 结束后的完成处理
    pub(super) fn dma_tag(&self, framemgr: &SharedFrameManager, idx: usize, vc: usize) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };

        let Some(isd) = self.internal_buf_only(&cfg, idx, vc) else {
            let Some(subdev) = self.dma_subdev(idx, vc) else {
                return;
            };
            let done = {
                let mut fm = framemgr.lock();
                match fm.peek(FrameState::Process) {
                    Some(index) => {
                        let _ = fm.trans(index, FrameState::Complete);
                        fm.frame(index).map(|f| (index, f.stream_findex, f.result))
                    }
                    None => None,
                }
            };

            let index = done.map(|(index, stream_findex, result)| {
                subdev.clear_leader_flag(stream_findex);
                let state = if result == ShotResult::Success {
                    kdbg!("[{}][{}] DONE({})", self.name, subdev.name(), index);
                    BufState::Done
                } else {
                    kinfo!("[{}][{}][ERR] NDONE({}, {:?})", self.name, subdev.name(), index, result);
                    BufState::Error
                };
                subdev.buffer_done(index, state);
                index
            });

            self.host.notify(CsiEvent::DmaEnd { idx, vc, index });
            return;
        };

        let Some(wdma) = self.wdma_for(idx, vc) else {
            return;
        };
        let num_frames = framemgr.lock().num_frames().max(1) as u32;
        let frameptr = wdma.frame_pointer(vc);

        match isd.vc_type {
            VcType::Embedded | VcType::Embedded2 => {
                if frameptr < num_frames {
                    if let Some(buf) = isd.buffer(frameptr as usize) {
                        self.platform().sync_for_cpu(&buf);
                    }
                }
                self.host.notify(CsiEvent::DmaEndEmbedded { vc, frameptr });
            }
            VcType::MipiStat => {
                self.host.notify(CsiEvent::DmaEndMipiStat {
                    vc,
                    frameptr: frameptr % num_frames,
                });
            }
            VcType::TailPdaf | VcType::Vpdaf => {
                let frameptr = frameptr % num_frames;
                let fcount = framemgr
                    .lock()
                    .frame(frameptr as usize)
                    .map_or(0, |f| f.fcount);
                self.host.pd_dump(isd.vc_type, fcount, frameptr);
            }
            _ => {}
        }
    }

    /// 以 `state` 完成某个外部 VC 处于 `target` 的所有帧
    pub(super) fn flush_vc_buf_done(&self, idx: usize, vc: usize, target: FrameState, state: BufState) {
        let Some(subdev) = self.dma_subdev(idx, vc) else {
            return;
        };
        if !subdev.is_started() {
            return;
        }

        let mut flushed = Vec::new();
        {
            let mut fm = subdev.framemgr.lock();
            while let Some(index) = fm.peek(target) {
                let (fcount, stream_findex, result) = match fm.frame(index) {
                    Some(f) => (f.fcount, f.stream_findex, f.result),
                    None => break,
                };
                if target == FrameState::Process {
                    subdev.clear_leader_flag(stream_findex);
                }
                if state == BufState::Error {
                    kerr!(
                        "[{}][F{}] NDONE({:?}, {}, {:?})",
                        subdev.name(),
                        fcount,
                        target,
                        index,
                        result
                    );
                }
                if fm.trans(index, FrameState::Complete).is_err() {
                    break;
                }
                flushed.push(index);
            }
        }

        for index in flushed {
            subdev.buffer_done(index, state);
        }
    }

    /// 内部缓冲 VC: 回收所有帧, 下一帧开始时重新编程
    pub(super) fn flush_vc_multibuf(&self, idx: usize, vc: usize) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };
        let Some(isd) = self.internal_buf_only(&cfg, idx, vc) else {
            return;
        };
        isd.recycle();
        self.clear_bit(CSIS_SET_MULTIBUF_DMA0 + idx as u32);
    }

    pub(super) fn flush_all_vc_buf_done(&self, state: BufState) {
        for idx in 0..self.wdma_max() {
            for vc in 0..DMA_VIRTUAL_CH_MAX {
                self.flush_vc_buf_done(idx, vc, FrameState::Process, state);
                self.flush_vc_buf_done(idx, vc, FrameState::Request, state);
                self.flush_vc_multibuf(idx, vc);
            }
        }
    }

    // ============ 工作队列 ============

    pub(super) fn dma_work_fn(&self) {
        while let Some(msg) = self.work_list.pop() {
            let vc = msg.param1 as usize;
            let idx = msg.param2 as usize;
            if let Some(fm) = self.get_vc_framemgr(idx, vc) {
                self.dma_tag(&fm, idx, vc);
            }
        }
    }

    /// 把一个 DMA 完成投递给工作队列, 队列满时重试一次
    pub(super) fn do_dma_done_work(&self, idx: usize, vc: usize) {
        let msg = WorkMsg {
            instance: self.instance(),
            param1: vc as u32,
            param2: idx as u32,
            fcount: self.fcount(),
        };

        let queued = self.work_list.push(msg).or_else(|msg| {
            kerr!("[{}][VC{}] free work list is empty. retry(1)", self.name, vc);
            self.work_list.push(msg)
        });
        if queued.is_err() {
            kerr!("[{}][VC{}] free work list is empty. retry(0)", self.name, vc);
            return;
        }

        if !self.wq_dma.is_pending() {
            self.wq_dma.schedule();
        }
    }

    // ============ 缓冲提交 ============

    /// 提交外部 VC 的一帧缓冲
    pub fn s_buffer(&self, subdev: &DmaSubdev, index: usize) -> CsiResult<()> {
        let (idx, vc) = entry_to_channel(subdev.id)?;
        let cfg = self.sensor_cfg().ok_or(CsiError::InvalidArgument)?;

        let Some(wdma) = self.wdma_for(idx, vc) else {
            kerr!("[{}][VC{}] wdma is NULL", self.name, vc);
            return Err(CsiError::NoDevice);
        };

        let (dva, num_buffers) = {
            let fm = subdev.framemgr.lock();
            let frame = fm.frame(index).ok_or(CsiError::OutOfRange)?;
            (frame.dva.clone(), frame.num_buffers)
        };

        if !Self::is_fro_out(&cfg, idx, vc) {
            if wdma.output_enabled(vc) {
                kerr!("[WDMA{}][VC{}] already DMA enabled!!", wdma.ch, vc);
                if let Some(frame) = subdev.framemgr.lock().frame_mut(index) {
                    frame.result = ShotResult::BadFrame;
                }
                return Err(CsiError::InvalidArgument);
            }
            self.s_frameptr(idx, vc, false);
        }

        let fmt = subdev.format();
        let sbwc = fmt
            .sbwc
            .is_comp()
            .then_some((fmt.width, fmt.height, fmt.memory_bitwidth));
        self.s_buf_addr(&dva, num_buffers, idx, vc, sbwc);
        self.s_output_dma(idx, vc, true);
        Ok(())
    }

    /// 打开或关闭 TAILPDAF VC 的帧计数序列缓冲
    pub fn set_using_vc_buffer(&self, dva: u64, enable: bool) {
        let Some(cfg) = self.sensor_cfg() else {
            return;
        };
        let target = (0..self.wdma_max())
            .flat_map(|idx| (0..DMA_VIRTUAL_CH_MAX).map(move |vc| (idx, vc)))
            .find(|&(idx, vc)| cfg.output[idx][vc].vc_type == VcType::TailPdaf);
        let Some((idx, vc)) = target else {
            return;
        };

        let Some(wdma) = self.attached_wdma(idx) else {
            kerr!("[{}] wdma was already detached", self.name);
            return;
        };
        wdma.s_multibuf_fcntseq(vc, cfg.output[idx][vc].buffer_num, dva, enable);
    }
}
