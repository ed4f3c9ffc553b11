//! stream on / off
//!
//! stream on 的每一步失败都会回退之前的步骤; stream off 先关硬件源,
//! 再等待 DMA abort 完成, 最后回收缓冲并归还 WDMA.

use core::sync::atomic::Ordering;

use super::{CsiDevice, CSIS_BUF_ERR_VC0, CSIS_LINE_IRQ_ENABLE, CSIS_START_STREAM, EXPECT_FRAME_START};
use crate::config::{
    CSIS_OTF_CH_LC_NUM, CSI_LINE_IRQ_DEBUG_LEVEL, CSI_LINE_RATIO, CSI_VIRTUAL_CH_MAX,
    CSI_WAIT_ABORT_TIMEOUT_MS, DMA_VIRTUAL_CH_MAX, MAX_NUM_CSIS_OTF_CH, MAX_WORK_COUNT,
};
use crate::drivers::camif::csis_hw::{self, CsisCtrl};
use crate::drivers::camif::ebuf::EbufMode;
use crate::drivers::camif::frame::BufState;
use crate::drivers::camif::notify::SensorTopology;
use crate::drivers::camif::pdp_top::{
    OtfInfo, CAMIF_OTF_OUT_MAX, CAMIF_OTF_OUT_SINGLE, CAMIF_VC_HPD, CAMIF_VC_ID_NUM, CAMIF_VC_IMG,
    CAMIF_VC_VPD, LINK_VC_NONE, OTF_LC_NONE,
};
use crate::drivers::camif::sensor_cfg::{InterleaveMode, SensorConfig};
use crate::error::{CsiError, CsiResult};
use crate::hal::platform::PhyConfig;

/// 按处理组拓扑分配 OTF 输出通道
pub(super) fn g_otf_ch(info: &mut OtfInfo, topology: &SensorTopology) -> CsiResult<()> {
    let main = topology.paf_child.unwrap_or(0);
    if main as usize >= MAX_NUM_CSIS_OTF_CH {
        info.otf_out_num = 0;
        return Err(CsiError::InvalidArgument);
    }
    info.otf_out_ch[CAMIF_OTF_OUT_SINGLE] = main;
    info.otf_out_num = 1;

    // AEB 模式下的 short / mid 输出
    for &otf_ch in &topology.paf_next {
        if otf_ch as usize >= MAX_NUM_CSIS_OTF_CH || info.otf_out_num >= CAMIF_OTF_OUT_MAX {
            info.otf_out_num = 0;
            return Err(CsiError::InvalidArgument);
        }
        info.otf_out_ch[info.otf_out_num] = otf_ch;
        info.otf_out_num += 1;
    }
    Ok(())
}

/// 每个 OTF 输出的 IMG/HPD/VPD 链路 VC 与 LC
///
/// LC 取链路 VC 在该输出 VC 列表中的位置, 列表里没有时按 VC 取模.
pub(super) fn g_otf_lc(info: &mut OtfInfo, cfg: &SensorConfig, sensor_only: bool) {
    info.link_vc = [[0; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX];
    info.otf_lc = [[0; CAMIF_VC_ID_NUM]; CAMIF_OTF_OUT_MAX];

    for ch in 0..info.otf_out_num.min(CAMIF_OTF_OUT_MAX) {
        info.otf_lc[ch] = [OTF_LC_NONE; CAMIF_VC_ID_NUM];
        info.link_vc[ch][CAMIF_VC_IMG] = cfg.img_vc[ch];

        let lc = |info: &OtfInfo, link_vc: u32| {
            info.lc_of(ch, link_vc)
                .map_or(link_vc % CSIS_OTF_CH_LC_NUM as u32, |lc| lc as u32)
        };

        // 只测传感器时不接 PDP
        if !sensor_only {
            info.otf_lc[ch][CAMIF_VC_IMG] = lc(&*info, cfg.img_vc[ch]);
        }
        if cfg.hpd_vc[ch] != 0 {
            info.link_vc[ch][CAMIF_VC_HPD] = cfg.hpd_vc[ch];
            info.otf_lc[ch][CAMIF_VC_HPD] = lc(&*info, cfg.hpd_vc[ch]);
        }
        if cfg.vpd_vc[ch] != 0 {
            info.link_vc[ch][CAMIF_VC_VPD] = cfg.vpd_vc[ch];
            info.otf_lc[ch][CAMIF_VC_VPD] = lc(&*info, cfg.vpd_vc[ch]);
        }
    }
}

impl CsiDevice {
    /// PHY 上电后 stream on; stream off 后 PHY 下电
    pub fn s_stream(&self, on: bool) -> CsiResult<()> {
        if on {
            if let Err(e) = self.platform().phy_power(self.csi_ch, true) {
                kerr!("[{}] failed to csi{} power on ({})", self.name, self.csi_ch, e);
            }
            self.stream_on().map_err(|e| {
                kerr!("[{}] stream on is fail({})", self.name, e);
                e
            })
        } else {
            self.stream_off().map_err(|e| {
                kerr!("[{}] stream off is fail({})", self.name, e);
                e
            })?;
            if let Err(e) = self.platform().phy_power(self.csi_ch, false) {
                kerr!("[{}] failed to csi{} power off ({})", self.name, self.csi_ch, e);
            }
            Ok(())
        }
    }

    // ============ stream on ============

    fn stream_on(&self) -> CsiResult<()> {
        self.state_cnt.reset();
        self.sw_checker.store(EXPECT_FRAME_START, Ordering::SeqCst);

        let Some(cfg) = self.sensor_cfg() else {
            kerr!("[{}] sensor cfg is null", self.name);
            return Err(CsiError::InvalidArgument);
        };
        if self.test_bit(CSIS_START_STREAM) {
            kerr!("[{}] already start", self.name);
            return Err(CsiError::AlreadyStarted);
        }

        let topology = self.host.topology();
        let debug = self.camsys.debug();

        {
            let mut info = self.otf_info.lock();
            info.max_vc_num = cfg.max_vc + 1;
            g_otf_ch(&mut info, &topology).map_err(|e| {
                kerr!("[{}] Failed to get OTF_OUT CH", self.name);
                e
            })?;

            info.link_vc_list = [[LINK_VC_NONE; CSIS_OTF_CH_LC_NUM]; CAMIF_OTF_OUT_MAX];
            if let Some(top) = self.camsys.top() {
                for id in 0..info.otf_out_num {
                    top.s_link_vc_list(&mut info, id);
                }
            }
            g_otf_lc(&mut info, &cfg, topology.sensor_only);
        }

        self.dma_attach().map_err(|e| {
            kerr!("[{}] dma attach is failed", self.name);
            e
        })?;

        if let Err(e) = self.stream_on_hw(&cfg, &topology) {
            self.dma_detach();
            return Err(e);
        }

        self.set_bit(CSIS_START_STREAM);
        self.crc_flag.store(false, Ordering::SeqCst);

        if debug.csi_level > 0 {
            self.dump_all();
        }
        Ok(())
    }

    /// DMA 挂接之后的硬件编程; 失败时调用方归还 WDMA
    fn stream_on_hw(&self, cfg: &SensorConfig, topology: &SensorTopology) -> CsiResult<()> {
        let base = &*self.base_reg;
        let debug = self.camsys.debug();

        csis_hw::s_fcount(base, 0, 0);
        self.hw_fcount.store(csis_hw::g_fcount(base, 0), Ordering::SeqCst);
        self.chain_fcount.store(0, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        self.error_count_vc_overlap.store(0, Ordering::SeqCst);
        self.escalated.store(false, Ordering::SeqCst);

        let otf_ch = self.otf_info.lock().otf_out_ch[CAMIF_OTF_OUT_SINGLE];

        self.s_fro(otf_ch as usize).map_err(|e| {
            kerr!("[{}] s_fro is fail", self.name);
            e
        })?;
        if let Some(top) = self.camsys.top() {
            top.frame_id_en(otf_ch as usize, self.f_id_dec());
        }

        self.request_irq()?;

        let potf = topology.sensor_only && !debug.pattern_en;
        self.potf.store(potf, Ordering::SeqCst);
        kinfo!(
            "[{}] dma_num({}), potf({}), hw_fcount({})",
            self.name,
            cfg.dma_num,
            potf,
            self.hw_fcount.load(Ordering::SeqCst)
        );

        let phy = PhyConfig {
            lanes: cfg.lanes,
            mipi_speed: cfg.mipi_speed,
            settle: cfg.settle,
            use_cphy: self.use_cphy,
        };
        if let Err(e) = self.platform().phy_set(self.csi_ch, &phy) {
            kerr!("[{}] phy set is fail", self.name);
            self.free_irq();
            return Err(e);
        }

        // 链路
        csis_hw::s_lane(base, cfg.lanes, self.use_cphy);
        csis_hw::s_control(base, CsisCtrl::InterleaveMode, csis_hw::interleave_code(cfg.interleave_mode));
        csis_hw::s_control(base, CsisCtrl::PixelAlign, 1);
        csis_hw::s_control(base, CsisCtrl::Lrte, cfg.lrte);
        csis_hw::s_control(base, CsisCtrl::Descramble, 0);

        if cfg.interleave_mode == InterleaveMode::Ch0Only {
            let window = self.image();
            let mut vci = cfg.input[0];
            vci.width = window.width;
            vci.height = window.height;
            csis_hw::s_config(base, 0, &vci, potf);
        } else {
            for link_vc in 0..=(cfg.max_vc as usize).min(CSI_VIRTUAL_CH_MAX - 1) {
                let vci = &cfg.input[link_vc];
                csis_hw::s_config(base, link_vc, vci, potf);

                if vci.extformat.is_potf() {
                    if let Some(mcb) = self.camsys.mcb() {
                        mcb.potf_ctrl();
                    }
                }
                kinfo!(
                    "[{}][VC{}] IN size {}x{} format {:#x}",
                    self.name,
                    link_vc,
                    vci.width,
                    vci.height,
                    vci.extformat.0
                );
            }
        }

        self.errors.lock().error_id = [0; CSI_VIRTUAL_CH_MAX];

        let otf_out_num = self.otf_info.lock().otf_out_num;
        if let Some(bns) = self.camsys.bns() {
            if otf_out_num > 0 {
                bns.cfg(cfg, otf_ch);
            }
        }

        // 初始只打开 single 输出, 其余由 OTF 配置 tasklet 按需打开
        if let Some(top) = self.camsys.top() {
            let mut info = self.otf_info.lock();
            top.s_otf_out_mux(&info, CAMIF_OTF_OUT_SINGLE, true);
            top.configure_ibuf(&info, CAMIF_OTF_OUT_SINGLE, cfg, potf);
            info.act_otf_out_num = 1;
            info.req_otf_out_num = 1;
        }

        self.dma_init();

        if debug.csi_level >= CSI_LINE_IRQ_DEBUG_LEVEL {
            self.set_bit(CSIS_LINE_IRQ_ENABLE);
            let ratio = self.image().height * CSI_LINE_RATIO / 20;
            csis_hw::s_control(base, CsisCtrl::LineRatio, ratio);
            csis_hw::s_control(base, CsisCtrl::EnableLineIrq, 1);
            kinfo!("[{}] start line IRQ fcount: {}, ratio: {}", self.name, self.fcount() + 1, CSI_LINE_RATIO);
        }

        if topology.otf_output && otf_out_num > 0 {
            let otf_ch = otf_ch as usize;
            if let Some(mcb) = self.camsys.mcb() {
                mcb.attach(otf_ch);
                self.mcb_attached.store(true, Ordering::SeqCst);
            }
            if let Some(ebuf) = self.camsys.ebuf() {
                ebuf.s_enable(true, otf_ch, EbufMode::Auto);
                // EBUF 只支持两个 VC
                ebuf.s_cfg(otf_ch, 0, cfg.input[0].width, cfg.input[0].height);
                ebuf.s_cfg(otf_ch, 1, cfg.input[1].width, cfg.input[1].height);
                self.ebuf_attached.store(true, Ordering::SeqCst);
                kinfo!("[{}] CSI({}) --> EBUF({})", self.name, self.csi_ch, otf_ch);
            }
        }

        if !debug.pattern_en {
            csis_hw::enable(base, self.use_cphy);
        }
        Ok(())
    }

    fn dma_init(&self) {
        for vc in 0..CSI_VIRTUAL_CH_MAX as u32 {
            self.clear_bit(CSIS_BUF_ERR_VC0 + vc);
        }

        self.s_config_dma();
        self.dma_en.lock().pre = [[-1; DMA_VIRTUAL_CH_MAX]; crate::config::CSIS_MAX_NUM_DMA_ATTACH];

        self.s_vc_dma_multibuf();

        self.work_list.init(MAX_WORK_COUNT);
        self.errors.lock().dma_error_id = Default::default();
    }

    // ============ stream off ============

    fn stream_off(&self) -> CsiResult<()> {
        if !self.test_bit(CSIS_START_STREAM) {
            kerr!("[{}] already stop", self.name);
            return Err(CsiError::NotStarted);
        }

        let base = &*self.base_reg;
        csis_hw::disable(base);
        csis_hw::reset(base);

        let (otf_ch, otf_out_num) = {
            let info = self.otf_info.lock();
            (info.otf_out_ch[CAMIF_OTF_OUT_SINGLE] as usize, info.otf_out_num)
        };
        if self.mcb_attached.swap(false, Ordering::SeqCst) {
            if let Some(mcb) = self.camsys.mcb() {
                mcb.detach(otf_ch);
            }
        }
        if self.ebuf_attached.swap(false, Ordering::SeqCst) {
            if let Some(ebuf) = self.camsys.ebuf() {
                ebuf.s_enable(false, otf_ch, EbufMode::Auto);
            }
            if self.wq_ebuf_reset.flush(|| self.ebuf_reset_fn()) {
                kinfo!("[{}] ebuf_reset flush_work executed!", self.name);
            }
        }

        if self.test_and_clear_bit(CSIS_LINE_IRQ_ENABLE) {
            self.tasklet_line.kill();
        }
        self.tasklet_end.kill();

        self.dma_deinit();

        if let Some(bns) = self.camsys.bns() {
            bns.reset();
        }

        if let Some(top) = self.camsys.top() {
            self.tasklet_otf_cfg.kill();
            let mut info = self.otf_info.lock();
            for id in 0..otf_out_num {
                top.s_otf_out_mux(&info, id, false);
            }
            info.act_otf_out_num = 0;
            info.req_otf_out_num = 0;
        }

        self.vvalid.store(false, Ordering::SeqCst);
        self.dma_en.lock().cur = Default::default();

        // FRO 状态回到初始值
        self.rst_bufring_cnt();
        self.otf_batch_num.store(1, Ordering::SeqCst);
        self.dma_batch_num.store(1, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);

        self.free_irq();
        self.dma_detach();

        self.clear_bit(CSIS_START_STREAM);
        kinfo!("[{}] stream off done", self.name);
        Ok(())
    }

    /// 关闭所有 DMA 输出, 请求 abort 并等待完成, 然后以错误完成所有缓冲
    fn dma_deinit(&self) {
        {
            let rta = self.rta.read();
            let (wdmas, stat) = (rta.wdma.clone(), rta.stat.clone());
            drop(rta);

            // DMA 没有独立的复位, 每个 VC 都要显式关闭
            for (idx, wdma) in wdmas.iter().enumerate().take(self.wdma_max()) {
                for vc in 0..DMA_VIRTUAL_CH_MAX {
                    if let Some(wdma) = wdma {
                        self.s_output_dma(idx, vc, false);
                        wdma.reset_dma(vc);
                    }
                    if let Some(stat) = &stat {
                        stat.reset_dma(vc);
                    }
                }
            }
        }
        if self.wq_dma.flush(|| self.dma_work_fn()) {
            kinfo!("[{}] csis_dma flush_work executed!", self.name);
        }

        self.flush_wait.arm();
        {
            let rta = self.rta.read();
            for wdma in rta.wdma.iter().flatten().chain(rta.stat.iter()) {
                wdma.request_abort();
            }
        }

        if self
            .flush_wait
            .wait_clear(self.platform(), CSI_WAIT_ABORT_TIMEOUT_MS)
            .is_none()
        {
            kerr!("[{}] wait ABORT_DONE timeout!", self.name);
        }

        self.flush_all_vc_buf_done(BufState::Error);

        let rta = self.rta.read();
        for wdma in rta.wdma.iter().flatten().chain(rta.stat.iter()) {
            wdma.init_input_mux();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::sensor_cfg::HwFormat;

    #[test]
    fn test_otf_ch_from_topology() {
        let mut info = OtfInfo::new(0);
        let topo = SensorTopology {
            paf_child: Some(2),
            paf_next: alloc::vec![3],
            ..Default::default()
        };
        g_otf_ch(&mut info, &topo).unwrap();
        assert_eq!(info.otf_out_num, 2);
        assert_eq!(info.otf_out_ch[0], 2);
        assert_eq!(info.otf_out_ch[1], 3);
    }

    #[test]
    fn test_otf_ch_out_of_range() {
        let mut info = OtfInfo::new(0);
        let topo = SensorTopology {
            paf_child: Some(MAX_NUM_CSIS_OTF_CH as u32),
            ..Default::default()
        };
        assert_eq!(g_otf_ch(&mut info, &topo), Err(CsiError::InvalidArgument));
        assert_eq!(info.otf_out_num, 0);
    }

    #[test]
    fn test_otf_lc_sensor_only_skips_img() {
        let mut info = OtfInfo::new(0);
        info.otf_out_num = 1;
        let mut cfg = SensorConfig::single(1920, 1080, HwFormat::Raw10, 30);
        cfg.hpd_vc[0] = 1;

        g_otf_lc(&mut info, &cfg, true);
        assert_eq!(info.otf_lc[0][CAMIF_VC_IMG], OTF_LC_NONE);
        assert_eq!(info.link_vc[0][CAMIF_VC_HPD], 1);
        assert_eq!(info.otf_lc[0][CAMIF_VC_HPD], 1);
        assert_eq!(info.otf_lc[0][CAMIF_VC_VPD], OTF_LC_NONE);

        g_otf_lc(&mut info, &cfg, false);
        assert_eq!(info.otf_lc[0][CAMIF_VC_IMG], 0);
    }

    #[test]
    fn test_otf_lc_follows_link_vc_list() {
        let mut info = OtfInfo::new(0);
        info.otf_out_num = 1;
        info.link_vc_list[0] = [0, 2, 4, 6, 8, LINK_VC_NONE];
        let mut cfg = SensorConfig::single(1920, 1080, HwFormat::Raw10, 30);
        cfg.vpd_vc[0] = 4;

        g_otf_lc(&mut info, &cfg, false);
        assert_eq!(info.otf_lc[0][CAMIF_VC_VPD], 2);
    }
}
