//! 端到端场景: 用仿真硬件驱动完整的 stream on / 帧 / stream off 流程

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use crate::config::{DebugParams, CSI_ERR_COUNT};
use crate::drivers::camif::csi::{CsiCtrl, CsiDevice, CsiIoctl, ImageWindow, EXPECT_FRAME_END};
use crate::drivers::camif::csis_hw::{self, CsisErr};
use crate::drivers::camif::frame::{BufState, FrameManager, FrameState};
use crate::drivers::camif::notify::{CsiEvent, SensorTopology, TelemetryEvent};
use crate::drivers::camif::pdp_top::{ibuf_irq_bits, IBUF_IRQ_ERR_OVERFLOW, OTF_MUX_NONE, TOP_R_IRQ_SRC};
use crate::drivers::camif::sensor_cfg::{channel_to_entry, ExMode, HwFormat, SensorConfig, VcType};
use crate::drivers::camif::subdev::{DmaSubdev, SubdevFormat};
use crate::drivers::camif::wdma;
use crate::error::CsiError;
use crate::hal::mmio::SimBank;
use crate::system::sim::{
    dma_end, dma_start, link_fe, link_fs, PhyCall, RecordingHost, RecordingVideo, RigOptions,
    SimRig, DMA_ABORT_DONE, SIM_TOP_IRQ,
};

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;

struct Stream {
    rig: SimRig,
    host: Arc<RecordingHost>,
    bank: Arc<SimBank>,
    csi: Arc<CsiDevice>,
    subdev: Arc<DmaSubdev>,
    video: Arc<RecordingVideo>,
}

impl Stream {
    fn raise_fs(&self) {
        self.rig.raise_link(&self.bank, &self.csi, link_fs(0));
    }

    fn raise_fe(&self) {
        self.rig.raise_link(&self.bank, &self.csi, link_fe(0));
    }

    /// 提交一帧外部缓冲: REQUEST -> PROCESS -> 硬件
    fn submit(&self, index: usize, dva: &[u64]) {
        {
            let mut fm = self.subdev.framemgr.lock();
            fm.queue(index, self.csi.fcount() + 1, dva).unwrap();
            fm.trans(index, FrameState::Process).unwrap();
        }
        self.csi.s_buffer(&self.subdev, index).unwrap();
    }
}

fn window() -> ImageWindow {
    ImageWindow {
        width: WIDTH,
        height: HEIGHT,
        o_width: WIDTH,
        o_height: HEIGHT,
        ..Default::default()
    }
}

fn prepare(opts: RigOptions, csi_ch: u32, topology: SensorTopology, cfg: SensorConfig) -> Stream {
    let rig = SimRig::new(opts);
    let host = Arc::new(RecordingHost::new(topology));
    let (bank, csi) = rig.probe_csi(csi_ch, host.clone());

    csi.open().unwrap();
    csi.s_power(true).unwrap();
    csi.s_format(window(), cfg).unwrap();

    let video = Arc::new(RecordingVideo::new());
    let entry = channel_to_entry(0, 0).unwrap();
    let subdev = Arc::new(DmaSubdev::new(
        entry,
        "SSVC0",
        FrameManager::shared("SSVC0", 4),
        None,
        video.clone(),
        SubdevFormat {
            width: WIDTH,
            height: HEIGHT,
            bits_per_pixel: 10,
            memory_bitwidth: 10,
            ..Default::default()
        },
    ));
    subdev.start();
    csi.register_dma_subdev(entry, subdev.clone()).unwrap();

    Stream {
        rig,
        host,
        bank,
        csi,
        subdev,
        video,
    }
}

fn start(opts: RigOptions, csi_ch: u32, topology: SensorTopology, cfg: SensorConfig) -> Stream {
    let s = prepare(opts, csi_ch, topology, cfg);
    s.csi.s_stream(true).unwrap();
    s.host.take_events();
    s
}

fn start_default() -> Stream {
    start(
        RigOptions::default(),
        0,
        SensorTopology::default(),
        SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 30),
    )
}

// ============ 基本流程 ============

#[test]
fn test_single_frame_end_to_end() {
    let s = start_default();
    assert!(s.csi.is_streaming());
    assert_eq!(s.rig.camsys.pool().available(), 1);

    s.submit(0, &[0x8000_0000]);
    let wdma = s.csi.attached_wdma(0).unwrap();
    assert_eq!(wdma.dma_address(0, 0), 0x8000_0000);
    assert!(wdma.output_enabled(0));

    s.raise_fs();
    assert_eq!(s.csi.fcount(), 1);
    assert!(s.csi.vvalid());

    // 外部 VC 在 DMA 开始时关闭, 下一帧需要重新提交
    s.rig.raise_dma(0, dma_start(0));
    assert!(!wdma.output_enabled(0));

    s.rig.raise_dma(0, dma_end(0));
    assert_eq!(s.csi.pending_dma_work(), 1);
    s.raise_fe();
    assert!(!s.csi.vvalid());
    assert_eq!(s.host.emul_ends.load(Ordering::SeqCst), 1);

    s.rig.run_deferred();
    assert_eq!(s.csi.pending_dma_work(), 0);

    assert_eq!(
        s.host.events(),
        vec![
            CsiEvent::Vsync { fcount: 1 },
            CsiEvent::FrameStart { fcount: 1 },
            CsiEvent::Vblank { fcount: 1 },
            CsiEvent::FrameEnd {
                fcount: 1,
                status: crate::drivers::camif::frame::ShotResult::Success
            },
            CsiEvent::DmaEnd {
                idx: 0,
                vc: 0,
                index: Some(0)
            },
        ]
    );
    assert_eq!(s.video.done(), vec![(0, BufState::Done)]);
    assert_eq!(s.subdev.framemgr.lock().queued_count(FrameState::Complete), 1);

    s.csi.s_stream(false).unwrap();
    assert!(!s.csi.is_streaming());
    assert_eq!(s.rig.camsys.pool().available(), 2);
    assert_eq!(s.csi.error_count(), 0);
    assert!(!s.rig.camsys.irq().is_requested(s.csi.irq));

    let phy = s.rig.platform.phy_calls();
    assert_eq!(phy.len(), 3);
    assert_eq!(phy[0], PhyCall::Power { csi_ch: 0, on: true });
    assert!(matches!(phy[1], PhyCall::Set { csi_ch: 0, cfg } if cfg.lanes == 4 && cfg.mipi_speed == 2000));
    assert_eq!(phy[2], PhyCall::Power { csi_ch: 0, on: false });
}

#[test]
fn test_stream_on_twice_rejected() {
    let s = start_default();
    assert_eq!(s.csi.s_stream(true), Err(CsiError::AlreadyStarted));
    s.csi.s_stream(false).unwrap();
    assert_eq!(s.csi.s_stream(false), Err(CsiError::NotStarted));
}

#[test]
fn test_phy_failure_releases_irq() {
    let s = prepare(
        RigOptions::default(),
        0,
        SensorTopology::default(),
        SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 30),
    );
    s.rig.platform.set_phy_fail(true);
    assert!(s.csi.s_stream(true).is_err());
    assert!(!s.csi.is_streaming());
    assert!(!s.rig.camsys.irq().is_requested(s.csi.irq));
    assert_eq!(s.rig.camsys.pool().available(), 2);
}

#[test]
fn test_lost_start_still_counts() {
    let s = start_default();

    s.raise_fe();
    assert_eq!(s.csi.fcount(), 1);
    assert!(s.host.events().is_empty());

    s.raise_fs();
    assert_eq!(s.csi.fcount(), 2);
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::Vsync { fcount: 2 })), 1);
}

#[test]
fn test_lost_end_still_counts() {
    let s = start_default();

    s.raise_fs();
    s.raise_fs();
    assert_eq!(s.csi.fcount(), 2);
    // 第二个帧开始只推进计数, 不重复上报
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::Vsync { .. })), 1);
}

#[test]
fn test_timestamps_written_ahead() {
    let s = start_default();
    s.rig.platform.advance_ms(5);
    s.rig.platform.set_suspend_ns(7_000);

    s.raise_fs();
    let now = 6_000_000;
    for fcount in 1..=3 {
        assert_eq!(s.csi.timestamp(fcount), (now, now + 7_000));
    }
    assert_eq!(s.csi.timestamp(4), (0, 0));

    s.raise_fe();
    s.rig.platform.advance_ms(33);
    s.raise_fs();
    let next = now + 33_000_000;
    assert_eq!(s.csi.timestamp(1), (now, now + 7_000));
    assert_eq!(s.csi.timestamp(2), (next, next + 7_000));
    assert_eq!(s.csi.timestamp(4), (next, next + 7_000));

    let info = s.csi.debug_info();
    assert_eq!(info[2].fcount, 2);
    assert_eq!(info[1].time_start_ns, now);
}

#[test]
fn test_process_frame_without_dma_times_out() {
    let s = start_default();

    s.raise_fs();
    s.raise_fe();
    s.rig.run_deferred();

    // 没有写入硬件的 PROCESS 帧在下一帧开始时以错误完成
    {
        let mut fm = s.subdev.framemgr.lock();
        fm.queue(1, 2, &[0x8010_0000]).unwrap();
        fm.trans(1, FrameState::Process).unwrap();
    }
    s.raise_fs();
    assert_eq!(s.video.done(), vec![(1, BufState::Error)]);
    assert_eq!(s.subdev.framemgr.lock().peek(FrameState::Process), None);
}

#[test]
fn test_resubmit_while_enabled_is_bad_frame() {
    let s = start_default();
    s.submit(0, &[0x8000_0000]);

    {
        let mut fm = s.subdev.framemgr.lock();
        fm.queue(1, 1, &[0x8010_0000]).unwrap();
        fm.trans(1, FrameState::Process).unwrap();
    }
    assert_eq!(s.csi.s_buffer(&s.subdev, 1), Err(CsiError::InvalidArgument));
    assert_eq!(
        s.subdev.framemgr.lock().frame(1).unwrap().result,
        crate::drivers::camif::frame::ShotResult::BadFrame
    );
}

#[test]
fn test_line_irq_at_debug_level() {
    let rig_opts = RigOptions::default();
    let s = prepare(
        rig_opts,
        0,
        SensorTopology::default(),
        SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 30),
    );
    s.rig.camsys.set_debug(DebugParams {
        csi_level: 5,
        ..Default::default()
    });
    s.csi.s_stream(true).unwrap();
    s.host.take_events();

    s.raise_fs();
    s.rig.raise_link(&s.bank, &s.csi, 1 << 20);
    s.rig.run_deferred();
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::Line { fcount: 1 })), 1);
}

// ============ 错误处理 ============

#[test]
fn test_error_escalates_once() {
    let s = start_default();
    let frames = CSI_ERR_COUNT + 2;

    for _ in 0..frames {
        s.rig
            .raise_link_err(&s.bank, &s.csi, 0, CsisErr::Ecc.bit(), link_fs(0));
        s.raise_fe();
        s.rig.run_deferred();
    }

    assert!(s.csi.is_escalated());
    assert_eq!(s.csi.error_count(), frames);
    assert_eq!(s.host.snr_stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        s.host.count(|e| matches!(
            e,
            CsiEvent::FrameEnd {
                status: crate::drivers::camif::frame::ShotResult::Corrupted,
                ..
            }
        )),
        frames as usize
    );

    assert_eq!(s.csi.error_id()[0], 0);
    assert_eq!(s.csi.g_error_code(), CsisErr::Ecc.bit());
    assert_eq!(s.csi.ioctl(CsiIoctl::GetErrorCode), Ok(Some(CsisErr::Ecc.bit() as u64)));
    s.csi.ioctl(CsiIoctl::ClearErrorCode).unwrap();
    assert_eq!(s.csi.g_error_code(), 0);

    // 停流后重新计数
    s.csi.s_stream(false).unwrap();
    assert_eq!(s.csi.error_count(), 0);
}

#[test]
fn test_clean_frame_resets_error_count() {
    let s = start_default();

    for _ in 0..3 {
        s.rig
            .raise_link_err(&s.bank, &s.csi, 0, CsisErr::Ecc.bit(), link_fs(0));
        s.raise_fe();
        s.rig.run_deferred();
    }
    assert_eq!(s.csi.error_count(), 3);

    s.raise_fs();
    s.raise_fe();
    s.rig.run_deferred();
    assert_eq!(s.csi.error_count(), 0);
    assert!(!s.csi.is_escalated());
}

#[test]
fn test_error_code_tracks_last_errored_frame() {
    let s = start_default();

    s.rig
        .raise_link_err(&s.bank, &s.csi, 1, CsisErr::Ecc.bit(), link_fs(0));
    s.raise_fe();
    s.rig.run_deferred();
    assert_eq!(s.csi.g_error_code(), CsisErr::Ecc.bit());

    // 第二帧只有 VC0 出错, VC1 的旧错误不再上报
    s.rig
        .raise_link_err(&s.bank, &s.csi, 0, CsisErr::Crc.bit(), link_fs(0));
    s.raise_fe();
    s.rig.run_deferred();
    assert_eq!(s.csi.g_error_code(), CsisErr::Crc.bit());
    assert_eq!(
        s.csi.ioctl(CsiIoctl::GetErrorCode),
        Ok(Some(CsisErr::Crc.bit() as u64))
    );
}

#[test]
fn test_crc_dumps_sensor_once_per_frame() {
    let s = start_default();

    s.rig
        .raise_link_err(&s.bank, &s.csi, 0, CsisErr::Crc.bit(), link_fs(0));
    s.rig.raise_link_err(&s.bank, &s.csi, 0, CsisErr::Crc.bit(), 0);
    assert!(s.csi.crc_flag());
    assert_eq!(s.host.dumps.load(Ordering::SeqCst), 1);
    assert_eq!(
        s.host
            .telemetry()
            .iter()
            .filter(|&&e| e == TelemetryEvent::LinkCrc)
            .count(),
        2
    );

    s.raise_fe();
    s.rig.run_deferred();

    s.rig
        .raise_link_err(&s.bank, &s.csi, 0, CsisErr::Crc.bit(), link_fs(0));
    assert_eq!(s.host.dumps.load(Ordering::SeqCst), 2);
}

#[test]
fn test_lost_fe_emulates_frame_boundary() {
    let s = start_default();

    s.raise_fs();
    assert_eq!(s.csi.fcount(), 1);

    s.rig
        .raise_link_err(&s.bank, &s.csi, 0, CsisErr::LostFeVc.bit(), 0);
    assert_eq!(s.csi.fcount(), 2);
    assert_eq!(s.csi.sw_checker(), EXPECT_FRAME_END);
    assert!(s.csi.crc_flag());
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::Vblank { fcount: 1 })), 1);
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::Vsync { fcount: 2 })), 1);
}

#[test]
fn test_link_error_snapshot_ring_is_bounded() {
    let s = start_default();
    for _ in 0..30 {
        s.rig
            .raise_link_err(&s.bank, &s.csi, 1, CsisErr::Ecc.bit(), 0);
    }
    assert_eq!(s.csi.dbg_irq_len(), crate::config::DBG_IRQ_INFO_MAX);
    assert_eq!(s.csi.state_cnt.err.load(Ordering::Relaxed), 0);
}

// ============ stream off ============

#[test]
fn test_stream_off_waits_for_abort_done() {
    let s = start_default();
    s.submit(0, &[0x8000_0000]);

    let ctl = s.rig.wdma[0].ctl.clone();
    let irq = s.rig.wdma[0].irq;
    let camsys = Arc::downgrade(&s.rig.camsys);
    let target = s.rig.platform.elapsed_ms() + 3;
    s.rig.platform.on_delay(move |elapsed| {
        if elapsed == target {
            ctl.raise(wdma::DMA_R_INT_SRC, DMA_ABORT_DONE);
            if let Some(camsys) = camsys.upgrade() {
                camsys.irq().dispatch(irq);
            }
        }
    });

    s.csi.s_stream(false).unwrap();
    assert_eq!(s.rig.platform.elapsed_ms(), target);
    // 未完成的缓冲以错误交还
    assert_eq!(s.video.done(), vec![(0, BufState::Error)]);
}

#[test]
fn test_stream_off_abort_timeout() {
    let s = start_default();
    let before = s.rig.platform.elapsed_ms();
    s.csi.s_stream(false).unwrap();
    assert_eq!(
        s.rig.platform.elapsed_ms() - before,
        crate::config::CSI_WAIT_ABORT_TIMEOUT_MS
    );
    assert!(!s.csi.is_streaming());
}

// ============ OTF 输出 ============

#[test]
fn test_otf_out_change_waits_for_blank() {
    let topology = SensorTopology {
        paf_child: Some(0),
        paf_next: vec![1],
        ..Default::default()
    };
    let s = start(
        RigOptions::default(),
        1,
        topology,
        SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 30),
    );
    let top = s.rig.camsys.top().unwrap().clone();

    let info = s.csi.otf_info();
    assert_eq!(info.otf_out_num, 2);
    assert_eq!(info.act_otf_out_num, 1);
    assert_eq!(top.otf_mux(0), 1);

    s.raise_fs();
    s.csi.ioctl(CsiIoctl::SetOtfOut(2)).unwrap();
    s.rig.run_deferred();
    assert_eq!(s.csi.otf_info().act_otf_out_num, 1);

    // 帧结束调度, 但下一帧已开始: tasklet 放弃本次
    s.raise_fe();
    s.raise_fs();
    s.rig.run_deferred();
    assert_eq!(s.csi.otf_info().act_otf_out_num, 1);

    s.raise_fe();
    s.rig.run_deferred();
    assert_eq!(s.csi.otf_info().act_otf_out_num, 2);
    assert_eq!(top.otf_mux(1), 1);

    s.csi.ioctl(CsiIoctl::SetOtfOut(1)).unwrap();
    s.raise_fs();
    s.raise_fe();
    s.rig.run_deferred();
    assert_eq!(s.csi.otf_info().act_otf_out_num, 1);
    assert_eq!(top.otf_mux(1), OTF_MUX_NONE);
    assert_eq!(top.otf_mux(0), 1);

    s.csi.s_stream(false).unwrap();
    assert_eq!(top.otf_mux(0), OTF_MUX_NONE);
}

#[test]
fn test_otf_out_request_is_clamped() {
    let s = start_default();
    assert_eq!(s.csi.ioctl(CsiIoctl::SetOtfOut(0)), Err(CsiError::InvalidArgument));
    assert_eq!(s.csi.ioctl(CsiIoctl::SetOtfOut(4)), Err(CsiError::InvalidArgument));
    s.csi.ioctl(CsiIoctl::SetOtfOut(3)).unwrap();
    assert_eq!(s.csi.otf_info().req_otf_out_num, 1);
}

#[test]
fn test_ibuf_overflow_reported_through_camsys() {
    let s = start_default();
    s.rig.camsys.request_top_irq().unwrap();

    let top_bank = s.rig.top_bank.clone().unwrap();
    top_bank.raise(TOP_R_IRQ_SRC, ibuf_irq_bits(0, IBUF_IRQ_ERR_OVERFLOW));
    s.rig.camsys.irq().dispatch(SIM_TOP_IRQ);
    assert_eq!(s.host.telemetry(), vec![TelemetryEvent::IbufOverflow]);

    // 其他 OTF 通道的溢出不属于这条链路
    top_bank.raise(TOP_R_IRQ_SRC, ibuf_irq_bits(2, IBUF_IRQ_ERR_OVERFLOW));
    s.rig.camsys.irq().dispatch(SIM_TOP_IRQ);
    assert_eq!(s.host.telemetry().len(), 1);

    s.rig.camsys.free_top_irq();
}

// ============ 帧 id 解码 ============

#[test]
fn test_fid_dec_buffers_alternate_ring_halves() {
    let mut cfg = SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 960);
    cfg.ex_mode = ExMode::DualFps960;
    let s = start(RigOptions::default(), 0, SensorTopology::default(), cfg);
    assert!(s.csi.f_id_dec());
    assert_eq!(s.csi.dma_batch_num(), 16);

    let batch = |base: u64| -> Vec<u64> { (0..16).map(|i| base + i * 0x10_0000).collect() };
    let first = batch(0x8000_0000);
    let second = batch(0x9000_0000);
    let wdma = s.csi.attached_wdma(0).unwrap();

    s.submit(0, &first);
    assert_eq!(wdma.frame_pointer(0), 0);
    for (slot, &dva) in first.iter().enumerate() {
        assert_eq!(wdma.dma_address(0, slot), dva);
    }

    // 帧 id 解码时帧开始来自 DMA 中断
    s.rig.raise_dma(0, dma_start(0));
    assert_eq!(s.csi.fcount(), 1);
    assert_eq!(s.host.count(|e| matches!(e, CsiEvent::FrameStart { fcount: 1 })), 1);

    s.submit(1, &second);
    assert_eq!(wdma.frame_pointer(0), 16);
    for (i, &dva) in second.iter().enumerate() {
        assert_eq!(wdma.dma_address(0, 16 + i), dva);
    }
    assert_eq!(wdma.dma_address(0, 0), first[0]);
}

#[test]
fn test_fro_ring_parity_follows_reset_and_rotation() {
    let mut cfg = SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 960);
    cfg.ex_mode = ExMode::DualFps960;
    cfg.output[0][0].vc_type = VcType::Fro;
    let s = start(RigOptions::default(), 0, SensorTopology::default(), cfg);
    let wdma = s.csi.attached_wdma(0).unwrap();
    let batch = s.csi.dma_batch_num();

    s.csi.rst_bufring_cnt();
    assert_eq!(s.csi.bufring_cnt(), 0);
    for n in 1..=5u32 {
        s.csi.s_frameptr(0, 0, false);
        assert_eq!(s.csi.bufring_cnt() % 2, n % 2);
        assert_eq!(wdma.frame_pointer(0), (n % 2) * batch);
    }

    // 重置回到偶数半区
    s.csi.rst_bufring_cnt();
    assert_eq!(s.csi.bufring_cnt(), 0);
}

#[test]
fn test_non_fro_ring_resets_to_odd_half() {
    let s = start_default();
    s.csi.set_otf_batch_num(2);
    let wdma = s.csi.attached_wdma(0).unwrap();
    let batch = s.csi.dma_batch_num();

    s.csi.rst_bufring_cnt();
    assert_eq!(s.csi.bufring_cnt(), 1);
    for n in 1..=4u32 {
        s.csi.s_frameptr(0, 0, false);
        assert_eq!(s.csi.bufring_cnt(), 1 + n);
        assert_eq!(wdma.frame_pointer(0), ((1 + n) % 2) * batch);
    }

    // VC0 以外不转动环
    s.csi.s_frameptr(0, 1, false);
    assert_eq!(s.csi.bufring_cnt(), 5);
}

// ============ 控制命令 ============

#[test]
fn test_ctrl_and_ioctl() {
    let s = start_default();

    assert_eq!(s.csi.g_ctrl(CsiCtrl::VcFramePtr(0)), Err(CsiError::InvalidArgument));
    assert_eq!(s.csi.g_ctrl(CsiCtrl::VcFramePtr(10)), Err(CsiError::InvalidArgument));
    assert_eq!(s.csi.g_ctrl(CsiCtrl::VcFramePtr(1)), Ok(0));

    s.bank.poke(csis_hw::CSIS_F_FCNT_VC.at(0).offset, 41);
    assert_eq!(s.csi.ioctl(CsiIoctl::GetHwFcount), Ok(Some(41)));
    assert_eq!(s.csi.ioctl(CsiIoctl::GetDmaCh), Ok(Some(0)));
    assert_eq!(s.csi.ioctl(CsiIoctl::GetFrameId), Ok(None));

    s.csi.ioctl(CsiIoctl::SetFrsControl(30)).unwrap();
    assert_eq!(s.csi.dma_batch_num(), 1);
    s.csi.ioctl(CsiIoctl::SetFrsControl(960)).unwrap();
    assert_eq!(s.csi.dma_batch_num(), 16);
    s.csi.ioctl(CsiIoctl::SetFrsControl(480)).unwrap();
    assert_eq!(s.csi.dma_batch_num(), 8);

    s.csi.ioctl(CsiIoctl::SetChainFcount(5)).unwrap();
    s.raise_fs();
    assert_eq!(s.csi.fcount(), 5);
}

#[test]
fn test_dma_cancel_disables_outputs() {
    let s = start_default();
    s.submit(0, &[0x8000_0000]);
    let wdma = s.csi.attached_wdma(0).unwrap();
    assert!(wdma.output_enabled(0));

    s.csi.ioctl(CsiIoctl::DmaCancel).unwrap();
    assert!(!wdma.output_enabled(0));
}

// ============ WDMA 池 ============

#[test]
fn test_wdma_pool_shared_between_links() {
    let rig = SimRig::new(RigOptions::default());
    let cfg = || SensorConfig::single(WIDTH, HEIGHT, HwFormat::Raw10, 30);

    let links: Vec<_> = (0..3)
        .map(|ch| {
            let host = Arc::new(RecordingHost::new(SensorTopology::default()));
            let (_, csi) = rig.probe_csi(ch, host);
            csi.open().unwrap();
            csi.s_format(window(), cfg()).unwrap();
            csi
        })
        .collect();

    links[0].s_stream(true).unwrap();
    links[1].s_stream(true).unwrap();
    assert_eq!(rig.camsys.pool().available(), 0);
    assert_ne!(
        links[0].attached_wdma(0).unwrap().ch,
        links[1].attached_wdma(0).unwrap().ch
    );

    assert_eq!(links[2].s_stream(true), Err(CsiError::NoDevice));
    assert!(!links[2].is_streaming());

    links[0].s_stream(false).unwrap();
    assert_eq!(rig.camsys.pool().available(), 1);
    links[2].s_stream(true).unwrap();
    assert_eq!(rig.camsys.pool().available(), 0);
    assert_eq!(rig.camsys.devices().len(), 3);
}

#[test]
fn test_power_is_reference_counted() {
    let rig = SimRig::new(RigOptions::default());
    let host = Arc::new(RecordingHost::new(SensorTopology::default()));
    let (_, a) = rig.probe_csi(0, host.clone());
    let (_, b) = rig.probe_csi(1, host);

    let module = rig.camsys.pool().module(0).unwrap();
    a.s_power(true).unwrap();
    b.s_power(true).unwrap();
    assert_eq!(module.active_cnt.load(Ordering::SeqCst), 2);
    a.s_power(false).unwrap();
    b.s_power(false).unwrap();
    assert_eq!(module.active_cnt.load(Ordering::SeqCst), 0);
}
