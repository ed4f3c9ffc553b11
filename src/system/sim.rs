//! 主机侧仿真
//!
//! 包含:
//! - `SimPlatform`: 虚拟时钟、记录 PHY 调用、按 4K 对齐的线性 DMA 分配器
//! - `RecordingHost` / `RecordingVideo`: 记录所有回调的上层替身
//! - `SimRig`: 用模拟寄存器组拼出一套完整的 CAMIF 硬件

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::drivers::camif::csi::{CsiDevice, CsiResources};
use crate::drivers::camif::csis_hw;
use crate::drivers::camif::frame::{BufState, VideoDone};
use crate::drivers::camif::notify::{CsiEvent, SensorHost, SensorTopology, TelemetryEvent};
use crate::drivers::camif::pdp_top::{PdpTop, TopVersion, PDP_TOP_REG_SIZE, TOP_R_IRQ_SRC};
use crate::drivers::camif::sensor_cfg::VcType;
use crate::drivers::camif::wdma::{self, WdmaChannel, WdmaModule, WDMA_CMN_SIZE, WDMA_CTL_SIZE, WDMA_VC_SIZE};
use crate::error::{CsiError, CsiResult};
use crate::hal::mmio::SimBank;
use crate::hal::platform::{DmaBuffer, PhyConfig, Platform};
use crate::system::camsys::CamSys;

const NS_PER_MS: u64 = 1_000_000;
const DMA_BASE: u64 = 0x1000_0000;
const DMA_ALIGN: u64 = 0x1000;

type DelayHook = Arc<dyn Fn(u32) + Send + Sync>;

// ============ 平台 ============

/// PHY 调用记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyCall {
    Power { csi_ch: u32, on: bool },
    Set { csi_ch: u32, cfg: PhyConfig },
}

pub struct SimPlatform {
    now_ns: AtomicU64,
    /// 启动时钟领先单调时钟的量 (模拟休眠)
    suspend_ns: AtomicU64,
    elapsed_ms: AtomicU32,
    delay_hook: Mutex<Option<DelayHook>>,
    phy_calls: Mutex<Vec<PhyCall>>,
    phy_fail: AtomicBool,
    next_dva: AtomicU64,
    live: AtomicUsize,
    syncs: AtomicU32,
}

impl SimPlatform {
    pub fn new() -> Self {
        SimPlatform {
            now_ns: AtomicU64::new(NS_PER_MS),
            suspend_ns: AtomicU64::new(0),
            elapsed_ms: AtomicU32::new(0),
            delay_hook: Mutex::new(None),
            phy_calls: Mutex::new(Vec::new()),
            phy_fail: AtomicBool::new(false),
            next_dva: AtomicU64::new(DMA_BASE),
            live: AtomicUsize::new(0),
            syncs: AtomicU32::new(0),
        }
    }

    /// 推进虚拟时钟, 不触发延时回调
    pub fn advance_ms(&self, ms: u64) {
        self.now_ns.fetch_add(ms * NS_PER_MS, Ordering::SeqCst);
    }

    pub fn set_suspend_ns(&self, ns: u64) {
        self.suspend_ns.store(ns, Ordering::SeqCst);
    }

    /// `mdelay` 累计的毫秒数
    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }

    /// 每次 `mdelay` 之后以累计毫秒数调用
    pub fn on_delay<F>(&self, hook: F)
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        *self.delay_hook.lock() = Some(Arc::new(hook));
    }

    pub fn clear_delay_hook(&self) {
        *self.delay_hook.lock() = None;
    }

    pub fn set_phy_fail(&self, fail: bool) {
        self.phy_fail.store(fail, Ordering::SeqCst);
    }

    pub fn phy_calls(&self) -> Vec<PhyCall> {
        self.phy_calls.lock().clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn sync_count(&self) -> u32 {
        self.syncs.load(Ordering::SeqCst)
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn ktime_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn boottime_ns(&self) -> u64 {
        self.ktime_ns() + self.suspend_ns.load(Ordering::SeqCst)
    }

    fn mdelay(&self, ms: u32) {
        self.advance_ms(ms as u64);
        let elapsed = self.elapsed_ms.fetch_add(ms, Ordering::SeqCst) + ms;

        // 回调可能再次调用平台接口, 先拷出锁
        let hook = self.delay_hook.lock().clone();
        if let Some(hook) = hook {
            hook(elapsed);
        }
    }

    fn phy_power(&self, csi_ch: u32, on: bool) -> CsiResult<()> {
        self.phy_calls.lock().push(PhyCall::Power { csi_ch, on });
        Ok(())
    }

    fn phy_set(&self, csi_ch: u32, cfg: &PhyConfig) -> CsiResult<()> {
        self.phy_calls.lock().push(PhyCall::Set { csi_ch, cfg: *cfg });
        if self.phy_fail.load(Ordering::SeqCst) {
            return Err(CsiError::InvalidArgument);
        }
        Ok(())
    }

    fn dma_alloc(&self, size: usize) -> CsiResult<DmaBuffer> {
        if size == 0 {
            return Err(CsiError::InvalidArgument);
        }
        let span = (size as u64 + DMA_ALIGN - 1) / DMA_ALIGN * DMA_ALIGN;
        let dva = self.next_dva.fetch_add(span, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(DmaBuffer { dva, size })
    }

    fn dma_free(&self, _buf: &DmaBuffer) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn sync_for_cpu(&self, _buf: &DmaBuffer) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }
}

// ============ 上层替身 ============

/// 记录通知和请求的传感器子系统
pub struct RecordingHost {
    events: Mutex<Vec<CsiEvent>>,
    telemetry: Mutex<Vec<TelemetryEvent>>,
    topology: Mutex<SensorTopology>,
    stream_calls: Mutex<Vec<bool>>,
    pub dumps: AtomicU32,
    pub snr_stops: AtomicU32,
    pub emul_ends: AtomicU32,
    pub otf_debugs: AtomicU32,
    pub pd_dumps: AtomicU32,
    /// `trigger_shot` 的返回值
    pub has_request: AtomicBool,
}

impl RecordingHost {
    pub fn new(topology: SensorTopology) -> Self {
        RecordingHost {
            events: Mutex::new(Vec::new()),
            telemetry: Mutex::new(Vec::new()),
            topology: Mutex::new(topology),
            stream_calls: Mutex::new(Vec::new()),
            dumps: AtomicU32::new(0),
            snr_stops: AtomicU32::new(0),
            emul_ends: AtomicU32::new(0),
            otf_debugs: AtomicU32::new(0),
            pd_dumps: AtomicU32::new(0),
            has_request: AtomicBool::new(true),
        }
    }

    pub fn set_topology(&self, topology: SensorTopology) {
        *self.topology.lock() = topology;
    }

    pub fn events(&self) -> Vec<CsiEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<CsiEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    pub fn telemetry(&self) -> Vec<TelemetryEvent> {
        self.telemetry.lock().clone()
    }

    pub fn stream_calls(&self) -> Vec<bool> {
        self.stream_calls.lock().clone()
    }

    pub fn count<F: Fn(&CsiEvent) -> bool>(&self, pred: F) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl SensorHost for RecordingHost {
    fn notify(&self, event: CsiEvent) {
        self.events.lock().push(event);
    }

    fn topology(&self) -> SensorTopology {
        self.topology.lock().clone()
    }

    fn trigger_shot(&self, _fcount: u32) -> bool {
        self.has_request.load(Ordering::SeqCst)
    }

    fn dump(&self) {
        self.dumps.fetch_add(1, Ordering::SeqCst);
    }

    fn request_snr_stop(&self) {
        self.snr_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn s_stream(&self, on: bool) -> CsiResult<()> {
        self.stream_calls.lock().push(on);
        Ok(())
    }

    fn report_event(&self, event: TelemetryEvent) {
        self.telemetry.lock().push(event);
    }

    fn frame_end_emul(&self) {
        self.emul_ends.fetch_add(1, Ordering::SeqCst);
    }

    fn debug_otf(&self) {
        self.otf_debugs.fetch_add(1, Ordering::SeqCst);
    }

    fn pd_dump(&self, _vc_type: VcType, _fcount: u32, _frameptr: u32) {
        self.pd_dumps.fetch_add(1, Ordering::SeqCst);
    }
}

/// 记录缓冲完成的视频上下文
#[derive(Default)]
pub struct RecordingVideo {
    done: Mutex<Vec<(usize, BufState)>>,
}

impl RecordingVideo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done(&self) -> Vec<(usize, BufState)> {
        self.done.lock().clone()
    }
}

impl VideoDone for RecordingVideo {
    fn done(&self, index: usize, state: BufState) {
        self.done.lock().push((index, state));
    }
}

// ============ 仿真硬件 ============

pub const SIM_CSI_IRQ_BASE: u32 = 100;
pub const SIM_WDMA_IRQ_BASE: u32 = 200;
pub const SIM_TOP_IRQ: u32 = 300;

/// 一个 WDMA 通道的寄存器组
pub struct SimWdma {
    pub ctl: Arc<SimBank>,
    pub vc: Arc<SimBank>,
    pub irq: u32,
}

/// 一套完整的仿真 CAMIF
pub struct SimRig {
    pub platform: Arc<SimPlatform>,
    pub camsys: Arc<CamSys>,
    pub wdma: Vec<SimWdma>,
    pub wdma_cmn: Arc<SimBank>,
    pub top_bank: Option<Arc<SimBank>>,
}

/// 仿真硬件的可选项
#[derive(Debug, Clone, Copy)]
pub struct RigOptions {
    pub num_wdma: u32,
    pub top: Option<TopVersion>,
    pub cmn_quirks: u32,
}

impl Default for RigOptions {
    fn default() -> Self {
        RigOptions {
            num_wdma: 2,
            top: Some(TopVersion::V6_0),
            cmn_quirks: 0,
        }
    }
}

impl SimRig {
    pub fn new(opts: RigOptions) -> Self {
        let platform = Arc::new(SimPlatform::new());
        let wdma_cmn = Arc::new(SimBank::new(WDMA_CMN_SIZE));
        let mut camsys = CamSys::new(platform.clone())
            .with_wdma_module(Arc::new(WdmaModule::new(0, wdma_cmn.clone(), opts.cmn_quirks)));

        let mut channels = Vec::new();
        for ch in 0..opts.num_wdma {
            let ctl = Arc::new(SimBank::new(WDMA_CTL_SIZE).with_w1c(&wdma::w1c_registers()));
            let vc = Arc::new(SimBank::new(WDMA_VC_SIZE));
            let irq = SIM_WDMA_IRQ_BASE + ch;
            camsys = camsys.with_wdma(Arc::new(WdmaChannel::new(ch, irq, ctl.clone(), vc.clone(), 0)));
            channels.push(SimWdma { ctl, vc, irq });
        }

        let top_bank = opts.top.map(|version| {
            let bank = Arc::new(SimBank::new(PDP_TOP_REG_SIZE).with_w1c(&[TOP_R_IRQ_SRC]));
            (version, bank)
        });
        if let Some((version, bank)) = &top_bank {
            camsys = camsys.with_top(Arc::new(PdpTop::new(*version, bank.clone())), SIM_TOP_IRQ);
        }

        SimRig {
            platform,
            camsys: Arc::new(camsys),
            wdma: channels,
            wdma_cmn,
            top_bank: top_bank.map(|(_, bank)| bank),
        }
    }

    /// 创建一个 CSI 链路的寄存器组并 probe
    pub fn probe_csi(&self, csi_ch: u32, host: Arc<dyn SensorHost>) -> (Arc<SimBank>, Arc<CsiDevice>) {
        let bank = Arc::new(SimBank::new(csis_hw::CSIS_REG_SIZE).with_w1c(&csis_hw::w1c_registers()));
        bank.poke(csis_hw::CSIS_R_VERSION, csis_hw::CSIS_V5_4);

        let res = CsiResources {
            device_id: csi_ch,
            instance: 0,
            csi_ch,
            base_reg: bank.clone(),
            phy_reg: Some(Arc::new(SimBank::new(csis_hw::PHY_REG_SIZE))),
            fro_reg: None,
            irq: SIM_CSI_IRQ_BASE + csi_ch,
            wdma_ch_hint: None,
            use_cphy: false,
        };
        let csi = self.camsys.register_csi(res, host);
        (bank, csi)
    }

    /// 置位链路中断源并分发
    pub fn raise_link(&self, bank: &SimBank, csi: &CsiDevice, src: u32) {
        bank.raise(csis_hw::CSIS_R_INT_SRC0, src);
        self.camsys.irq().dispatch(csi.irq);
    }

    /// 置位链路错误并分发
    pub fn raise_link_err(&self, bank: &SimBank, csi: &CsiDevice, vc: usize, err: u32, src: u32) {
        bank.raise(csis_hw::CSIS_F_ERR_SRC_VC.at(vc).offset, err);
        if src != 0 {
            bank.raise(csis_hw::CSIS_R_INT_SRC0, src);
        }
        self.camsys.irq().dispatch(csi.irq);
    }

    /// 置位某个 WDMA 的中断源并分发
    pub fn raise_dma(&self, ch: usize, src: u32) {
        let Some(w) = self.wdma.get(ch) else {
            return;
        };
        w.ctl.raise(wdma::DMA_R_INT_SRC, src);
        self.camsys.irq().dispatch(w.irq);
    }

    /// 软中断和工作队列各跑一轮
    pub fn run_deferred(&self) {
        self.camsys.do_softirq();
        self.camsys.do_work();
    }
}

/// 链路中断源里 VC 的帧开始位
pub const fn link_fs(vc: u32) -> u32 {
    1 << vc
}

/// 链路中断源里 VC 的帧结束位
pub const fn link_fe(vc: u32) -> u32 {
    1 << (10 + vc)
}

/// DMA 中断源
pub const fn dma_start(vc: u32) -> u32 {
    1 << vc
}

pub const fn dma_end(vc: u32) -> u32 {
    1 << (10 + vc)
}

pub const DMA_ABORT_DONE: u32 = 1 << 20;

