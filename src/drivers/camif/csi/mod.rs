//! CSI 设备
//!
//! 一个 CSI 设备对应一条 MIPI-CSI 链路. 它负责:
//! - stream on/off 时挂接 WDMA、编程链路与 OTF 路由
//! - 硬中断里维护帧计数、时间戳和帧起止期望
//! - tasklet 里做错误升级与 OTF 重配置, 工作队列里完成缓冲
//!
//! 锁顺序: `dma_seq_slock` -> `rta`; 帧管理器 -> `dma_en`.
//! 持锁期间不回调上层.

mod ctrl;
mod dma;
mod err;
mod frame_irq;
mod isr;
mod stream;

pub use ctrl::{CsiCtrl, CsiIoctl};
pub use frame_irq::VvalidEvent;

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::{Mutex, RwLock};

use super::csis_hw::{self, DbgIrqInfo};
use super::frame::FrameState;
use super::notify::SensorHost;
use super::pdp_top::OtfInfo;
use super::sensor_cfg::{entry_to_channel, HwFormat, SensorConfig, VcType};
use super::subdev::{DmaSubdev, InternalSubdev};
use super::wdma::{WdmaChannel, WdmaModule};
use crate::config::{
    CSIS_MAX_NUM_DMA_ATTACH, CSI_VIRTUAL_CH_MAX, DBG_IRQ_INFO_MAX, DEBUG_FRAME_COUNT,
    DMA_VIRTUAL_CH_MAX, IS_TIMESTAMP_HASH_KEY, LOG_INTERVAL_OF_DROPS, MAX_WORK_COUNT,
};
use crate::error::{CsiError, CsiResult};
use crate::hal::mmio::RegisterBank;
use crate::hal::platform::Platform;
use crate::kernel::{Tasklet, WaitFlag, Work, WorkList};
use crate::klog::RateLimiter;
use crate::system::camsys::CamSys;

// ============ 状态位 ============

const CSIS_START_STREAM: u32 = 0;
const CSIS_LINE_IRQ_ENABLE: u32 = 1;
const CSIS_SET_MULTIBUF_DMA0: u32 = 4;
const CSIS_BUF_ERR_VC0: u32 = 16;

/// 帧起止期望
pub const EXPECT_FRAME_START: u8 = 0;
pub const EXPECT_FRAME_END: u8 = 1;

/// 硬件资源描述, 由 probe 调用方提供
pub struct CsiResources {
    pub device_id: u32,
    pub instance: u32,
    pub csi_ch: u32,
    pub base_reg: Arc<dyn RegisterBank>,
    pub phy_reg: Option<Arc<dyn RegisterBank>>,
    pub fro_reg: Option<Arc<dyn RegisterBank>>,
    pub irq: u32,
    pub wdma_ch_hint: Option<u32>,
    pub use_cphy: bool,
}

/// 图像窗口 (s_format 设置)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageWindow {
    pub offs_h: u32,
    pub offs_v: u32,
    pub width: u32,
    pub height: u32,
    pub o_width: u32,
    pub o_height: u32,
    pub pixelformat: HwFormat,
}

/// 帧起止调试记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub fcount: u32,
    pub instance: u32,
    pub cpu: u32,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

/// stream on 以来的链路中断计数
#[derive(Default)]
pub struct StateCnt {
    pub err: AtomicU32,
    pub start: AtomicU32,
    pub end: AtomicU32,
}

impl StateCnt {
    fn reset(&self) {
        self.err.store(0, Ordering::Relaxed);
        self.start.store(0, Ordering::Relaxed);
        self.end.store(0, Ordering::Relaxed);
    }
}

struct ErrState {
    error_id: [u32; CSI_VIRTUAL_CH_MAX],
    error_id_last: [u32; CSI_VIRTUAL_CH_MAX],
    dma_error_id: [[u32; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
}

impl ErrState {
    const fn new() -> Self {
        ErrState {
            error_id: [0; CSI_VIRTUAL_CH_MAX],
            error_id_last: [0; CSI_VIRTUAL_CH_MAX],
            dma_error_id: [[0; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
        }
    }

    fn link_any(&self) -> u32 {
        self.error_id.iter().fold(0, |acc, e| acc | e)
    }

    fn dma_any(&self) -> u32 {
        self.dma_error_id.iter().flatten().fold(0, |acc, e| acc | e)
    }
}

/// 每个 (WDMA, VC) 的 DMA 使能: 上一帧 / 本帧
struct DmaEnable {
    /// -1 表示还没有记录过
    pre: [[i8; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
    cur: [[bool; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
}

impl DmaEnable {
    const fn new() -> Self {
        DmaEnable {
            pre: [[-1; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
            cur: [[false; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
        }
    }
}

/// 挂接的 WDMA
#[derive(Default)]
struct Attached {
    wdma: [Option<Arc<WdmaChannel>>; CSIS_MAX_NUM_DMA_ATTACH],
    wdma_mod: [Option<Arc<WdmaModule>>; CSIS_MAX_NUM_DMA_ATTACH],
    stat: Option<Arc<WdmaChannel>>,
    stat_mod: Option<Arc<WdmaModule>>,
}

#[derive(Default)]
struct Subdevs {
    dma: [[Option<Arc<DmaSubdev>>; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
    internal: [[Option<Arc<InternalSubdev>>; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
}

/// 按 fcount 哈希的时间戳与帧号
struct Timestamps {
    timestamp: [u64; IS_TIMESTAMP_HASH_KEY],
    timestampboot: [u64; IS_TIMESTAMP_HASH_KEY],
    frame_id: [u64; IS_TIMESTAMP_HASH_KEY],
}

pub struct CsiDevice {
    me: Weak<CsiDevice>,
    camsys: Arc<CamSys>,
    host: Arc<dyn SensorHost>,
    name: String,
    irq_name: String,

    pub device_id: u32,
    instance: AtomicU32,
    pub csi_ch: u32,
    pub irq: u32,
    wdma_ch_hint: Option<u32>,
    use_cphy: bool,
    base_reg: Arc<dyn RegisterBank>,
    phy_reg: Option<Arc<dyn RegisterBank>>,
    fro_reg: Option<Arc<dyn RegisterBank>>,

    state: AtomicU64,
    fcount: AtomicU32,
    chain_fcount: AtomicU32,
    vblank_count: AtomicU32,
    vvalid: AtomicBool,
    sw_checker: AtomicU8,
    bufring_cnt: AtomicU32,
    hw_fcount: AtomicU32,
    otf_batch_num: AtomicU32,
    dma_batch_num: AtomicU32,
    f_id_dec: AtomicBool,
    potf: AtomicBool,
    crc_flag: AtomicBool,
    error_count: AtomicU32,
    error_count_vc_overlap: AtomicU32,
    /// 达到错误阈值后的关断只做一次
    escalated: AtomicBool,
    /// 本次 stream 是否使用了 EBUF / MCB
    ebuf_attached: AtomicBool,
    mcb_attached: AtomicBool,

    sensor_cfg: RwLock<Option<Arc<SensorConfig>>>,
    image: Mutex<ImageWindow>,
    errors: Mutex<ErrState>,
    dma_en: Mutex<DmaEnable>,
    otf_info: Mutex<OtfInfo>,
    rta: RwLock<Attached>,
    dma_seq_slock: Mutex<()>,
    dma_irq_slock: Mutex<()>,
    subdevs: RwLock<Subdevs>,
    ts: Mutex<Timestamps>,
    debug_info: Mutex<[DebugInfo; DEBUG_FRAME_COUNT]>,
    dbg_irq: Mutex<VecDeque<DbgIrqInfo>>,
    pub state_cnt: StateCnt,
    drop_log: RateLimiter,

    flush_wait: WaitFlag,
    tasklet_end: Tasklet,
    tasklet_line: Tasklet,
    tasklet_otf_cfg: Tasklet,
    wq_dma: Work,
    wq_link_dump: Work,
    wq_ebuf_reset: Work,
    work_list: WorkList,
}

impl CsiDevice {
    /// 创建设备. 不触碰硬件, IRQ 在 stream on 时申请.
    pub fn probe(camsys: Arc<CamSys>, res: CsiResources, host: Arc<dyn SensorHost>) -> Arc<Self> {
        let name = format!("CSI{}", res.csi_ch);
        let irq_name = format!("CSI-{}", res.csi_ch);
        kinfo!("[{}] probe (use_cphy {}, irq {})", name, res.use_cphy, res.irq);

        Arc::new_cyclic(|me| CsiDevice {
            me: me.clone(),
            camsys,
            host,
            name,
            irq_name,
            device_id: res.device_id,
            instance: AtomicU32::new(res.instance),
            csi_ch: res.csi_ch,
            irq: res.irq,
            wdma_ch_hint: res.wdma_ch_hint,
            use_cphy: res.use_cphy,
            base_reg: res.base_reg,
            phy_reg: res.phy_reg,
            fro_reg: res.fro_reg,
            state: AtomicU64::new(0),
            fcount: AtomicU32::new(0),
            chain_fcount: AtomicU32::new(0),
            vblank_count: AtomicU32::new(0),
            vvalid: AtomicBool::new(false),
            sw_checker: AtomicU8::new(EXPECT_FRAME_START),
            bufring_cnt: AtomicU32::new(0),
            hw_fcount: AtomicU32::new(0),
            otf_batch_num: AtomicU32::new(1),
            dma_batch_num: AtomicU32::new(1),
            f_id_dec: AtomicBool::new(false),
            potf: AtomicBool::new(false),
            crc_flag: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            error_count_vc_overlap: AtomicU32::new(0),
            escalated: AtomicBool::new(false),
            ebuf_attached: AtomicBool::new(false),
            mcb_attached: AtomicBool::new(false),
            sensor_cfg: RwLock::new(None),
            image: Mutex::new(ImageWindow::default()),
            errors: Mutex::new(ErrState::new()),
            dma_en: Mutex::new(DmaEnable::new()),
            otf_info: Mutex::new(OtfInfo::new(res.csi_ch)),
            rta: RwLock::new(Attached::default()),
            dma_seq_slock: Mutex::new(()),
            dma_irq_slock: Mutex::new(()),
            subdevs: RwLock::new(Subdevs::default()),
            ts: Mutex::new(Timestamps {
                timestamp: [0; IS_TIMESTAMP_HASH_KEY],
                timestampboot: [0; IS_TIMESTAMP_HASH_KEY],
                frame_id: [0; IS_TIMESTAMP_HASH_KEY],
            }),
            debug_info: Mutex::new([DebugInfo::default(); DEBUG_FRAME_COUNT]),
            dbg_irq: Mutex::new(VecDeque::with_capacity(DBG_IRQ_INFO_MAX)),
            state_cnt: StateCnt::default(),
            drop_log: RateLimiter::new(LOG_INTERVAL_OF_DROPS),
            flush_wait: WaitFlag::new(),
            tasklet_end: Tasklet::new("csis_end"),
            tasklet_line: Tasklet::new("csis_line"),
            tasklet_otf_cfg: Tasklet::new("csis_otf_cfg"),
            wq_dma: Work::new("csis_dma"),
            wq_link_dump: Work::new("link_dump"),
            wq_ebuf_reset: Work::new("ebuf_reset"),
            work_list: WorkList::new(MAX_WORK_COUNT),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> u32 {
        self.instance.load(Ordering::Relaxed)
    }

    fn platform(&self) -> &dyn Platform {
        self.camsys.platform()
    }

    /// free_irq 使用的 cookie
    fn cookie(&self) -> usize {
        self as *const Self as usize
    }

    // ============ 状态位 ============

    fn test_bit(&self, bit: u32) -> bool {
        self.state.load(Ordering::SeqCst) & (1 << bit) != 0
    }

    fn set_bit(&self, bit: u32) {
        self.state.fetch_or(1 << bit, Ordering::SeqCst);
    }

    fn clear_bit(&self, bit: u32) {
        self.state.fetch_and(!(1 << bit), Ordering::SeqCst);
    }

    fn test_and_clear_bit(&self, bit: u32) -> bool {
        self.state.fetch_and(!(1 << bit), Ordering::SeqCst) & (1 << bit) != 0
    }

    pub fn is_streaming(&self) -> bool {
        self.test_bit(CSIS_START_STREAM)
    }

    // ============ 访问器 ============

    pub fn fcount(&self) -> u32 {
        self.fcount.load(Ordering::SeqCst)
    }

    pub fn vblank_count(&self) -> u32 {
        self.vblank_count.load(Ordering::SeqCst)
    }

    pub fn vvalid(&self) -> bool {
        self.vvalid.load(Ordering::SeqCst)
    }

    pub fn sw_checker(&self) -> u8 {
        self.sw_checker.load(Ordering::SeqCst)
    }

    pub fn bufring_cnt(&self) -> u32 {
        self.bufring_cnt.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::SeqCst)
    }

    pub fn crc_flag(&self) -> bool {
        self.crc_flag.load(Ordering::SeqCst)
    }

    pub fn f_id_dec(&self) -> bool {
        self.f_id_dec.load(Ordering::SeqCst)
    }

    pub fn dma_batch_num(&self) -> u32 {
        self.dma_batch_num.load(Ordering::SeqCst)
    }

    pub fn otf_batch_num(&self) -> u32 {
        self.otf_batch_num.load(Ordering::SeqCst)
    }

    /// 上层设置的软件 FRO 批大小
    pub fn set_otf_batch_num(&self, num: u32) {
        self.otf_batch_num.store(num.max(1), Ordering::SeqCst);
    }

    /// 与下游链路同步帧计数
    pub fn sync_chain_fcount(&self, fcount: u32) {
        self.chain_fcount.store(fcount, Ordering::SeqCst);
    }

    pub fn base_reg(&self) -> &dyn RegisterBank {
        &*self.base_reg
    }

    pub fn sensor_cfg(&self) -> Option<Arc<SensorConfig>> {
        self.sensor_cfg.read().clone()
    }

    pub fn image(&self) -> ImageWindow {
        *self.image.lock()
    }

    pub fn otf_info(&self) -> OtfInfo {
        self.otf_info.lock().clone()
    }

    /// 每个链路 VC 的累计错误位
    pub fn error_id(&self) -> [u32; CSI_VIRTUAL_CH_MAX] {
        self.errors.lock().error_id
    }

    pub fn dma_error_id(&self, idx: usize) -> [u32; DMA_VIRTUAL_CH_MAX] {
        self.errors
            .lock()
            .dma_error_id
            .get(idx)
            .copied()
            .unwrap_or([0; DMA_VIRTUAL_CH_MAX])
    }

    /// 某帧的时间戳 (单调时钟, 启动时钟)
    pub fn timestamp(&self, fcount: u32) -> (u64, u64) {
        let key = fcount as usize % IS_TIMESTAMP_HASH_KEY;
        let ts = self.ts.lock();
        (ts.timestamp[key], ts.timestampboot[key])
    }

    pub fn frame_id(&self, fcount: u32) -> u64 {
        self.ts.lock().frame_id[fcount as usize % IS_TIMESTAMP_HASH_KEY]
    }

    pub fn debug_info(&self) -> [DebugInfo; DEBUG_FRAME_COUNT] {
        *self.debug_info.lock()
    }

    pub fn dbg_irq_len(&self) -> usize {
        self.dbg_irq.lock().len()
    }

    pub fn attached_wdma(&self, idx: usize) -> Option<Arc<WdmaChannel>> {
        self.rta.read().wdma.get(idx).cloned().flatten()
    }

    pub fn stat_wdma(&self) -> Option<Arc<WdmaChannel>> {
        self.rta.read().stat.clone()
    }

    pub fn internal_subdev(&self, idx: usize, vc: usize) -> Option<Arc<InternalSubdev>> {
        self.subdevs.read().internal.get(idx)?.get(vc)?.clone()
    }

    fn dma_subdev(&self, idx: usize, vc: usize) -> Option<Arc<DmaSubdev>> {
        self.subdevs.read().dma.get(idx)?.get(vc)?.clone()
    }

    /// 把外部 VC 子设备挂到 entry id 对应的槽位
    pub fn register_dma_subdev(&self, entry_id: u32, subdev: Arc<DmaSubdev>) -> CsiResult<()> {
        let (idx, vc) = entry_to_channel(entry_id)?;
        self.subdevs.write().dma[idx][vc] = Some(subdev);
        Ok(())
    }

    /// 挂接数: 有配置时为 dma_num
    fn wdma_max(&self) -> usize {
        self.sensor_cfg
            .read()
            .as_ref()
            .map_or(CSIS_MAX_NUM_DMA_ATTACH, |cfg| cfg.dma_num.min(CSIS_MAX_NUM_DMA_ATTACH))
    }

    fn is_fro_out(cfg: &SensorConfig, idx: usize, vc: usize) -> bool {
        cfg.output[idx][vc].vc_type == VcType::Fro
    }

    /// 内部缓冲已分配且不是 FRO 输出
    fn internal_buf_only(&self, cfg: &SensorConfig, idx: usize, vc: usize) -> Option<Arc<InternalSubdev>> {
        if Self::is_fro_out(cfg, idx, vc) {
            return None;
        }
        self.internal_subdev(idx, vc)
    }

    // ============ 生命周期 ============

    /// 打开设备, 清零计数与错误状态
    pub fn open(&self) -> CsiResult<()> {
        *self.sensor_cfg.write() = None;
        self.error_count.store(0, Ordering::SeqCst);
        self.error_count_vc_overlap.store(0, Ordering::SeqCst);
        *self.errors.lock() = ErrState::new();
        *self.image.lock() = ImageWindow::default();
        *self.dma_en.lock() = DmaEnable::new();

        self.fcount.store(0, Ordering::SeqCst);
        self.vblank_count.store(0, Ordering::SeqCst);
        self.vvalid.store(false, Ordering::SeqCst);
        kdbg!("[{}] open", self.name);
        Ok(())
    }

    /// 关闭设备, 归还 WDMA 并释放内部缓冲
    pub fn close(&self) -> CsiResult<()> {
        self.dma_detach();
        self.free_internal_subdevs();
        kdbg!("[{}] close", self.name);
        Ok(())
    }

    /// 链路软件复位
    pub fn init(&self) -> CsiResult<()> {
        csis_hw::reset(&*self.base_reg);
        Ok(())
    }

    /// WDMA 公共模块按引用计数上下电
    pub fn s_power(&self, on: bool) -> CsiResult<()> {
        let Some(module) = self.camsys.pool().module(0) else {
            kerr!("[{}] wdma_mod is NULL", self.name);
            return Err(CsiError::NoDevice);
        };

        if on {
            if module.active_cnt.fetch_add(1, Ordering::SeqCst) + 1 == 1 {
                module.common_reset(true);
            }
        } else if module.active_cnt.fetch_sub(1, Ordering::SeqCst) - 1 == 0 {
            module.common_reset(false);
        }
        kdbg!("[{}] s_power({})", self.name, on);
        Ok(())
    }

    /// 设置图像窗口与传感器模式, 分配内部缓冲
    pub fn s_format(&self, window: ImageWindow, cfg: SensorConfig) -> CsiResult<()> {
        if cfg.dma_num > CSIS_MAX_NUM_DMA_ATTACH {
            kerr!("[{}] invalid dma_num {}", self.name, cfg.dma_num);
            return Err(CsiError::InvalidArgument);
        }

        *self.image.lock() = window;
        let cfg = Arc::new(cfg);
        *self.sensor_cfg.write() = Some(cfg.clone());

        let debug = self.camsys.debug();
        let (f_id_dec, batch) = if debug.phy_tune != crate::config::PhyTune::Disable {
            (false, 1)
        } else {
            match cfg.ex_mode {
                super::sensor_cfg::ExMode::DualFps960 => (true, 960 / 60),
                super::sensor_cfg::ExMode::DualFps480 => (true, 480 / 60),
                _ => (false, 1),
            }
        };
        self.f_id_dec.store(f_id_dec, Ordering::SeqCst);
        self.dma_batch_num.store(batch, Ordering::SeqCst);
        self.rst_bufring_cnt();

        self.set_internal_subdevs(&cfg)?;

        kinfo!(
            "[{}] s_format {}x{} (f_id_dec {}, dma_batch {})",
            self.name,
            window.width,
            window.height,
            f_id_dec,
            batch
        );
        Ok(())
    }

    fn set_internal_subdevs(&self, cfg: &SensorConfig) -> CsiResult<()> {
        self.free_internal_subdevs();

        let platform = self.platform();
        let mut subdevs = self.subdevs.write();
        for idx in 0..cfg.dma_num.min(CSIS_MAX_NUM_DMA_ATTACH) {
            for vc in 0..DMA_VIRTUAL_CH_MAX {
                let out = &cfg.output[idx][vc];
                if out.vc_type == VcType::Nothing {
                    continue;
                }
                let name = format!("{}-DMA{}-VC{}", self.name, idx, vc);
                let isd = InternalSubdev::alloc(platform, &name, out, cfg.pdaf_buffer_num)
                    .map_err(|e| {
                        kerr!("[{}][DMA{}][VC{}] internal subdev alloc failed ({})", self.name, idx, vc, e);
                        e
                    })?;
                kinfo!(
                    "[{}][DMA{}][VC{}] internal {} {}x{} x{}",
                    self.name,
                    idx,
                    vc,
                    out.vc_type.name(),
                    isd.width,
                    isd.height,
                    isd.num_buffers
                );
                subdevs.internal[idx][vc] = Some(Arc::new(isd));
            }
        }
        Ok(())
    }

    fn free_internal_subdevs(&self) {
        let platform = self.platform();
        let mut subdevs = self.subdevs.write();
        for slot in subdevs.internal.iter_mut().flatten() {
            if let Some(isd) = slot.take() {
                isd.free(platform);
            }
        }
    }

    /// 所有链路 VC 的最近一次错误位
    pub fn g_error_code(&self) -> u32 {
        self.errors.lock().error_id_last.iter().fold(0, |acc, e| acc | e)
    }

    // ============ 软中断 / 工作队列 ============

    /// 软中断上下文: 执行已调度的 tasklet
    pub fn do_softirq(&self) {
        self.tasklet_otf_cfg.run(|| self.otf_cfg_tasklet());
        self.tasklet_end.run(|| self.end_tasklet());
        self.tasklet_line.run(|| self.line_tasklet());
    }

    /// 进程上下文: 执行已排队的工作
    pub fn do_work(&self) {
        self.wq_dma.run(|| self.dma_work_fn());
        self.wq_link_dump.run(|| self.link_dump_fn());
        self.wq_ebuf_reset.run(|| self.ebuf_reset_fn());
    }

    /// 排队等待处理的 DMA 完成消息数
    pub fn pending_dma_work(&self) -> usize {
        self.work_list.len()
    }

    // ============ dump ============

    /// 链路、PHY、WDMA、FRO、MCB、EBUF、PDP_TOP 全部寄存器
    pub fn dump_all(&self) {
        kinfo!("[{}] ===== HW dump =====", self.name);
        csis_hw::dump_bank(&self.name, &*self.base_reg, csis_hw::CSIS_REG_SIZE);
        if let Some(phy) = &self.phy_reg {
            csis_hw::dump_bank("PHY", &**phy, csis_hw::PHY_REG_SIZE);
        }

        {
            let rta = self.rta.read();
            for (wdma, module) in rta.wdma.iter().zip(rta.wdma_mod.iter()) {
                if let Some(wdma) = wdma {
                    wdma.dump();
                }
                if let Some(module) = module {
                    module.dump();
                }
            }
            if let Some(stat) = &rta.stat {
                stat.dump();
            }
        }

        if let Some(fro) = &self.fro_reg {
            csis_hw::dump_bank("FRO", &**fro, csis_hw::FRO_REG_SIZE);
        }
        if let Some(mcb) = self.camsys.mcb() {
            mcb.dump();
        }
        if let Some(ebuf) = self.camsys.ebuf() {
            ebuf.dump();
        }
        if let Some(top) = self.camsys.top() {
            top.dump();
        }
    }

    /// 某个 VC 的帧管理器里各状态的帧数 (REQUEST, PROCESS, COMPLETE)
    fn queued_counts(fm: &super::frame::FrameManager) -> (usize, usize, usize) {
        (
            fm.queued_count(FrameState::Request),
            fm.queued_count(FrameState::Process),
            fm.queued_count(FrameState::Complete),
        )
    }
}
