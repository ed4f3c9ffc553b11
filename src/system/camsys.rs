//! 相机子系统上下文
//!
//! 持有所有 CSI 设备共享的资源: 平台服务、中断注册表、WDMA 通道池、
//! PDP_TOP 以及 EBUF/MCB/BNS. 每个 CSI 设备在 probe 时拿到它的引用,
//! 不使用全局变量.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::RwLock;

use crate::config::DebugParams;
use crate::drivers::camif::csi::{CsiDevice, CsiResources};
use crate::drivers::camif::ebuf::{Bns, Ebuf, Mcb};
use crate::drivers::camif::notify::SensorHost;
use crate::drivers::camif::pdp_top::PdpTop;
use crate::drivers::camif::wdma::{WdmaChannel, WdmaModule, WdmaPool};
use crate::error::CsiResult;
use crate::hal::irq::{IrqDomain, IrqReturn};
use crate::hal::platform::Platform;

pub struct CamSys {
    platform: Arc<dyn Platform>,
    irq: IrqDomain,
    pool: WdmaPool,
    top: Option<Arc<PdpTop>>,
    top_irq: Option<u32>,
    ebuf: Option<Arc<Ebuf>>,
    mcb: Option<Arc<Mcb>>,
    bns: Option<Arc<Bns>>,
    debug: RwLock<DebugParams>,
    csis: RwLock<Vec<Weak<CsiDevice>>>,
}

impl CamSys {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        CamSys {
            platform,
            irq: IrqDomain::new(),
            pool: WdmaPool::new(),
            top: None,
            top_irq: None,
            ebuf: None,
            mcb: None,
            bns: None,
            debug: RwLock::new(DebugParams::default()),
            csis: RwLock::new(Vec::new()),
        }
    }

    // ============ 构建 ============

    pub fn with_top(mut self, top: Arc<PdpTop>, irq: u32) -> Self {
        self.top = Some(top);
        self.top_irq = Some(irq);
        self
    }

    pub fn with_ebuf(mut self, ebuf: Arc<Ebuf>) -> Self {
        self.ebuf = Some(ebuf);
        self
    }

    pub fn with_mcb(mut self, mcb: Arc<Mcb>) -> Self {
        self.mcb = Some(mcb);
        self
    }

    pub fn with_bns(mut self, bns: Arc<Bns>) -> Self {
        self.bns = Some(bns);
        self
    }

    pub fn with_wdma_module(self, module: Arc<WdmaModule>) -> Self {
        self.pool.register_module(module);
        self
    }

    pub fn with_wdma(self, chan: Arc<WdmaChannel>) -> Self {
        self.pool.register(chan);
        self
    }

    // ============ 访问器 ============

    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    pub fn irq(&self) -> &IrqDomain {
        &self.irq
    }

    pub fn pool(&self) -> &WdmaPool {
        &self.pool
    }

    pub fn top(&self) -> Option<&Arc<PdpTop>> {
        self.top.as_ref()
    }

    pub fn ebuf(&self) -> Option<&Arc<Ebuf>> {
        self.ebuf.as_ref()
    }

    pub fn mcb(&self) -> Option<&Arc<Mcb>> {
        self.mcb.as_ref()
    }

    pub fn bns(&self) -> Option<&Arc<Bns>> {
        self.bns.as_ref()
    }

    pub fn debug(&self) -> DebugParams {
        *self.debug.read()
    }

    /// 调试参数在下一次 stream on 或下一个中断生效
    pub fn set_debug(&self, params: DebugParams) {
        *self.debug.write() = params;
    }

    // ============ 设备 ============

    /// probe 一个 CSI 设备并登记到子系统
    pub fn register_csi(self: &Arc<Self>, res: CsiResources, host: Arc<dyn SensorHost>) -> Arc<CsiDevice> {
        let csi = CsiDevice::probe(self.clone(), res, host);
        let mut csis = self.csis.write();
        csis.retain(|w| w.strong_count() > 0);
        csis.push(Arc::downgrade(&csi));
        csi
    }

    pub fn devices(&self) -> Vec<Arc<CsiDevice>> {
        self.csis.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// 注册 PDP_TOP 的 IBUF 中断
    pub fn request_top_irq(self: &Arc<Self>) -> CsiResult<()> {
        let Some(irq) = self.top_irq else {
            return Ok(());
        };
        let me = Arc::downgrade(self);
        self.irq.request_irq(
            irq,
            Arc::new(move |_| match me.upgrade() {
                Some(camsys) => camsys.isr_top(),
                None => IrqReturn::None,
            }),
            "CSIS_PDP_TOP",
            0,
            Arc::as_ptr(self) as usize,
        )
    }

    pub fn free_top_irq(self: &Arc<Self>) {
        if let Some(irq) = self.top_irq {
            self.irq.free_irq(irq, Arc::as_ptr(self) as usize);
        }
    }

    /// IBUF 中断: 读出一次, 分发给每个链路
    fn isr_top(&self) -> IrqReturn {
        let Some(top) = &self.top else {
            return IrqReturn::None;
        };
        let irq = top.read_irq_source();
        if irq.is_empty() {
            return IrqReturn::None;
        }
        for csi in self.devices() {
            csi.isr_ibuf(&irq);
        }
        IrqReturn::Handled
    }

    /// 软中断上下文: 所有设备的 tasklet
    pub fn do_softirq(&self) {
        for csi in self.devices() {
            csi.do_softirq();
        }
    }

    /// 进程上下文: 所有设备的工作项
    pub fn do_work(&self) {
        for csi in self.devices() {
            csi.do_work();
        }
    }
}
