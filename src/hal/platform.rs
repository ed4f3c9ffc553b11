//! 平台服务
//!
//! CSI 核心需要宿主内核提供的最小服务集合: 时钟、延时、PHY 电源与配置、
//! 缓存同步以及内部 DMA 缓冲分配.

use crate::error::CsiResult;

/// 内部 DMA 缓冲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBuffer {
    /// 设备虚拟地址
    pub dva: u64,
    pub size: usize,
}

/// MIPI PHY 配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyConfig {
    pub lanes: u32,
    /// Mbps per lane
    pub mipi_speed: u32,
    pub settle: u32,
    pub use_cphy: bool,
}

pub trait Platform: Send + Sync {
    /// 单调时钟 (ns)
    fn ktime_ns(&self) -> u64;
    /// 含休眠时间的启动时钟 (ns)
    fn boottime_ns(&self) -> u64;
    fn cpu_id(&self) -> u32 {
        0
    }
    /// 忙等或睡眠 `ms` 毫秒
    fn mdelay(&self, ms: u32);

    fn phy_power(&self, csi_ch: u32, on: bool) -> CsiResult<()>;
    fn phy_set(&self, csi_ch: u32, cfg: &PhyConfig) -> CsiResult<()>;

    fn dma_alloc(&self, size: usize) -> CsiResult<DmaBuffer>;
    fn dma_free(&self, buf: &DmaBuffer);
    /// 设备写完后让 CPU 看到最新数据
    fn sync_for_cpu(&self, buf: &DmaBuffer);

    /// 当前 DVFS 档位下的 CSIS 时钟 (Hz)
    fn csis_clk_hz(&self) -> u32 {
        crate::config::PATTERN_GEN_CLK_HZ
    }
}
