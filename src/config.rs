//! 编译期常量与运行时调试参数

/// 链路侧虚拟通道数
pub const CSI_VIRTUAL_CH_MAX: usize = 10;
/// 每个 WDMA 的虚拟通道数
pub const DMA_VIRTUAL_CH_MAX: usize = 10;
/// 一个 CSI 设备最多挂接的 WDMA 数
pub const CSIS_MAX_NUM_DMA_ATTACH: usize = 4;
pub const MAX_NUM_CSIS_OTF_CH: usize = 4;
/// 每个 OTF 通道的 line context 数
pub const CSIS_OTF_CH_LC_NUM: usize = 6;

pub const CSI_ERR_COUNT: u32 = 10;
/// 达到阈值后每隔多少帧再做一次寄存器 dump
pub const CSI_ERR_DUMP_INTERVAL: u32 = 20;
pub const CSI_WAIT_ABORT_TIMEOUT_MS: u32 = 250;

pub const IS_TIMESTAMP_HASH_KEY: usize = 20;
pub const BUF_SWAP_CNT: u32 = 2;
pub const MAX_WORK_COUNT: usize = 10;
pub const DEBUG_FRAME_COUNT: usize = 3;
pub const LOG_INTERVAL_OF_DROPS: u32 = 30;
pub const DBG_IRQ_INFO_MAX: usize = 20;

/// line 中断位置 = 高度 * CSI_LINE_RATIO / 20
pub const CSI_LINE_RATIO: u32 = 14;
/// 开启 line 中断所需的调试级别
pub const CSI_LINE_IRQ_DEBUG_LEVEL: u32 = 5;

pub const SUBDEV_INTERNAL_BUF_MAX: u32 = 3;
pub const PATTERN_GEN_CLK_HZ: u32 = 533_000_000;
/// 等待 vvalid 下降的最大次数 (每次 1ms)
pub const CSI_VVALID_WAIT_MAX_MS: u32 = 100;

/// DMA 地址槽位数 (两个 ring 半区, 每半区最多 16 帧)
pub const CSIS_MAX_DMA_SLOT: usize = 32;

/// PHY 调优模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyTune {
    Disable,
    Dphy,
    Cphy,
}

/// 运行时调试参数, 由子系统上下文持有
#[derive(Debug, Clone, Copy)]
pub struct DebugParams {
    /// CSI 调试级别, 大于 0 时打开 ISR 调试打印
    pub csi_level: u32,
    pub phy_tune: PhyTune,
    /// stream on 时只打开测试图样, 不使能链路
    pub pattern_en: bool,
    /// 测试图样帧率, 0 表示使用传感器配置
    pub pattern_fps: u32,
    /// PDP_TOP 测试图样时钟频率
    pub pattern_clk_hz: u32,
}

impl Default for DebugParams {
    fn default() -> Self {
        DebugParams {
            csi_level: 0,
            phy_tune: PhyTune::Disable,
            pattern_en: false,
            pattern_fps: 0,
            pattern_clk_hz: PATTERN_GEN_CLK_HZ,
        }
    }
}
