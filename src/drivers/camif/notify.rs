//! 与上层传感器子系统的接口

use alloc::vec::Vec;

use super::frame::ShotResult;
use super::sensor_cfg::VcType;
use crate::error::CsiResult;

/// 通知上层的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsiEvent {
    Vsync { fcount: u32 },
    FrameStart { fcount: u32 },
    Vblank { fcount: u32 },
    FrameEnd { fcount: u32, status: ShotResult },
    Line { fcount: u32 },
    /// 外部 VC 缓冲完成
    DmaEnd { idx: usize, vc: usize, index: Option<usize> },
    DmaEndEmbedded { vc: usize, frameptr: u32 },
    DmaEndMipiStat { vc: usize, frameptr: u32 },
}

/// 上报给调试统计的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryEvent {
    LinkCrc,
    CsiOverflow,
    DmaFifoFull,
    IbufOverflow,
}

/// 当前处理组拓扑
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorTopology {
    /// 子 PAF 组的编号 (决定主 OTF 通道)
    pub paf_child: Option<u32>,
    /// AEB 模式下后继 PAF 组编号
    pub paf_next: Vec<u32>,
    /// 直连 OTF 输出 (非 vOTF)
    pub otf_output: bool,
    /// 只有传感器链路, 下游走内存
    pub sensor_only: bool,
    pub max_target_fps: u32,
}

/// 传感器子系统
pub trait SensorHost: Send + Sync {
    fn notify(&self, event: CsiEvent);

    fn topology(&self) -> SensorTopology;

    /// 处理一帧的 shot 请求, 没有待处理请求时返回 false
    fn trigger_shot(&self, _fcount: u32) -> bool {
        true
    }

    /// 传感器寄存器 dump
    fn dump(&self) {}

    /// 请求传感器前端停流
    fn request_snr_stop(&self) {}

    fn is_streaming(&self) -> bool {
        true
    }

    fn s_stream(&self, _on: bool) -> CsiResult<()> {
        Ok(())
    }

    fn report_event(&self, _event: TelemetryEvent) {}

    /// 软件补发的帧结束 (虚拟 OTF 仿真)
    fn frame_end_emul(&self) {}

    fn debug_otf(&self) {}

    /// PD 统计的调优 dump
    fn pd_dump(&self, _vc_type: VcType, _fcount: u32, _frameptr: u32) {}
}
