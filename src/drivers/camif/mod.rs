//! Pablo CAMIF: CSI 链路、WDMA 与 OTF/IBUF 路由
//!
//! 数据路径: 传感器 -> MIPI PHY -> CSIS 链路 -> (PDP_TOP OTF mux / IBUF -> PDP)
//! 或 -> WDMA -> 内存. EBUF/MCB/BNS 是 OTF 路径上可选的中间块.

pub mod csi;
pub mod csis_hw;
pub mod ebuf;
pub mod frame;
pub mod notify;
pub mod pdp_top;
pub mod sensor_cfg;
pub mod subdev;
pub mod wdma;

pub use csi::{CsiCtrl, CsiDevice, CsiIoctl, CsiResources, ImageWindow, VvalidEvent};
