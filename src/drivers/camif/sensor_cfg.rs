//! 传感器模式配置
//!
//! 一个传感器模式对应一份 `SensorConfig`: 链路参数、每个链路 VC 的输入格式,
//! 以及每个 (WDMA 下标, DMA VC) 输出槽的格式和它来自哪个链路 VC.
//! 一次 stream 期间不可变.

use crate::config::{CSIS_MAX_NUM_DMA_ATTACH, CSI_VIRTUAL_CH_MAX, DMA_VIRTUAL_CH_MAX};
use crate::drivers::camif::pdp_top::CAMIF_OTF_OUT_MAX;
use crate::error::{CsiError, CsiResult};

/// 硬件像素格式 (MIPI data type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwFormat {
    #[default]
    Raw10,
    Raw8,
    Raw12,
    Raw14,
    Raw16,
    Embedded8,
    User(u32),
}

impl HwFormat {
    pub fn data_type(self) -> u32 {
        match self {
            HwFormat::Raw8 => 0x2a,
            HwFormat::Raw10 => 0x2b,
            HwFormat::Raw12 => 0x2c,
            HwFormat::Raw14 => 0x2d,
            HwFormat::Raw16 => 0x2e,
            HwFormat::Embedded8 => 0x12,
            HwFormat::User(dt) => dt & 0x3f,
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            HwFormat::Raw8 | HwFormat::Embedded8 | HwFormat::User(_) => 8,
            HwFormat::Raw10 => 10,
            HwFormat::Raw12 => 12,
            HwFormat::Raw14 => 14,
            HwFormat::Raw16 => 16,
        }
    }
}

/// 扩展格式标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtFormat(pub u32);

impl ExtFormat {
    pub const PACKED: u32 = 1 << 0;
    pub const POTF: u32 = 1 << 1;
    pub const EMBEDDED: u32 = 1 << 2;
    pub const PRIVATE: u32 = 1 << 3;

    pub fn is_packed(self) -> bool {
        self.0 & Self::PACKED != 0
    }

    pub fn is_potf(self) -> bool {
        self.0 & Self::POTF != 0
    }

    pub fn is_user_embedded(self) -> bool {
        self.0 & (Self::EMBEDDED | Self::PRIVATE) != 0
    }
}

/// 输出 VC 的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VcType {
    /// 图像, 由外部缓冲承载
    #[default]
    Nothing,
    TailPdaf,
    MipiStat,
    Embedded,
    Embedded2,
    Private,
    Fro,
    Vpdaf,
}

impl VcType {
    pub fn name(self) -> &'static str {
        match self {
            VcType::Nothing => "IMG",
            VcType::TailPdaf => "TAILPDAF",
            VcType::MipiStat => "MIPISTAT",
            VcType::Embedded => "EMBEDDED",
            VcType::Embedded2 => "EMBEDDED2",
            VcType::Private => "PRIVATE",
            VcType::Fro => "FRO",
            VcType::Vpdaf => "VPDAF",
        }
    }
}

/// 传感器扩展模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExMode {
    #[default]
    None,
    DualFps960,
    DualFps480,
    /// PD 统计走独立的 stat WDMA
    PdstatOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterleaveMode {
    /// 只有 VC0
    #[default]
    Ch0Only,
    Dt,
    Vc,
    DtVc,
}

/// 一个 VC 的输入或输出配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VciConfig {
    pub width: u32,
    pub height: u32,
    pub hwformat: HwFormat,
    pub extformat: ExtFormat,
    pub vc_type: VcType,
    /// 内部缓冲个数, 0 表示使用默认值
    pub buffer_num: u32,
    pub stride: u32,
    pub dummy_pixel: u32,
}

impl VciConfig {
    pub fn image(width: u32, height: u32, hwformat: HwFormat) -> Self {
        VciConfig {
            width,
            height,
            hwformat,
            ..Default::default()
        }
    }
}

/// 传感器模式配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub lanes: u32,
    pub mipi_speed: u32,
    pub settle: u32,
    pub interleave_mode: InterleaveMode,
    /// line rate error tolerance
    pub lrte: u32,
    pub ex_mode: ExMode,
    pub max_vc: u32,
    /// 需要挂接的 WDMA 数
    pub dma_num: usize,
    pub wdma_ch_hint: Option<u32>,
    pub input: [VciConfig; CSI_VIRTUAL_CH_MAX],
    pub output: [[VciConfig; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
    /// 每个输出槽来自的链路 VC
    pub link_vc: [[u32; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
    /// 每个 WDMA 的输入取自哪个 OTF 输出
    pub otf_out_id: [usize; CSIS_MAX_NUM_DMA_ATTACH],
    /// 每个 OTF 输出的图像/HPD/VPD 链路 VC
    pub img_vc: [u32; CAMIF_OTF_OUT_MAX],
    pub hpd_vc: [u32; CAMIF_OTF_OUT_MAX],
    pub vpd_vc: [u32; CAMIF_OTF_OUT_MAX],
    pub pdaf_buffer_num: u32,
}

impl SensorConfig {
    /// 单 VC 图像模式: VC0 -> WDMA0.VC0
    pub fn single(width: u32, height: u32, hwformat: HwFormat, framerate: u32) -> Self {
        let mut input = [VciConfig::default(); CSI_VIRTUAL_CH_MAX];
        input[0] = VciConfig::image(width, height, hwformat);
        let mut output = [[VciConfig::default(); DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH];
        output[0][0] = VciConfig::image(width, height, hwformat);

        SensorConfig {
            width,
            height,
            framerate,
            lanes: 4,
            mipi_speed: 2000,
            settle: 0x10,
            interleave_mode: InterleaveMode::Ch0Only,
            lrte: 0,
            ex_mode: ExMode::None,
            max_vc: 0,
            dma_num: 1,
            wdma_ch_hint: None,
            input,
            output,
            link_vc: [[0; DMA_VIRTUAL_CH_MAX]; CSIS_MAX_NUM_DMA_ATTACH],
            otf_out_id: [0; CSIS_MAX_NUM_DMA_ATTACH],
            img_vc: [0; CAMIF_OTF_OUT_MAX],
            hpd_vc: [0; CAMIF_OTF_OUT_MAX],
            vpd_vc: [0; CAMIF_OTF_OUT_MAX],
            pdaf_buffer_num: 0,
        }
    }

    /// 在 WDMA0 上增加一个附加 VC (PD、embedded 等)
    pub fn add_vc(&mut self, link_vc: usize, cfg: VciConfig) -> CsiResult<()> {
        if link_vc >= CSI_VIRTUAL_CH_MAX || link_vc >= DMA_VIRTUAL_CH_MAX {
            return Err(CsiError::OutOfRange);
        }
        self.input[link_vc] = cfg;
        self.output[0][link_vc] = cfg;
        self.link_vc[0][link_vc] = link_vc as u32;
        if self.max_vc < link_vc as u32 {
            self.max_vc = link_vc as u32;
        }
        if self.interleave_mode == InterleaveMode::Ch0Only {
            self.interleave_mode = InterleaveMode::Vc;
        }
        Ok(())
    }

    /// 输出槽是否被使用
    pub fn is_output_mapped(&self, idx: usize, vc: usize) -> bool {
        idx < CSIS_MAX_NUM_DMA_ATTACH
            && vc < DMA_VIRTUAL_CH_MAX
            && idx < self.dma_num
            && self.output[idx][vc].width != 0
    }

    /// 承载某个链路 VC 的所有输出槽
    pub fn dma_targets(&self, link_vc: u32) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.dma_num.min(CSIS_MAX_NUM_DMA_ATTACH))
            .flat_map(|idx| (0..DMA_VIRTUAL_CH_MAX).map(move |vc| (idx, vc)))
            .filter(move |&(idx, vc)| {
                self.is_output_mapped(idx, vc) && self.link_vc[idx][vc] == link_vc
            })
    }

    pub fn any_output_width(&self) -> bool {
        (0..self.dma_num.min(CSIS_MAX_NUM_DMA_ATTACH))
            .any(|idx| self.output[idx].iter().any(|o| o.width != 0))
    }
}

// ============ entry id ============

/// 第一个外部 VC 子设备的 entry id
pub const ENTRY_SSVC0: u32 = 0x20;
pub const ENTRY_SSVC_MAX: u32 =
    ENTRY_SSVC0 + (CSIS_MAX_NUM_DMA_ATTACH * DMA_VIRTUAL_CH_MAX) as u32;

/// entry id -> (WDMA 下标, DMA VC)
pub fn entry_to_channel(entry_id: u32) -> CsiResult<(usize, usize)> {
    if !(ENTRY_SSVC0..ENTRY_SSVC_MAX).contains(&entry_id) {
        return Err(CsiError::OutOfRange);
    }
    let off = (entry_id - ENTRY_SSVC0) as usize;
    Ok((off / DMA_VIRTUAL_CH_MAX, off % DMA_VIRTUAL_CH_MAX))
}

/// (WDMA 下标, DMA VC) -> entry id
pub fn channel_to_entry(idx: usize, vc: usize) -> CsiResult<u32> {
    if idx >= CSIS_MAX_NUM_DMA_ATTACH || vc >= DMA_VIRTUAL_CH_MAX {
        return Err(CsiError::OutOfRange);
    }
    Ok(ENTRY_SSVC0 + (idx * DMA_VIRTUAL_CH_MAX + vc) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_mapping() {
        assert_eq!(entry_to_channel(ENTRY_SSVC0), Ok((0, 0)));
        assert_eq!(entry_to_channel(ENTRY_SSVC0 + 13), Ok((1, 3)));
        assert_eq!(channel_to_entry(3, 9), Ok(ENTRY_SSVC_MAX - 1));
        assert_eq!(entry_to_channel(ENTRY_SSVC_MAX), Err(CsiError::OutOfRange));
        assert_eq!(entry_to_channel(0), Err(CsiError::OutOfRange));
        assert_eq!(channel_to_entry(0, 10), Err(CsiError::OutOfRange));
    }

    #[test]
    fn test_single_and_added_vc() {
        let mut cfg = SensorConfig::single(1920, 1080, HwFormat::Raw10, 30);
        assert_eq!(cfg.dma_targets(0).collect::<alloc::vec::Vec<_>>(), [(0, 0)]);

        let pd = VciConfig {
            width: 240,
            height: 1080,
            hwformat: HwFormat::Raw10,
            vc_type: VcType::TailPdaf,
            ..Default::default()
        };
        cfg.add_vc(1, pd).unwrap();
        assert_eq!(cfg.max_vc, 1);
        assert_eq!(cfg.dma_targets(1).collect::<alloc::vec::Vec<_>>(), [(0, 1)]);
        assert!(cfg.dma_targets(5).next().is_none());
        assert!(cfg.any_output_width());
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(HwFormat::Raw10.data_type(), 0x2b);
        assert_eq!(HwFormat::Raw12.bits_per_pixel(), 12);
        assert!(ExtFormat(ExtFormat::PACKED | ExtFormat::POTF).is_potf());
        assert!(!ExtFormat::default().is_user_embedded());
    }
}
