//! VC 子设备
//!
//! - `DmaSubdev`: 外部 (用户空间) 缓冲承载的 VC, 由视频节点注册
//! - `InternalSubdev`: 驱动自己分配缓冲的 VC (PD、embedded、FRO 等)

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use super::frame::{FrameManager, FrameState, SharedFrameManager, VideoDone};
use super::sensor_cfg::{VcType, VciConfig};
use crate::config::SUBDEV_INTERNAL_BUF_MAX;
use crate::error::{CsiError, CsiResult};
use crate::hal::platform::{DmaBuffer, Platform};

const SUBDEV_OPEN: u32 = 1 << 0;
const SUBDEV_START: u32 = 1 << 1;

/// SBWC 压缩类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SbwcType {
    #[default]
    None,
    Lossless,
    Lossy,
}

impl SbwcType {
    pub fn is_comp(self) -> bool {
        self != SbwcType::None
    }

    pub fn code(self) -> u32 {
        match self {
            SbwcType::None => 0,
            SbwcType::Lossless => 1,
            SbwcType::Lossy => 2,
        }
    }
}

/// 外部 VC 的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubdevFormat {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub memory_bitwidth: u32,
    pub sbwc: SbwcType,
}

/// 图像行跨度 (字节, 32 对齐)
pub fn img_stride(width: u32, memory_bitwidth: u32) -> u32 {
    align_up((width * memory_bitwidth + 7) / 8, 32)
}

fn align_up(v: u32, align: u32) -> u32 {
    (v + align - 1) / align * align
}

/// 外部 VC 子设备
pub struct DmaSubdev {
    pub id: u32,
    name: String,
    state: AtomicU32,
    pub framemgr: SharedFrameManager,
    /// leader 子设备的帧管理器, 用于清除 out_flag
    pub leader: Option<SharedFrameManager>,
    vctx: Arc<dyn VideoDone>,
    fmt: spin::Mutex<SubdevFormat>,
}

impl DmaSubdev {
    pub fn new(
        id: u32,
        name: &str,
        framemgr: SharedFrameManager,
        leader: Option<SharedFrameManager>,
        vctx: Arc<dyn VideoDone>,
        fmt: SubdevFormat,
    ) -> Self {
        DmaSubdev {
            id,
            name: String::from(name),
            state: AtomicU32::new(0),
            framemgr,
            leader,
            vctx,
            fmt: spin::Mutex::new(fmt),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self) {
        self.state.fetch_or(SUBDEV_OPEN, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.state.store(0, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.state.fetch_or(SUBDEV_START | SUBDEV_OPEN, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.state.fetch_and(!SUBDEV_START, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) & SUBDEV_OPEN != 0
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::SeqCst) & SUBDEV_START != 0
    }

    pub fn format(&self) -> SubdevFormat {
        *self.fmt.lock()
    }

    pub fn set_format(&self, fmt: SubdevFormat) {
        *self.fmt.lock() = fmt;
    }

    /// 把缓冲交还给视频上下文
    pub fn buffer_done(&self, index: usize, state: super::frame::BufState) {
        self.vctx.done(index, state);
    }

    /// 清除 leader 帧上本子设备的 out_flag
    pub fn clear_leader_flag(&self, stream_findex: usize) {
        let Some(leader) = &self.leader else {
            return;
        };
        let bit = 1u64 << (self.id % 64);
        if let Some(frame) = leader.lock().frame_mut(stream_findex) {
            frame.out_flag &= !bit;
        }
    }
}

// ============ 内部子设备 ============

/// 按 VC 类型决定内部缓冲的位宽和个数
pub fn internal_layout(cfg: &VciConfig, pdaf_buffer_num: u32) -> CsiResult<(u32, u32)> {
    let layout = match cfg.vc_type {
        VcType::TailPdaf | VcType::Vpdaf => {
            let bpp = if cfg.extformat.is_packed() { 10 } else { 16 };
            let num = if pdaf_buffer_num == 0 {
                SUBDEV_INTERNAL_BUF_MAX
            } else {
                pdaf_buffer_num
            };
            (bpp, num)
        }
        VcType::MipiStat | VcType::Embedded | VcType::Embedded2 | VcType::Private => {
            (8, SUBDEV_INTERNAL_BUF_MAX)
        }
        // 所有 FRO DMA 复用同一块缓冲
        VcType::Fro => (16, 1),
        VcType::Nothing => return Err(CsiError::InvalidArgument),
    };
    Ok(layout)
}

/// 单个内部缓冲大小
pub fn internal_buffer_size(width: u32, height: u32, memory_bitwidth: u32) -> usize {
    img_stride(width, memory_bitwidth) as usize * height as usize
}

/// 驱动自有缓冲的 VC
pub struct InternalSubdev {
    pub name: String,
    pub vc_type: VcType,
    pub width: u32,
    pub height: u32,
    pub memory_bitwidth: u32,
    pub num_buffers: u32,
    pub size: usize,
    pub sbwc: SbwcType,
    pub framemgr: SharedFrameManager,
    bufs: Vec<DmaBuffer>,
}

impl InternalSubdev {
    /// 根据 VC 配置计算布局并分配缓冲
    pub fn alloc(
        platform: &dyn Platform,
        name: &str,
        cfg: &VciConfig,
        pdaf_buffer_num: u32,
    ) -> CsiResult<Self> {
        let (bitwidth, num) = internal_layout(cfg, pdaf_buffer_num)?;
        let size = internal_buffer_size(cfg.width, cfg.height, bitwidth);

        let mut bufs = Vec::with_capacity(num as usize);
        for _ in 0..num {
            match platform.dma_alloc(size) {
                Ok(buf) => bufs.push(buf),
                Err(e) => {
                    for buf in &bufs {
                        platform.dma_free(buf);
                    }
                    return Err(e);
                }
            }
        }

        let mut fm = FrameManager::new(name, num as usize);
        for (i, buf) in bufs.iter().enumerate() {
            if let Some(frame) = fm.frame_mut(i) {
                frame.dva.push(buf.dva);
            }
        }

        Ok(InternalSubdev {
            name: String::from(name),
            vc_type: cfg.vc_type,
            width: cfg.width,
            height: cfg.height,
            memory_bitwidth: bitwidth,
            num_buffers: num,
            size,
            sbwc: SbwcType::None,
            framemgr: Arc::new(spin::Mutex::new(fm)),
            bufs,
        })
    }

    pub fn free(&self, platform: &dyn Platform) {
        for buf in &self.bufs {
            platform.dma_free(buf);
        }
    }

    pub fn buffer(&self, index: usize) -> Option<DmaBuffer> {
        self.bufs.get(index).copied()
    }

    /// 内部缓冲 VC 中不参与 FRO 的部分
    pub fn is_buf_only(&self) -> bool {
        self.vc_type != VcType::Fro
    }

    /// 把所有 PROCESS / COMPLETE 帧放回 FREE
    pub fn recycle(&self) {
        let mut fm = self.framemgr.lock();
        for state in [FrameState::Process, FrameState::Complete] {
            while let Some(i) = fm.peek(state) {
                if fm.trans(i, FrameState::Free).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::sensor_cfg::{ExtFormat, HwFormat};
    use crate::system::sim::SimPlatform;

    fn vci(vc_type: VcType, width: u32, height: u32, packed: bool) -> VciConfig {
        VciConfig {
            width,
            height,
            hwformat: HwFormat::Raw10,
            extformat: ExtFormat(if packed { ExtFormat::PACKED } else { 0 }),
            vc_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_internal_layout_per_type() {
        assert_eq!(internal_layout(&vci(VcType::TailPdaf, 1, 1, true), 0), Ok((10, 3)));
        assert_eq!(internal_layout(&vci(VcType::Vpdaf, 1, 1, false), 6), Ok((16, 6)));
        assert_eq!(internal_layout(&vci(VcType::Embedded, 1, 1, false), 6), Ok((8, 3)));
        assert_eq!(internal_layout(&vci(VcType::Fro, 1, 1, false), 0), Ok((16, 1)));
        assert_eq!(
            internal_layout(&vci(VcType::Nothing, 1, 1, false), 0),
            Err(CsiError::InvalidArgument)
        );
    }

    #[test]
    fn test_internal_buffer_size() {
        // 240 * 10 / 8 = 300 -> 对齐到 320
        assert_eq!(internal_buffer_size(240, 100, 10), 320 * 100);
        // 4 * 8 / 8 = 4 -> 32
        assert_eq!(internal_buffer_size(4, 2, 8), 64);
        assert_eq!(internal_buffer_size(1920, 1, 16), 3840);
    }

    #[test]
    fn test_internal_subdev_alloc_and_free() {
        let platform = SimPlatform::new();
        let isd = InternalSubdev::alloc(&platform, "VC1", &vci(VcType::MipiStat, 64, 4, false), 0)
            .unwrap();
        assert_eq!(isd.num_buffers, 3);
        assert_eq!(isd.size, 64 * 4);
        assert_eq!(platform.live_allocations(), 3);

        let dva0 = isd.buffer(0).map(|b| b.dva);
        assert_eq!(isd.framemgr.lock().frame(0).and_then(|f| f.dva.first().copied()), dva0);

        isd.free(&platform);
        assert_eq!(platform.live_allocations(), 0);
    }

    #[test]
    fn test_img_stride() {
        assert_eq!(img_stride(1920, 10), 2400);
        assert_eq!(img_stride(100, 10), 128);
    }
}
