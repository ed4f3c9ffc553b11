//! 帧缓冲池
//!
//! 包含:
//! - 帧状态 FREE / REQUEST / PROCESS / COMPLETE
//! - 每个状态一条 FIFO 队列, 帧在队列间迁移
//! - 视频上下文的完成回调

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{CsiError, CsiResult};

/// 帧状态
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// 空闲
    Free = 0,
    /// 已提交, 等待 DMA
    Request = 1,
    /// 地址已写入硬件
    Process = 2,
    /// DMA 完成, 等待回收
    Complete = 3,
}

const FRAME_STATE_NUM: usize = 4;

/// 帧处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotResult {
    Success,
    BadFrame,
    Timeout,
    Corrupted,
}

/// 交还给视频上下文的缓冲状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufState {
    Done,
    Error,
}

/// 单个帧
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub fcount: u32,
    pub state: FrameState,
    pub result: ShotResult,
    /// 每个 plane / batch 的 DMA 地址
    pub dva: Vec<u64>,
    pub num_buffers: u32,
    /// leader 帧的下标
    pub stream_findex: usize,
    /// 尚未完成的输出 (按 entry id 置位)
    pub out_flag: u64,
}

impl Frame {
    pub fn new(index: usize) -> Self {
        Frame {
            index,
            fcount: 0,
            state: FrameState::Free,
            result: ShotResult::Success,
            dva: Vec::new(),
            num_buffers: 1,
            stream_findex: index,
            out_flag: 0,
        }
    }
}

/// 帧管理器
pub struct FrameManager {
    name: String,
    frames: Vec<Frame>,
    queues: [VecDeque<usize>; FRAME_STATE_NUM],
}

pub type SharedFrameManager = Arc<spin::Mutex<FrameManager>>;

impl FrameManager {
    /// 创建帧管理器, 所有帧处于 FREE
    pub fn new(name: &str, num_frames: usize) -> Self {
        let frames: Vec<Frame> = (0..num_frames).map(Frame::new).collect();
        let mut queues: [VecDeque<usize>; FRAME_STATE_NUM] = Default::default();
        queues[FrameState::Free as usize].extend(0..num_frames);
        FrameManager {
            name: String::from(name),
            frames,
            queues,
        }
    }

    pub fn shared(name: &str, num_frames: usize) -> SharedFrameManager {
        Arc::new(spin::Mutex::new(Self::new(name, num_frames)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    /// 某状态队列的队首
    pub fn peek(&self, state: FrameState) -> Option<usize> {
        self.queues[state as usize].front().copied()
    }

    pub fn queued_count(&self, state: FrameState) -> usize {
        self.queues[state as usize].len()
    }

    /// 把帧迁移到新状态的队尾
    pub fn trans(&mut self, index: usize, to: FrameState) -> CsiResult<()> {
        let from = self.frames.get(index).ok_or(CsiError::OutOfRange)?.state;
        let queue = &mut self.queues[from as usize];
        if let Some(pos) = queue.iter().position(|&i| i == index) {
            queue.remove(pos);
        }
        self.queues[to as usize].push_back(index);
        self.frames[index].state = to;
        Ok(())
    }

    /// 提交一帧: 记录地址并迁移到 REQUEST
    pub fn queue(&mut self, index: usize, fcount: u32, dva: &[u64]) -> CsiResult<()> {
        let frame = self.frames.get_mut(index).ok_or(CsiError::OutOfRange)?;
        frame.fcount = fcount;
        frame.result = ShotResult::Success;
        frame.dva.clear();
        frame.dva.extend_from_slice(dva);
        frame.num_buffers = dva.len().max(1) as u32;
        self.trans(index, FrameState::Request)
    }
}

/// 视频上下文完成回调
pub trait VideoDone: Send + Sync {
    fn done(&self, index: usize, state: BufState);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_manager_transitions() {
        let mut fm = FrameManager::new("SSVC0", 3);
        assert_eq!(fm.queued_count(FrameState::Free), 3);

        fm.queue(1, 10, &[0x1000]).unwrap();
        fm.queue(0, 11, &[0x2000]).unwrap();
        assert_eq!(fm.peek(FrameState::Request), Some(1));

        fm.trans(1, FrameState::Process).unwrap();
        assert_eq!(fm.peek(FrameState::Process), Some(1));
        assert_eq!(fm.peek(FrameState::Request), Some(0));
        assert_eq!(fm.frame(1).map(|f| f.state), Some(FrameState::Process));

        fm.trans(1, FrameState::Complete).unwrap();
        assert_eq!(fm.queued_count(FrameState::Process), 0);
        assert_eq!(fm.queued_count(FrameState::Free), 1);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut fm = FrameManager::new("SSVC1", 1);
        assert_eq!(fm.trans(4, FrameState::Process), Err(CsiError::OutOfRange));
        assert!(fm.queue(2, 0, &[]).is_err());
    }
}
