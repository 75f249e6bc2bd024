//! 间接绘制命令分配
//!
//! 每帧的间接命令从一个共享的命令缓冲区中线性分配。
//!
//! ## 分配策略
//!
//! - **按帧重置**：帧计数变化时偏移归零
//! - **对齐**：偏移按存储缓冲区对齐向上取整
//! - **扩展**：空间不足时新大小为 `(offset + bytes) * 1.5`，旧缓冲区交给后端延迟销毁
//!
//! ## 错误处理
//!
//! 后端创建缓冲区失败时返回 [`IndirectDrawError::BufferCreationFailed`]，调用者放弃本帧。

use crate::render::backend::GpuBackend;
use std::collections::VecDeque;
use thiserror::Error;

/// 间接绘制错误类型
#[derive(Error, Debug)]
pub enum IndirectDrawError {
    /// 缓冲区容量不足
    #[error("Buffer capacity insufficient: required {required}, available {available}")]
    InsufficientCapacity { required: u64, available: u64 },
    /// 无效的绘制参数
    #[error("Invalid draw arguments: {0}")]
    InvalidArguments(String),
    /// 缓冲区创建失败
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
}

/// 索引间接绘制参数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// 索引数
    pub index_count: u32,
    /// 实例数
    pub instance_count: u32,
    /// 第一个索引
    pub first_index: u32,
    /// 基础顶点
    pub base_vertex: i32,
    /// 第一个实例
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// 单条命令的字节数
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// 向上对齐
#[inline]
pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// 延迟销毁队列
///
/// GPU可能仍在读取退役的资源，`frames_in_flight` 帧之后才真正释放。
#[derive(Debug)]
pub struct GarbageQueue<T> {
    entries: VecDeque<(u32, T)>,
    frames_in_flight: u32,
}

impl<T> GarbageQueue<T> {
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// 在 `framecount` 帧退役
    pub fn push(&mut self, item: T, framecount: u32) {
        self.entries.push_back((framecount, item));
    }

    /// 取出已过期的条目
    pub fn collect(&mut self, framecount: u32) -> Vec<T> {
        let mut expired = Vec::new();
        while let Some((retired, _)) = self.entries.front() {
            if framecount.wrapping_sub(*retired) < self.frames_in_flight {
                break;
            }
            if let Some((_, item)) = self.entries.pop_front() {
                expired.push(item);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 间接命令分配器
pub struct IndirectCommandAllocator<B: GpuBackend> {
    /// 当前命令缓冲区（首次分配时创建）
    buffer: Option<B::CommandBuffer>,
    /// 当前缓冲区大小（字节）
    size: u64,
    /// 本帧已分配的字节
    offset: u64,
    /// 上次重置时的帧计数
    framecount: u32,
    initial_size: u64,
    grow_count: u32,
}

impl<B: GpuBackend> IndirectCommandAllocator<B> {
    /// 创建分配器（缓冲区延迟创建）
    pub fn new(initial_size: u64) -> Self {
        Self {
            buffer: None,
            size: initial_size,
            offset: 0,
            framecount: 0,
            initial_size,
            grow_count: 0,
        }
    }

    /// 帧计数变化时重置偏移
    pub fn begin_frame(&mut self, framecount: u32) {
        if framecount != self.framecount {
            self.framecount = framecount;
            self.offset = 0;
        }
    }

    /// 为 `count` 条命令分配空间，返回字节偏移
    pub fn reserve(
        &mut self,
        backend: &mut B,
        count: u32,
        framecount: u32,
    ) -> Result<u64, IndirectDrawError> {
        if count == 0 {
            return Err(IndirectDrawError::InvalidArguments(
                "cannot reserve zero commands".to_string(),
            ));
        }
        self.begin_frame(framecount);

        let bytes = count as u64 * DrawIndexedIndirectArgs::SIZE;
        if self.buffer.is_none() {
            self.size = self.initial_size.max(bytes);
            self.buffer = Some(backend.create_command_buffer(self.size)?);
        }

        if self.offset + bytes > self.size {
            let mut size = self.offset + bytes;
            size += size >> 1;
            let buffer = backend.create_command_buffer(size)?;
            if let Some(old) = self.buffer.replace(buffer) {
                backend.retire_command_buffer(old, framecount);
            }
            tracing::debug!(
                target: "worldbrush",
                old_size = self.size,
                new_size = size,
                "Indirect command buffer grown"
            );
            self.size = size;
            self.offset = 0;
            self.grow_count += 1;
        }

        let offset = self.offset;
        let align = backend.capabilities().storage_align;
        self.offset += align_up(bytes, align);
        Ok(offset)
    }

    /// 当前命令缓冲区
    pub fn buffer(&self) -> Option<&B::CommandBuffer> {
        self.buffer.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 扩展次数
    pub fn grow_count(&self) -> u32 {
        self.grow_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::gpu_driven::software::SoftwareBackend;

    #[test]
    fn test_args_layout() {
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        let args = DrawIndexedIndirectArgs::default();
        assert_eq!(args.index_count, 0);
        assert_eq!(args.base_vertex, 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(20, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(20, 1), 20);
    }

    #[test]
    fn test_reserve_aligned_and_reset_per_frame() {
        let mut backend = SoftwareBackend::new();
        let mut alloc = IndirectCommandAllocator::<SoftwareBackend>::new(256 * 1024);

        assert_eq!(alloc.reserve(&mut backend, 3, 1).unwrap(), 0);
        assert_eq!(alloc.reserve(&mut backend, 1, 1).unwrap(), 256);
        assert_eq!(alloc.offset(), 512);

        // 新的一帧从头开始
        assert_eq!(alloc.reserve(&mut backend, 1, 2).unwrap(), 0);
        assert_eq!(alloc.grow_count(), 0);
        assert_eq!(backend.live_command_buffers(), 1);
    }

    #[test]
    fn test_grow_retires_old_buffer() {
        let mut backend = SoftwareBackend::new();
        let mut alloc = IndirectCommandAllocator::<SoftwareBackend>::new(1024);

        assert_eq!(alloc.reserve(&mut backend, 40, 1).unwrap(), 0);
        assert_eq!(alloc.offset(), 1024);

        // 1024 + 200 = 1224，扩展为 1224 * 1.5
        assert_eq!(alloc.reserve(&mut backend, 10, 1).unwrap(), 0);
        assert_eq!(alloc.size(), 1224 + 612);
        assert_eq!(alloc.grow_count(), 1);
        assert_eq!(backend.retired_command_buffers(), 1);
    }

    #[test]
    fn test_zero_reserve_rejected() {
        let mut backend = SoftwareBackend::new();
        let mut alloc = IndirectCommandAllocator::<SoftwareBackend>::new(1024);
        assert!(matches!(
            alloc.reserve(&mut backend, 0, 1),
            Err(IndirectDrawError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_garbage_queue_delay() {
        let mut queue = GarbageQueue::new(3);
        queue.push("a", 10);
        queue.push("b", 11);
        assert!(queue.collect(12).is_empty());
        assert_eq!(queue.collect(13), vec!["a"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.collect(20), vec!["b"]);
        assert!(queue.is_empty());
    }
}
