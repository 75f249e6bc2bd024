//! 渲染后端抽象
//!
//! 笔刷渲染只通过 [`GpuBackend`] 与GPU交互：创建/退役命令缓冲区、执行计算阶段、
//! 插入屏障、上传实例以及提交间接绘制。
//!
//! ## 实现
//!
//! - [`WgpuBackend`](super::gpu_driven::wgpu_backend::WgpuBackend)：真实GPU
//! - [`SoftwareBackend`](super::gpu_driven::software::SoftwareBackend)：CPU执行同样的内核并记录提交，用于测试

use crate::error::BrushResult;
use crate::render::gpu_driven::command_generator::CallRemap;
use crate::render::gpu_driven::culling::FrameUniforms;
use crate::render::gpu_driven::indirect::IndirectDrawError;
use crate::render::gpu_driven::stages::Stage;
use crate::render::instance_batch::{BindlessCall, BoundCall, GpuInstance};
use crate::world::{TextureHandle, WorldModel};

/// 着色器程序ID（由后端分配）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// 后端能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCaps {
    /// 支持无绑定纹理（整批调用共享一组纹理绑定）
    pub bindless: bool,
    /// 存储缓冲区偏移对齐（字节）
    pub storage_align: u64,
}

impl Default for BackendCaps {
    fn default() -> Self {
        Self {
            bindless: false,
            storage_align: 256,
        }
    }
}

/// 占位纹理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderTextures {
    pub white: TextureHandle,
    pub grey: TextureHandle,
    pub black: TextureHandle,
}

/// 内存屏障范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BarrierScope(pub u32);

impl BarrierScope {
    pub const NONE: Self = Self(0);
    /// 着色器存储读写
    pub const STORAGE: Self = Self(1);
    /// 间接绘制参数
    pub const INDIRECT: Self = Self(2);
    /// 索引缓冲区
    pub const INDEX: Self = Self(4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BarrierScope {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BarrierScope {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 混合模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
}

/// 渲染状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: BlendMode,
    pub depth_write: bool,
}

impl RenderState {
    /// 不透明：写深度
    pub const OPAQUE: Self = Self {
        blend: BlendMode::Opaque,
        depth_write: true,
    };
    /// 半透明：Alpha混合，不写深度
    pub const ALPHA_BLEND: Self = Self {
        blend: BlendMode::Alpha,
        depth_write: false,
    };
}

/// 纹理单元2上的辅助纹理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxTexture {
    /// 光照贴图
    Lightmap,
    /// 灰色占位（全亮作弊）
    Grey,
    /// 天空盒立方体贴图
    SkyCubemap,
}

/// 计算阶段调度
pub enum ComputeDispatch<'a, C> {
    /// 清零世界纹理分组的索引计数
    ClearIndirect { groups: u32 },
    /// 叶子剔除并标记表面
    CullMark {
        uniforms: &'a FrameUniforms,
        vis_words: &'a [u32],
        leaf_count: u32,
    },
    /// 按重映射表收集命令
    GatherIndirect {
        remap: &'a [CallRemap],
        max_instances: u32,
        dst: &'a C,
        dst_offset: u64,
    },
}

impl<C> ComputeDispatch<'_, C> {
    /// 对应的流水线阶段
    pub fn stage(&self) -> Stage {
        match self {
            Self::ClearIndirect { .. } => Stage::ClearIndirect,
            Self::CullMark { .. } => Stage::CullMark,
            Self::GatherIndirect { .. } => Stage::GatherIndirect,
        }
    }

    /// 工作项数量（每个工作项一次调用）
    pub fn work_items(&self) -> u32 {
        match self {
            Self::ClearIndirect { groups } => *groups,
            Self::CullMark { leaf_count, .. } => *leaf_count,
            Self::GatherIndirect { remap, .. } => remap.len() as u32,
        }
    }
}

impl<C> std::fmt::Debug for ComputeDispatch<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDispatch")
            .field("stage", &self.stage())
            .field("work_items", &self.work_items())
            .finish()
    }
}

/// GPU后端
pub trait GpuBackend {
    /// 间接命令缓冲区
    type CommandBuffer;

    /// 后端名称
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCaps;

    fn placeholders(&self) -> PlaceholderTextures;

    /// 上传世界的静态数据（叶子、表面、顶点、索引、命令模板）
    fn load_world(&mut self, world: &WorldModel) -> BrushResult<()>;

    fn begin_frame(&mut self, framecount: u32) -> BrushResult<()>;

    /// 结束一帧并回收过期的退役缓冲区
    fn end_frame(&mut self, framecount: u32) -> BrushResult<()>;

    /// 创建间接命令缓冲区
    fn create_command_buffer(&mut self, size: u64) -> Result<Self::CommandBuffer, IndirectDrawError>;

    /// 退役命令缓冲区（GPU可能仍在使用，延迟销毁）
    fn retire_command_buffer(&mut self, buffer: Self::CommandBuffer, framecount: u32);

    /// 执行计算阶段
    fn dispatch(&mut self, dispatch: ComputeDispatch<'_, Self::CommandBuffer>) -> BrushResult<()>;

    fn barrier(&mut self, scope: BarrierScope);

    fn set_state(&mut self, state: RenderState);

    fn bind_aux_texture(&mut self, aux: AuxTexture);

    /// 上传本次绘制的实例数据
    fn upload_instances(&mut self, instances: &[GpuInstance]) -> BrushResult<()>;

    /// 一次多重间接绘制（无绑定纹理）
    fn draw_multi_indirect(
        &mut self,
        program: ProgramId,
        calls: &[BindlessCall],
        commands: &Self::CommandBuffer,
        offset: u64,
        count: u32,
    ) -> BrushResult<()>;

    /// 逐命令绘制，每次重新绑定纹理
    fn draw_bound(
        &mut self,
        program: ProgramId,
        calls: &[BoundCall],
        textures: &[[TextureHandle; 2]],
        commands: &Self::CommandBuffer,
        offset: u64,
    ) -> BrushResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_scope() {
        let scope = BarrierScope::STORAGE | BarrierScope::INDEX;
        assert!(scope.contains(BarrierScope::STORAGE));
        assert!(scope.contains(BarrierScope::INDEX));
        assert!(!scope.contains(BarrierScope::INDIRECT));
        assert!(!scope.contains(BarrierScope::STORAGE | BarrierScope::INDIRECT));
        assert!(scope.contains(BarrierScope::NONE));
        assert!(BarrierScope::NONE.is_empty());

        let mut all = BarrierScope::NONE;
        all |= scope;
        all |= BarrierScope::INDIRECT;
        assert_eq!(all, BarrierScope(7));
    }

    #[test]
    fn test_render_states() {
        assert!(RenderState::OPAQUE.depth_write);
        assert_eq!(RenderState::ALPHA_BLEND.blend, BlendMode::Alpha);
        assert!(!RenderState::ALPHA_BLEND.depth_write);
    }

    #[test]
    fn test_dispatch_stage() {
        let dispatch: ComputeDispatch<'_, ()> = ComputeDispatch::ClearIndirect { groups: 5 };
        assert_eq!(dispatch.stage(), Stage::ClearIndirect);
        assert_eq!(dispatch.work_items(), 5);
        assert!(format!("{:?}", dispatch).contains("ClearIndirect"));
    }
}
