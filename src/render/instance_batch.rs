//! 笔刷模型实例化批处理模块
//!
//! 一次绘制通道内，同一模型的连续实体合并为一个实例区间，每个纹理分组产生一个调用。
//! 调用先缓存在 [`BatchContext`] 中，刷新时由收集阶段在GPU上生成间接命令并一次提交。
//!
//! ## 架构设计
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Brush Batching Pipeline                 │
//! ├─────────────────────────────────────────────────────────┤
//! │  1. add_call                                             │
//! │     - 解析纹理回退、标志和透明度                          │
//! │     - 记录调用参数和重映射条目                            │
//! │     - 达到 max_bmodel_draws 时隐式刷新                    │
//! │                                                          │
//! │  2. flush                                                │
//! │     - 分配命令区间 → 收集阶段 → INDIRECT屏障              │
//! │     - 无绑定: 一次多重间接绘制                            │
//! │     - 绑定槽: 逐命令绑定纹理并绘制                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

use crate::config::{BatchLimits, WorldRenderConfig};
use crate::error::{BrushError, BrushResult};
use crate::render::backend::{BackendCaps, ComputeDispatch, GpuBackend, PlaceholderTextures, ProgramId};
use crate::render::gpu_driven::command_generator::CallRemap;
use crate::render::gpu_driven::indirect::{DrawIndexedIndirectArgs, IndirectCommandAllocator};
use crate::render::gpu_driven::stages::{Stage, StagePlan};
use crate::world::{BrushEntity, BrushTexture, TexType, TextureHandle};

// ============================================================================
// GPU数据结构
// ============================================================================

/// 调用标志：深度修正（非世界实体）
pub const CALL_FLAG_ZFIX: u32 = 1;
/// 调用标志：有全亮叠加纹理
pub const CALL_FLAG_FULLBRIGHT: u32 = 1 << 1;
/// 调用标志：全亮作弊
pub const CALL_FLAG_FULLBRIGHT_CHEAT: u32 = 1 << 2;

/// 实例数据
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuInstance {
    /// 世界矩阵前三行
    pub world: [f32; 12],
    /// 实体透明度，`-1` 表示使用纹理默认值
    pub alpha: f32,
    pub _pad: [f32; 3],
}

impl GpuInstance {
    pub fn from_entity(entity: &BrushEntity) -> Self {
        Self {
            world: entity.world_rows(),
            alpha: if entity.alpha.is_default() {
                -1.0
            } else {
                entity.alpha.decode()
            },
            _pad: [0.0; 3],
        }
    }
}

/// 无绑定模式的调用参数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BindlessCall {
    pub flags: u32,
    pub alpha: f32,
    pub texture: u64,
    pub fullbright: u64,
}

/// 绑定槽模式的调用参数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BoundCall {
    pub flags: u32,
    pub alpha: f32,
    pub base_instance: i32,
    pub _pad: u32,
}

/// 解析后的调用
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCall {
    pub flags: u32,
    pub alpha: f32,
    pub texture: Option<TextureHandle>,
    pub fullbright: Option<TextureHandle>,
}

impl ResolvedCall {
    /// 按当前配置解析纹理和标志
    pub fn resolve(
        texture: Option<&BrushTexture>,
        zfix: bool,
        config: &WorldRenderConfig,
        placeholders: &PlaceholderTextures,
    ) -> Self {
        let (tx, fb) = match texture {
            Some(t) => {
                let (mut tx, mut fb) = (t.texture, t.fullbright);
                if config.lightmap_cheat {
                    tx = None;
                    fb = None;
                }
                if !config.fullbrights && t.tex_type != TexType::Sky {
                    fb = None;
                }
                (tx, fb)
            }
            None => (Some(placeholders.white), Some(placeholders.white)),
        };

        let zfix = zfix && config.zfix;
        let mut flags = zfix as u32;
        if fb.is_some() {
            flags |= CALL_FLAG_FULLBRIGHT;
        }
        if config.fullbright_cheat {
            flags |= CALL_FLAG_FULLBRIGHT_CHEAT;
        }
        let alpha = texture.map_or(1.0, |t| config.liquid_alpha.for_type(t.tex_type));

        Self {
            flags,
            alpha,
            texture: tx,
            fullbright: fb,
        }
    }
}

// ============================================================================
// 调用列表
// ============================================================================

/// 调用参数输出
pub trait CallEmitter {
    /// 追加一个调用
    fn emit(&mut self, call: &ResolvedCall, first_instance: u32, placeholders: &PlaceholderTextures);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// 按后端能力选择的调用列表
#[derive(Debug, Clone, PartialEq)]
pub enum CallList {
    /// 无绑定：纹理句柄写入调用参数
    Bindless(Vec<BindlessCall>),
    /// 绑定槽：每个调用一对纹理
    Bound {
        calls: Vec<BoundCall>,
        textures: Vec<[TextureHandle; 2]>,
    },
}

impl CallList {
    pub fn for_caps(caps: &BackendCaps, capacity: usize) -> Self {
        if caps.bindless {
            Self::Bindless(Vec::with_capacity(capacity))
        } else {
            Self::Bound {
                calls: Vec::with_capacity(capacity),
                textures: Vec::with_capacity(capacity),
            }
        }
    }

    pub fn is_bindless(&self) -> bool {
        matches!(self, Self::Bindless(_))
    }
}

impl CallEmitter for CallList {
    fn emit(&mut self, call: &ResolvedCall, first_instance: u32, placeholders: &PlaceholderTextures) {
        match self {
            Self::Bindless(calls) => calls.push(BindlessCall {
                flags: call.flags,
                alpha: call.alpha,
                texture: call.texture.unwrap_or(placeholders.grey).bindless,
                fullbright: call.fullbright.unwrap_or(placeholders.black).bindless,
            }),
            Self::Bound { calls, textures } => {
                calls.push(BoundCall {
                    flags: call.flags,
                    alpha: call.alpha,
                    base_instance: first_instance as i32,
                    _pad: 0,
                });
                textures.push([
                    call.texture.unwrap_or(placeholders.grey),
                    call.fullbright.unwrap_or(placeholders.black),
                ]);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Bindless(calls) => calls.len(),
            Self::Bound { calls, .. } => calls.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Bindless(calls) => calls.clear(),
            Self::Bound { calls, textures } => {
                calls.clear();
                textures.clear();
            }
        }
    }
}

// ============================================================================
// 批处理上下文
// ============================================================================

/// 批处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// 刷新次数
    pub flushes: u32,
    /// 达到调用上限引起的刷新
    pub implicit_flushes: u32,
    /// 添加的调用
    pub calls: u32,
    /// 提交的间接命令
    pub draws: u32,
    /// 因超出实例容量被丢弃的实体
    pub truncated_entities: u32,
}

/// 每帧复用的批处理数组
#[derive(Debug)]
pub struct BatchContext {
    /// 本次绘制的实例
    pub instances: Vec<GpuInstance>,
    calls: CallList,
    remap: Vec<CallRemap>,
    program: ProgramId,
    placeholders: PlaceholderTextures,
    stats: BatchStats,
}

impl BatchContext {
    pub fn new(caps: &BackendCaps, placeholders: PlaceholderTextures, limits: &BatchLimits) -> Self {
        let draws = limits.max_bmodel_draws as usize;
        Self {
            instances: Vec::with_capacity(limits.instance_capacity()),
            calls: CallList::for_caps(caps, draws),
            remap: Vec::with_capacity(draws),
            program: ProgramId::default(),
            placeholders,
            stats: BatchStats::default(),
        }
    }

    /// 待提交的调用数
    pub fn pending(&self) -> usize {
        self.remap.len()
    }

    pub fn calls(&self) -> &CallList {
        &self.calls
    }

    pub fn remap(&self) -> &[CallRemap] {
        &self.remap
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn placeholders(&self) -> &PlaceholderTextures {
        &self.placeholders
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BatchStats::default();
    }

    pub(crate) fn record_truncation(&mut self, dropped: u32) {
        self.stats.truncated_entities += dropped;
    }
}

/// 一次绘制通道的批处理器
pub struct BModelBatcher<'a, B: GpuBackend> {
    pub backend: &'a mut B,
    pub allocator: &'a mut IndirectCommandAllocator<B>,
    pub ctx: &'a mut BatchContext,
    pub plan: &'a StagePlan,
    pub config: &'a WorldRenderConfig,
    pub limits: &'a BatchLimits,
    pub framecount: u32,
}

impl<B: GpuBackend> BModelBatcher<'_, B> {
    /// 开始新的调用序列
    pub fn reset(&mut self, program: ProgramId) {
        self.ctx.program = program;
        self.ctx.calls.clear();
        self.ctx.remap.clear();
    }

    /// 添加一个调用
    ///
    /// `index` 为命令模板槽位，实例区间为 `[first_instance, first_instance + num_instances)`。
    pub fn add_call(
        &mut self,
        index: u32,
        first_instance: u32,
        num_instances: u32,
        texture: Option<&BrushTexture>,
        zfix: bool,
    ) -> BrushResult<()> {
        if self.ctx.remap.len() == self.limits.max_bmodel_draws as usize {
            tracing::trace!(target: "worldbrush", pending = self.ctx.remap.len(), "Implicit batch flush");
            self.ctx.stats.implicit_flushes += 1;
            self.flush()?;
        }

        debug_assert!(num_instances > 0);
        debug_assert!(num_instances <= self.limits.max_bmodel_instances);

        let call = ResolvedCall::resolve(texture, zfix, self.config, &self.ctx.placeholders);
        let placeholders = self.ctx.placeholders;
        self.ctx.calls.emit(&call, first_instance, &placeholders);
        self.ctx.remap.push(CallRemap::new(
            index,
            first_instance,
            num_instances,
            self.limits.max_bmodel_instances,
        ));
        self.ctx.stats.calls += 1;
        Ok(())
    }

    /// 提交所有待处理的调用，返回提交的命令数
    pub fn flush(&mut self) -> BrushResult<u32> {
        let count = self.ctx.remap.len() as u32;
        if count == 0 {
            return Ok(0);
        }

        let offset = self.allocator.reserve(self.backend, count, self.framecount)?;
        let commands = self.allocator.buffer().ok_or(BrushError::BufferAllocation {
            requested: count as u64 * DrawIndexedIndirectArgs::SIZE,
        })?;

        self.backend.dispatch(ComputeDispatch::GatherIndirect {
            remap: &self.ctx.remap,
            max_instances: self.limits.max_bmodel_instances,
            dst: commands,
            dst_offset: offset,
        })?;
        self.backend.barrier(self.plan.barrier_after(Stage::GatherIndirect));

        match &self.ctx.calls {
            CallList::Bindless(calls) => {
                self.backend
                    .draw_multi_indirect(self.ctx.program, calls, commands, offset, count)?;
            }
            CallList::Bound { calls, textures } => {
                self.backend
                    .draw_bound(self.ctx.program, calls, textures, commands, offset)?;
            }
        }

        self.ctx.stats.flushes += 1;
        self.ctx.stats.draws += count;
        self.ctx.calls.clear();
        self.ctx.remap.clear();
        Ok(count)
    }
}
