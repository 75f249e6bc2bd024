//! 显式阶段流水线
//!
//! 每个GPU阶段声明它读写的缓冲区类别和访问方式，阶段之间的内存屏障由声明推导，
//! 而不是依赖调用顺序。
//!
//! ```text
//! ClearIndirect ──STORAGE──▶ CullMark ──STORAGE|INDEX|INDIRECT──▶ GatherIndirect ──INDIRECT──▶ DrawBrush
//! ```

use crate::error::{BrushError, BrushResult};
use crate::render::backend::BarrierScope;

/// 缓冲区类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    /// 可见性位图
    Vis,
    /// 叶子元数据
    Leaves,
    /// 标记表面索引
    MarkSurfaces,
    /// 表面元数据（含帧计数）
    Surfaces,
    /// 帧参数常量
    FrameUniforms,
    /// 每个纹理分组的间接命令模板
    IndirectTemplate,
    /// 索引缓冲区
    IndexBuffer,
    /// 调用重映射表
    Remap,
    /// 最终间接命令缓冲区
    CommandBuffer,
    /// 实例数据
    Instances,
    /// 调用参数
    Calls,
}

impl BufferClass {
    /// 内容是否为间接绘制参数
    pub fn holds_indirect_args(self) -> bool {
        matches!(self, Self::IndirectTemplate | Self::CommandBuffer)
    }
}

/// 访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// 着色器存储/常量读取
    Storage,
    /// 作为间接绘制参数读取
    Indirect,
    /// 作为索引缓冲区读取
    Index,
}

impl Access {
    fn barrier_bit(self) -> BarrierScope {
        match self {
            Self::Storage => BarrierScope::STORAGE,
            Self::Indirect => BarrierScope::INDIRECT,
            Self::Index => BarrierScope::INDEX,
        }
    }
}

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ClearIndirect,
    CullMark,
    GatherIndirect,
    DrawBrush,
}

/// 阶段声明
#[derive(Debug, Clone)]
pub struct StageDecl {
    pub stage: Stage,
    pub reads: Vec<(BufferClass, Access)>,
    pub writes: Vec<BufferClass>,
}

impl StageDecl {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn read(mut self, class: BufferClass, access: Access) -> Self {
        self.reads.push((class, access));
        self
    }

    pub fn write(mut self, class: BufferClass) -> Self {
        self.writes.push(class);
        self
    }

    /// 阶段是否访问某个类别
    pub fn touches(&self, class: BufferClass) -> bool {
        self.writes.contains(&class) || self.reads.iter().any(|(c, _)| *c == class)
    }
}

/// 有序阶段列表及推导出的屏障
#[derive(Debug, Clone)]
pub struct StagePlan {
    stages: Vec<StageDecl>,
    barriers: Vec<BarrierScope>,
}

impl StagePlan {
    /// 从阶段声明构建并推导屏障
    pub fn new(stages: Vec<StageDecl>) -> BrushResult<Self> {
        let barriers = derive_barriers(&stages);
        let plan = Self { stages, barriers };
        plan.validate()?;
        Ok(plan)
    }

    /// 笔刷渲染流水线：清除 → 标记 → 收集 → 绘制
    pub fn brush_pipeline() -> Self {
        use Access::*;
        use BufferClass::*;

        let stages = vec![
            StageDecl::new(Stage::ClearIndirect).write(IndirectTemplate),
            StageDecl::new(Stage::CullMark)
                .read(FrameUniforms, Storage)
                .read(Vis, Storage)
                .read(Leaves, Storage)
                .read(MarkSurfaces, Storage)
                .read(Surfaces, Storage)
                .read(IndirectTemplate, Storage)
                .write(Surfaces)
                .write(IndirectTemplate)
                .write(IndexBuffer),
            StageDecl::new(Stage::GatherIndirect)
                .read(IndirectTemplate, Storage)
                .read(Remap, Storage)
                .write(CommandBuffer),
            StageDecl::new(Stage::DrawBrush)
                .read(CommandBuffer, Indirect)
                .read(IndexBuffer, Index)
                .read(Instances, Storage)
                .read(Calls, Storage),
        ];
        let barriers = derive_barriers(&stages);
        Self { stages, barriers }
    }

    pub fn stages(&self) -> &[StageDecl] {
        &self.stages
    }

    /// 各阶段之后的屏障
    pub fn barriers(&self) -> &[BarrierScope] {
        &self.barriers
    }

    /// 某个阶段之后的屏障
    pub fn barrier_after(&self, stage: Stage) -> BarrierScope {
        self.stages
            .iter()
            .position(|s| s.stage == stage)
            .map(|i| self.barriers[i])
            .unwrap_or(BarrierScope::NONE)
    }

    /// 检查推导出的屏障
    pub fn validate(&self) -> BrushResult<()> {
        check_barriers(&self.stages, &self.barriers)
    }

    /// 检查一组给定的屏障是否覆盖所有声明的依赖
    pub fn validate_with(&self, barriers: &[BarrierScope]) -> BrushResult<()> {
        check_barriers(&self.stages, barriers)
    }
}

/// 写入者与后续访问者之间的依赖
///
/// 访问者一直延伸到下一个写入同一类别的阶段（含）为止。
fn consumers(stages: &[StageDecl], writer: usize, class: BufferClass) -> Vec<(usize, Access)> {
    let mut out = Vec::new();
    for (j, stage) in stages.iter().enumerate().skip(writer + 1) {
        for (c, access) in &stage.reads {
            if *c == class {
                out.push((j, *access));
            }
        }
        if stage.writes.contains(&class) {
            if !stage.reads.iter().any(|(c, _)| *c == class) {
                // 写后写同样需要存储屏障
                out.push((j, Access::Storage));
            }
            break;
        }
    }
    out
}

/// 类别的最后一个写入者
fn is_final_writer(stages: &[StageDecl], writer: usize, class: BufferClass) -> bool {
    !stages[writer + 1..].iter().any(|s| s.writes.contains(&class))
}

fn derive_barriers(stages: &[StageDecl]) -> Vec<BarrierScope> {
    let mut barriers = vec![BarrierScope::NONE; stages.len()];
    for (i, stage) in stages.iter().enumerate() {
        let mut scope = BarrierScope::NONE;
        for &class in &stage.writes {
            let readers = consumers(stages, i, class);
            for (_, access) in &readers {
                scope |= access.barrier_bit();
            }
            // 最终内容可能被当作绘制参数读取
            if !readers.is_empty() && class.holds_indirect_args() && is_final_writer(stages, i, class) {
                scope |= BarrierScope::INDIRECT;
            }
        }
        barriers[i] = scope;
    }
    barriers
}

fn check_barriers(stages: &[StageDecl], barriers: &[BarrierScope]) -> BrushResult<()> {
    if barriers.len() != stages.len() {
        return Err(BrushError::StagePlan(format!(
            "{} barriers for {} stages",
            barriers.len(),
            stages.len()
        )));
    }

    for (i, stage) in stages.iter().enumerate() {
        for &class in &stage.writes {
            for (j, access) in consumers(stages, i, class) {
                let covered = barriers[i..j]
                    .iter()
                    .any(|b| b.contains(access.barrier_bit()));
                if !covered {
                    return Err(BrushError::StagePlan(format!(
                        "{:?} writes {:?} read by {:?} as {:?} without a barrier",
                        stage.stage, class, stages[j].stage, access
                    )));
                }
            }
        }
        if stages[..i].iter().any(|s| s.stage == stage.stage) {
            return Err(BrushError::StagePlan(format!("duplicate stage {:?}", stage.stage)));
        }
    }
    Ok(())
}
