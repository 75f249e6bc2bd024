//! GPU驱动的世界几何渲染
//!
//! ## 流水线
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Brush GPU Pipeline                      │
//! ├─────────────────────────────────────────────────────────┤
//! │  1. ClearIndirect                                       │
//! │     - 世界纹理分组的索引计数清零                          │
//! │                                                         │
//! │  2. CullMark                                            │
//! │     - 每个可见叶子做视锥剔除                              │
//! │     - 面向相机的表面追加索引到所属分组                      │
//! │                                                         │
//! │  3. GatherIndirect                                      │
//! │     - 按重映射表把命令模板复制到命令缓冲区                   │
//! │                                                         │
//! │  4. DrawBrush                                           │
//! │     - 间接绘制                                           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! 阶段之间的屏障由 [`StagePlan`] 从读写声明推导。

pub mod command_generator;
pub mod culling;
pub mod indirect;
pub mod software;
pub mod stages;
pub mod wgpu_backend;

pub use command_generator::{gather_command, gather_tagged_command, split_tagged_instance, CallRemap, GatherParams};
pub use culling::{FrameUniforms, GpuLeaf, GpuSurface, SurfaceMarker};
pub use indirect::{DrawIndexedIndirectArgs, GarbageQueue, IndirectCommandAllocator, IndirectDrawError};
pub use software::{BackendEvent, SoftCommandBuffer, SoftwareBackend};
pub use stages::{Access, BufferClass, Stage, StageDecl, StagePlan};
pub use wgpu_backend::{ProgramDesc, WgpuBackend, WgpuBackendDesc, WgpuCommandBuffer};
