//! 世界几何渲染
//!
//! - [`frustum`]: 视锥平面与包围盒剔除
//! - [`backend`]: GPU后端抽象
//! - [`gpu_driven`]: 表面标记、间接命令分配与收集、后端实现
//! - [`instance_batch`]: 实例与调用批处理
//! - [`brush_pass`]: 各绘制通道
//! - [`static_models`]: 静态模型链接
//! - [`frame`]: 帧上下文与世界渲染器

pub mod backend;
pub mod brush_pass;
pub mod frame;
pub mod frustum;
pub mod gpu_driven;
pub mod instance_batch;
pub mod static_models;

pub use backend::{
    AuxTexture, BackendCaps, BarrierScope, BlendMode, ComputeDispatch, GpuBackend, PlaceholderTextures,
    ProgramId, RenderState,
};
pub use brush_pass::{has_water, is_translucent, BrushPass, ShaderPrograms, WorldShader};
pub use frame::{FrameContext, FrameParams, WorldRenderer};
pub use frustum::{Frustum, Plane};
pub use gpu_driven::indirect::IndirectDrawError;
pub use instance_batch::{
    BModelBatcher, BatchContext, BatchStats, BindlessCall, BoundCall, CallEmitter, CallList, GpuInstance,
    ResolvedCall,
};
pub use static_models::{link_static_models, link_static_models_simd};
