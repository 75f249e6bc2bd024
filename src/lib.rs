//! # worldbrush
//!
//! BSP笔刷世界的可见性判定与GPU驱动的间接绘制批处理。
//!
//! 每帧流程：
//!
//! 1. 选择可见性位图（无PVS / 胖PVS / 视点叶子PVS）
//! 2. GPU表面标记：清零世界纹理分组计数，按叶子剔除并追加可见表面的索引
//! 3. 静态模型链接（8路SIMD包围盒剔除或标量路径）
//! 4. 各绘制通道：实例打包、按纹理分组添加调用、GPU收集命令后间接绘制
//!
//! ## 示例
//!
//! ```ignore
//! use worldbrush::prelude::*;
//!
//! let backend = WgpuBackend::new(WgpuBackendDesc::default())?;
//! let mut renderer = WorldRenderer::new(backend, RendererConfig::load_or_default(), programs)?;
//! renderer.load_world(world)?;
//!
//! renderer.begin_frame(FrameParams::new(frustum, vieworg))?;
//! renderer.mark_surfaces(&vis)?;
//! renderer.draw_brush_models(&entities)?;
//! renderer.draw_water_translucent(&entities)?;
//! renderer.end_frame()?;
//! ```
//!
//! ## 模块
//!
//! - [`config`]: 配置文件与运行时选项
//! - [`world`]: 世界模型、实体与可见性
//! - [`render`]: 标记、批处理与绘制通道

/// 配置系统
pub mod config;
/// 统一错误类型
pub mod error;
/// 日志初始化
pub mod logging;
/// 世界渲染
pub mod render;
/// 世界数据模型
pub mod world;

pub use error::{BrushError, BrushResult};

/// 常用类型
pub mod prelude {
    pub use crate::config::{BatchLimits, LiquidAlpha, RendererConfig, SoftEmu, WorldRenderConfig};
    pub use crate::error::{BrushError, BrushResult};
    pub use crate::render::gpu_driven::{SoftwareBackend, WgpuBackend, WgpuBackendDesc};
    pub use crate::render::{
        BrushPass, FrameParams, Frustum, GpuBackend, ProgramId, ShaderPrograms, WorldRenderer,
    };
    pub use crate::world::{
        choose_visibility, BrushEntity, BrushModel, BrushTexture, EntityAlpha, ModelId, TexType,
        TextureHandle, VisBitmap, VisibilitySource, WorldModel,
    };
}
