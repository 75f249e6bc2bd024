//! 统一错误处理模块
//!
//! `BrushError` 汇总配置、间接绘制和GPU后端的错误。
//! 实例范围之类的调用前置条件属于内部不变量，只在debug构建中断言，不作为可恢复错误。

use crate::config::ConfigError;
use crate::render::gpu_driven::indirect::IndirectDrawError;
use thiserror::Error;

/// 世界几何渲染错误
#[derive(Error, Debug)]
pub enum BrushError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Indirect draw error: {0}")]
    IndirectDraw(#[from] IndirectDrawError),

    #[error("GPU buffer allocation failed: {requested} bytes")]
    BufferAllocation { requested: u64 },

    #[error("Missing pipeline: {0}")]
    MissingPipeline(&'static str),

    #[error("Unknown shader program: {0}")]
    UnknownProgram(u32),

    #[error("Unknown texture slot: {0}")]
    UnknownTexture(u32),

    #[error("Render targets not set")]
    MissingTargets,

    #[error("Invalid stage plan: {0}")]
    StagePlan(String),

    #[error("Invalid world model: {0}")]
    InvalidWorld(String),

    #[error("World not loaded into backend")]
    WorldNotLoaded,

    #[error("Frame not started")]
    FrameNotStarted,

    #[error("Device request failed: {0}")]
    DeviceRequest(String),
}

pub type BrushResult<T> = Result<T, BrushError>;
