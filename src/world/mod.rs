//! 世界几何数据模型
//!
//! - [`model`]: 叶子、表面、纹理分组和笔刷模型
//! - [`entity`]: 每帧的笔刷实体与透明度编码
//! - [`visibility`]: 可见性位图及其数据源选择

pub mod entity;
pub mod model;
pub mod visibility;

pub use entity::{entity_matrix, BrushEntity, EntityAlpha};
pub use model::{
    Aabb, BrushModel, BrushTexture, BrushVertex, GroupRange, Leaf, LeafContents, ModelId,
    Surface, SurfaceFlags, TexType, TextureHandle, WorldModel,
};
pub use visibility::{choose_vis_source, choose_visibility, VisBitmap, VisChoice, VisibilitySource};
