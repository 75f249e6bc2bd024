//! 笔刷实体
//!
//! 调用者按帧提供实体列表（世界实体在首位），这里只读取。

use super::model::{ModelId, TexType};
use crate::config::LiquidAlpha;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// 编码的实体透明度
///
/// `0` 表示使用纹理默认值，其余值为 `a * 254 + 1`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityAlpha(pub u8);

impl EntityAlpha {
    /// 使用纹理默认透明度
    pub const DEFAULT: EntityAlpha = EntityAlpha(0);
    /// 完全不透明
    pub const OPAQUE: EntityAlpha = EntityAlpha(255);

    /// 编码 `0..=1` 的透明度
    pub fn encode(alpha: f32) -> Self {
        let a = alpha.clamp(0.0, 1.0);
        Self((a * 254.0).round() as u8 + 1)
    }

    /// 解码，默认值解码为1.0
    pub fn decode(self) -> f32 {
        if self.is_default() {
            1.0
        } else {
            (self.0 - 1) as f32 / 254.0
        }
    }

    #[inline]
    pub fn is_default(self) -> bool {
        self.0 == 0
    }

    /// 默认值或255视为不透明
    #[inline]
    pub fn is_opaque(self) -> bool {
        self.0 == 0 || self.0 == 255
    }
}

/// 一帧中的笔刷实体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushEntity {
    /// 模型
    pub model: ModelId,
    /// 位置
    pub origin: Vec3,
    /// 角度（pitch, yaw, roll，单位为度）
    pub angles: Vec3,
    /// 透明度
    pub alpha: EntityAlpha,
    /// 动画帧，非零时选择替换纹理
    pub frame: u32,
}

impl BrushEntity {
    /// 世界实体
    pub fn world() -> Self {
        Self::new(ModelId::WORLD, Vec3::ZERO)
    }

    pub fn new(model: ModelId, origin: Vec3) -> Self {
        Self {
            model,
            origin,
            angles: Vec3::ZERO,
            alpha: EntityAlpha::DEFAULT,
            frame: 0,
        }
    }

    pub fn with_angles(mut self, angles: Vec3) -> Self {
        self.angles = angles;
        self
    }

    pub fn with_alpha(mut self, alpha: EntityAlpha) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = frame;
        self
    }

    #[inline]
    pub fn is_world(&self) -> bool {
        self.model.is_world()
    }

    /// 某种纹理类型的最终透明度，实体覆盖值优先
    pub fn alpha_for(&self, tex_type: TexType, liquids: &LiquidAlpha) -> f32 {
        if self.alpha.is_default() {
            liquids.for_type(tex_type)
        } else {
            self.alpha.decode()
        }
    }

    /// 实体世界矩阵
    ///
    /// 笔刷模型的pitch取反后再按 平移 × 绕z(yaw) × 绕y(-pitch) × 绕x(roll) 组合。
    pub fn world_matrix(&self) -> Mat4 {
        let angles = Vec3::new(-self.angles.x, self.angles.y, self.angles.z);
        entity_matrix(self.origin, angles)
    }

    /// 世界矩阵的前三行（转置的3×4矩阵）
    pub fn world_rows(&self) -> [f32; 12] {
        let m = self.world_matrix();
        let mut rows = [0.0; 12];
        for r in 0..3 {
            rows[r * 4..r * 4 + 4].copy_from_slice(&m.row(r).to_array());
        }
        rows
    }
}

/// 由位置和角度（度）构建实体矩阵
pub fn entity_matrix(origin: Vec3, angles: Vec3) -> Mat4 {
    Mat4::from_translation(origin)
        * Mat4::from_rotation_z(angles.y.to_radians())
        * Mat4::from_rotation_y((-angles.x).to_radians())
        * Mat4::from_rotation_x(angles.z.to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_encoding() {
        assert!(EntityAlpha::DEFAULT.is_default());
        assert!(EntityAlpha::DEFAULT.is_opaque());
        assert!(EntityAlpha::OPAQUE.is_opaque());
        assert_eq!(EntityAlpha::encode(1.0), EntityAlpha::OPAQUE);
        assert_eq!(EntityAlpha::encode(0.0), EntityAlpha(1));
        assert!(!EntityAlpha::encode(0.5).is_opaque());
        assert!((EntityAlpha::encode(0.5).decode() - 0.5).abs() < 1.0 / 254.0);
        assert_eq!(EntityAlpha::DEFAULT.decode(), 1.0);
    }

    #[test]
    fn test_alpha_for_prefers_entity() {
        let liquids = LiquidAlpha {
            water: 0.4,
            ..Default::default()
        };
        let entity = BrushEntity::world();
        assert_eq!(entity.alpha_for(TexType::Water, &liquids), 0.4);
        assert_eq!(entity.alpha_for(TexType::Lava, &liquids), 1.0);

        let entity = entity.with_alpha(EntityAlpha::OPAQUE);
        assert_eq!(entity.alpha_for(TexType::Water, &liquids), 1.0);
    }

    #[test]
    fn test_world_rows_translation() {
        let entity = BrushEntity::new(ModelId(1), Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(
            entity.world_rows(),
            [1.0, 0.0, 0.0, 10.0, 0.0, 1.0, 0.0, 20.0, 0.0, 0.0, 1.0, 30.0]
        );
    }

    #[test]
    fn test_world_matrix_yaw() {
        let entity = BrushEntity::world().with_angles(Vec3::new(0.0, 90.0, 0.0));
        let p = entity.world_matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_world_matrix_pitch_is_flipped() {
        // 笔刷模型与普通实体矩阵的pitch方向相反
        let entity = BrushEntity::world().with_angles(Vec3::new(90.0, 0.0, 0.0));
        let p = entity.world_matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::NEG_Z).length() < 1e-5);
        let q = entity_matrix(Vec3::ZERO, Vec3::new(90.0, 0.0, 0.0)).transform_point3(Vec3::X);
        assert!((p + q).length() < 1e-5);
    }
}
