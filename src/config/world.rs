use super::{ConfigError, ConfigResult};
use crate::world::TexType;
use serde::{Deserialize, Serialize};

/// 世界渲染运行时选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldRenderConfig {
    /// 忽略PVS，所有叶子可见
    pub novis: bool,

    /// 实体表面的z-fighting修正
    pub zfix: bool,

    /// 绘制全亮叠加纹理
    pub fullbrights: bool,

    /// 全亮作弊：忽略光照贴图
    pub fullbright_cheat: bool,

    /// 光照贴图作弊：只显示光照
    pub lightmap_cheat: bool,

    /// 纹理超采样
    pub supersample_textures: bool,

    /// 软件渲染仿真档位
    pub softemu: SoftEmu,

    /// 地图带光照水面时使用世界水面着色器
    pub lit_water: bool,

    /// 旧版天空叶子兼容模式
    pub old_sky_leaf: bool,

    /// 各类液体的默认透明度
    pub liquid_alpha: LiquidAlpha,

    /// 静态模型链接使用8路SIMD剔除
    pub simd_static_link: bool,
}

impl Default for WorldRenderConfig {
    fn default() -> Self {
        Self {
            novis: false,
            zfix: true,
            fullbrights: true,
            fullbright_cheat: false,
            lightmap_cheat: false,
            supersample_textures: false,
            softemu: SoftEmu::Off,
            lit_water: true,
            old_sky_leaf: false,
            liquid_alpha: LiquidAlpha::default(),
            simd_static_link: true,
        }
    }
}

impl WorldRenderConfig {
    /// 世界着色器质量档位
    ///
    /// 软件仿真高于 `Fine` 时使用 `softemu - 1`，否则超采样选择档位3。
    pub fn quality_tier(&self) -> usize {
        let softemu = self.softemu.tier() as usize;
        if softemu > 1 {
            softemu - 1
        } else if self.supersample_textures {
            3
        } else {
            0
        }
    }

    /// 是否使用粗糙仿真着色器变体
    pub fn coarse(&self) -> bool {
        self.softemu == SoftEmu::Coarse
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.liquid_alpha.validate()
    }
}

/// 软件渲染仿真档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SoftEmu {
    /// 关闭
    Off,
    /// 精细
    Fine,
    /// 平衡
    Balanced,
    /// 粗糙
    Coarse,
}

impl SoftEmu {
    /// 数值档位（0..=3）
    pub fn tier(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Fine => 1,
            Self::Balanced => 2,
            Self::Coarse => 3,
        }
    }

    /// 从数值档位创建
    pub fn from_tier(tier: u8) -> Option<Self> {
        match tier {
            0 => Some(Self::Off),
            1 => Some(Self::Fine),
            2 => Some(Self::Balanced),
            3 => Some(Self::Coarse),
            _ => None,
        }
    }
}

/// 液体默认透明度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidAlpha {
    /// 水
    pub water: f32,
    /// 岩浆
    pub lava: f32,
    /// 史莱姆
    pub slime: f32,
    /// 传送门
    pub tele: f32,
}

impl Default for LiquidAlpha {
    fn default() -> Self {
        Self {
            water: 1.0,
            lava: 1.0,
            slime: 1.0,
            tele: 1.0,
        }
    }
}

impl LiquidAlpha {
    /// 纹理类型的默认透明度，非液体为1.0
    pub fn for_type(&self, tex_type: TexType) -> f32 {
        match tex_type {
            TexType::Water => self.water,
            TexType::Lava => self.lava,
            TexType::Slime => self.slime,
            TexType::Tele => self.tele,
            _ => 1.0,
        }
    }

    /// 验证所有透明度位于 `0..=1`
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, alpha) in [
            ("water", self.water),
            ("lava", self.lava),
            ("slime", self.slime),
            ("tele", self.tele),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::ValidationError(format!(
                    "liquid alpha '{}' must be within 0..=1, got {}",
                    name, alpha
                )));
            }
        }
        Ok(())
    }
}
