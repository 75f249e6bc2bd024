//! 世界模型数据
//!
//! 叶子、表面、纹理和笔刷模型在加载后只读。`WorldModel::new` 负责计算
//! 纹理分组（按 `TexType` 排序）、每个分组的命令槽位和索引缓冲区布局。

use crate::error::{BrushError, BrushResult};
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use worldbrush_simd::SoaAabb8;

/// 纹理类型，顺序决定 `texofs` 窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TexType {
    Default,
    Cutout,
    Sky,
    Lava,
    Slime,
    Tele,
    Water,
}

impl TexType {
    /// 纹理类型数量
    pub const COUNT: usize = 7;
    /// 第一种液体
    pub const FIRST_LIQUID: TexType = TexType::Lava;
    /// 最后一种液体
    pub const LAST_LIQUID: TexType = TexType::Water;

    /// 按顺序排列的全部类型
    pub const ALL: [TexType; Self::COUNT] = [
        TexType::Default,
        TexType::Cutout,
        TexType::Sky,
        TexType::Lava,
        TexType::Slime,
        TexType::Tele,
        TexType::Water,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 是否为液体
    pub fn is_liquid(self) -> bool {
        self >= Self::FIRST_LIQUID && self <= Self::LAST_LIQUID
    }

    /// 液体类型
    pub fn liquids() -> impl Iterator<Item = TexType> {
        Self::ALL[Self::FIRST_LIQUID.index()..=Self::LAST_LIQUID.index()]
            .iter()
            .copied()
    }
}

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Aabb {
    pub fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }
}

/// 叶子内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafContents {
    Empty,
    Solid,
    Water,
    Slime,
    Lava,
    Sky,
}

/// BSP叶子
///
/// `WorldModel::leaves` 中第 `i` 个叶子对应可见性位图的第 `i` 位（共享的实心叶子不存储）。
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// 包围盒
    pub bounds: Aabb,
    /// 内容类型
    pub contents: LeafContents,
    /// 在 `mark_surfaces` 中的起始位置
    pub first_mark_surface: u32,
    /// 标记表面数量
    pub num_mark_surfaces: u32,
    /// 链接到此叶子的静态实体
    pub static_entities: Vec<u32>,
}

impl Leaf {
    /// 标记表面范围
    pub fn mark_range(&self) -> Range<usize> {
        let first = self.first_mark_surface as usize;
        first..first + self.num_mark_surfaces as usize
    }
}

/// 表面标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceFlags {
    /// 扭曲表面（液体）
    pub turbulent: bool,
    /// 天空表面
    pub sky: bool,
}

/// 平面多边形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    /// 朝向已翻转为正面的平面 `(normal, dist)`
    pub plane: Vec4,
    /// 所属模型的纹理索引
    pub texture: u32,
    /// 第一个顶点
    pub first_vertex: u32,
    /// 边数（三角扇：`num_edges - 2` 个三角形）
    pub num_edges: u32,
    /// 标志
    pub flags: SurfaceFlags,
    /// 纹理分组（由 `WorldModel::new` 计算）
    pub draw_group: u32,
}

impl Surface {
    pub fn new(plane: Vec4, texture: u32, first_vertex: u32, num_edges: u32) -> Self {
        Self {
            plane,
            texture,
            first_vertex,
            num_edges,
            flags: SurfaceFlags::default(),
            draw_group: 0,
        }
    }

    /// 三角扇展开后的索引数量
    pub fn index_count(&self) -> u32 {
        if self.num_edges < 3 {
            0
        } else {
            3 * (self.num_edges - 2)
        }
    }

    /// 追加三角扇索引
    pub fn push_fan_indices(&self, out: &mut Vec<u32>) {
        let v0 = self.first_vertex;
        for t in 0..self.num_edges.saturating_sub(2) {
            out.extend_from_slice(&[v0, v0 + t + 1, v0 + t + 2]);
        }
    }
}

/// 纹理句柄
///
/// `slot` 用于绑定槽模式，`bindless` 为无绑定模式下的常驻句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle {
    pub slot: u32,
    pub bindless: u64,
}

impl TextureHandle {
    pub const fn new(slot: u32, bindless: u64) -> Self {
        Self { slot, bindless }
    }
}

/// 笔刷纹理
#[derive(Debug, Clone, PartialEq)]
pub struct BrushTexture {
    /// 主纹理
    pub texture: Option<TextureHandle>,
    /// 全亮叠加纹理
    pub fullbright: Option<TextureHandle>,
    /// 纹理类型
    pub tex_type: TexType,
    /// 实体帧非零时使用的替换纹理（同一模型内的索引）
    pub alternate: Option<usize>,
}

impl BrushTexture {
    pub fn new(tex_type: TexType, texture: Option<TextureHandle>) -> Self {
        Self {
            texture,
            fullbright: None,
            tex_type,
            alternate: None,
        }
    }

    pub fn with_fullbright(mut self, fullbright: TextureHandle) -> Self {
        self.fullbright = Some(fullbright);
        self
    }

    pub fn with_alternate(mut self, alternate: usize) -> Self {
        self.alternate = Some(alternate);
        self
    }
}

/// 模型ID，`WORLD` 为世界模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelId(pub u32);

impl ModelId {
    pub const WORLD: ModelId = ModelId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_world(self) -> bool {
        self == Self::WORLD
    }
}

/// 笔刷模型（世界或子模型）
#[derive(Debug, Clone, PartialEq)]
pub struct BrushModel {
    /// 纹理表
    pub textures: Vec<BrushTexture>,
    /// 表面范围
    pub surfaces: Range<u32>,
    /// 实际使用的纹理，按类型排序
    pub used_textures: Vec<usize>,
    /// 每种类型在 `used_textures` 中的起始位置，`texofs[COUNT]` 为总数
    pub texofs: [u32; TexType::COUNT + 1],
    /// 第一个命令槽位，第 `j` 个使用纹理的槽位为 `first_cmd + j`
    pub first_cmd: u32,
}

impl BrushModel {
    pub fn new(textures: Vec<BrushTexture>, surfaces: Range<u32>) -> Self {
        Self {
            textures,
            surfaces,
            used_textures: Vec::new(),
            texofs: [0; TexType::COUNT + 1],
            first_cmd: 0,
        }
    }

    /// 纹理类型窗口 `[begin, end)` 内的纹理分组数量
    #[inline]
    pub fn groups_in(&self, begin: usize, end: usize) -> u32 {
        self.texofs[end] - self.texofs[begin]
    }

    /// 纹理类型窗口内的使用纹理位置范围
    #[inline]
    pub fn group_range(&self, begin: usize, end: usize) -> Range<usize> {
        self.texofs[begin] as usize..self.texofs[end] as usize
    }

    /// 某个类型的纹理分组数量
    #[inline]
    pub fn groups_of(&self, tex_type: TexType) -> u32 {
        self.texofs[tex_type.index() + 1] - self.texofs[tex_type.index()]
    }

    /// 第 `j` 个使用纹理
    pub fn used_texture(&self, j: usize) -> &BrushTexture {
        &self.textures[self.used_textures[j]]
    }

    /// 按实体帧选择纹理
    pub fn texture_for_frame(&self, j: usize, frame: u32) -> &BrushTexture {
        let base = self.used_texture(j);
        match base.alternate {
            Some(alt) if frame != 0 => &self.textures[alt],
            _ => base,
        }
    }
}

/// 笔刷顶点
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BrushVertex {
    /// 位置
    pub pos: [f32; 3],
    /// 纹理坐标（主纹理 + 光照贴图）
    pub st: [f32; 4],
    /// 光照贴图偏移
    pub lm_offset: f32,
    /// 光照样式
    pub styles: [u8; 4],
}

/// 每个纹理分组的索引区间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupRange {
    pub first_index: u32,
    pub index_count: u32,
}

/// 已加载的世界
#[derive(Debug, Clone)]
pub struct WorldModel {
    pub leaves: Vec<Leaf>,
    pub mark_surfaces: Vec<u32>,
    pub surfaces: Vec<Surface>,
    pub models: Vec<BrushModel>,
    pub vertices: Vec<BrushVertex>,
    /// 8个一组的叶子包围盒
    pub soa_leaf_bounds: Vec<SoaAabb8>,
    /// 每个纹理分组在索引缓冲区中的区间
    pub groups: Vec<GroupRange>,
    /// 静态索引数据（世界分组部分由GPU每帧写入）
    pub indices: Vec<u32>,
    /// 地图包含带光照的水面
    pub has_lit_water: bool,
}

impl WorldModel {
    /// 构建世界模型并计算纹理分组
    pub fn new(
        leaves: Vec<Leaf>,
        mark_surfaces: Vec<u32>,
        mut surfaces: Vec<Surface>,
        mut models: Vec<BrushModel>,
        vertices: Vec<BrushVertex>,
    ) -> BrushResult<Self> {
        if models.is_empty() {
            return Err(BrushError::InvalidWorld("missing world model".to_string()));
        }
        validate_topology(&leaves, &mark_surfaces, &surfaces, &models, vertices.len())?;

        let mut groups = Vec::new();
        let mut first_cmd = 0u32;
        for model in models.iter_mut() {
            let range = model.surfaces.start as usize..model.surfaces.end as usize;

            let mut used: Vec<usize> = surfaces[range.clone()]
                .iter()
                .map(|s| s.texture as usize)
                .collect();
            used.sort_unstable_by_key(|&t| (model.textures[t].tex_type, t));
            used.dedup();

            let mut texofs = [0u32; TexType::COUNT + 1];
            for &t in &used {
                texofs[model.textures[t].tex_type.index() + 1] += 1;
            }
            for i in 0..TexType::COUNT {
                texofs[i + 1] += texofs[i];
            }

            for surface in &mut surfaces[range] {
                let j = used
                    .iter()
                    .position(|&t| t == surface.texture as usize)
                    .unwrap_or_default();
                surface.draw_group = first_cmd + j as u32;
            }

            model.first_cmd = first_cmd;
            model.texofs = texofs;
            first_cmd += used.len() as u32;
            model.used_textures = used;
        }
        groups.resize(first_cmd as usize, GroupRange::default());

        for surface in &surfaces {
            groups[surface.draw_group as usize].index_count += surface.index_count();
        }
        let mut first_index = 0;
        for group in &mut groups {
            group.first_index = first_index;
            first_index += group.index_count;
        }

        // 子模型的索引是静态的，世界部分留空由标记阶段填写
        let mut indices = vec![0u32; first_index as usize];
        let world_surfaces = models[0].surfaces.clone();
        let mut cursor: Vec<u32> = groups.iter().map(|g| g.first_index).collect();
        for (i, surface) in surfaces.iter().enumerate() {
            if world_surfaces.contains(&(i as u32)) {
                continue;
            }
            let mut fan = Vec::with_capacity(surface.index_count() as usize);
            surface.push_fan_indices(&mut fan);
            let at = &mut cursor[surface.draw_group as usize];
            indices[*at as usize..*at as usize + fan.len()].copy_from_slice(&fan);
            *at += fan.len() as u32;
        }

        let bounds: Vec<(Vec3, Vec3)> = leaves.iter().map(|l| (l.bounds.mins, l.bounds.maxs)).collect();
        let soa_leaf_bounds = SoaAabb8::pack(&bounds);

        tracing::debug!(
            target: "worldbrush",
            leaves = leaves.len(),
            surfaces = surfaces.len(),
            models = models.len(),
            draw_groups = groups.len(),
            indices = indices.len(),
            "World model built"
        );

        Ok(Self {
            leaves,
            mark_surfaces,
            surfaces,
            models,
            vertices,
            soa_leaf_bounds,
            groups,
            indices,
            has_lit_water: false,
        })
    }

    /// 标记地图包含带光照的水面
    pub fn with_lit_water(mut self, lit: bool) -> Self {
        self.has_lit_water = lit;
        self
    }

    /// 世界模型
    pub fn world(&self) -> &BrushModel {
        &self.models[0]
    }

    /// 按ID取模型
    pub fn model(&self, id: ModelId) -> Option<&BrushModel> {
        self.models.get(id.index())
    }

    /// 全部纹理分组数
    pub fn draw_group_count(&self) -> u32 {
        self.groups.len() as u32
    }

    /// 世界模型的纹理分组数（每帧由清除阶段重置）
    pub fn world_group_count(&self) -> u32 {
        self.world().texofs[TexType::COUNT]
    }

    /// 叶子数量
    pub fn leaf_count(&self) -> u32 {
        self.leaves.len() as u32
    }

    /// 叶子的标记表面（叶子越界时为空）
    pub fn leaf_surfaces(&self, leaf: usize) -> impl Iterator<Item = &Surface> + '_ {
        let marks = self
            .leaves
            .get(leaf)
            .and_then(|l| self.mark_surfaces.get(l.mark_range()))
            .unwrap_or(&[]);
        marks.iter().filter_map(move |&s| self.surfaces.get(s as usize))
    }
}

fn validate_topology(
    leaves: &[Leaf],
    mark_surfaces: &[u32],
    surfaces: &[Surface],
    models: &[BrushModel],
    vertex_count: usize,
) -> BrushResult<()> {
    let invalid = |msg: String| Err(BrushError::InvalidWorld(msg));
    let world_surfaces = models[0].surfaces.clone();

    for (i, leaf) in leaves.iter().enumerate() {
        if leaf.mark_range().end > mark_surfaces.len() {
            return invalid(format!("leaf {} mark surfaces out of range", i));
        }
    }
    for (i, &s) in mark_surfaces.iter().enumerate() {
        if !world_surfaces.contains(&s) {
            return invalid(format!("mark surface {} references non-world surface {}", i, s));
        }
    }
    for (m, model) in models.iter().enumerate() {
        if model.surfaces.end as usize > surfaces.len() || model.surfaces.start > model.surfaces.end {
            return invalid(format!("model {} surface range out of bounds", m));
        }
        for tex in &model.textures {
            if let Some(alt) = tex.alternate {
                match model.textures.get(alt) {
                    Some(a) if a.tex_type == tex.tex_type => {}
                    _ => return invalid(format!("model {} has an invalid alternate texture", m)),
                }
            }
        }
        for s in model.surfaces.clone() {
            let surface = &surfaces[s as usize];
            if surface.texture as usize >= model.textures.len() {
                return invalid(format!("surface {} texture out of range", s));
            }
            match surface.first_vertex.checked_add(surface.num_edges) {
                Some(end) if end as usize <= vertex_count => {}
                _ => return invalid(format!("surface {} vertices out of range", s)),
            }
        }
    }

    // 各模型的表面区间互不重叠
    let mut ranges: Vec<(usize, &Range<u32>)> = models
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.surfaces.is_empty())
        .map(|(i, m)| (i, &m.surfaces))
        .collect();
    ranges.sort_by_key(|(_, r)| r.start);
    for pair in ranges.windows(2) {
        if pair[0].1.end > pair[1].1.start {
            return invalid(format!("models {} and {} share surfaces", pair[0].0, pair[1].0));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(texture: u32, first_vertex: u32) -> Surface {
        Surface::new(Vec4::new(0.0, 0.0, 1.0, 0.0), texture, first_vertex, 4)
    }

    fn sample_world() -> WorldModel {
        let world_textures = vec![
            BrushTexture::new(TexType::Water, None),
            BrushTexture::new(TexType::Default, None),
            BrushTexture::new(TexType::Sky, None),
        ];
        let door_textures = vec![BrushTexture::new(TexType::Default, None)];
        let surfaces = vec![quad(0, 0), quad(1, 4), quad(1, 8), quad(2, 12), quad(0, 16)];
        let leaves = vec![Leaf {
            bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
            contents: LeafContents::Empty,
            first_mark_surface: 0,
            num_mark_surfaces: 4,
            static_entities: vec![],
        }];
        WorldModel::new(
            leaves,
            vec![0, 1, 2, 3],
            surfaces,
            vec![
                BrushModel::new(world_textures, 0..4),
                BrushModel::new(door_textures, 4..5),
            ],
            vec![BrushVertex::default(); 20],
        )
        .unwrap()
    }

    #[test]
    fn test_texture_groups_sorted_by_type() {
        let world = sample_world();
        let model = world.world();
        assert_eq!(model.used_textures, vec![1, 2, 0]);
        assert_eq!(model.texofs, [0, 1, 1, 2, 2, 2, 2, 3]);
        assert_eq!(model.groups_of(TexType::Water), 1);
        assert_eq!(world.world_group_count(), 3);
        assert_eq!(world.models[1].first_cmd, 3);
        assert_eq!(world.draw_group_count(), 4);
    }

    #[test]
    fn test_draw_groups_and_index_layout() {
        let world = sample_world();
        let groups: Vec<u32> = world.surfaces.iter().map(|s| s.draw_group).collect();
        assert_eq!(groups, vec![2, 0, 0, 1, 3]);

        assert_eq!(world.groups[0], GroupRange { first_index: 0, index_count: 12 });
        assert_eq!(world.groups[3], GroupRange { first_index: 24, index_count: 6 });
        // 子模型索引静态填写
        assert_eq!(&world.indices[24..30], &[16, 17, 18, 16, 18, 19]);
        assert!(world.indices[..24].iter().all(|&i| i == 0));
    }

    #[test]
    fn test_soa_bounds_packed() {
        let world = sample_world();
        assert_eq!(world.soa_leaf_bounds.len(), 1);
        assert_eq!(world.soa_leaf_bounds[0].get(0), ([0.0; 3], [1.0; 3]));
    }

    #[test]
    fn test_rejects_mark_surface_outside_world() {
        let result = WorldModel::new(
            vec![],
            vec![4],
            vec![quad(0, 0); 5],
            vec![
                BrushModel::new(vec![BrushTexture::new(TexType::Default, None)], 0..4),
                BrushModel::new(vec![BrushTexture::new(TexType::Default, None)], 4..5),
            ],
            vec![BrushVertex::default(); 4],
        );
        assert!(matches!(result, Err(BrushError::InvalidWorld(_))));
    }

    #[test]
    fn test_rejects_vertex_range_overflow() {
        let result = WorldModel::new(
            vec![],
            vec![],
            vec![Surface::new(Vec4::Z, 0, u32::MAX - 1, 3)],
            vec![BrushModel::new(vec![BrushTexture::new(TexType::Default, None)], 0..1)],
            vec![BrushVertex::default(); 4],
        );
        assert!(matches!(result, Err(BrushError::InvalidWorld(_))));
    }

    #[test]
    fn test_rejects_bad_model_surface_ranges() {
        let texture = || vec![BrushTexture::new(TexType::Default, None)];
        let overlapping = WorldModel::new(
            vec![],
            vec![],
            vec![quad(0, 0), quad(0, 4), quad(0, 8)],
            vec![BrushModel::new(texture(), 0..2), BrushModel::new(texture(), 1..3)],
            vec![BrushVertex::default(); 12],
        );
        assert!(matches!(overlapping, Err(BrushError::InvalidWorld(_))));

        let outside = WorldModel::new(
            vec![],
            vec![],
            vec![quad(0, 0)],
            vec![BrushModel::new(texture(), 0..1), BrushModel::new(texture(), 1..3)],
            vec![BrushVertex::default(); 4],
        );
        assert!(matches!(outside, Err(BrushError::InvalidWorld(_))));
    }

    #[test]
    fn test_leaf_surfaces_out_of_range_is_empty() {
        let world = sample_world();
        assert_eq!(world.leaf_surfaces(0).count(), 4);
        assert_eq!(world.leaf_surfaces(world.leaves.len()).count(), 0);
    }

    #[test]
    fn test_texture_for_frame() {
        let textures = vec![
            BrushTexture::new(TexType::Default, Some(TextureHandle::new(1, 1))).with_alternate(1),
            BrushTexture::new(TexType::Default, Some(TextureHandle::new(2, 2))),
        ];
        let mut model = BrushModel::new(textures, 0..0);
        model.used_textures = vec![0];
        assert_eq!(model.texture_for_frame(0, 0).texture.unwrap().slot, 1);
        assert_eq!(model.texture_for_frame(0, 1).texture.unwrap().slot, 2);
    }

    #[test]
    fn test_tex_type_liquids() {
        let liquids: Vec<_> = TexType::liquids().collect();
        assert_eq!(liquids, vec![TexType::Lava, TexType::Slime, TexType::Tele, TexType::Water]);
        assert!(!TexType::Sky.is_liquid());
        assert_eq!(std::mem::size_of::<BrushVertex>(), 36);
    }
}
