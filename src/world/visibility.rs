//! 可见性位图与选择
//!
//! PVS本身由外部计算，这里只负责位图的表示、上传对齐以及按视点条件选择数据源。

use super::model::{LeafContents, WorldModel};
use crate::config::WorldRenderConfig;
use glam::Vec3;

/// 每个叶子一位的可见性位图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisBitmap {
    bytes: Vec<u8>,
    leaf_count: u32,
}

impl VisBitmap {
    /// 全部不可见
    pub fn empty(leaf_count: u32) -> Self {
        Self {
            bytes: vec![0; Self::byte_len(leaf_count)],
            leaf_count,
        }
    }

    /// 全部可见
    pub fn all(leaf_count: u32) -> Self {
        let mut vis = Self::empty(leaf_count);
        for i in 0..leaf_count {
            vis.set(i);
        }
        vis
    }

    /// 从外部PVS数据创建，长度不足时补零
    pub fn from_bytes(bytes: &[u8], leaf_count: u32) -> Self {
        let mut vis = Self::empty(leaf_count);
        let n = vis.bytes.len().min(bytes.len());
        vis.bytes[..n].copy_from_slice(&bytes[..n]);
        // 清掉超出叶子数量的位
        if leaf_count % 8 != 0 {
            if let Some(last) = vis.bytes.last_mut() {
                *last &= (1u8 << (leaf_count % 8)) - 1;
            }
        }
        vis
    }

    fn byte_len(leaf_count: u32) -> usize {
        (leaf_count as usize).div_ceil(8)
    }

    pub fn leaf_count(&self) -> u32 {
        self.leaf_count
    }

    pub fn set(&mut self, leaf: u32) {
        debug_assert!(leaf < self.leaf_count);
        self.bytes[(leaf >> 3) as usize] |= 1 << (leaf & 7);
    }

    pub fn clear(&mut self, leaf: u32) {
        debug_assert!(leaf < self.leaf_count);
        self.bytes[(leaf >> 3) as usize] &= !(1 << (leaf & 7));
    }

    #[inline]
    pub fn is_visible(&self, leaf: u32) -> bool {
        leaf < self.leaf_count && self.bytes[(leaf >> 3) as usize] & (1 << (leaf & 7)) != 0
    }

    /// 第 `i` 个字节（8个叶子），越界为0
    #[inline]
    pub fn byte(&self, i: usize) -> u8 {
        self.bytes.get(i).copied().unwrap_or(0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 上传用的字节数据，长度向上取整到4字节
    pub fn upload_bytes(&self) -> Vec<u8> {
        let padded = (self.bytes.len() + 3) & !3;
        let mut out = self.bytes.clone();
        out.resize(padded.max(4), 0);
        out
    }

    /// 上传用的u32字（小端），第 `i` 位位于第 `i / 32` 个字
    pub fn upload_words(&self) -> Vec<u32> {
        self.upload_bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// 可见叶子数量
    pub fn count_visible(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }
}

/// 外部PVS数据源
pub trait VisibilitySource {
    /// 全部可见
    fn no_vis(&self, world: &WorldModel) -> VisBitmap {
        VisBitmap::all(world.leaf_count())
    }

    /// 视点周围合并后的"胖"PVS
    fn fat_pvs(&self, world: &WorldModel, origin: Vec3) -> VisBitmap;

    /// 单个叶子的PVS
    fn leaf_pvs(&self, world: &WorldModel, leaf: usize) -> VisBitmap;
}

/// 可见性数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisChoice {
    /// 全部可见
    NoVis,
    /// 靠近水面传送门时的胖PVS
    FatPvs,
    /// 视点叶子的PVS
    LeafPvs,
}

/// 判断应使用哪种可见性数据
///
/// `view_leaf` 为 `None` 表示视点位于共享的实心叶子中。
pub fn choose_vis_source(
    world: &WorldModel,
    view_leaf: Option<usize>,
    config: &WorldRenderConfig,
) -> VisChoice {
    let (index, leaf) = match view_leaf {
        Some(index) if !config.novis => match world.leaves.get(index) {
            Some(leaf) => (index, leaf),
            None => {
                tracing::warn!(
                    target: "worldbrush",
                    view_leaf = index,
                    leaf_count = world.leaves.len(),
                    "View leaf out of range, drawing without visibility"
                );
                return VisChoice::NoVis;
            }
        },
        _ => return VisChoice::NoVis,
    };
    if matches!(leaf.contents, LeafContents::Solid | LeafContents::Sky) {
        return VisChoice::NoVis;
    }

    if world.leaf_surfaces(index).any(|s| s.flags.turbulent) {
        VisChoice::FatPvs
    } else {
        VisChoice::LeafPvs
    }
}

/// 选择并获取本帧的可见性位图
pub fn choose_visibility(
    source: &dyn VisibilitySource,
    world: &WorldModel,
    view_leaf: Option<usize>,
    origin: Vec3,
    config: &WorldRenderConfig,
) -> VisBitmap {
    let choice = choose_vis_source(world, view_leaf, config);
    tracing::trace!(target: "worldbrush", ?choice, ?view_leaf, "Visibility source");
    match (choice, view_leaf) {
        (VisChoice::FatPvs, _) => source.fat_pvs(world, origin),
        (VisChoice::LeafPvs, Some(leaf)) => source.leaf_pvs(world, leaf),
        _ => source.no_vis(world),
    }
}
