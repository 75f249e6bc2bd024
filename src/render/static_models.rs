//! 静态模型链接
//!
//! 可见且在视锥内的叶子上挂接的静态实体加入本帧的绘制列表。
//! 每个实体只加入一次，顺序为首次出现的叶子顺序。

use super::frustum::Frustum;
use crate::world::{VisBitmap, WorldModel};
use std::collections::HashSet;
use worldbrush_simd::{cull_box_8, SOA_LANES};

/// 逐叶子链接（标量路径）
pub fn link_static_models(world: &WorldModel, vis: &VisBitmap, frustum: &Frustum, out: &mut Vec<u32>) {
    let mut seen = HashSet::new();
    for (i, leaf) in world.leaves.iter().enumerate() {
        if !vis.is_visible(i as u32) || leaf.static_entities.is_empty() {
            continue;
        }
        if frustum.cull_box(leaf.bounds.mins, leaf.bounds.maxs) {
            continue;
        }
        store(&leaf.static_entities, &mut seen, out);
    }
}

/// 8个叶子一组链接，可见性字节直接作为活动通道掩码
pub fn link_static_models_simd(world: &WorldModel, vis: &VisBitmap, frustum: &Frustum, out: &mut Vec<u32>) {
    let planes = frustum.to_cull_planes();
    let mut seen = HashSet::new();
    let leaf_count = world.leaves.len();

    for (block, bounds) in world.soa_leaf_bounds.iter().enumerate() {
        let mask = vis.byte(block);
        if mask == 0 {
            continue;
        }
        let mask = cull_box_8(bounds, &planes, mask);
        if mask == 0 {
            continue;
        }

        let base = block * SOA_LANES;
        for lane in 0..SOA_LANES.min(leaf_count - base) {
            let leaf = &world.leaves[base + lane];
            if mask & (1 << lane) != 0 && !leaf.static_entities.is_empty() {
                store(&leaf.static_entities, &mut seen, out);
            }
        }
    }
}

fn store(entities: &[u32], seen: &mut HashSet<u32>, out: &mut Vec<u32>) {
    for &id in entities {
        if seen.insert(id) {
            out.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Aabb, BrushModel, BrushTexture, BrushVertex, Leaf, LeafContents, Surface, TexType};
    use glam::{Vec3, Vec4};
    use proptest::prelude::*;

    fn quake_frustum() -> Frustum {
        Frustum::from_view_vectors(Vec3::ZERO, Vec3::X, Vec3::NEG_Y, Vec3::Z, 90.0, 90.0)
    }

    fn leaf_at(center: Vec3, statics: Vec<u32>) -> Leaf {
        Leaf {
            bounds: Aabb::new(center - Vec3::splat(4.0), center + Vec3::splat(4.0)),
            contents: LeafContents::Empty,
            first_mark_surface: 0,
            num_mark_surfaces: 0,
            static_entities: statics,
        }
    }

    fn world_with(leaves: Vec<Leaf>) -> WorldModel {
        WorldModel::new(
            leaves,
            vec![],
            vec![Surface::new(Vec4::Z, 0, 0, 3)],
            vec![BrushModel::new(vec![BrushTexture::new(TexType::Default, None)], 0..1)],
            vec![BrushVertex::default(); 3],
        )
        .unwrap()
    }

    #[test]
    fn test_links_visible_leaves_once() {
        let world = world_with(vec![
            leaf_at(Vec3::new(100.0, 0.0, 0.0), vec![7, 8]),
            // 视点后方
            leaf_at(Vec3::new(-100.0, 0.0, 0.0), vec![9]),
            leaf_at(Vec3::new(200.0, 10.0, 0.0), vec![8, 10]),
        ]);
        let vis = VisBitmap::all(3);

        let mut scalar = Vec::new();
        link_static_models(&world, &vis, &quake_frustum(), &mut scalar);
        assert_eq!(scalar, vec![7, 8, 10]);

        let mut simd = Vec::new();
        link_static_models_simd(&world, &vis, &quake_frustum(), &mut simd);
        assert_eq!(simd, scalar);
    }

    #[test]
    fn test_invisible_leaves_skipped() {
        let world = world_with(vec![
            leaf_at(Vec3::new(100.0, 0.0, 0.0), vec![1]),
            leaf_at(Vec3::new(120.0, 0.0, 0.0), vec![2]),
        ]);
        let mut vis = VisBitmap::empty(2);
        vis.set(1);

        let mut out = Vec::new();
        link_static_models_simd(&world, &vis, &quake_frustum(), &mut out);
        assert_eq!(out, vec![2]);
    }

    proptest! {
        #[test]
        fn test_simd_and_scalar_agree(
            centers in prop::collection::vec((-300.0f32..300.0, -300.0f32..300.0, -50.0f32..50.0), 1..40),
            vis_bits in prop::collection::vec(any::<bool>(), 40),
        ) {
            let leaves: Vec<Leaf> = centers
                .iter()
                .enumerate()
                .map(|(i, &(x, y, z))| leaf_at(Vec3::new(x, y, z), vec![i as u32 / 2]))
                .collect();
            let n = leaves.len() as u32;
            let world = world_with(leaves);
            let mut vis = VisBitmap::empty(n);
            for i in 0..n {
                if vis_bits[i as usize] {
                    vis.set(i);
                }
            }

            let mut scalar = Vec::new();
            link_static_models(&world, &vis, &quake_frustum(), &mut scalar);
            let mut simd = Vec::new();
            link_static_models_simd(&world, &vis, &quake_frustum(), &mut simd);
            prop_assert_eq!(simd, scalar);
        }
    }
}
