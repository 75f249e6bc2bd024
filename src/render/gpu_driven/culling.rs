//! GPU 表面标记模块
//!
//! 每帧两个计算阶段：
//!
//! 1. `clear_indirect`：把世界纹理分组的索引计数清零
//! 2. `cull_mark`：每个叶子一次调用，按可见性位、视锥和天空规则过滤后，
//!    把叶子里朝向视点且本帧未标记的表面三角化写入所在分组的索引区间
//!
//! 叶子剔除使用与 [`Frustum::cull_box`](crate::render::frustum::Frustum::cull_box) 相同的符号位角点判定。

use super::indirect::DrawIndexedIndirectArgs;
use super::stages::{Stage, StagePlan};
use crate::error::{BrushError, BrushResult};
use crate::render::backend::{ComputeDispatch, GpuBackend};
use crate::render::frustum::Frustum;
use crate::world::{LeafContents, VisBitmap, WorldModel};
use glam::Vec3;

/// 每帧常量
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    /// 视锥平面 `(nx, ny, nz, dist)`
    pub frustum: [[f32; 4]; 4],
    /// 视点
    pub vieworg: [f32; 3],
    /// 非零时天空叶子参与标记
    pub old_sky_leaf: u32,
    /// 帧计数
    pub framecount: u32,
    pub _pad: [u32; 3],
}

impl FrameUniforms {
    pub fn new(frustum: &Frustum, vieworg: Vec3, old_sky_leaf: bool, framecount: u32) -> Self {
        Self {
            frustum: frustum.to_gpu(),
            vieworg: vieworg.to_array(),
            old_sky_leaf: old_sky_leaf as u32,
            framecount,
            _pad: [0; 3],
        }
    }
}

/// GPU叶子
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLeaf {
    pub mins: [f32; 3],
    /// 第一个标记表面
    pub first_surf: u32,
    pub maxs: [f32; 3],
    /// 第0位为天空标志，其余位为标记表面数量
    pub surf_count_sky: u32,
}

impl GpuLeaf {
    pub fn surf_count(&self) -> u32 {
        self.surf_count_sky >> 1
    }

    pub fn is_sky(&self) -> bool {
        self.surf_count_sky & 1 != 0
    }
}

/// GPU表面
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSurface {
    pub plane: [f32; 4],
    /// 最后一次被标记的帧
    pub framecount: u32,
    pub draw_group: u32,
    pub num_edges: u32,
    pub first_vertex: u32,
}

/// 打包叶子
pub fn pack_leaves(world: &WorldModel) -> Vec<GpuLeaf> {
    world
        .leaves
        .iter()
        .map(|leaf| GpuLeaf {
            mins: leaf.bounds.mins.to_array(),
            first_surf: leaf.first_mark_surface,
            maxs: leaf.bounds.maxs.to_array(),
            surf_count_sky: (leaf.num_mark_surfaces << 1) | (leaf.contents == LeafContents::Sky) as u32,
        })
        .collect()
}

/// 打包世界表面，下标与标记表面中的表面编号一致
pub fn pack_surfaces(world: &WorldModel) -> Vec<GpuSurface> {
    let end = world.world().surfaces.end as usize;
    world.surfaces[..end]
        .iter()
        .map(|s| GpuSurface {
            plane: s.plane.to_array(),
            framecount: 0,
            draw_group: s.draw_group,
            num_edges: s.num_edges,
            first_vertex: s.first_vertex,
        })
        .collect()
}

/// 每个纹理分组的命令模板
///
/// 世界分组的索引计数每帧由标记阶段累加，子模型分组为静态值。
pub fn pack_indirect_template(world: &WorldModel) -> Vec<DrawIndexedIndirectArgs> {
    world
        .groups
        .iter()
        .map(|g| DrawIndexedIndirectArgs {
            index_count: g.index_count,
            instance_count: 0,
            first_index: g.first_index,
            base_vertex: 0,
            first_instance: 0,
        })
        .collect()
}

/// 表面标记器
#[derive(Debug, Default)]
pub struct SurfaceMarker {
    uniforms: FrameUniforms,
    vis_words: Vec<u32>,
}

impl SurfaceMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行清除和标记阶段
    pub fn mark<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        plan: &StagePlan,
        world: &WorldModel,
        vis: &VisBitmap,
        uniforms: FrameUniforms,
    ) -> BrushResult<()> {
        if vis.leaf_count() != world.leaf_count() {
            return Err(BrushError::InvalidWorld(format!(
                "visibility covers {} leaves, world has {}",
                vis.leaf_count(),
                world.leaf_count()
            )));
        }
        self.uniforms = uniforms;
        self.vis_words = vis.upload_words();

        backend.dispatch(ComputeDispatch::ClearIndirect {
            groups: world.world_group_count(),
        })?;
        backend.barrier(plan.barrier_after(Stage::ClearIndirect));

        backend.dispatch(ComputeDispatch::CullMark {
            uniforms: &self.uniforms,
            vis_words: &self.vis_words,
            leaf_count: world.leaf_count(),
        })?;
        backend.barrier(plan.barrier_after(Stage::CullMark));

        tracing::trace!(
            target: "worldbrush",
            framecount = uniforms.framecount,
            visible_leaves = vis.count_visible(),
            "Surfaces marked"
        );
        Ok(())
    }

    /// 最近一次的帧常量
    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }
}

/// 清除计算着色器
pub const CLEAR_INDIRECT_SHADER: &str = r#"
struct DrawCmd {
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
};

@group(0) @binding(0) var<storage, read_write> cmds: array<DrawCmd>;

@compute @workgroup_size(WORKGROUP_SIZE)
fn clear_indirect(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i < arrayLength(&cmds)) {
        cmds[i].index_count = 0u;
    }
}
"#;

/// 叶子剔除和表面标记计算着色器
pub const CULL_MARK_SHADER: &str = r#"
struct FrameUniforms {
    frustum: array<vec4<f32>, 4>,
    vieworg: vec3<f32>,
    old_sky_leaf: u32,
    framecount: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

struct DrawCmd {
    index_count: atomic<u32>,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
};

struct Leaf {
    mins: vec3<f32>,
    first_surf: u32,
    maxs: vec3<f32>,
    surf_count_sky: u32,
};

struct Surface {
    plane: vec4<f32>,
    framecount: atomic<u32>,
    draw_group: u32,
    num_edges: u32,
    first_vertex: u32,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var<storage, read_write> cmds: array<DrawCmd>;
@group(0) @binding(2) var<storage, read_write> indices: array<u32>;
@group(0) @binding(3) var<storage, read> vis: array<u32>;
@group(0) @binding(4) var<storage, read> leaves: array<Leaf>;
@group(0) @binding(5) var<storage, read> marksurfs: array<u32>;
@group(0) @binding(6) var<storage, read_write> surfs: array<Surface>;

@compute @workgroup_size(WORKGROUP_SIZE)
fn cull_mark(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= arrayLength(&leaves)) {
        return;
    }
    if (((vis[i >> 5u] >> (i & 31u)) & 1u) == 0u) {
        return;
    }

    let leaf = leaves[i];
    if ((leaf.surf_count_sky & 1u) != 0u && frame.old_sky_leaf == 0u) {
        return;
    }

    // 符号位角点：法向量分量为负取mins，否则取maxs
    for (var p = 0u; p < 4u; p++) {
        let plane = frame.frustum[p];
        let corner = select(leaf.mins, leaf.maxs, plane.xyz >= vec3<f32>(0.0));
        if (dot(corner, plane.xyz) <= plane.w) {
            return;
        }
    }

    let count = leaf.surf_count_sky >> 1u;
    for (var j = 0u; j < count; j++) {
        let s = marksurfs[leaf.first_surf + j];
        let plane = surfs[s].plane;
        let n = surfs[s].num_edges;
        if (n < 3u) {
            continue;
        }
        if (dot(plane.xyz, frame.vieworg) < plane.w) {
            continue;
        }
        if (atomicExchange(&surfs[s].framecount, frame.framecount) == frame.framecount) {
            continue;
        }

        let g = surfs[s].draw_group;
        let v0 = surfs[s].first_vertex;
        let tris = n - 2u;
        let ofs = cmds[g].first_index + atomicAdd(&cmds[g].index_count, 3u * tris);
        for (var t = 0u; t < tris; t++) {
            indices[ofs + 3u * t] = v0;
            indices[ofs + 3u * t + 1u] = v0 + t + 1u;
            indices[ofs + 3u * t + 2u] = v0 + t + 2u;
        }
    }
}
"#;
