//! 软件后端
//!
//! 在CPU上执行清除、标记、收集三个内核（语义与WGSL着色器一致），并记录所有状态变化和绘制提交。
//! 用于无GPU环境下的测试和调试。

use super::command_generator::gather_command;
use super::culling::{pack_indirect_template, pack_leaves, pack_surfaces, FrameUniforms, GpuLeaf, GpuSurface};
use super::indirect::{DrawIndexedIndirectArgs, GarbageQueue, IndirectDrawError};
use super::stages::Stage;
use crate::error::{BrushError, BrushResult};
use crate::render::backend::{
    AuxTexture, BackendCaps, BarrierScope, ComputeDispatch, GpuBackend, PlaceholderTextures, ProgramId,
    RenderState,
};
use crate::render::instance_batch::{BindlessCall, BoundCall, GpuInstance};
use crate::world::{TextureHandle, WorldModel};
use std::collections::HashMap;

/// 软件命令缓冲区
#[derive(Debug, PartialEq, Eq)]
pub struct SoftCommandBuffer {
    id: u32,
    size: u64,
}

impl SoftCommandBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// 记录的后端事件
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    BeginFrame(u32),
    EndFrame(u32),
    Dispatch { stage: Stage, work_items: u32 },
    Barrier(BarrierScope),
    SetState(RenderState),
    BindAux(AuxTexture),
    UploadInstances(Vec<GpuInstance>),
    /// 多重间接绘制（命令为绘制时缓冲区中的内容）
    DrawMulti {
        program: ProgramId,
        commands: Vec<DrawIndexedIndirectArgs>,
        calls: Vec<BindlessCall>,
    },
    /// 逐命令绘制
    DrawBound {
        program: ProgramId,
        commands: Vec<DrawIndexedIndirectArgs>,
        calls: Vec<BoundCall>,
        textures: Vec<[TextureHandle; 2]>,
    },
}

/// 已上传的世界数据
#[derive(Debug, Default)]
struct SoftWorld {
    leaves: Vec<GpuLeaf>,
    mark_surfaces: Vec<u32>,
    surfaces: Vec<GpuSurface>,
    template: Vec<DrawIndexedIndirectArgs>,
    indices: Vec<u32>,
}

/// CPU执行的后端
#[derive(Debug)]
pub struct SoftwareBackend {
    caps: BackendCaps,
    placeholders: PlaceholderTextures,
    world: Option<SoftWorld>,
    buffers: HashMap<u32, Vec<u8>>,
    next_buffer: u32,
    garbage: GarbageQueue<u32>,
    destroyed: u32,
    events: Vec<BackendEvent>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    /// 默认能力：绑定槽模式，256字节对齐
    pub fn new() -> Self {
        Self::with_caps(BackendCaps::default())
    }

    pub fn with_caps(caps: BackendCaps) -> Self {
        Self {
            caps,
            placeholders: PlaceholderTextures {
                white: TextureHandle::new(1, 1),
                grey: TextureHandle::new(2, 2),
                black: TextureHandle::new(3, 3),
            },
            world: None,
            buffers: HashMap::new(),
            next_buffer: 1,
            garbage: GarbageQueue::new(3),
            destroyed: 0,
            events: Vec::new(),
        }
    }

    /// 设置退役缓冲区的延迟帧数
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.garbage = GarbageQueue::new(frames);
        self
    }

    pub fn with_placeholders(mut self, placeholders: PlaceholderTextures) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.events)
    }

    /// 标记阶段写入的索引缓冲区
    pub fn indices(&self) -> &[u32] {
        self.world.as_ref().map_or(&[], |w| &w.indices)
    }

    /// 命令模板（含本帧的索引计数）
    pub fn template(&self) -> &[DrawIndexedIndirectArgs] {
        self.world.as_ref().map_or(&[], |w| &w.template)
    }

    pub fn surfaces(&self) -> &[GpuSurface] {
        self.world.as_ref().map_or(&[], |w| &w.surfaces)
    }

    /// 存活的命令缓冲区（含等待销毁的）
    pub fn live_command_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// 等待销毁的命令缓冲区
    pub fn retired_command_buffers(&self) -> usize {
        self.garbage.len()
    }

    /// 已销毁的命令缓冲区
    pub fn destroyed_command_buffers(&self) -> u32 {
        self.destroyed
    }

    /// 读取命令缓冲区中的命令
    pub fn read_commands(
        &self,
        buffer: &SoftCommandBuffer,
        offset: u64,
        count: u32,
    ) -> Result<Vec<DrawIndexedIndirectArgs>, IndirectDrawError> {
        let bytes = self.buffers.get(&buffer.id).ok_or_else(|| {
            IndirectDrawError::InvalidArguments(format!("command buffer {} destroyed", buffer.id))
        })?;
        let end = offset + count as u64 * DrawIndexedIndirectArgs::SIZE;
        if end > bytes.len() as u64 {
            return Err(IndirectDrawError::InsufficientCapacity {
                required: end,
                available: bytes.len() as u64,
            });
        }
        let stride = DrawIndexedIndirectArgs::SIZE as usize;
        Ok(bytes[offset as usize..end as usize]
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    fn world_mut(&mut self) -> BrushResult<&mut SoftWorld> {
        self.world.as_mut().ok_or(BrushError::WorldNotLoaded)
    }
}

/// 清零前 `groups` 个分组的索引计数
pub fn clear_indirect(template: &mut [DrawIndexedIndirectArgs], groups: u32) {
    for cmd in template.iter_mut().take(groups as usize) {
        cmd.index_count = 0;
    }
}

/// 叶子剔除并标记表面
///
/// 逐个叶子顺序执行，结果与GPU并行执行的区别只在同一分组内三角形的排列顺序。
pub fn cull_mark(
    frame: &FrameUniforms,
    vis_words: &[u32],
    leaves: &[GpuLeaf],
    mark_surfaces: &[u32],
    surfaces: &mut [GpuSurface],
    template: &mut [DrawIndexedIndirectArgs],
    indices: &mut [u32],
) {
    'leaves: for (i, leaf) in leaves.iter().enumerate() {
        let word = vis_words.get(i >> 5).copied().unwrap_or(0);
        if (word >> (i & 31)) & 1 == 0 {
            continue;
        }
        if leaf.is_sky() && frame.old_sky_leaf == 0 {
            continue;
        }

        for plane in &frame.frustum {
            let corner = [
                if plane[0] >= 0.0 { leaf.maxs[0] } else { leaf.mins[0] },
                if plane[1] >= 0.0 { leaf.maxs[1] } else { leaf.mins[1] },
                if plane[2] >= 0.0 { leaf.maxs[2] } else { leaf.mins[2] },
            ];
            let mut dot = corner[0] * plane[0];
            dot += corner[1] * plane[1];
            dot += corner[2] * plane[2];
            if !(plane[3] < dot) {
                continue 'leaves;
            }
        }

        let first = leaf.first_surf as usize;
        for &s in mark_surfaces.iter().skip(first).take(leaf.surf_count() as usize) {
            let Some(surf) = surfaces.get_mut(s as usize) else {
                continue;
            };
            if surf.num_edges < 3 {
                continue;
            }
            let p = surf.plane;
            let facing = p[0] * frame.vieworg[0] + p[1] * frame.vieworg[1] + p[2] * frame.vieworg[2];
            if facing < p[3] {
                continue;
            }
            if std::mem::replace(&mut surf.framecount, frame.framecount) == frame.framecount {
                continue;
            }

            let Some(cmd) = template.get_mut(surf.draw_group as usize) else {
                continue;
            };
            let tris = surf.num_edges - 2;
            let ofs = (cmd.first_index + cmd.index_count) as usize;
            cmd.index_count += 3 * tris;

            let v0 = surf.first_vertex;
            for t in 0..tris {
                let at = ofs + 3 * t as usize;
                if let Some(tri) = indices.get_mut(at..at + 3) {
                    tri.copy_from_slice(&[v0, v0 + t + 1, v0 + t + 2]);
                }
            }
        }
    }
}

impl GpuBackend for SoftwareBackend {
    type CommandBuffer = SoftCommandBuffer;

    fn name(&self) -> &str {
        "software"
    }

    fn capabilities(&self) -> BackendCaps {
        self.caps
    }

    fn placeholders(&self) -> PlaceholderTextures {
        self.placeholders
    }

    fn load_world(&mut self, world: &WorldModel) -> BrushResult<()> {
        self.world = Some(SoftWorld {
            leaves: pack_leaves(world),
            mark_surfaces: world.mark_surfaces.clone(),
            surfaces: pack_surfaces(world),
            template: pack_indirect_template(world),
            indices: world.indices.clone(),
        });
        Ok(())
    }

    fn begin_frame(&mut self, framecount: u32) -> BrushResult<()> {
        self.events.push(BackendEvent::BeginFrame(framecount));
        Ok(())
    }

    fn end_frame(&mut self, framecount: u32) -> BrushResult<()> {
        for id in self.garbage.collect(framecount) {
            self.buffers.remove(&id);
            self.destroyed += 1;
        }
        self.events.push(BackendEvent::EndFrame(framecount));
        Ok(())
    }

    fn create_command_buffer(&mut self, size: u64) -> Result<SoftCommandBuffer, IndirectDrawError> {
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(id, vec![0; size as usize]);
        Ok(SoftCommandBuffer { id, size })
    }

    fn retire_command_buffer(&mut self, buffer: SoftCommandBuffer, framecount: u32) {
        self.garbage.push(buffer.id, framecount);
    }

    fn dispatch(&mut self, dispatch: ComputeDispatch<'_, SoftCommandBuffer>) -> BrushResult<()> {
        self.events.push(BackendEvent::Dispatch {
            stage: dispatch.stage(),
            work_items: dispatch.work_items(),
        });

        match dispatch {
            ComputeDispatch::ClearIndirect { groups } => {
                clear_indirect(&mut self.world_mut()?.template, groups);
            }
            ComputeDispatch::CullMark {
                uniforms,
                vis_words,
                ..
            } => {
                let world = self.world_mut()?;
                cull_mark(
                    uniforms,
                    vis_words,
                    &world.leaves,
                    &world.mark_surfaces,
                    &mut world.surfaces,
                    &mut world.template,
                    &mut world.indices,
                );
            }
            ComputeDispatch::GatherIndirect {
                remap,
                max_instances,
                dst,
                dst_offset,
            } => {
                let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
                let mut gathered = Vec::with_capacity(remap.len());
                for r in remap {
                    let template = world.template.get(r.src as usize).ok_or_else(|| {
                        IndirectDrawError::InvalidArguments(format!("command slot {} out of range", r.src))
                    })?;
                    gathered.push(gather_command(template, *r, max_instances));
                }

                let bytes = self.buffers.get_mut(&dst.id).ok_or_else(|| {
                    IndirectDrawError::InvalidArguments(format!("command buffer {} destroyed", dst.id))
                })?;
                let data: &[u8] = bytemuck::cast_slice(&gathered);
                let start = dst_offset as usize;
                let end = start + data.len();
                if end > bytes.len() {
                    return Err(IndirectDrawError::InsufficientCapacity {
                        required: end as u64,
                        available: bytes.len() as u64,
                    }
                    .into());
                }
                bytes[start..end].copy_from_slice(data);
            }
        }
        Ok(())
    }

    fn barrier(&mut self, scope: BarrierScope) {
        self.events.push(BackendEvent::Barrier(scope));
    }

    fn set_state(&mut self, state: RenderState) {
        self.events.push(BackendEvent::SetState(state));
    }

    fn bind_aux_texture(&mut self, aux: AuxTexture) {
        self.events.push(BackendEvent::BindAux(aux));
    }

    fn upload_instances(&mut self, instances: &[GpuInstance]) -> BrushResult<()> {
        self.events.push(BackendEvent::UploadInstances(instances.to_vec()));
        Ok(())
    }

    fn draw_multi_indirect(
        &mut self,
        program: ProgramId,
        calls: &[BindlessCall],
        commands: &SoftCommandBuffer,
        offset: u64,
        count: u32,
    ) -> BrushResult<()> {
        if calls.len() != count as usize {
            return Err(IndirectDrawError::InvalidArguments(format!(
                "{} calls for {} commands",
                calls.len(),
                count
            ))
            .into());
        }
        let commands = self.read_commands(commands, offset, count)?;
        self.events.push(BackendEvent::DrawMulti {
            program,
            commands,
            calls: calls.to_vec(),
        });
        Ok(())
    }

    fn draw_bound(
        &mut self,
        program: ProgramId,
        calls: &[BoundCall],
        textures: &[[TextureHandle; 2]],
        commands: &SoftCommandBuffer,
        offset: u64,
    ) -> BrushResult<()> {
        if calls.len() != textures.len() {
            return Err(IndirectDrawError::InvalidArguments(format!(
                "{} calls with {} texture pairs",
                calls.len(),
                textures.len()
            ))
            .into());
        }
        let commands = self.read_commands(commands, offset, calls.len() as u32)?;
        self.events.push(BackendEvent::DrawBound {
            program,
            commands,
            calls: calls.to_vec(),
            textures: textures.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(first_surf: u32, count: u32, sky: bool) -> GpuLeaf {
        GpuLeaf {
            mins: [-8.0; 3],
            first_surf,
            maxs: [8.0; 3],
            surf_count_sky: (count << 1) | sky as u32,
        }
    }

    fn surface(draw_group: u32, first_vertex: u32, num_edges: u32) -> GpuSurface {
        GpuSurface {
            // 朝向 +z，视点在原点上方时可见
            plane: [0.0, 0.0, 1.0, -100.0],
            framecount: 0,
            draw_group,
            num_edges,
            first_vertex,
        }
    }

    /// 四个平面都包含整个测试空间
    fn open_frame(framecount: u32) -> FrameUniforms {
        FrameUniforms {
            frustum: [[1.0, 0.0, 0.0, -1000.0], [-1.0, 0.0, 0.0, -1000.0], [0.0, 1.0, 0.0, -1000.0], [0.0, -1.0, 0.0, -1000.0]],
            vieworg: [0.0; 3],
            old_sky_leaf: 0,
            framecount,
            _pad: [0; 3],
        }
    }

    fn template(first_index: u32) -> DrawIndexedIndirectArgs {
        DrawIndexedIndirectArgs {
            first_index,
            ..Default::default()
        }
    }

    #[test]
    fn test_cull_mark_writes_fan_indices() {
        let leaves = [leaf(0, 2, false)];
        let mut surfaces = [surface(0, 10, 4), surface(0, 20, 3)];
        let mut cmds = [template(0)];
        let mut indices = [0u32; 9];
        cull_mark(&open_frame(1), &[1], &leaves, &[0, 1], &mut surfaces, &mut cmds, &mut indices);

        assert_eq!(cmds[0].index_count, 9);
        assert_eq!(indices, [10, 11, 12, 10, 12, 13, 20, 21, 22]);
        assert!(surfaces.iter().all(|s| s.framecount == 1));
    }

    #[test]
    fn test_surface_marked_once_per_frame() {
        // 两个叶子共享同一个表面
        let leaves = [leaf(0, 1, false), leaf(1, 1, false)];
        let mut surfaces = [surface(0, 0, 3)];
        let mut cmds = [template(0)];
        let mut indices = [0u32; 6];
        cull_mark(&open_frame(5), &[0b11], &leaves, &[0, 0], &mut surfaces, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 3);
    }

    #[test]
    fn test_cull_mark_filters() {
        let mut cmds = [template(0)];
        let mut indices = [0u32; 3];

        // 不可见
        let mut surfaces = [surface(0, 0, 3)];
        cull_mark(&open_frame(1), &[0], &[leaf(0, 1, false)], &[0], &mut surfaces, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 0);

        // 天空叶子需要 old_sky_leaf
        cull_mark(&open_frame(1), &[1], &[leaf(0, 1, true)], &[0], &mut surfaces, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 0);
        let mut frame = open_frame(1);
        frame.old_sky_leaf = 1;
        cull_mark(&frame, &[1], &[leaf(0, 1, true)], &[0], &mut surfaces, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 3);

        // 背面
        let mut cmds = [template(0)];
        let mut back = [GpuSurface {
            plane: [0.0, 0.0, 1.0, 50.0],
            ..surface(0, 0, 3)
        }];
        cull_mark(&open_frame(2), &[1], &[leaf(0, 1, false)], &[0], &mut back, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 0);
        assert_eq!(back[0].framecount, 0);

        // 退化表面
        let mut degenerate = [surface(0, 0, 2)];
        cull_mark(&open_frame(2), &[1], &[leaf(0, 1, false)], &[0], &mut degenerate, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 0);
    }

    #[test]
    fn test_cull_mark_frustum_rejects_leaf() {
        let mut frame = open_frame(1);
        // 只接受 x > 100
        frame.frustum[0] = [1.0, 0.0, 0.0, 100.0];
        let mut surfaces = [surface(0, 0, 3)];
        let mut cmds = [template(0)];
        let mut indices = [0u32; 3];
        cull_mark(&frame, &[1], &[leaf(0, 1, false)], &[0], &mut surfaces, &mut cmds, &mut indices);
        assert_eq!(cmds[0].index_count, 0);
    }

    #[test]
    fn test_clear_only_world_groups() {
        let mut cmds = [
            DrawIndexedIndirectArgs {
                index_count: 6,
                ..Default::default()
            };
            3
        ];
        clear_indirect(&mut cmds, 2);
        assert_eq!(cmds.map(|c| c.index_count), [0, 0, 6]);
    }

    #[test]
    fn test_retired_buffers_destroyed_after_delay() {
        let mut backend = SoftwareBackend::new().with_frames_in_flight(2);
        let buffer = backend.create_command_buffer(64).unwrap();
        backend.retire_command_buffer(buffer, 1);
        backend.end_frame(2).unwrap();
        assert_eq!(backend.live_command_buffers(), 1);
        backend.end_frame(3).unwrap();
        assert_eq!(backend.live_command_buffers(), 0);
        assert_eq!(backend.destroyed_command_buffers(), 1);
    }

    #[test]
    fn test_dispatch_requires_world() {
        let mut backend = SoftwareBackend::new();
        let result = backend.dispatch(ComputeDispatch::ClearIndirect { groups: 1 });
        assert!(matches!(result, Err(BrushError::WorldNotLoaded)));
    }

    #[test]
    fn test_read_commands_bounds() {
        let mut backend = SoftwareBackend::new();
        let buffer = backend.create_command_buffer(40).unwrap();
        assert_eq!(backend.read_commands(&buffer, 0, 2).unwrap().len(), 2);
        assert!(backend.read_commands(&buffer, 20, 2).is_err());
    }
}
