//! 帧上下文与世界渲染器
//!
//! 帧计数器、命令分配器偏移和批处理数组都归 [`WorldRenderer`] 所有，
//! 通过 `begin_frame` / `end_frame` 明确界定一帧的生命周期。

use super::backend::GpuBackend;
use super::brush_pass::ShaderPrograms;
use super::frustum::Frustum;
use super::gpu_driven::culling::{FrameUniforms, SurfaceMarker};
use super::gpu_driven::indirect::IndirectCommandAllocator;
use super::gpu_driven::stages::StagePlan;
use super::instance_batch::{BatchContext, BatchStats};
use super::static_models::{link_static_models, link_static_models_simd};
use crate::config::RendererConfig;
use crate::error::{BrushError, BrushResult};
use crate::world::{VisBitmap, WorldModel};
use glam::Vec3;

/// 每帧的视图参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub frustum: Frustum,
    pub vieworg: Vec3,
}

impl FrameParams {
    pub fn new(frustum: Frustum, vieworg: Vec3) -> Self {
        Self { frustum, vieworg }
    }
}

/// 帧计数与当前帧参数
///
/// 帧号从1开始，回绕时跳过0（0是表面“从未标记”的初始值）。
#[derive(Debug, Default)]
pub struct FrameContext {
    framecount: u32,
    params: Option<FrameParams>,
}

impl FrameContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新的一帧，返回帧号
    pub fn begin(&mut self, params: FrameParams) -> u32 {
        self.framecount = self.framecount.wrapping_add(1);
        if self.framecount == 0 {
            self.framecount = 1;
        }
        self.params = Some(params);
        self.framecount
    }

    pub fn end(&mut self) -> BrushResult<u32> {
        self.params.take().ok_or(BrushError::FrameNotStarted)?;
        Ok(self.framecount)
    }

    /// 当前帧号
    pub fn current(&self) -> BrushResult<u32> {
        self.params.map(|_| self.framecount).ok_or(BrushError::FrameNotStarted)
    }

    pub fn params(&self) -> BrushResult<&FrameParams> {
        self.params.as_ref().ok_or(BrushError::FrameNotStarted)
    }

    pub fn framecount(&self) -> u32 {
        self.framecount
    }

    pub fn in_frame(&self) -> bool {
        self.params.is_some()
    }
}

/// 世界几何渲染器
pub struct WorldRenderer<B: GpuBackend> {
    pub(crate) backend: B,
    pub(crate) config: RendererConfig,
    pub(crate) programs: ShaderPrograms,
    pub(crate) plan: StagePlan,
    pub(crate) allocator: IndirectCommandAllocator<B>,
    pub(crate) batch: BatchContext,
    pub(crate) marker: SurfaceMarker,
    pub(crate) world: Option<WorldModel>,
    pub(crate) frame: FrameContext,
    static_entities: Vec<u32>,
}

impl<B: GpuBackend> WorldRenderer<B> {
    pub fn new(backend: B, config: RendererConfig, programs: ShaderPrograms) -> BrushResult<Self> {
        config.validate()?;
        let plan = StagePlan::brush_pipeline();
        plan.validate()?;

        let batch = BatchContext::new(&backend.capabilities(), backend.placeholders(), &config.limits);
        tracing::info!(
            target: "worldbrush",
            backend = backend.name(),
            bindless = backend.capabilities().bindless,
            max_draws = config.limits.max_bmodel_draws,
            "World renderer created"
        );

        Ok(Self {
            allocator: IndirectCommandAllocator::new(config.limits.initial_command_buffer_bytes),
            batch,
            marker: SurfaceMarker::new(),
            world: None,
            frame: FrameContext::new(),
            static_entities: Vec::new(),
            backend,
            config,
            programs,
            plan,
        })
    }

    /// 加载世界并上传静态数据
    pub fn load_world(&mut self, world: WorldModel) -> BrushResult<()> {
        self.backend.load_world(&world)?;
        self.world = Some(world);
        Ok(())
    }

    pub fn world(&self) -> Option<&WorldModel> {
        self.world.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// 修改运行时选项（容量变化需要重新创建渲染器）
    pub fn config_mut(&mut self) -> &mut RendererConfig {
        &mut self.config
    }

    pub fn programs(&self) -> &ShaderPrograms {
        &self.programs
    }

    pub fn allocator(&self) -> &IndirectCommandAllocator<B> {
        &self.allocator
    }

    /// 本帧批处理统计
    pub fn stats(&self) -> BatchStats {
        self.batch.stats()
    }

    pub fn framecount(&self) -> u32 {
        self.frame.framecount()
    }

    /// 本帧链接的静态实体
    pub fn static_entities(&self) -> &[u32] {
        &self.static_entities
    }

    pub fn begin_frame(&mut self, params: FrameParams) -> BrushResult<u32> {
        if self.frame.in_frame() {
            tracing::warn!(target: "worldbrush", framecount = self.frame.framecount(), "Previous frame was not ended");
        }
        let framecount = self.frame.begin(params);
        self.backend.begin_frame(framecount)?;
        self.allocator.begin_frame(framecount);
        self.batch.reset_stats();
        self.static_entities.clear();
        Ok(framecount)
    }

    /// 标记可见表面并链接静态模型
    pub fn mark_surfaces(&mut self, vis: &VisBitmap) -> BrushResult<()> {
        let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
        let framecount = self.frame.current()?;
        let params = *self.frame.params()?;

        let uniforms = FrameUniforms::new(
            &params.frustum,
            params.vieworg,
            self.config.world.old_sky_leaf,
            framecount,
        );
        self.marker.mark(&mut self.backend, &self.plan, world, vis, uniforms)?;

        self.static_entities.clear();
        if self.config.world.simd_static_link {
            link_static_models_simd(world, vis, &params.frustum, &mut self.static_entities);
        } else {
            link_static_models(world, vis, &params.frustum, &mut self.static_entities);
        }
        Ok(())
    }

    /// 结束一帧，提交GPU工作并回收过期缓冲区
    pub fn end_frame(&mut self) -> BrushResult<()> {
        let framecount = self.frame.end()?;
        self.backend.end_frame(framecount)?;
        let stats = self.batch.stats();
        tracing::trace!(
            target: "worldbrush",
            framecount,
            flushes = stats.flushes,
            draws = stats.draws,
            "Frame ended"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::gpu_driven::software::{BackendEvent, SoftwareBackend};
    use crate::world::{
        Aabb, BrushModel, BrushTexture, BrushVertex, Leaf, LeafContents, Surface, TexType,
    };
    use glam::Vec4;

    fn frustum() -> Frustum {
        Frustum::from_view_vectors(Vec3::ZERO, Vec3::X, Vec3::NEG_Y, Vec3::Z, 90.0, 90.0)
    }

    fn params() -> FrameParams {
        FrameParams::new(frustum(), Vec3::ZERO)
    }

    fn world() -> WorldModel {
        let leaf = Leaf {
            bounds: Aabb::new(Vec3::new(50.0, -10.0, -10.0), Vec3::new(70.0, 10.0, 10.0)),
            contents: LeafContents::Empty,
            first_mark_surface: 0,
            num_mark_surfaces: 1,
            static_entities: vec![3],
        };
        WorldModel::new(
            vec![leaf],
            vec![0],
            vec![Surface::new(Vec4::new(-1.0, 0.0, 0.0, -60.0), 0, 0, 4)],
            vec![BrushModel::new(vec![BrushTexture::new(TexType::Default, None)], 0..1)],
            vec![BrushVertex::default(); 4],
        )
        .unwrap()
    }

    #[test]
    fn test_framecount_skips_zero() {
        let mut ctx = FrameContext::new();
        assert!(ctx.current().is_err());
        assert_eq!(ctx.begin(params()), 1);
        assert_eq!(ctx.end().unwrap(), 1);
        assert!(matches!(ctx.end(), Err(BrushError::FrameNotStarted)));

        ctx.framecount = u32::MAX;
        assert_eq!(ctx.begin(params()), 1);
    }

    #[test]
    fn test_frame_lifecycle() {
        let mut renderer =
            WorldRenderer::new(SoftwareBackend::new(), RendererConfig::default(), ShaderPrograms::uniform(Default::default()))
                .unwrap();
        assert!(matches!(
            renderer.mark_surfaces(&VisBitmap::all(1)),
            Err(BrushError::WorldNotLoaded)
        ));
        renderer.load_world(world()).unwrap();
        assert!(matches!(
            renderer.mark_surfaces(&VisBitmap::all(1)),
            Err(BrushError::FrameNotStarted)
        ));

        assert_eq!(renderer.begin_frame(params()).unwrap(), 1);
        renderer.mark_surfaces(&VisBitmap::all(1)).unwrap();
        assert_eq!(renderer.static_entities(), &[3]);
        assert_eq!(renderer.backend().template()[0].index_count, 6);
        renderer.end_frame().unwrap();

        let events = renderer.backend().events();
        assert!(matches!(events.first(), Some(BackendEvent::BeginFrame(1))));
        assert!(matches!(events.last(), Some(BackendEvent::EndFrame(1))));
    }

    #[test]
    fn test_scalar_static_link() {
        let config = RendererConfig {
            world: crate::config::WorldRenderConfig {
                simd_static_link: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut renderer =
            WorldRenderer::new(SoftwareBackend::new(), config, ShaderPrograms::uniform(Default::default())).unwrap();
        renderer.load_world(world()).unwrap();
        renderer.begin_frame(params()).unwrap();
        renderer.mark_surfaces(&VisBitmap::empty(1)).unwrap();
        assert!(renderer.static_entities().is_empty());
        assert_eq!(renderer.backend().template()[0].index_count, 0);
        renderer.end_frame().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RendererConfig::default();
        config.limits.max_bmodel_draws = 0;
        assert!(matches!(
            WorldRenderer::new(SoftwareBackend::new(), config, ShaderPrograms::uniform(Default::default())),
            Err(BrushError::Config(_))
        ));
    }
}
