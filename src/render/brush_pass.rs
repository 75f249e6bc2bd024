//! 笔刷模型绘制通道
//!
//! 每个通道固定纹理类型窗口、着色器程序和混合状态。实体列表中窗口内没有纹理分组的实体
//! 被跳过；其余实体打包为实例，连续的同模型实体合并为一个实例区间，
//! 再为该模型窗口内的每个纹理分组添加一个调用。

use super::backend::{AuxTexture, GpuBackend, ProgramId, RenderState};
use super::frame::WorldRenderer;
use super::instance_batch::{BModelBatcher, GpuInstance};
use crate::config::WorldRenderConfig;
use crate::error::{BrushError, BrushResult};
use crate::world::{BrushEntity, BrushModel, TexType, WorldModel};
use std::ops::Range;

/// 世界着色器变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldShader {
    Solid = 0,
    AlphaTest = 1,
    Water = 2,
}

/// 质量档位数量
pub const QUALITY_TIERS: usize = 4;

/// 各通道使用的着色器程序
///
/// `world` 按 `[质量档位][WorldShader]` 索引，其余按是否粗糙仿真索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderPrograms {
    pub world: [[ProgramId; 3]; QUALITY_TIERS],
    pub water: [ProgramId; 2],
    pub sky_layers: [ProgramId; 2],
    pub sky_cubemap: [ProgramId; 2],
    pub sky_stencil: ProgramId,
}

impl ShaderPrograms {
    /// 所有通道使用同一程序
    pub fn uniform(program: ProgramId) -> Self {
        Self {
            world: [[program; 3]; QUALITY_TIERS],
            water: [program; 2],
            sky_layers: [program; 2],
            sky_cubemap: [program; 2],
            sky_stencil: program,
        }
    }

    pub fn world(&self, tier: usize, shader: WorldShader) -> ProgramId {
        self.world[tier.min(QUALITY_TIERS - 1)][shader as usize]
    }

    /// 水面程序：地图带光照水面且启用时使用世界水面着色器
    pub fn water_program(&self, world: &WorldModel, config: &WorldRenderConfig) -> ProgramId {
        if world.has_lit_water && config.lit_water {
            self.world(config.quality_tier(), WorldShader::Water)
        } else {
            self.water[config.coarse() as usize]
        }
    }
}

/// 笔刷绘制通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrushPass {
    Solid,
    AlphaTest,
    SkyLayers,
    SkyCubemap,
    SkyStencil,
    ShowTris,
}

impl BrushPass {
    /// 纹理类型窗口 `[begin, end)`
    pub fn window(self) -> (usize, usize) {
        let sky = TexType::Sky.index();
        match self {
            Self::Solid => (0, TexType::Cutout.index()),
            Self::AlphaTest => (TexType::Cutout.index(), TexType::Cutout.index() + 1),
            Self::SkyLayers | Self::SkyCubemap | Self::SkyStencil => (sky, sky + 1),
            Self::ShowTris => (0, TexType::COUNT),
        }
    }

    pub fn program(self, programs: &ShaderPrograms, config: &WorldRenderConfig) -> ProgramId {
        let coarse = config.coarse() as usize;
        match self {
            Self::Solid => programs.world(config.quality_tier(), WorldShader::Solid),
            Self::AlphaTest => programs.world(config.quality_tier(), WorldShader::AlphaTest),
            Self::SkyLayers => programs.sky_layers[coarse],
            Self::SkyCubemap => programs.sky_cubemap[coarse],
            Self::SkyStencil => programs.sky_stencil,
            Self::ShowTris => programs.world(0, WorldShader::Solid),
        }
    }

    /// 纹理单元2的绑定
    pub fn aux_texture(self, config: &WorldRenderConfig) -> Option<AuxTexture> {
        match self {
            Self::Solid | Self::AlphaTest => Some(lightmap_or_grey(config)),
            Self::SkyCubemap => Some(AuxTexture::SkyCubemap),
            _ => None,
        }
    }

    /// 线框覆盖不使用纹理
    fn textured(self) -> bool {
        self != Self::ShowTris
    }
}

fn lightmap_or_grey(config: &WorldRenderConfig) -> AuxTexture {
    if config.fullbright_cheat {
        AuxTexture::Grey
    } else {
        AuxTexture::Lightmap
    }
}

/// 实体的某种液体是否属于给定的透明度分区
///
/// 透明度低于1.0为半透明，实体覆盖值优先于纹理类型默认值。
pub fn is_translucent(entity: &BrushEntity, tex_type: TexType, config: &WorldRenderConfig) -> bool {
    entity.alpha_for(tex_type, &config.liquid_alpha) < 1.0
}

/// 实体在给定分区中是否有液体表面
pub fn has_water(entity: &BrushEntity, model: &BrushModel, translucent: bool, config: &WorldRenderConfig) -> bool {
    TexType::liquids()
        .any(|t| model.groups_of(t) > 0 && is_translucent(entity, t, config) == translucent)
}

/// 纹理分组选择
#[derive(Debug, Clone, Copy)]
enum Selection {
    Window { begin: usize, end: usize, textured: bool },
    Water { translucent: bool },
}

impl Selection {
    fn has_groups(&self, entity: &BrushEntity, model: &BrushModel, config: &WorldRenderConfig) -> bool {
        match *self {
            Self::Window { begin, end, .. } => model.groups_in(begin, end) > 0,
            Self::Water { translucent } => has_water(entity, model, translucent, config),
        }
    }

    fn groups(&self, model: &BrushModel) -> Range<usize> {
        match *self {
            Self::Window { begin, end, .. } => model.group_range(begin, end),
            Self::Water { .. } => {
                model.group_range(TexType::FIRST_LIQUID.index(), TexType::LAST_LIQUID.index() + 1)
            }
        }
    }

    fn includes(&self, entity: &BrushEntity, model: &BrushModel, j: usize, config: &WorldRenderConfig) -> bool {
        match *self {
            Self::Window { .. } => true,
            Self::Water { translucent } => {
                is_translucent(entity, model.used_texture(j).tex_type, config) == translucent
            }
        }
    }

    fn textured(&self) -> bool {
        match *self {
            Self::Window { textured, .. } => textured,
            Self::Water { .. } => true,
        }
    }
}

fn model_of<'w>(world: &'w WorldModel, entity: &BrushEntity) -> BrushResult<&'w BrushModel> {
    world
        .model(entity.model)
        .ok_or_else(|| BrushError::InvalidWorld(format!("entity references unknown model {}", entity.model.0)))
}

impl<B: GpuBackend> WorldRenderer<B> {
    /// 不透明和透明测试两个通道
    pub fn draw_brush_models(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        let solid = self.draw_brush_pass(entities, BrushPass::Solid)?;
        let alpha_test = self.draw_brush_pass(entities, BrushPass::AlphaTest)?;
        Ok(solid + alpha_test)
    }

    pub fn draw_sky_layers(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_brush_pass(entities, BrushPass::SkyLayers)
    }

    pub fn draw_sky_cubemap(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_brush_pass(entities, BrushPass::SkyCubemap)
    }

    pub fn draw_sky_stencil(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_brush_pass(entities, BrushPass::SkyStencil)
    }

    pub fn draw_show_tris(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_brush_pass(entities, BrushPass::ShowTris)
    }

    pub fn draw_water_opaque(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_water(entities, false)
    }

    pub fn draw_water_translucent(&mut self, entities: &[BrushEntity]) -> BrushResult<u32> {
        self.draw_water(entities, true)
    }

    /// 绘制一个通道，返回提交的间接命令数
    pub fn draw_brush_pass(&mut self, entities: &[BrushEntity], pass: BrushPass) -> BrushResult<u32> {
        let Some(first) = entities.first() else {
            return Ok(0);
        };
        let (begin, end) = pass.window();
        let state = if first.is_world() || first.alpha.is_opaque() {
            RenderState::OPAQUE
        } else {
            RenderState::ALPHA_BLEND
        };
        let program = pass.program(&self.programs, &self.config.world);
        let aux = pass.aux_texture(&self.config.world);
        let selection = Selection::Window {
            begin,
            end,
            textured: pass.textured(),
        };
        self.draw_selection(entities, selection, program, state, aux)
    }

    /// 绘制不透明或半透明液体
    pub fn draw_water(&mut self, entities: &[BrushEntity], translucent: bool) -> BrushResult<u32> {
        let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
        let program = self.programs.water_program(world, &self.config.world);
        let state = if translucent {
            RenderState::ALPHA_BLEND
        } else {
            RenderState::OPAQUE
        };
        let aux = Some(lightmap_or_grey(&self.config.world));
        self.draw_selection(entities, Selection::Water { translucent }, program, state, aux)
    }

    fn draw_selection(
        &mut self,
        entities: &[BrushEntity],
        selection: Selection,
        program: ProgramId,
        state: RenderState,
        aux: Option<AuxTexture>,
    ) -> BrushResult<u32> {
        let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
        let framecount = self.frame.current()?;
        let config = &self.config.world;
        let limits = &self.config.limits;

        let capacity = limits.instance_capacity();
        let entities = if entities.len() > capacity {
            tracing::warn!(
                target: "worldbrush",
                count = entities.len(),
                capacity,
                "Brush model instance overflow, truncating"
            );
            self.batch.record_truncation((entities.len() - capacity) as u32);
            &entities[..capacity]
        } else {
            entities
        };

        self.batch.instances.clear();
        for entity in entities {
            if selection.has_groups(entity, model_of(world, entity)?, config) {
                self.batch.instances.push(GpuInstance::from_entity(entity));
            }
        }
        if self.batch.instances.is_empty() {
            return Ok(0);
        }

        let draws_before = self.batch.stats().draws;
        let mut batcher = BModelBatcher {
            backend: &mut self.backend,
            allocator: &mut self.allocator,
            ctx: &mut self.batch,
            plan: &self.plan,
            config,
            limits,
            framecount,
        };
        batcher.reset(program);
        batcher.backend.set_state(state);
        if let Some(aux) = aux {
            batcher.backend.bind_aux_texture(aux);
        }
        batcher.backend.upload_instances(&batcher.ctx.instances)?;

        let max_instances = limits.max_bmodel_instances;
        let mut base_instance = 0u32;
        let mut i = 0;
        while i < entities.len() {
            let entity = &entities[i];
            i += 1;
            let model = model_of(world, entity)?;
            if !selection.has_groups(entity, model, config) {
                continue;
            }

            let mut num_instances = 1u32;
            while i < entities.len() && entities[i].model == entity.model && num_instances < max_instances {
                num_instances += selection.has_groups(&entities[i], model, config) as u32;
                i += 1;
            }

            let is_world = entity.is_world();
            let frame = if is_world { 0 } else { entity.frame };
            for j in selection.groups(model) {
                if !selection.includes(entity, model, j, config) {
                    continue;
                }
                let texture = selection.textured().then(|| model.texture_for_frame(j, frame));
                batcher.add_call(model.first_cmd + j as u32, base_instance, num_instances, texture, !is_world)?;
            }
            base_instance += num_instances;
        }

        batcher.flush()?;
        Ok(self.batch.stats().draws - draws_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LiquidAlpha, RendererConfig, SoftEmu};
    use crate::render::backend::{BackendCaps, BlendMode};
    use crate::render::frame::FrameParams;
    use crate::render::frustum::Frustum;
    use crate::render::gpu_driven::software::{BackendEvent, SoftwareBackend};
    use crate::render::instance_batch::CALL_FLAG_ZFIX;
    use crate::world::{
        Aabb, BrushTexture, BrushVertex, EntityAlpha, Leaf, LeafContents, ModelId, Surface, TextureHandle,
        VisBitmap,
    };
    use glam::{Vec3, Vec4};

    fn handle(slot: u32) -> TextureHandle {
        TextureHandle::new(slot, slot as u64)
    }

    fn programs() -> ShaderPrograms {
        let mut programs = ShaderPrograms::uniform(ProgramId(0));
        for (tier, row) in programs.world.iter_mut().enumerate() {
            for (shader, id) in row.iter_mut().enumerate() {
                *id = ProgramId(10 + (tier * 3 + shader) as u32);
            }
        }
        programs.water = [ProgramId(30), ProgramId(31)];
        programs.sky_layers = [ProgramId(40), ProgramId(41)];
        programs.sky_cubemap = [ProgramId(50), ProgramId(51)];
        programs.sky_stencil = ProgramId(60);
        programs
    }

    /// 世界：墙、天空、水各一个表面；模型1（门）：墙 + 水；模型2：只有天空
    fn sample_world() -> WorldModel {
        let leaf = Leaf {
            bounds: Aabb::new(Vec3::new(10.0, -100.0, -100.0), Vec3::new(200.0, 100.0, 100.0)),
            contents: LeafContents::Empty,
            first_mark_surface: 0,
            num_mark_surfaces: 3,
            static_entities: vec![],
        };
        let facing = Vec4::new(-1.0, 0.0, 0.0, -50.0);
        let mut water_surface = Surface::new(facing, 2, 8, 4);
        water_surface.flags.turbulent = true;
        WorldModel::new(
            vec![leaf],
            vec![0, 1, 2],
            vec![
                Surface::new(facing, 0, 0, 4),
                Surface::new(facing, 1, 4, 4),
                water_surface,
                Surface::new(facing, 0, 12, 3),
                Surface::new(facing, 1, 15, 4),
                Surface::new(facing, 0, 19, 3),
            ],
            vec![
                BrushModel::new(
                    vec![
                        BrushTexture::new(TexType::Default, Some(handle(10))),
                        BrushTexture::new(TexType::Sky, Some(handle(11))),
                        BrushTexture::new(TexType::Water, Some(handle(12))),
                    ],
                    0..3,
                ),
                BrushModel::new(
                    vec![
                        BrushTexture::new(TexType::Default, Some(handle(20))).with_alternate(2),
                        BrushTexture::new(TexType::Water, Some(handle(21))),
                        BrushTexture::new(TexType::Default, Some(handle(22))),
                    ],
                    3..5,
                ),
                BrushModel::new(vec![BrushTexture::new(TexType::Sky, Some(handle(30)))], 5..6),
            ],
            vec![BrushVertex::default(); 22],
        )
        .unwrap()
    }

    fn renderer_with(config: RendererConfig, bindless: bool) -> WorldRenderer<SoftwareBackend> {
        let backend = SoftwareBackend::with_caps(BackendCaps {
            bindless,
            storage_align: 256,
        });
        let mut renderer = WorldRenderer::new(backend, config, programs()).unwrap();
        renderer.load_world(sample_world()).unwrap();
        let frustum = Frustum::from_view_vectors(Vec3::ZERO, Vec3::X, Vec3::NEG_Y, Vec3::Z, 90.0, 90.0);
        renderer.begin_frame(FrameParams::new(frustum, Vec3::ZERO)).unwrap();
        renderer.mark_surfaces(&VisBitmap::all(1)).unwrap();
        renderer.backend_mut().take_events();
        renderer
    }

    fn renderer() -> WorldRenderer<SoftwareBackend> {
        renderer_with(RendererConfig::default(), true)
    }

    fn draws(events: &[BackendEvent]) -> Vec<(ProgramId, Vec<(u32, u32, u32)>)> {
        events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::DrawMulti { program, commands, .. } | BackendEvent::DrawBound { program, commands, .. } => {
                    Some((
                        *program,
                        commands
                            .iter()
                            .map(|c| (c.first_index, c.instance_count, c.first_instance))
                            .collect(),
                    ))
                }
                _ => None,
            })
            .collect()
    }

    fn multi_calls(events: &[BackendEvent]) -> Vec<crate::render::instance_batch::BindlessCall> {
        events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::DrawMulti { calls, .. } => Some(calls.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn door(x: f32) -> BrushEntity {
        BrushEntity::new(ModelId(1), Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_pass_windows_and_programs() {
        let config = WorldRenderConfig::default();
        let p = programs();
        assert_eq!(BrushPass::Solid.window(), (0, 1));
        assert_eq!(BrushPass::AlphaTest.window(), (1, 2));
        assert_eq!(BrushPass::SkyStencil.window(), (2, 3));
        assert_eq!(BrushPass::ShowTris.window(), (0, TexType::COUNT));
        assert_eq!(BrushPass::Solid.program(&p, &config), ProgramId(10));
        assert_eq!(BrushPass::AlphaTest.program(&p, &config), ProgramId(11));
        assert_eq!(BrushPass::SkyStencil.program(&p, &config), ProgramId(60));

        let coarse = WorldRenderConfig {
            softemu: SoftEmu::Coarse,
            supersample_textures: true,
            ..Default::default()
        };
        // softemu=3 -> 档位2
        assert_eq!(BrushPass::Solid.program(&p, &coarse), ProgramId(16));
        assert_eq!(BrushPass::SkyLayers.program(&p, &coarse), ProgramId(41));
        assert_eq!(BrushPass::SkyCubemap.program(&p, &coarse), ProgramId(51));
        // 线框覆盖总是档位0
        assert_eq!(BrushPass::ShowTris.program(&p, &coarse), ProgramId(10));

        let supersample = WorldRenderConfig {
            supersample_textures: true,
            ..Default::default()
        };
        assert_eq!(BrushPass::AlphaTest.program(&p, &supersample), ProgramId(20));
    }

    #[test]
    fn test_aux_binding() {
        let config = WorldRenderConfig::default();
        assert_eq!(BrushPass::Solid.aux_texture(&config), Some(AuxTexture::Lightmap));
        assert_eq!(BrushPass::SkyCubemap.aux_texture(&config), Some(AuxTexture::SkyCubemap));
        assert_eq!(BrushPass::SkyLayers.aux_texture(&config), None);
        let cheat = WorldRenderConfig {
            fullbright_cheat: true,
            ..Default::default()
        };
        assert_eq!(BrushPass::AlphaTest.aux_texture(&cheat), Some(AuxTexture::Grey));
    }

    #[test]
    fn test_solid_pass_batches_same_model_run() {
        let mut r = renderer();
        let entities = [BrushEntity::world(), door(1.0), door(2.0), door(3.0)];
        let issued = r.draw_brush_pass(&entities, BrushPass::Solid).unwrap();
        // 世界墙 + 门墙（替换纹理不属于任何表面，不单独成组）
        assert_eq!(issued, 2);

        let events = r.backend_mut().take_events();
        assert!(matches!(events[0], BackendEvent::SetState(s) if s == RenderState::OPAQUE));
        assert!(matches!(events[1], BackendEvent::BindAux(AuxTexture::Lightmap)));
        match &events[2] {
            BackendEvent::UploadInstances(instances) => assert_eq!(instances.len(), 4),
            other => panic!("unexpected event {:?}", other),
        }

        let draws = draws(&events);
        assert_eq!(draws.len(), 1);
        let (program, commands) = &draws[0];
        assert_eq!(*program, ProgramId(10));
        assert_eq!(commands.len(), 2);
        // 世界：实例0；三个门共享实例区间 [1, 4)
        assert_eq!((commands[0].1, commands[0].2), (1, 0));
        assert_eq!((commands[1].1, commands[1].2), (3, 1));

        let calls = multi_calls(&events);
        assert_eq!(calls[0].texture, 10);
        assert_eq!(calls[0].flags & CALL_FLAG_ZFIX, 0);
        assert_eq!(calls[1].flags & CALL_FLAG_ZFIX, CALL_FLAG_ZFIX);
        assert_eq!(calls[1].texture, 20);
    }

    #[test]
    fn test_entities_without_window_groups_skipped() {
        let mut r = renderer();
        let sky_only = BrushEntity::new(ModelId(2), Vec3::ZERO);
        let entities = [BrushEntity::world(), sky_only, door(1.0)];
        r.draw_brush_pass(&entities, BrushPass::Solid).unwrap();
        let events = r.backend_mut().take_events();
        let uploaded = events
            .iter()
            .find_map(|e| match e {
                BackendEvent::UploadInstances(i) => Some(i.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(uploaded, 2);
        let draws = draws(&events);
        // 门的实例为1（跳过的天空模型不占实例）
        assert_eq!(draws[0].1[1].2, 1);

        // 天空通道只有世界和天空模型
        assert_eq!(r.draw_sky_layers(&entities).unwrap(), 2);
        r.backend_mut().take_events();
        assert_eq!(r.draw_brush_pass(&[door(0.0)], BrushPass::SkyStencil).unwrap(), 0);
        assert!(r.backend().events().is_empty());
    }

    #[test]
    fn test_translucent_first_entity_blends() {
        let mut r = renderer();
        let ghost = door(0.0).with_alpha(EntityAlpha::encode(0.5));
        r.draw_brush_pass(&[ghost], BrushPass::Solid).unwrap();
        let events = r.backend_mut().take_events();
        assert!(matches!(
            events[0],
            BackendEvent::SetState(RenderState { blend: BlendMode::Alpha, depth_write: false })
        ));
    }

    #[test]
    fn test_frame_selects_alternate_texture() {
        let mut r = renderer();
        r.draw_brush_pass(&[door(0.0).with_frame(1)], BrushPass::Solid).unwrap();
        let calls = multi_calls(&r.backend_mut().take_events());
        assert_eq!(calls[0].texture, 22);
    }

    #[test]
    fn test_show_tris_uses_white() {
        let mut r = renderer();
        let issued = r.draw_show_tris(&[BrushEntity::world()]).unwrap();
        assert_eq!(issued, 3);
        let calls = multi_calls(&r.backend_mut().take_events());
        let white = r.backend().placeholders().white.bindless;
        assert!(calls.iter().all(|c| c.texture == white && c.fullbright == white));
    }

    #[test]
    fn test_run_split_at_instance_limit() {
        let mut config = RendererConfig::default();
        config.limits.max_bmodel_instances = 2;
        let mut r = renderer_with(config, false);
        let entities = [door(0.0), door(1.0), door(2.0)];
        r.draw_brush_pass(&entities, BrushPass::Solid).unwrap();
        let draws = draws(&r.backend_mut().take_events());
        let ranges: Vec<(u32, u32)> = draws[0].1.iter().map(|c| (c.1, c.2)).collect();
        assert_eq!(ranges, vec![(2, 0), (1, 2)]);
    }

    #[test]
    fn test_truncation_is_counted() {
        let mut config = RendererConfig::default();
        config.limits.max_visedicts = 2;
        let mut r = renderer_with(config, true);
        let entities = [BrushEntity::world(), door(0.0), door(1.0), door(2.0), door(3.0)];
        r.draw_brush_pass(&entities, BrushPass::Solid).unwrap();
        assert_eq!(r.stats().truncated_entities, 2);
        let events = r.backend_mut().take_events();
        let uploaded = events
            .iter()
            .find_map(|e| match e {
                BackendEvent::UploadInstances(i) => Some(i.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(uploaded, 3);
    }

    #[test]
    fn test_water_partition() {
        let mut config = RendererConfig::default();
        config.world.liquid_alpha = LiquidAlpha {
            water: 0.5,
            ..Default::default()
        };
        let mut r = renderer_with(config, true);
        let opaque_door = door(0.0).with_alpha(EntityAlpha::OPAQUE);
        let entities = [BrushEntity::world(), opaque_door];

        let translucent = r.draw_water_translucent(&entities).unwrap();
        let opaque = r.draw_water_opaque(&entities).unwrap();
        // 世界水面按默认0.5为半透明，门的实体透明度覆盖为不透明
        assert_eq!((translucent, opaque), (1, 1));

        let events = r.backend_mut().take_events();
        let draws = draws(&events);
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].0, ProgramId(30));
        let calls = multi_calls(&events);
        assert_eq!(calls[0].texture, 12);
        assert_eq!(calls[0].alpha, 0.5);
        assert_eq!(calls[1].texture, 21);
        assert!(matches!(events[0], BackendEvent::SetState(s) if s == RenderState::ALPHA_BLEND));
    }

    #[test]
    fn test_lit_water_program() {
        let mut r = renderer();
        r.world = r.world.take().map(|w| w.with_lit_water(true));
        let world = r.world().unwrap();
        let config = WorldRenderConfig::default();
        assert_eq!(r.programs().water_program(world, &config), ProgramId(12));
        let no_lit = WorldRenderConfig {
            lit_water: false,
            softemu: SoftEmu::Coarse,
            ..Default::default()
        };
        assert_eq!(r.programs().water_program(world, &no_lit), ProgramId(31));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let mut r = renderer();
        let bogus = BrushEntity::new(ModelId(9), Vec3::ZERO);
        assert!(matches!(
            r.draw_brush_pass(&[bogus], BrushPass::Solid),
            Err(BrushError::InvalidWorld(_))
        ));
    }

    #[test]
    fn test_requires_frame() {
        let mut r = renderer();
        r.end_frame().unwrap();
        assert!(matches!(
            r.draw_brush_models(&[BrushEntity::world()]),
            Err(BrushError::FrameNotStarted)
        ));
    }
}
