//! wgpu 后端
//!
//! 世界静态数据（顶点、索引、叶子、表面、命令模板）在 `load_world` 时上传。
//! 每帧的临时数据（帧常量、可见性、重映射、实例、调用参数）写入按帧重置的上传环形缓冲区。
//!
//! ## 绘制
//!
//! WGSL 没有绘制序号内建变量。设备支持 `MULTI_DRAW_INDIRECT` 且使用无绑定纹理时，
//! 收集阶段把调用序号编码进 `first_instance`（步长为实例容量），整批命令用一次
//! `multi_draw_indexed_indirect` 提交，着色器从 `instance_index` 解出调用序号和实例槽位。
//! 否则逐命令调用 `draw_indexed_indirect`，通过动态偏移的 uniform（group 3）传递调用序号。
//!
//! - 无绑定模式：group 2 是一个纹理数组，调用参数中的句柄为数组下标
//! - 绑定槽模式：group 2 是每个调用的主纹理和全亮纹理
//!
//! ## 同步
//!
//! wgpu 在计算通道和渲染通道之间自动跟踪资源依赖，`barrier` 只记录日志。

use super::command_generator::{GatherParams, GATHER_INDIRECT_SHADER};
use crate::config::BatchLimits;
use super::culling::{
    pack_indirect_template, pack_leaves, pack_surfaces, CLEAR_INDIRECT_SHADER, CULL_MARK_SHADER,
};
use super::indirect::{align_up, DrawIndexedIndirectArgs, GarbageQueue, IndirectDrawError};
use crate::error::{BrushError, BrushResult};
use crate::render::backend::{
    AuxTexture, BackendCaps, BarrierScope, BlendMode, ComputeDispatch, GpuBackend, PlaceholderTextures,
    ProgramId, RenderState,
};
use crate::render::instance_batch::{BindlessCall, BoundCall, GpuInstance};
use crate::world::{BrushVertex, TextureHandle, WorldModel};
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// 动态调用序号 uniform 的步长
const DRAW_INDEX_STRIDE: u64 = 256;

/// 后端创建参数
#[derive(Debug, Clone)]
pub struct WgpuBackendDesc {
    /// 单次刷新的最大调用数
    pub max_draws: u32,
    /// 无绑定纹理数组大小
    pub max_bindless_textures: u32,
    /// 计算着色器工作组大小
    pub workgroup_size: u32,
    /// 退役缓冲区的延迟销毁帧数
    pub frames_in_flight: u32,
    /// 上传环形缓冲区初始大小
    pub initial_upload_bytes: u64,
    /// 设备支持时使用无绑定纹理
    pub prefer_bindless: bool,
    /// 实例缓冲区容量（多重间接绘制时的调用序号步长）
    pub instance_stride: u32,
    /// 设备支持时整批使用多重间接绘制
    pub prefer_multi_draw: bool,
}

impl Default for WgpuBackendDesc {
    fn default() -> Self {
        Self {
            max_draws: 4096,
            max_bindless_textures: 1024,
            workgroup_size: 64,
            frames_in_flight: 3,
            initial_upload_bytes: 4 * 1024 * 1024,
            prefer_bindless: true,
            instance_stride: BatchLimits::default().instance_capacity() as u32,
            prefer_multi_draw: true,
        }
    }
}

impl WgpuBackendDesc {
    /// 按批处理配置填写容量
    pub fn from_limits(limits: &BatchLimits) -> Self {
        Self {
            max_draws: limits.max_bmodel_draws,
            instance_stride: limits.instance_capacity() as u32,
            workgroup_size: limits.workgroup_size,
            frames_in_flight: limits.frames_in_flight,
            ..Default::default()
        }
    }
}

/// 着色器程序描述
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub label: String,
    /// 完整的WGSL源码（通常以 [`WgpuBackend::shader_prelude`] 开头）
    pub source: String,
    pub vs_entry: String,
    pub fs_entry: String,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: Option<wgpu::TextureFormat>,
}

/// wgpu 命令缓冲区
#[derive(Debug)]
pub struct WgpuCommandBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl WgpuCommandBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// 视图常量
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewUniforms {
    view_proj: [[f32; 4]; 4],
    vieworg: [f32; 3],
    _pad: f32,
}

/// 按帧重置的上传缓冲区
struct UploadRing {
    buffer: wgpu::Buffer,
    size: u64,
    offset: u64,
    align: u64,
}

impl UploadRing {
    fn new(device: &wgpu::Device, size: u64, align: u64) -> Self {
        Self {
            buffer: Self::create(device, size),
            size,
            offset: 0,
            align,
        }
    }

    fn create(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Brush Upload Ring"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn reset(&mut self) {
        self.offset = 0;
    }

    /// 确保接下来的若干次写入都落在同一个缓冲区中
    fn ensure(
        &mut self,
        device: &wgpu::Device,
        sizes: &[u64],
        garbage: &mut GarbageQueue<wgpu::Buffer>,
        framecount: u32,
    ) {
        let needed: u64 = sizes.iter().map(|s| align_up((*s).max(4), self.align)).sum();
        if align_up(self.offset, self.align) + needed <= self.size {
            return;
        }
        let mut size = self.offset + needed;
        size += size >> 1;
        let old = std::mem::replace(&mut self.buffer, Self::create(device, size));
        garbage.push(old, framecount);
        tracing::debug!(target: "worldbrush", old_size = self.size, new_size = size, "Upload ring grown");
        self.size = size;
        self.offset = 0;
    }

    /// 写入数据，返回 `(offset, size)`
    fn push(&mut self, queue: &wgpu::Queue, data: &[u8]) -> (u64, u64) {
        let offset = align_up(self.offset, self.align);
        let size = (data.len() as u64).max(4);
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, offset, data);
        }
        self.offset = offset + size;
        (offset, size)
    }

    fn binding(&self, offset: u64, size: u64) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset,
            size: NonZeroU64::new(size),
        })
    }
}

/// 世界的GPU缓冲区
struct WorldBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    template: wgpu::Buffer,
    template_len: u32,
    leaves: wgpu::Buffer,
    mark_surfaces: wgpu::Buffer,
    surfaces: wgpu::Buffer,
}

/// 已注册的程序：不透明和半透明两条管线
struct Program {
    opaque: wgpu::RenderPipeline,
    alpha: wgpu::RenderPipeline,
}

struct ComputePipelines {
    clear: wgpu::ComputePipeline,
    clear_layout: wgpu::BindGroupLayout,
    cull_mark: wgpu::ComputePipeline,
    cull_mark_layout: wgpu::BindGroupLayout,
    gather: wgpu::ComputePipeline,
    gather_layout: wgpu::BindGroupLayout,
}

/// 渲染目标
struct Targets {
    color: Arc<wgpu::TextureView>,
    depth: Option<Arc<wgpu::TextureView>>,
}

/// wgpu 后端
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    desc: WgpuBackendDesc,
    caps: BackendCaps,

    compute: ComputePipelines,
    view_layout: wgpu::BindGroupLayout,
    batch_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    draw_index_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::PipelineLayout,

    view_buffer: wgpu::Buffer,
    view_bind_group: wgpu::BindGroup,
    draw_index_bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,

    textures: Vec<wgpu::TextureView>,
    placeholders: PlaceholderTextures,
    lightmap: TextureHandle,
    sky_cubemap: wgpu::TextureView,
    bindless_group: Option<wgpu::BindGroup>,
    bound_groups: HashMap<[u32; 2], wgpu::BindGroup>,

    programs: Vec<Program>,
    world: Option<WorldBuffers>,
    ring: UploadRing,
    instances: Option<(u64, u64)>,
    state: RenderState,
    aux: AuxTexture,
    targets: Option<Targets>,

    encoder: Option<wgpu::CommandEncoder>,
    framecount: u32,
    command_garbage: GarbageQueue<wgpu::Buffer>,
    upload_garbage: GarbageQueue<wgpu::Buffer>,
    /// 多重间接绘制时的调用序号步长
    call_stride: Option<u32>,
}

impl WgpuBackend {
    /// 创建无窗口的后端（阻塞请求适配器和设备）
    pub fn new(desc: WgpuBackendDesc) -> BrushResult<Self> {
        pollster::block_on(Self::new_async(desc))
    }

    pub async fn new_async(desc: WgpuBackendDesc) -> BrushResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BrushError::DeviceRequest("no suitable adapter".to_string()))?;

        let available = adapter.features();
        let bindless_features = wgpu::Features::TEXTURE_BINDING_ARRAY
            | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING;
        if !available.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            return Err(BrushError::DeviceRequest(
                "adapter lacks INDIRECT_FIRST_INSTANCE".to_string(),
            ));
        }
        let mut required_features = wgpu::Features::INDIRECT_FIRST_INSTANCE;
        if desc.prefer_bindless && available.contains(bindless_features) {
            required_features |= bindless_features;
        }
        if desc.prefer_multi_draw && available.contains(wgpu::Features::MULTI_DRAW_INDIRECT) {
            required_features |= wgpu::Features::MULTI_DRAW_INDIRECT;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Brush World Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| BrushError::DeviceRequest(e.to_string()))?;

        tracing::info!(
            target: "worldbrush",
            adapter = %adapter.get_info().name,
            bindless = required_features.contains(bindless_features),
            multi_draw = required_features.contains(wgpu::Features::MULTI_DRAW_INDIRECT),
            "wgpu device created"
        );
        Ok(Self::from_device(Arc::new(device), Arc::new(queue), desc))
    }

    /// 使用已有的设备创建
    pub fn from_device(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, desc: WgpuBackendDesc) -> Self {
        let features = device.features();
        let limits = device.limits();
        let bindless = desc.prefer_bindless
            && features.contains(
                wgpu::Features::TEXTURE_BINDING_ARRAY
                    | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING,
            );
        let caps = BackendCaps {
            bindless,
            storage_align: limits.min_storage_buffer_offset_alignment as u64,
        };
        let call_stride = multi_draw_call_stride(features, bindless, &desc);
        let ring_align = (limits.min_storage_buffer_offset_alignment)
            .max(limits.min_uniform_buffer_offset_alignment) as u64;

        let compute = create_compute_pipelines(&device, desc.workgroup_size);

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Brush View BGL"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT, false)],
        });
        let batch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Brush Batch BGL"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT, true),
                storage_entry(1, wgpu::ShaderStages::VERTEX_FRAGMENT, true),
                texture_entry(2, wgpu::TextureViewDimension::D2, None),
                texture_entry(3, wgpu::TextureViewDimension::Cube, None),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let texture_layout = if bindless {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Brush Bindless Textures BGL"),
                entries: &[texture_entry(
                    0,
                    wgpu::TextureViewDimension::D2,
                    NonZeroU32::new(desc.max_bindless_textures),
                )],
            })
        } else {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Brush Bound Textures BGL"),
                entries: &[
                    texture_entry(0, wgpu::TextureViewDimension::D2, None),
                    texture_entry(1, wgpu::TextureViewDimension::D2, None),
                ],
            })
        };
        let draw_index_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Brush Draw Index BGL"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT, true)],
        });
        let render_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Brush Render Pipeline Layout"),
            bind_group_layouts: &[&view_layout, &batch_layout, &texture_layout, &draw_index_layout],
            push_constant_ranges: &[],
        });

        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Brush View Uniforms"),
            size: std::mem::size_of::<ViewUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let view_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brush View BG"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: view_buffer.as_entire_binding(),
            }],
        });

        // 第 i 个槽位存放 i，按 DRAW_INDEX_STRIDE 对齐
        let mut draw_indices = vec![0u8; (desc.max_draws.max(1) as u64 * DRAW_INDEX_STRIDE) as usize];
        for i in 0..desc.max_draws.max(1) {
            let at = (i as u64 * DRAW_INDEX_STRIDE) as usize;
            draw_indices[at..at + 4].copy_from_slice(&i.to_le_bytes());
        }
        let draw_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Brush Draw Index"),
            contents: &draw_indices,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let draw_index_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brush Draw Index BG"),
            layout: &draw_index_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &draw_index_buffer,
                    offset: 0,
                    size: NonZeroU64::new(16),
                }),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Brush Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let mut textures = Vec::new();
        let mut solid = |rgba: [u8; 4]| -> TextureHandle {
            let view = create_solid_texture(&device, &queue, rgba, 1);
            textures.push(view);
            let slot = textures.len() as u32 - 1;
            TextureHandle::new(slot, slot as u64)
        };
        let placeholders = PlaceholderTextures {
            white: solid([255, 255, 255, 255]),
            grey: solid([127, 127, 127, 255]),
            black: solid([0, 0, 0, 255]),
        };
        let sky_cubemap = create_solid_texture(&device, &queue, [255, 255, 255, 255], 6);

        let ring = UploadRing::new(&device, desc.initial_upload_bytes, ring_align);
        let frames = desc.frames_in_flight;

        Self {
            compute,
            view_layout,
            batch_layout,
            texture_layout,
            draw_index_layout,
            render_layout,
            view_buffer,
            view_bind_group,
            draw_index_bind_group,
            sampler,
            lightmap: placeholders.white,
            textures,
            placeholders,
            sky_cubemap,
            bindless_group: None,
            bound_groups: HashMap::new(),
            programs: Vec::new(),
            world: None,
            ring,
            instances: None,
            state: RenderState::OPAQUE,
            aux: AuxTexture::Lightmap,
            targets: None,
            encoder: None,
            framecount: 0,
            command_garbage: GarbageQueue::new(frames),
            upload_garbage: GarbageQueue::new(frames),
            call_stride,
            caps,
            desc,
            device,
            queue,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// 世界着色器需要的绑定声明和辅助函数
    pub fn shader_prelude(&self) -> String {
        shader_prelude(self.caps.bindless, self.desc.max_bindless_textures, self.call_stride)
    }

    /// 是否整批使用多重间接绘制
    pub fn uses_multi_draw(&self) -> bool {
        self.call_stride.is_some()
    }

    /// 注册纹理，返回可用于 [`BrushTexture`](crate::world::BrushTexture) 的句柄
    pub fn register_texture(&mut self, view: wgpu::TextureView) -> BrushResult<TextureHandle> {
        let slot = self.textures.len() as u32;
        if self.caps.bindless && slot >= self.desc.max_bindless_textures {
            return Err(BrushError::UnknownTexture(slot));
        }
        self.textures.push(view);
        self.bindless_group = None;
        Ok(TextureHandle::new(slot, slot as u64))
    }

    /// 设置光照贴图
    pub fn set_lightmap(&mut self, lightmap: TextureHandle) {
        self.lightmap = lightmap;
    }

    /// 设置天空盒立方体贴图
    pub fn set_sky_cubemap(&mut self, view: wgpu::TextureView) {
        self.sky_cubemap = view;
    }

    /// 设置渲染目标（内容保留，以 `LoadOp::Load` 绘制）
    pub fn set_targets(&mut self, color: Arc<wgpu::TextureView>, depth: Option<Arc<wgpu::TextureView>>) {
        self.targets = Some(Targets { color, depth });
    }

    /// 更新视图矩阵
    pub fn set_view(&mut self, view_proj: Mat4, vieworg: Vec3) {
        let uniforms = ViewUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            vieworg: vieworg.to_array(),
            _pad: 0.0,
        };
        self.queue.write_buffer(&self.view_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    /// 注册着色器程序（创建不透明和半透明两条管线）
    pub fn register_program(&mut self, desc: &ProgramDesc) -> ProgramId {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });
        let program = Program {
            opaque: self.create_render_pipeline(desc, &module, RenderState::OPAQUE),
            alpha: self.create_render_pipeline(desc, &module, RenderState::ALPHA_BLEND),
        };
        self.programs.push(program);
        ProgramId(self.programs.len() as u32 - 1)
    }

    fn create_render_pipeline(
        &self,
        desc: &ProgramDesc,
        module: &wgpu::ShaderModule,
        state: RenderState,
    ) -> wgpu::RenderPipeline {
        let blend = match state.blend {
            BlendMode::Opaque => None,
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        };
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&desc.label),
            layout: Some(&self.render_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: &desc.vs_entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<BrushVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                        wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x4 },
                        wgpu::VertexAttribute { offset: 28, shader_location: 2, format: wgpu::VertexFormat::Float32 },
                        wgpu::VertexAttribute { offset: 32, shader_location: 3, format: wgpu::VertexFormat::Uint8x4 },
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: &desc.fs_entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: desc.color_format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Cw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: desc.depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: state.depth_write,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn texture_view(&self, handle: TextureHandle) -> BrushResult<&wgpu::TextureView> {
        self.textures
            .get(handle.slot as usize)
            .ok_or(BrushError::UnknownTexture(handle.slot))
    }

    fn ensure_bindless_group(&mut self) {
        if self.bindless_group.is_some() {
            return;
        }
        let white = &self.textures[self.placeholders.white.slot as usize];
        let views: Vec<&wgpu::TextureView> = (0..self.desc.max_bindless_textures as usize)
            .map(|i| self.textures.get(i).unwrap_or(white))
            .collect();
        self.bindless_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brush Bindless Textures BG"),
            layout: &self.texture_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureViewArray(&views),
            }],
        }));
    }

    fn ensure_bound_group(&mut self, pair: [TextureHandle; 2]) -> BrushResult<()> {
        let key = [pair[0].slot, pair[1].slot];
        if self.bound_groups.contains_key(&key) {
            return Ok(());
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brush Bound Textures BG"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(self.texture_view(pair[0])?),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(self.texture_view(pair[1])?),
                },
            ],
        });
        self.bound_groups.insert(key, group);
        Ok(())
    }

    /// 实例和调用参数的绑定组
    fn batch_bind_group(&self, calls: (u64, u64)) -> BrushResult<wgpu::BindGroup> {
        let (inst_offset, inst_size) = self.instances.ok_or(BrushError::InvalidWorld(
            "instances not uploaded".to_string(),
        ))?;
        let aux_2d = match self.aux {
            AuxTexture::Grey => self.texture_view(self.placeholders.grey)?,
            AuxTexture::Lightmap | AuxTexture::SkyCubemap => self.texture_view(self.lightmap)?,
        };
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brush Batch BG"),
            layout: &self.batch_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.ring.binding(inst_offset, inst_size),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.ring.binding(calls.0, calls.1),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(aux_2d),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&self.sky_cubemap),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }))
    }

    /// 提交间接绘制：多重间接绘制一次提交整批，否则逐命令提交
    fn submit_draws(
        &mut self,
        program: ProgramId,
        call_bytes: &[u8],
        texture_groups: Option<&[[u32; 2]]>,
        commands: &WgpuCommandBuffer,
        offset: u64,
        count: u32,
    ) -> BrushResult<()> {
        if count > self.desc.max_draws {
            return Err(IndirectDrawError::InsufficientCapacity {
                required: count as u64,
                available: self.desc.max_draws as u64,
            }
            .into());
        }
        if offset + count as u64 * DrawIndexedIndirectArgs::SIZE > commands.size {
            return Err(IndirectDrawError::InsufficientCapacity {
                required: offset + count as u64 * DrawIndexedIndirectArgs::SIZE,
                available: commands.size,
            }
            .into());
        }

        self.ring.ensure(&self.device, &[call_bytes.len() as u64], &mut self.upload_garbage, self.framecount);
        let calls = self.ring.push(&self.queue, call_bytes);
        let batch_group = self.batch_bind_group(calls)?;

        let program = self
            .programs
            .get(program.0 as usize)
            .ok_or(BrushError::UnknownProgram(program.0))?;
        let pipeline = match self.state.blend {
            BlendMode::Opaque => &program.opaque,
            BlendMode::Alpha => &program.alpha,
        };
        let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
        let targets = self.targets.as_ref().ok_or(BrushError::MissingTargets)?;

        let texture_groups: Vec<&wgpu::BindGroup> = match texture_groups {
            Some(keys) => keys
                .iter()
                .map(|k| self.bound_groups.get(k).ok_or(BrushError::UnknownTexture(k[0])))
                .collect::<BrushResult<_>>()?,
            None => vec![self.bindless_group.as_ref().ok_or(BrushError::UnknownTexture(0))?],
        };

        let encoder = self.encoder.as_mut().ok_or(BrushError::FrameNotStarted)?;
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Brush Models"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: targets.depth.as_ref().map(|depth| {
                wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, &self.view_bind_group, &[]);
        rpass.set_bind_group(1, &batch_group, &[]);
        rpass.set_vertex_buffer(0, world.vertices.slice(..));
        rpass.set_index_buffer(world.indices.slice(..), wgpu::IndexFormat::Uint32);
        if let (Some(_), [textures]) = (self.call_stride, texture_groups.as_slice()) {
            rpass.set_bind_group(2, textures, &[]);
            rpass.set_bind_group(3, &self.draw_index_bind_group, &[0]);
            rpass.multi_draw_indexed_indirect(&commands.buffer, offset, count);
            return Ok(());
        }

        if texture_groups.len() == 1 && count > 1 {
            rpass.set_bind_group(2, texture_groups[0], &[]);
        }
        for i in 0..count {
            if texture_groups.len() > 1 || count == 1 {
                rpass.set_bind_group(2, texture_groups[(i as usize).min(texture_groups.len() - 1)], &[]);
            }
            rpass.set_bind_group(3, &self.draw_index_bind_group, &[(i as u64 * DRAW_INDEX_STRIDE) as u32]);
            rpass.draw_indexed_indirect(&commands.buffer, offset + i as u64 * DrawIndexedIndirectArgs::SIZE);
        }
        Ok(())
    }

    fn storage_binding(buffer: &wgpu::Buffer, offset: u64, size: u64) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer,
            offset,
            size: NonZeroU64::new(size),
        })
    }
}

impl GpuBackend for WgpuBackend {
    type CommandBuffer = WgpuCommandBuffer;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn capabilities(&self) -> BackendCaps {
        self.caps
    }

    fn placeholders(&self) -> PlaceholderTextures {
        self.placeholders
    }

    fn load_world(&mut self, world: &WorldModel) -> BrushResult<()> {
        let template = pack_indirect_template(world);
        let init = |label: &str, contents: &[u8], usage: wgpu::BufferUsages| {
            // 空数组也需要合法的绑定大小
            let padded;
            let contents = if contents.is_empty() {
                padded = [0u8; 32];
                &padded[..]
            } else {
                contents
            };
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
        };
        let storage = wgpu::BufferUsages::STORAGE;

        let buffers = WorldBuffers {
            vertices: init("Brush Vertices", bytemuck::cast_slice(&world.vertices), wgpu::BufferUsages::VERTEX),
            indices: init(
                "Brush Indices",
                bytemuck::cast_slice(&world.indices),
                wgpu::BufferUsages::INDEX | storage,
            ),
            template: init(
                "Brush Indirect Template",
                bytemuck::cast_slice(&template),
                wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST | storage,
            ),
            template_len: template.len() as u32,
            leaves: init("Brush Leaves", bytemuck::cast_slice(&pack_leaves(world)), storage),
            mark_surfaces: init("Brush Mark Surfaces", bytemuck::cast_slice(&world.mark_surfaces), storage),
            surfaces: init("Brush Surfaces", bytemuck::cast_slice(&pack_surfaces(world)), storage),
        };
        self.world = Some(buffers);
        tracing::info!(
            target: "worldbrush",
            vertices = world.vertices.len(),
            indices = world.indices.len(),
            draw_groups = template.len(),
            "World uploaded"
        );
        Ok(())
    }

    fn begin_frame(&mut self, framecount: u32) -> BrushResult<()> {
        self.framecount = framecount;
        self.ring.reset();
        self.instances = None;
        self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Brush Frame Encoder"),
        }));
        Ok(())
    }

    fn end_frame(&mut self, framecount: u32) -> BrushResult<()> {
        let encoder = self.encoder.take().ok_or(BrushError::FrameNotStarted)?;
        self.queue.submit(Some(encoder.finish()));
        for buffer in self
            .command_garbage
            .collect(framecount)
            .into_iter()
            .chain(self.upload_garbage.collect(framecount))
        {
            buffer.destroy();
        }
        Ok(())
    }

    fn create_command_buffer(&mut self, size: u64) -> Result<WgpuCommandBuffer, IndirectDrawError> {
        let max = self.device.limits().max_buffer_size;
        if size > max {
            return Err(IndirectDrawError::BufferCreationFailed(format!(
                "{} bytes exceeds the device limit of {}",
                size, max
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Brush Indirect Commands"),
            size,
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        Ok(WgpuCommandBuffer { buffer, size })
    }

    fn retire_command_buffer(&mut self, buffer: WgpuCommandBuffer, framecount: u32) {
        self.command_garbage.push(buffer.buffer, framecount);
    }

    fn dispatch(&mut self, dispatch: ComputeDispatch<'_, WgpuCommandBuffer>) -> BrushResult<()> {
        let work_items = dispatch.work_items();
        if work_items == 0 {
            return Ok(());
        }
        let workgroups = work_items.div_ceil(self.desc.workgroup_size);

        match dispatch {
            ComputeDispatch::ClearIndirect { groups } => {
                let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
                let size = groups.min(world.template_len) as u64 * DrawIndexedIndirectArgs::SIZE;
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Clear Indirect BG"),
                    layout: &self.compute.clear_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: Self::storage_binding(&world.template, 0, size),
                    }],
                });
                let encoder = self.encoder.as_mut().ok_or(BrushError::FrameNotStarted)?;
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Clear Indirect Pass"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&self.compute.clear);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(workgroups, 1, 1);
            }
            ComputeDispatch::CullMark {
                uniforms,
                vis_words,
                ..
            } => {
                let vis_bytes: &[u8] = bytemuck::cast_slice(vis_words);
                let uniform_bytes = bytemuck::bytes_of(uniforms);
                self.ring.ensure(
                    &self.device,
                    &[uniform_bytes.len() as u64, vis_bytes.len() as u64],
                    &mut self.upload_garbage,
                    self.framecount,
                );
                let frame = self.ring.push(&self.queue, uniform_bytes);
                let vis = self.ring.push(&self.queue, vis_bytes);

                let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Cull Mark BG"),
                    layout: &self.compute.cull_mark_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: self.ring.binding(frame.0, frame.1) },
                        wgpu::BindGroupEntry { binding: 1, resource: world.template.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: world.indices.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: self.ring.binding(vis.0, vis.1) },
                        wgpu::BindGroupEntry { binding: 4, resource: world.leaves.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 5, resource: world.mark_surfaces.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 6, resource: world.surfaces.as_entire_binding() },
                    ],
                });
                let encoder = self.encoder.as_mut().ok_or(BrushError::FrameNotStarted)?;
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Cull Mark Pass"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&self.compute.cull_mark);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(workgroups, 1, 1);
            }
            ComputeDispatch::GatherIndirect {
                remap,
                max_instances,
                dst,
                dst_offset,
            } => {
                let params = GatherParams {
                    max_instances,
                    count: remap.len() as u32,
                    call_stride: self.call_stride.unwrap_or(0),
                    _pad: 0,
                };
                let remap_bytes: &[u8] = bytemuck::cast_slice(remap);
                self.ring.ensure(
                    &self.device,
                    &[std::mem::size_of::<GatherParams>() as u64, remap_bytes.len() as u64],
                    &mut self.upload_garbage,
                    self.framecount,
                );
                let params = self.ring.push(&self.queue, bytemuck::bytes_of(&params));
                let remap = self.ring.push(&self.queue, remap_bytes);

                let world = self.world.as_ref().ok_or(BrushError::WorldNotLoaded)?;
                let dst_size = work_items as u64 * DrawIndexedIndirectArgs::SIZE;
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Gather Indirect BG"),
                    layout: &self.compute.gather_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: self.ring.binding(params.0, params.1) },
                        wgpu::BindGroupEntry { binding: 1, resource: world.template.as_entire_binding() },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: Self::storage_binding(&dst.buffer, dst_offset, dst_size),
                        },
                        wgpu::BindGroupEntry { binding: 3, resource: self.ring.binding(remap.0, remap.1) },
                    ],
                });
                let encoder = self.encoder.as_mut().ok_or(BrushError::FrameNotStarted)?;
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Gather Indirect Pass"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&self.compute.gather);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(workgroups, 1, 1);
            }
        }
        Ok(())
    }

    fn barrier(&mut self, scope: BarrierScope) {
        tracing::trace!(target: "worldbrush", scope = scope.0, "Barrier");
    }

    fn set_state(&mut self, state: RenderState) {
        self.state = state;
    }

    fn bind_aux_texture(&mut self, aux: AuxTexture) {
        self.aux = aux;
    }

    fn upload_instances(&mut self, instances: &[GpuInstance]) -> BrushResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(instances);
        self.ring.ensure(&self.device, &[bytes.len() as u64], &mut self.upload_garbage, self.framecount);
        self.instances = Some(self.ring.push(&self.queue, bytes));
        Ok(())
    }

    fn draw_multi_indirect(
        &mut self,
        program: ProgramId,
        calls: &[BindlessCall],
        commands: &WgpuCommandBuffer,
        offset: u64,
        count: u32,
    ) -> BrushResult<()> {
        for call in calls {
            for handle in [call.texture, call.fullbright] {
                if handle as usize >= self.textures.len() {
                    return Err(BrushError::UnknownTexture(handle as u32));
                }
            }
        }
        self.ensure_bindless_group();
        self.submit_draws(program, bytemuck::cast_slice(calls), None, commands, offset, count)
    }

    fn draw_bound(
        &mut self,
        program: ProgramId,
        calls: &[BoundCall],
        textures: &[[TextureHandle; 2]],
        commands: &WgpuCommandBuffer,
        offset: u64,
    ) -> BrushResult<()> {
        let mut keys = Vec::with_capacity(textures.len());
        for pair in textures {
            self.ensure_bound_group(*pair)?;
            keys.push([pair[0].slot, pair[1].slot]);
        }
        self.submit_draws(
            program,
            bytemuck::cast_slice(calls),
            Some(&keys),
            commands,
            offset,
            calls.len() as u32,
        )
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
    count: Option<NonZeroU32>,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count,
    }
}

fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
    workgroup_size: u32,
) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let source = source.replace("WORKGROUP_SIZE", &workgroup_size.to_string());
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    });
    (pipeline, layout)
}

fn create_compute_pipelines(device: &wgpu::Device, workgroup_size: u32) -> ComputePipelines {
    let compute = wgpu::ShaderStages::COMPUTE;
    let (clear, clear_layout) = create_compute_pipeline(
        device,
        "Clear Indirect",
        CLEAR_INDIRECT_SHADER,
        "clear_indirect",
        &[storage_entry(0, compute, false)],
        workgroup_size,
    );
    let (cull_mark, cull_mark_layout) = create_compute_pipeline(
        device,
        "Cull Mark",
        CULL_MARK_SHADER,
        "cull_mark",
        &[
            uniform_entry(0, compute, false),
            storage_entry(1, compute, false),
            storage_entry(2, compute, false),
            storage_entry(3, compute, true),
            storage_entry(4, compute, true),
            storage_entry(5, compute, true),
            storage_entry(6, compute, false),
        ],
        workgroup_size,
    );
    let (gather, gather_layout) = create_compute_pipeline(
        device,
        "Gather Indirect",
        GATHER_INDIRECT_SHADER,
        "gather_indirect",
        &[
            uniform_entry(0, compute, false),
            storage_entry(1, compute, true),
            storage_entry(2, compute, false),
            storage_entry(3, compute, true),
        ],
        workgroup_size,
    );
    ComputePipelines {
        clear,
        clear_layout,
        cull_mark,
        cull_mark_layout,
        gather,
        gather_layout,
    }
}

/// 创建单色纹理（`layers == 6` 时为立方体贴图）
fn create_solid_texture(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4], layers: u32) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: 1,
        height: 1,
        depth_or_array_layers: layers,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Brush Solid Texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let data: Vec<u8> = std::iter::repeat(rgba).take(layers as usize).flatten().collect();
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        size,
    );
    let dimension = if layers == 6 {
        wgpu::TextureViewDimension::Cube
    } else {
        wgpu::TextureViewDimension::D2
    };
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(dimension),
        ..Default::default()
    })
}

/// 多重间接绘制时编码进 `first_instance` 的调用序号步长
///
/// 需要无绑定纹理（整批共用一个纹理组）和 `MULTI_DRAW_INDIRECT`，
/// 且 `max_draws * instance_stride` 不超出 `u32`。
pub fn multi_draw_call_stride(features: wgpu::Features, bindless: bool, desc: &WgpuBackendDesc) -> Option<u32> {
    if !(desc.prefer_multi_draw && bindless && features.contains(wgpu::Features::MULTI_DRAW_INDIRECT)) {
        return None;
    }
    let stride = desc.instance_stride.max(1);
    desc.max_draws.checked_mul(stride).map(|_| stride)
}

/// 世界着色器绑定声明
///
/// 提供 `instances`、`calls`、`draw_index()`、`instance_slot()`、`instance_position()`、
/// `call_texture()` 和 `call_fullbright()`。`call_stride` 非空时调用序号从实例序号中解出。
pub fn shader_prelude(bindless: bool, max_textures: u32, call_stride: Option<u32>) -> String {
    let mut src = String::from(
        r#"
struct ViewUniforms {
    view_proj: mat4x4<f32>,
    vieworg: vec3<f32>,
    _pad: f32,
};

struct Instance {
    world: array<vec4<f32>, 3>,
    alpha: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct DrawIndex {
    index: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<uniform> view: ViewUniforms;
@group(1) @binding(0) var<storage, read> instances: array<Instance>;
@group(1) @binding(2) var aux_tex: texture_2d<f32>;
@group(1) @binding(3) var aux_cube: texture_cube<f32>;
@group(1) @binding(4) var samp: sampler;
@group(3) @binding(0) var<uniform> draw: DrawIndex;

fn instance_position(instance: u32, pos: vec3<f32>) -> vec3<f32> {
    let p = vec4<f32>(pos, 1.0);
    let m = instances[instance].world;
    return vec3<f32>(dot(m[0], p), dot(m[1], p), dot(m[2], p));
}
"#,
    );

    match call_stride {
        Some(stride) => src.push_str(&format!(
            r#"
fn draw_index(instance: u32) -> u32 {{
    return instance / {stride}u;
}}

fn instance_slot(instance: u32) -> u32 {{
    return instance % {stride}u;
}}
"#
        )),
        None => src.push_str(
            r#"
fn draw_index(instance: u32) -> u32 {
    return draw.index;
}

fn instance_slot(instance: u32) -> u32 {
    return instance;
}
"#,
        ),
    }

    if bindless {
        src.push_str(&format!(
            r#"
struct Call {{
    flags: u32,
    alpha: f32,
    tex: vec2<u32>,
    fullbright_tex: vec2<u32>,
}};

@group(1) @binding(1) var<storage, read> calls: array<Call>;
@group(2) @binding(0) var textures: binding_array<texture_2d<f32>, {max_textures}>;

fn call_texture(call: u32, uv: vec2<f32>) -> vec4<f32> {{
    return textureSample(textures[calls[call].tex.x], samp, uv);
}}

fn call_fullbright(call: u32, uv: vec2<f32>) -> vec4<f32> {{
    return textureSample(textures[calls[call].fullbright_tex.x], samp, uv);
}}
"#
        ));
    } else {
        src.push_str(
            r#"
struct Call {
    flags: u32,
    alpha: f32,
    base_instance: i32,
    _pad: u32,
};

@group(1) @binding(1) var<storage, read> calls: array<Call>;
@group(2) @binding(0) var tex_main: texture_2d<f32>;
@group(2) @binding(1) var tex_fullbright: texture_2d<f32>;

fn call_texture(call: u32, uv: vec2<f32>) -> vec4<f32> {
    return textureSample(tex_main, samp, uv);
}

fn call_fullbright(call: u32, uv: vec2<f32>) -> vec4<f32> {
    return textureSample(tex_fullbright, samp, uv);
}
"#,
        );
    }
    src
}

/// 默认世界着色器（接在 [`shader_prelude`] 之后）
pub const WORLD_SHADER_BODY: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) lm_uv: vec2<f32>,
    @location(2) @interpolate(flat) alpha: f32,
    @location(3) @interpolate(flat) call: u32,
};

@vertex
fn vs_main(
    @location(0) pos: vec3<f32>,
    @location(1) st: vec4<f32>,
    @location(2) lm_offset: f32,
    @location(3) styles: vec4<u32>,
    @builtin(instance_index) instance: u32,
) -> VsOut {
    let slot = instance_slot(instance);
    var out: VsOut;
    out.call = draw_index(instance);
    out.pos = view.view_proj * vec4<f32>(instance_position(slot, pos), 1.0);
    out.uv = st.xy;
    out.lm_uv = st.zw;
    let inst_alpha = instances[slot].alpha;
    out.alpha = select(calls[out.call].alpha, inst_alpha, inst_alpha >= 0.0);
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let call = calls[in.call];
    var color = call_texture(in.call, in.uv);
    // 全亮作弊时辅助纹理为灰色，乘2后不改变颜色
    color = vec4<f32>(color.rgb * textureSample(aux_tex, samp, in.lm_uv).rgb * 2.0, color.a);
    if ((call.flags & 2u) != 0u) {
        color = vec4<f32>(color.rgb + call_fullbright(in.call, in.uv).rgb, color.a);
    }
    return vec4<f32>(color.rgb, color.a * in.alpha);
}
"#;
