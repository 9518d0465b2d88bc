//! Backend initialization and GPU resource construction.
//!
//! Owns `RenderBackend::new` and the helpers that allocate pipelines,
//! bind group layouts and the initial atlases. Capability fallbacks are
//! chosen here, once, never mid-frame.

use log::info;

use atlas::{Atlas, PlacementCache};
use vdp_protocol::{FilterMode, PolygonMode, RendererConfig, ResolutionTarget, UpscaleMode};

use crate::lifecycle::ResolutionResources;
use crate::{
    CacheState, ConfigState, DrawUniforms, FrameState, GpuState, RenderBackend,
    RendererCreateError, Vertex, WorkerState, batch, composite, line_state, windows, workers,
};

/// Initial VDP2 cell atlas edge.
const CELL_ATLAS_SIZE: u32 = 512;
/// Initial VDP1 sprite atlas edge.
const SPRITE_ATLAS_SIZE: u32 = 1024;

const INITIAL_VERTEX_CAPACITY: usize = 64 * batch::QUAD_FOOTPRINT;

/// Output pixels per native pixel for each resolution target.
pub(crate) fn resolution_scale(target: ResolutionTarget) -> u32 {
    match target {
        ResolutionTarget::Native | ResolutionTarget::WindowNative => 1,
        ResolutionTarget::P480 => 2,
        ResolutionTarget::P720 => 3,
        ResolutionTarget::P1080 => 4,
    }
}

/// Map requested options onto what this backend supports, logging each
/// substitution once.
pub(crate) fn reconcile_config(requested: RendererConfig) -> ConfigState {
    let mut config = requested;
    let tessellate = match requested.polygon {
        PolygonMode::CpuTessellation => true,
        PolygonMode::GpuTessellation => {
            info!("gpu tessellation unavailable; distorted quads use cpu tessellation");
            config.polygon = PolygonMode::CpuTessellation;
            true
        }
        PolygonMode::PerspectiveCorrection => false,
    };
    let filter_linear = match requested.filter {
        FilterMode::None => false,
        FilterMode::Bilinear => true,
        other => {
            info!("filter mode {other:?} unavailable; using bilinear");
            config.filter = FilterMode::Bilinear;
            true
        }
    };
    if requested.upscale != UpscaleMode::None {
        info!("upscale mode {:?} unavailable; rendering native", requested.upscale);
        config.upscale = UpscaleMode::None;
    }
    ConfigState {
        config,
        tessellate,
        filter_linear,
    }
}

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32,
        3 => Float32x4,
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

fn create_draw_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    label: &str,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[vertex_layout()],
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Unorm,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview_mask: None,
        cache: None,
    })
}

/// Average new color with the destination, keeping the destination's
/// meta byte out of the mix (alpha writes replace).
fn half_transparent_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::Constant,
            dst_factor: wgpu::BlendFactor::OneMinusConstant,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent::REPLACE,
    }
}

impl RenderBackend {
    /// Build the backend for a native resolution of `width` x `height`
    /// emulated pixels. Fatal resource failures surface here; the
    /// backend never attempts partial operation.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: RendererConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, RendererCreateError> {
        if width == 0 || height == 0 {
            return Err(RendererCreateError::ZeroResolution);
        }
        let cfg = reconcile_config(config);
        let scale = resolution_scale(cfg.config.resolution);

        let sprite_atlas = Atlas::new(
            &device,
            "vdp1 sprite atlas",
            SPRITE_ATLAS_SIZE,
            SPRITE_ATLAS_SIZE,
        )?;
        let cell_atlas = Atlas::new(&device, "vdp2 cell atlas", CELL_ATLAS_SIZE, CELL_ATLAS_SIZE)?;

        let draw_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("renderer.draw_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let composite_bind_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("renderer.composite_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2Array,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Uint,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Uint,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                ],
            });

        let draw_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("renderer.draw_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("draw.wgsl").into()),
        });
        let composite_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("renderer.composite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("composite.wgsl").into()),
        });

        let draw_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("renderer.draw_pipeline_layout"),
                bind_group_layouts: &[&draw_bind_layout],
                immediate_size: 0,
            });
        let draw_pipeline = create_draw_pipeline(
            &device,
            &draw_pipeline_layout,
            &draw_module,
            "renderer.draw",
            None,
        );
        let draw_pipeline_half_transparent = create_draw_pipeline(
            &device,
            &draw_pipeline_layout,
            &draw_module,
            "renderer.draw_half_transparent",
            Some(half_transparent_blend()),
        );

        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("renderer.composite_pipeline_layout"),
                bind_group_layouts: &[&composite_bind_layout],
                immediate_size: 0,
            });
        let composite_pipeline =
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("renderer.composite"),
                layout: Some(&composite_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &composite_module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &composite_module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview_mask: None,
                cache: None,
            });

        let draw_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.draw_uniforms"),
            size: std::mem::size_of::<DrawUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let composite_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.composite_uniforms"),
            size: std::mem::size_of::<composite::CompositeUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.vertices"),
            size: (INITIAL_VERTEX_CAPACITY * std::mem::size_of::<Vertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("renderer.sampler_nearest"),
            ..Default::default()
        });
        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("renderer.sampler_linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let resolution = ResolutionResources::new(&device, width * scale, height * scale);

        Ok(Self {
            gpu: GpuState {
                device,
                queue,
                draw_pipeline,
                draw_pipeline_half_transparent,
                composite_pipeline,
                draw_bind_layout,
                composite_bind_layout,
                draw_uniform_buffer,
                composite_uniform_buffer,
                vertex_buffer,
                vertex_capacity: INITIAL_VERTEX_CAPACITY,
                sampler_nearest,
                sampler_linear,
                resolution,
            },
            frame: FrameState {
                batches: batch::BatchSystem::new(),
                windows: windows::WindowTables::new(),
                line_diff: line_state::LineStateDiff::new(),
                manual_fb: crate::ManualFramebuffer::default(),
                composite_uniforms: composite::CompositeUniforms {
                    layers: [composite::LayerParams::default(); composite::LAYER_SLOTS],
                    screen: [width, height, 0, 0],
                },
                user_clip_rect: batch::ClipRect::new(0, 0, 0, 0),
                system_clip: batch::ClipRect::new(0, 0, 0, 0),
            },
            cache: CacheState {
                sprite_atlas,
                sprite_cache: PlacementCache::new(),
                cell_atlas,
                cell_cache: PlacementCache::new(),
            },
            cfg,
            workers: WorkerState {
                pool: workers::DecodePool::new(
                    std::thread::available_parallelism()
                        .map(|n| (n.get() / 2).max(1))
                        .unwrap_or(2),
                ),
            },
        })
    }
}
