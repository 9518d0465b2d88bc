//! Renderer crate root.
//!
//! This crate turns per-frame VDP1/VDP2 snapshots into a composed
//! frame. The public API is `RenderBackend`; internal modules are wired
//! around state compartments used by the frame pipeline:
//! - `init`: constructs GPU resources and initial state.
//! - `frame`: per-frame orchestration (queueing draws, flushing levels,
//!   running the composite pass).
//! - `geometry`/`batch`/`vdp1`: quad construction, program batching and
//!   sprite texture decode feeding the VDP1 framebuffer.
//! - `windows`/`line_state`/`composite`: per-line tables and the final
//!   composite pass, with CPU reference semantics beside the WGSL.
//! - `lifecycle`/`workers`: framebuffer pair, readback memoization,
//!   resolution-sized resources, decode worker pool.

use std::fmt;

use atlas::{Atlas, AtlasCreateError, PlacementCache};
use vdp_protocol::RendererConfig;

pub mod batch;
pub mod composite;
pub mod geometry;
pub mod line_state;
pub mod vdp1;
pub mod vdp2;
pub mod windows;
pub mod workers;

mod frame;
mod init;
mod lifecycle;

#[cfg(test)]
mod tests;

pub use frame::FrameInput;
pub use lifecycle::{FramebufferPair, LayerTarget, ManualFramebuffer, ResolutionResources};
pub use workers::{DecodePool, DecodedLayer};

/// Interleaved vertex fed to the draw pipelines. Texcoords are in atlas
/// texel units and premultiplied by `q`; the fragment stage divides by
/// the interpolated `q` to recover projective sampling.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
    pub q: f32,
    pub gouraud: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Vertex>(), 36);

/// Uniform block of the quad draw pipelines; mirrored in `draw.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    /// x scale, y scale, x offset, y offset (pixels to clip space).
    pub transform: [f32; 4],
    /// gouraud enable, half-luminance, reserved, reserved.
    pub mode: [u32; 4],
}

#[derive(Debug)]
pub enum RendererCreateError {
    Atlas(AtlasCreateError),
    ZeroResolution,
}

impl fmt::Display for RendererCreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererCreateError::Atlas(e) => write!(f, "atlas creation failed: {e}"),
            RendererCreateError::ZeroResolution => {
                write!(f, "renderer requires a non-zero output resolution")
            }
        }
    }
}

impl std::error::Error for RendererCreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RendererCreateError::Atlas(e) => Some(e),
            RendererCreateError::ZeroResolution => None,
        }
    }
}

impl From<AtlasCreateError> for RendererCreateError {
    fn from(e: AtlasCreateError) -> Self {
        RendererCreateError::Atlas(e)
    }
}

pub(crate) struct GpuState {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub draw_pipeline: wgpu::RenderPipeline,
    pub draw_pipeline_half_transparent: wgpu::RenderPipeline,
    pub composite_pipeline: wgpu::RenderPipeline,
    pub draw_bind_layout: wgpu::BindGroupLayout,
    pub composite_bind_layout: wgpu::BindGroupLayout,
    pub draw_uniform_buffer: wgpu::Buffer,
    pub composite_uniform_buffer: wgpu::Buffer,
    pub vertex_buffer: wgpu::Buffer,
    pub vertex_capacity: usize,
    pub sampler_nearest: wgpu::Sampler,
    pub sampler_linear: wgpu::Sampler,
    pub resolution: ResolutionResources,
}

pub(crate) struct FrameState {
    pub batches: batch::BatchSystem,
    pub windows: windows::WindowTables,
    pub line_diff: line_state::LineStateDiff,
    pub manual_fb: ManualFramebuffer,
    pub composite_uniforms: composite::CompositeUniforms,
    pub user_clip_rect: batch::ClipRect,
    pub system_clip: batch::ClipRect,
}

pub(crate) struct CacheState {
    pub sprite_atlas: Atlas,
    pub sprite_cache: PlacementCache,
    pub cell_atlas: Atlas,
    pub cell_cache: PlacementCache,
}

pub(crate) struct ConfigState {
    pub config: RendererConfig,
    /// CPU tessellation selected (GPU tessellation is not available on
    /// this backend and degrades here at init).
    pub tessellate: bool,
    pub filter_linear: bool,
}

pub(crate) struct WorkerState {
    pub pool: DecodePool,
}

/// The rendering backend. All GPU calls happen on the thread that owns
/// this value (the submission thread); decode workers only ever produce
/// CPU pixel buffers.
pub struct RenderBackend {
    pub(crate) gpu: GpuState,
    pub(crate) frame: FrameState,
    pub(crate) cache: CacheState,
    pub(crate) cfg: ConfigState,
    pub(crate) workers: WorkerState,
}

impl RenderBackend {
    pub fn config(&self) -> &RendererConfig {
        &self.cfg.config
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.gpu.resolution.width, self.gpu.resolution.height)
    }
}
