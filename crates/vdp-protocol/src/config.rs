//! Renderer configuration injected at init and on change.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    None,
    Bilinear,
    Bicubic,
    DeinterlaceBob,
    DeinterlaceWeave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleMode {
    None,
    Hq2x,
    Xbrz4x,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    PerspectiveCorrection,
    CpuTessellation,
    GpuTessellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTarget {
    Native,
    P480,
    P720,
    P1080,
    WindowNative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectMode {
    Native,
    Stretch,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererConfig {
    pub filter: FilterMode,
    pub upscale: UpscaleMode,
    pub polygon: PolygonMode,
    pub resolution: ResolutionTarget,
    pub aspect: AspectMode,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            filter: FilterMode::None,
            upscale: UpscaleMode::None,
            polygon: PolygonMode::PerspectiveCorrection,
            resolution: ResolutionTarget::Native,
            aspect: AspectMode::Native,
        }
    }
}

impl RendererConfig {
    /// True when switching to `next` invalidates every resolution-sized
    /// GPU resource (atlases excepted, they resize in place).
    pub fn requires_resource_rebuild(&self, next: &RendererConfig) -> bool {
        self.resolution != next.resolution || self.upscale != next.upscale
    }
}
