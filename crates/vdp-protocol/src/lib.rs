//! Shared data model for the rendering backend.
//!
//! Everything here is produced by the hardware-emulation layer and consumed
//! by the renderer crates as an immutable per-frame snapshot. No GPU types.

mod config;
mod memory;
mod pixel;
mod regs;
mod sprite;

pub use config::{
    AspectMode, FilterMode, PolygonMode, RendererConfig, ResolutionTarget, UpscaleMode,
};
pub use memory::{CramView, ColorRamMode, VramView};
pub use pixel::{
    META_COLOR_CALC, META_MESH, META_SHADOW, META_SPECIAL_FUNCTION, PixelMeta, pack_meta,
    priority_of, rgb555_to_rgba, rgb888_to_rgba,
};
pub use regs::{
    CellDepth, CoefficientMode, CoefficientSource, CoefficientTable, LineState, OverScreenMode,
    PlaneLayout,
    RotationMode, RotationParamRegs, RotationRegisters, RotationSource, ScreenLineStates,
    SpecialFunctionSelect, WindowArea, WindowControl, WindowOp, WindowRegisters, WindowSource,
};
pub use sprite::{
    BlendStep, ColorDepth, GouraudTable, SpriteCommand, SpriteKind, UserClipMode,
};

/// Logical screen planes, in compositor input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenId {
    Nbg0,
    Nbg1,
    Nbg2,
    Nbg3,
    Rbg0,
    Rbg1,
    Sprite,
}

impl ScreenId {
    pub const BACKGROUNDS: [ScreenId; 6] = [
        ScreenId::Nbg0,
        ScreenId::Nbg1,
        ScreenId::Nbg2,
        ScreenId::Nbg3,
        ScreenId::Rbg0,
        ScreenId::Rbg1,
    ];

    pub fn index(self) -> usize {
        match self {
            ScreenId::Nbg0 => 0,
            ScreenId::Nbg1 => 1,
            ScreenId::Nbg2 => 2,
            ScreenId::Nbg3 => 3,
            ScreenId::Rbg0 => 4,
            ScreenId::Rbg1 => 5,
            ScreenId::Sprite => 6,
        }
    }
}

/// Number of per-scanline slots carried by window tables and line states.
/// Sized for the tallest Saturn video mode (interlaced doubles stay below it).
pub const MAX_SCANLINES: usize = 512;
