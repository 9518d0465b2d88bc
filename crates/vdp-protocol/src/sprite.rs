//! VDP1 draw commands as handed over by the command-list walker.

use crate::ScreenId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteKind {
    NormalSprite,
    ScaledSprite,
    DistortedSprite,
    Polygon,
    Polyline,
    Line,
}

/// Texture color depth of a textured part (CMDPMOD bits 3..=5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorDepth {
    Bank4,
    Lookup4,
    Bank8x64,
    Bank8x128,
    Bank8x256,
    Rgb555,
}

impl ColorDepth {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            ColorDepth::Bank4 | ColorDepth::Lookup4 => 4,
            ColorDepth::Bank8x64 | ColorDepth::Bank8x128 | ColorDepth::Bank8x256 => 8,
            ColorDepth::Rgb555 => 16,
        }
    }
}

/// Color calculation step requested by CMDPMOD bits 0..=2, which doubles
/// as the batch-program identity on the VDP1 side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendStep {
    Replace,
    Shadow,
    HalfLuminance,
    HalfTransparent,
    Gouraud,
    GouraudHalfLuminance,
    GouraudHalfTransparent,
    Msb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserClipMode {
    Disabled,
    Inside,
    Outside,
}

/// Per-vertex Gouraud colors, already fetched from the shading table.
pub type GouraudTable = [u16; 4];

#[derive(Debug, Clone, Copy)]
pub struct SpriteCommand {
    pub kind: SpriteKind,
    /// Corner coordinates in framebuffer space, command order
    /// (top-left, top-right, bottom-right, bottom-left before flips).
    pub vertices: [[i32; 2]; 4],
    pub texture_addr: u32,
    pub width: u32,
    pub height: u32,
    pub color_depth: ColorDepth,
    pub color_bank: u16,
    /// Color lookup table address for `ColorDepth::Lookup4`.
    pub lookup_addr: u32,
    pub blend: BlendStep,
    pub gouraud: Option<GouraudTable>,
    /// Bit 0: horizontal flip, bit 1: vertical flip.
    pub flip: u8,
    pub transparent_pixel_enable: bool,
    pub msb_on: bool,
    pub mesh: bool,
    pub end_code_disable: bool,
    pub user_clip: UserClipMode,
    pub screen: ScreenId,
    pub priority: u8,
}

impl SpriteCommand {
    pub fn is_textured(&self) -> bool {
        matches!(
            self.kind,
            SpriteKind::NormalSprite | SpriteKind::ScaledSprite | SpriteKind::DistortedSprite
        )
    }
}
