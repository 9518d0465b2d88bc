//! Decoded VDP2 register snapshots.
//!
//! The hardware-emulation layer decodes the raw register file into these
//! structures once per change; the renderer treats them as immutable and
//! compares them by value to detect register-change runs.

use crate::{MAX_SCANLINES, ScreenId};

/// Dual-window combination policy (WCTLx bit 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOp {
    Or,
    And,
}

/// Which window a switched consumer (rotation parameter select) observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSource {
    pub index: u8,
    pub inside: bool,
}

/// One window's screen-space definition. `line_table` selects per-line
/// (start, end) pairs from VRAM instead of the static rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowArea {
    pub start_x: u16,
    pub end_x: u16,
    pub start_y: u16,
    pub end_y: u16,
    pub line_table: Option<u32>,
}

/// Per-layer window participation (decoded WCTLA..WCTLD fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowControl {
    pub w0_enable: bool,
    pub w0_inside: bool,
    pub w1_enable: bool,
    pub w1_inside: bool,
    pub op: WindowOp,
}

impl WindowControl {
    pub const DISABLED: WindowControl = WindowControl {
        w0_enable: false,
        w0_inside: true,
        w1_enable: false,
        w1_inside: true,
        op: WindowOp::Or,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRegisters {
    pub areas: [WindowArea; 2],
    /// Indexed by `ScreenId::index()`.
    pub control: [WindowControl; 7],
}

/// RPMD parameter-selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    ParameterA,
    ParameterB,
    CoefficientSwitch,
    WindowSwitch,
}

/// KTCTL coefficient data application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientMode {
    ScaleBoth,
    ScaleKx,
    ScaleKy,
    /// Reserved on hardware; entries are fetched for their validity and
    /// line-color bits but do not rescale anything.
    ViewpointX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientSource {
    Vram,
    Cram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientTable {
    pub base_addr: u32,
    /// False: 16-bit entries. True: 32-bit entries carrying a line-color
    /// index in bits 24..=30.
    pub long_entries: bool,
    pub source: CoefficientSource,
    pub mode: CoefficientMode,
    pub line_color: bool,
}

/// Cell/bitmap dot format (CHCTLx character color count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellDepth {
    Palette16,
    Palette256,
    Palette2048,
    Rgb555,
    Rgb888,
}

impl CellDepth {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            CellDepth::Palette16 => 4,
            CellDepth::Palette256 => 8,
            CellDepth::Palette2048 | CellDepth::Rgb555 => 16,
            CellDepth::Rgb888 => 32,
        }
    }
}

/// Behavior outside the 4096x4096 (tile) or bitmap-sized plane area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverScreenMode {
    Repeat,
    /// Substitute the OVPNRx pattern name outside the plane.
    FixedPattern,
    Transparent,
    Clamp512,
}

/// Tile-indexed plane addressing for one rotation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub plane_addresses: [u32; 16],
    /// Planes per row/column of the 4x4 rotation plane grid.
    pub plane_width: u32,
    pub plane_height: u32,
    /// Character pattern size: 1 for 1x1 cells, 2 for 2x2 cells.
    pub char_size: u32,
    /// Pattern name data size in 16-bit words (1 or 2).
    pub pattern_words: u32,
    pub cell_depth: CellDepth,
    /// CRAM word offset added to every palette index from this plane.
    pub color_offset: u32,
    /// Supplementary pattern-name bits (one-word pattern names borrow
    /// character/palette high bits from here).
    pub supplement: u16,
    /// One-word pattern names: auxiliary mode trades the flip bits for
    /// two more character-number bits.
    pub aux_mode: bool,
    /// VRSIZE 8-Mbit flag; character numbers are masked to 14 bits
    /// without it.
    pub large_vram: bool,
    pub transparent: bool,
}

impl PlaneLayout {
    /// Plane-space extent in pixels covered by the 4x4 plane grid.
    pub fn extent(&self) -> (i32, i32) {
        let page = 512;
        (
            (4 * self.plane_width * page) as i32,
            (4 * self.plane_height * page) as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSource {
    Tiles(PlaneLayout),
    Bitmap {
        base_addr: u32,
        width: u32,
        height: u32,
        cell_depth: CellDepth,
        /// Palette number (BMPNx) for paletted bitmap depths.
        palette: u32,
        /// CRAM word offset added to every palette index.
        color_offset: u32,
        transparent: bool,
    },
}

/// Register block for one rotation parameter set (A or B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationParamRegs {
    /// VRAM address of the 32-word rotation parameter table.
    pub table_addr: u32,
    pub coefficient: Option<CoefficientTable>,
    pub over_screen: OverScreenMode,
    pub over_pattern_name: u16,
    pub source: RotationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationRegisters {
    pub mode: RotationMode,
    pub param_a: RotationParamRegs,
    pub param_b: RotationParamRegs,
    /// Window driving `RotationMode::WindowSwitch`.
    pub window: Option<WindowSource>,
    pub priority: u8,
}

/// SFPRMD/SFCCMD-derived per-screen special function state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecialFunctionSelect {
    /// Priority LSB toggles per dot based on the special function bit.
    pub priority_per_dot: bool,
    /// Color calculation gated per dot based on the special function bit.
    pub color_calc_per_dot: bool,
    pub function_code: u8,
}

/// Per-scanline register fields consumed by the compositing shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct LineState {
    pub color_offset_r: i16,
    pub color_offset_g: i16,
    pub color_offset_b: i16,
    pub priority: u8,
    pub color_calc_ratio: u8,
}

/// One screen's scanline-indexed state for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenLineStates {
    pub screen: ScreenId,
    pub lines: Vec<LineState>,
}

impl ScreenLineStates {
    pub fn uniform(screen: ScreenId, state: LineState, scanlines: usize) -> Self {
        assert!(scanlines <= MAX_SCANLINES, "scanline count out of range");
        Self {
            screen,
            lines: vec![state; scanlines],
        }
    }
}
