//! Per-pixel rotating background rasterization.
//!
//! For every output dot the active parameter's inverse transform yields
//! a plane-space coordinate; the over-screen policy decides what exists
//! outside the plane, and the dot is fetched from tile or bitmap data.
//! Pattern-name decode is cached per character cell because consecutive
//! dots overwhelmingly land in the same cell.

use log::debug;
use vdp_protocol::{
    CellDepth, CramView, META_COLOR_CALC, META_SPECIAL_FUNCTION, OverScreenMode, PixelMeta,
    PlaneLayout, RotationRegisters, RotationSource, SpecialFunctionSelect, VramView, pack_meta,
    rgb555_to_rgba, rgb888_to_rgba,
};

use crate::params::ParamState;
use crate::runs::detect_runs;
use crate::select::{self, RotationWindow, Selected};

/// A rasterized rotating background: one RGBA pixel per output dot with
/// the meta channel in alpha, plus the per-scanline line-color indices
/// latched from the coefficient stream.
#[derive(Debug, Clone)]
pub struct RbgLayer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
    pub line_colors: Vec<u8>,
}

impl RbgLayer {
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Decoded pattern-name data for one character cell.
#[derive(Debug, Clone, Copy, Default)]
struct PatternName {
    /// Byte address of the cell data in VRAM.
    char_addr: u32,
    palette: u32,
    /// Bit 0: horizontal flip, bit 1: vertical flip.
    flip: u8,
    special_function: bool,
    special_color: bool,
}

fn decode_one_word(layout: &PlaneLayout, raw: u16) -> PatternName {
    let supplement = u32::from(layout.supplement);
    let raw = u32::from(raw);
    let palette = if layout.cell_depth == CellDepth::Palette16 {
        ((raw & 0xF000) >> 12) | ((supplement & 0xE0) >> 1)
    } else {
        (raw & 0x7000) >> 8
    };
    let (flip, char_number) = if layout.aux_mode {
        let c = if layout.char_size == 2 {
            ((raw & 0xFFF) << 2) | (supplement & 0x3) | ((supplement & 0x10) << 10)
        } else {
            (raw & 0xFFF) | ((supplement & 0x1C) << 10)
        };
        (0, c)
    } else {
        let c = if layout.char_size == 2 {
            ((raw & 0x3FF) << 2) | (supplement & 0x3) | ((supplement & 0x1C) << 10)
        } else {
            (raw & 0x3FF) | ((supplement & 0x1F) << 10)
        };
        (((raw & 0xC00) >> 10) as u8, c)
    };
    PatternName {
        char_addr: char_byte_addr(layout, char_number),
        palette,
        flip,
        special_function: supplement & 0x200 != 0,
        special_color: supplement & 0x100 != 0,
    }
}

fn decode_two_word(layout: &PlaneLayout, raw: u32) -> PatternName {
    let name_half = raw >> 16;
    let char_half = raw & 0xFFFF;
    let palette = if layout.cell_depth == CellDepth::Palette16 {
        name_half & 0x7F
    } else {
        name_half & 0x70
    };
    PatternName {
        char_addr: char_byte_addr(layout, char_half & 0x7FFF),
        palette,
        flip: ((name_half & 0xC000) >> 14) as u8,
        special_function: name_half & 0x2000 != 0,
        special_color: name_half & 0x1000 != 0,
    }
}

fn char_byte_addr(layout: &PlaneLayout, char_number: u32) -> u32 {
    let masked = if layout.large_vram {
        char_number
    } else {
        char_number & 0x3FFF
    };
    masked * 0x20
}

/// Cell-addressing state for one rotation parameter's tile source.
struct TileWalker {
    layout: PlaneLayout,
    /// log2 of the character pattern edge in pixels (3 for 1x1, 4 for 2x2).
    pattern_shift: u32,
    /// Patterns per page row and per page.
    page_edge: u32,
    page_size: u32,
    shift_plane_x: u32,
    shift_plane_y: u32,
    mask_x: i32,
    mask_y: i32,
    cached_cell: Option<(i32, i32)>,
    name: PatternName,
}

impl TileWalker {
    fn new(layout: PlaneLayout) -> Self {
        let pattern_shift = if layout.char_size == 2 { 4 } else { 3 };
        let page_edge = 64 / layout.char_size;
        Self {
            layout,
            pattern_shift,
            page_edge,
            page_size: page_edge * page_edge,
            shift_plane_x: 9 + (layout.plane_width - 1),
            shift_plane_y: 9 + (layout.plane_height - 1),
            mask_x: (512 * layout.plane_width) as i32 - 1,
            mask_y: (512 * layout.plane_height) as i32 - 1,
            cached_cell: None,
            name: PatternName::default(),
        }
    }

    /// Decode the pattern name covering plane coordinate (h, v), reusing
    /// the previous decode while the walk stays inside one cell. When
    /// `fixed_name` is set the register-supplied pattern name is used
    /// instead of VRAM (over-screen substitute mode).
    fn pattern_at(&mut self, vram: VramView<'_>, h: i32, v: i32, fixed_name: Option<u16>) -> &PatternName {
        let cell = (h >> self.pattern_shift, v >> self.pattern_shift);
        if self.cached_cell == Some(cell) {
            return &self.name;
        }
        self.cached_cell = Some(cell);
        if let Some(raw) = fixed_name {
            self.name = decode_one_word(&self.layout, raw);
            return &self.name;
        }
        let plane = ((h >> self.shift_plane_x) & 0x3) + (((v >> self.shift_plane_y) & 0x3) << 2);
        let x = (h & self.mask_x) as u32;
        let y = (v & self.mask_y) as u32;
        let pattern_index = ((y >> 9) * self.page_size * self.layout.plane_width)
            + ((x >> 9) * self.page_size)
            + (((y & 511) >> self.pattern_shift) * self.page_edge)
            + ((x & 511) >> self.pattern_shift);
        let addr = (self.layout.plane_addresses[plane as usize]
            + (pattern_index << self.layout.pattern_words))
            & 0x7_FFFF;
        self.name = if self.layout.pattern_words == 2 {
            decode_two_word(&self.layout, vram.read_u32(addr))
        } else {
            decode_one_word(&self.layout, vram.read_u16(addr))
        };
        &self.name
    }
}

/// Map plane coordinates within a character pattern to the stored 8-wide
/// cell row/column, honoring the flip bits. 2x2 characters store their
/// four cells consecutively, so the row index runs 0..32.
fn cell_coords(char_size: u32, flip: u8, h: i32, v: i32) -> (u32, u32) {
    let mut x = h as u32;
    let mut y = v as u32;
    if char_size == 1 {
        x &= 7;
        y &= 7;
        if flip & 0x2 != 0 {
            y = 7 - y;
        }
        if flip & 0x1 != 0 {
            x = 7 - x;
        }
        return (x, y);
    }
    y &= 15;
    if flip != 0 {
        if flip & 0x2 != 0 {
            if y & 8 == 0 {
                y = 7 - y + 16;
            } else {
                y = 15 - y;
            }
        } else if y & 8 != 0 {
            y += 8;
        }
        if flip & 0x1 != 0 {
            if x & 8 == 0 {
                y += 8;
            }
            x &= 7;
            x = 7 - x;
        } else if x & 8 != 0 {
            y += 8;
            x &= 7;
        } else {
            x &= 7;
        }
    } else {
        if y & 8 != 0 {
            y += 8;
        }
        if x & 8 != 0 {
            y += 8;
        }
        x &= 7;
    }
    (x, y)
}

/// Fetch one dot of cell/bitmap data and resolve it to RGBA. Returns
/// `None` for a transparent dot.
#[allow(clippy::too_many_arguments)]
fn fetch_dot(
    vram: VramView<'_>,
    cram: CramView<'_>,
    depth: CellDepth,
    char_addr: u32,
    row_width: u32,
    x: u32,
    y: u32,
    palette: u32,
    color_offset: u32,
    transparent: bool,
    meta: PixelMeta,
) -> Option<u32> {
    let index = y * row_width + x;
    match depth {
        CellDepth::Palette16 => {
            let mut dot = u32::from(vram.read_u8(char_addr + (index >> 1)));
            if x & 1 == 0 {
                dot >>= 4;
            }
            dot &= 0xF;
            if dot == 0 && transparent {
                return None;
            }
            Some(cram.rgba(color_offset + ((palette << 4) | dot), meta))
        }
        CellDepth::Palette256 => {
            let dot = u32::from(vram.read_u8(char_addr + index));
            if dot == 0 && transparent {
                return None;
            }
            Some(cram.rgba(color_offset + ((palette << 4) | dot), meta))
        }
        CellDepth::Palette2048 => {
            let dot = u32::from(vram.read_u16(char_addr + index * 2));
            if dot == 0 && transparent {
                return None;
            }
            Some(cram.rgba(color_offset + (dot & 0x7FF), meta))
        }
        CellDepth::Rgb555 => {
            let dot = vram.read_u16(char_addr + index * 2);
            if dot & 0x8000 == 0 && transparent {
                return None;
            }
            Some(rgb555_to_rgba(dot, meta))
        }
        CellDepth::Rgb888 => {
            let dot = vram.read_u32(char_addr + index * 4);
            if dot & 0x8000_0000 == 0 && transparent {
                return None;
            }
            Some(rgb888_to_rgba(dot & 0x00FF_FFFF, meta))
        }
    }
}

pub struct RbgSampler<'a> {
    vram: VramView<'a>,
    cram: CramView<'a>,
    window: Option<RotationWindow<'a>>,
    special: SpecialFunctionSelect,
}

impl<'a> RbgSampler<'a> {
    pub fn new(vram: VramView<'a>, cram: CramView<'a>) -> Self {
        Self {
            vram,
            cram,
            window: None,
            special: SpecialFunctionSelect::default(),
        }
    }

    /// Window interval table driving `RotationMode::WindowSwitch`.
    pub fn with_window(mut self, window: RotationWindow<'a>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_special_function(mut self, special: SpecialFunctionSelect) -> Self {
        self.special = special;
        self
    }

    /// Rasterize the whole frame. `lines` carries one register snapshot
    /// per output scanline; parameter derivation restarts at every
    /// register-change run boundary.
    pub fn render(&self, lines: &[RotationRegisters], width: u32) -> RbgLayer {
        let height = lines.len() as u32;
        let mut layer = RbgLayer {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
            line_colors: vec![0; height as usize],
        };
        let runs = detect_runs(lines);
        debug!(
            "rbg.render: {}x{} in {} register run(s)",
            width,
            height,
            runs.len()
        );
        for run in &runs {
            let mut a = ParamState::new(run.regs.param_a, self.vram);
            let mut b = ParamState::new(run.regs.param_b, self.vram);
            let mut walker_a = tile_walker(&run.regs.param_a.source);
            let mut walker_b = tile_walker(&run.regs.param_b.source);
            for line in run.start..run.end {
                a.begin_line(line);
                b.begin_line(line);
                let mut line_color = 0u8;
                for dot in 0..width {
                    let selected = select::select(
                        run.regs.mode,
                        &mut a,
                        &mut b,
                        self.window,
                        dot,
                        line,
                        self.vram,
                        self.cram,
                    );
                    let (param, walker) = match selected {
                        Selected::A => (&a, &mut walker_a),
                        Selected::B => (&b, &mut walker_b),
                        Selected::Transparent => continue,
                    };
                    line_color = param.line_color;
                    let (h, v) = param.plane_coords(dot);
                    if let Some(px) =
                        self.sample_source(param, walker.as_mut(), h, v, run.regs.priority)
                    {
                        layer.pixels[(line * width + dot) as usize] = px;
                    }
                }
                layer.line_colors[line as usize] = line_color;
            }
        }
        layer
    }

    fn sample_source(
        &self,
        param: &ParamState,
        walker: Option<&mut TileWalker>,
        h: i32,
        v: i32,
        base_priority: u8,
    ) -> Option<u32> {
        match param.regs.source {
            RotationSource::Bitmap {
                base_addr,
                width,
                height,
                cell_depth,
                palette,
                color_offset,
                transparent,
            } => {
                let (h, v) = match param.regs.over_screen {
                    OverScreenMode::Repeat | OverScreenMode::FixedPattern => {
                        // Substitute-pattern mode is tile-only; bitmaps
                        // wrap like repeat mode.
                        (h & (width as i32 - 1), v & (height as i32 - 1))
                    }
                    OverScreenMode::Transparent => {
                        if h < 0 || h >= width as i32 || v < 0 || v >= height as i32 {
                            return None;
                        }
                        (h, v)
                    }
                    OverScreenMode::Clamp512 => {
                        if h < 0 || h > 512 || v < 0 || v > 512 {
                            return None;
                        }
                        (h, v)
                    }
                };
                let meta = self.dot_meta(base_priority, false, false);
                fetch_dot(
                    self.vram,
                    self.cram,
                    cell_depth,
                    base_addr,
                    width,
                    h as u32,
                    v as u32,
                    palette,
                    color_offset,
                    transparent,
                    meta,
                )
            }
            RotationSource::Tiles(layout) => {
                let walker = walker.expect("tile source without walker");
                let (extent_x, extent_y) = layout.extent();
                let mut fixed_name = None;
                let (h, v) = match param.regs.over_screen {
                    OverScreenMode::Repeat => (h & (extent_x - 1), v & (extent_y - 1)),
                    OverScreenMode::Transparent => {
                        if h < 0 || h >= extent_x || v < 0 || v >= extent_y {
                            return None;
                        }
                        (h, v)
                    }
                    OverScreenMode::Clamp512 => {
                        if h < 0 || h > 512 || v < 0 || v > 512 {
                            return None;
                        }
                        (h, v)
                    }
                    OverScreenMode::FixedPattern => {
                        if h < 0 || h >= extent_x || v < 0 || v >= extent_y {
                            fixed_name = Some(param.regs.over_pattern_name);
                        }
                        (h & (extent_x - 1), v & (extent_y - 1))
                    }
                };
                let name = *walker.pattern_at(self.vram, h, v, fixed_name);
                let (cx, cy) = cell_coords(layout.char_size, name.flip, h, v);
                let meta =
                    self.dot_meta(base_priority, name.special_function, name.special_color);
                fetch_dot(
                    self.vram,
                    self.cram,
                    layout.cell_depth,
                    name.char_addr,
                    8,
                    cx,
                    cy,
                    name.palette,
                    layout.color_offset,
                    layout.transparent,
                    meta,
                )
            }
        }
    }

    fn dot_meta(&self, base_priority: u8, special_function: bool, special_color: bool) -> PixelMeta {
        let mut priority = base_priority;
        if self.special.priority_per_dot {
            priority = (priority & !1) | u8::from(special_function);
        }
        let mut flags = 0;
        if special_function {
            flags |= META_SPECIAL_FUNCTION;
        }
        let color_calc = if self.special.color_calc_per_dot {
            special_color
        } else {
            true
        };
        if color_calc {
            flags |= META_COLOR_CALC;
        }
        pack_meta(priority, flags)
    }
}

fn tile_walker(source: &RotationSource) -> Option<TileWalker> {
    match source {
        RotationSource::Tiles(layout) => Some(TileWalker::new(*layout)),
        RotationSource::Bitmap { .. } => None,
    }
}
