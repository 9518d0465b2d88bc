//! VDP2 cell decode into atlas-ready RGBA.
//!
//! Normal backgrounds arrive as per-cell draw requests: the command
//! walker has already resolved the pattern name, so a request names the
//! cell's VRAM address, palette and destination quad. Cells decode into
//! the cell atlas and draw as tile quads; flips stay in the texture
//! coordinates, so one decoded cell serves all four orientations.

use atlas::Fingerprint;
use vdp_protocol::{
    CellDepth, CramView, META_COLOR_CALC, META_SPECIAL_FUNCTION, ScreenId, VramView, pack_meta,
    rgb555_to_rgba, rgb888_to_rgba,
};

/// Cells are stored as 8x8 dots regardless of character size; a 2x2
/// character is four consecutive cells.
pub const CELL_EDGE: u32 = 8;

/// One tile-quad draw request for a normal background.
#[derive(Debug, Clone, Copy)]
pub struct CellRequest {
    pub screen: ScreenId,
    /// Byte address of the 8x8 cell data in VDP2 RAM.
    pub char_addr: u32,
    pub depth: CellDepth,
    /// Palette number from the pattern name (shifted per depth).
    pub palette: u32,
    /// Per-screen CRAM color offset.
    pub color_offset: u32,
    /// Bit 0: horizontal flip, bit 1: vertical flip.
    pub flip: u8,
    pub transparent: bool,
    pub priority: u8,
    /// Set the per-dot color-calc flag on opaque dots.
    pub color_calc: bool,
    /// Per-dot special function flag from the pattern name.
    pub special_function: bool,
    /// Destination corners in layer pixels, clockwise from top-left.
    pub dest: [[f32; 2]; 4],
}

/// Cache identity of a decoded cell. Flip is excluded: orientation
/// lives in the quad's texture coordinates.
pub fn cell_fingerprint(req: &CellRequest) -> Fingerprint {
    Fingerprint::of((
        req.char_addr,
        req.depth as u32,
        req.palette,
        req.color_offset,
        req.transparent,
        req.priority,
        req.color_calc,
        req.special_function,
    ))
}

/// Decode one cell into `CELL_EDGE * CELL_EDGE` RGBA texels, row major.
/// Transparent dots decode to zero (priority 0 in the meta byte).
pub fn decode_cell(req: &CellRequest, vram: &VramView, cram: &CramView) -> Vec<u32> {
    let mut flags = 0;
    if req.color_calc {
        flags |= META_COLOR_CALC;
    }
    if req.special_function {
        flags |= META_SPECIAL_FUNCTION;
    }
    let meta = pack_meta(req.priority, flags);
    let mut out = Vec::with_capacity((CELL_EDGE * CELL_EDGE) as usize);
    for index in 0..CELL_EDGE * CELL_EDGE {
        let dot = match req.depth {
            CellDepth::Palette16 => {
                let byte = u32::from(vram.read_u8(req.char_addr + index / 2));
                let dot = if index & 1 == 0 { byte >> 4 } else { byte & 0xF };
                if dot == 0 && req.transparent {
                    None
                } else {
                    Some(cram.rgba(req.color_offset + ((req.palette << 4) | dot), meta))
                }
            }
            CellDepth::Palette256 => {
                let dot = u32::from(vram.read_u8(req.char_addr + index));
                if dot == 0 && req.transparent {
                    None
                } else {
                    Some(cram.rgba(req.color_offset + ((req.palette << 4) | dot), meta))
                }
            }
            CellDepth::Palette2048 => {
                let dot = u32::from(vram.read_u16(req.char_addr + index * 2));
                if dot == 0 && req.transparent {
                    None
                } else {
                    Some(cram.rgba(req.color_offset + (dot & 0x7FF), meta))
                }
            }
            CellDepth::Rgb555 => {
                let dot = vram.read_u16(req.char_addr + index * 2);
                if dot & 0x8000 == 0 && req.transparent {
                    None
                } else {
                    Some(rgb555_to_rgba(dot, meta))
                }
            }
            CellDepth::Rgb888 => {
                let dot = vram.read_u32(req.char_addr + index * 4);
                if dot & 0x8000_0000 == 0 && req.transparent {
                    None
                } else {
                    Some(rgb888_to_rgba(dot & 0x00FF_FFFF, meta))
                }
            }
        };
        out.push(dot.unwrap_or(0));
    }
    out
}
