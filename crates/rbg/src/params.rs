//! Rotation parameter table decode and per-run/per-line derivation.

use vdp_protocol::{RotationParamRegs, VramView};

/// Sign-extend a masked fixed-point field. `mask` selects the stored
/// bits, `sign` is the field's sign bit; bits above the sign bit are
/// filled on negative values, bits below the field stay zero (the
/// hardware ignores the low 6 address bits of every coordinate field).
fn fixed_16_16(raw: u32, mask: u32, sign: u32) -> f32 {
    let mut v = raw & mask;
    if raw & sign != 0 {
        v |= !((sign << 1).wrapping_sub(1));
    }
    v as i32 as f32 / 65536.0
}

/// 14-bit signed integer fields (viewpoint and center coordinates).
fn int_14(raw: u16) -> f32 {
    let mut v = u32::from(raw & 0x3FFF);
    if raw & 0x2000 != 0 {
        v |= 0xFFFF_C000;
    }
    v as i32 as f32
}

/// One rotation parameter table, decoded from its 0x60-byte VRAM image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationTable {
    pub xst: f32,
    pub yst: f32,
    pub zst: f32,
    pub delta_xst: f32,
    pub delta_yst: f32,
    pub delta_x: f32,
    pub delta_y: f32,
    /// Rotation matrix rows: a b c / d e f.
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
    pub px: f32,
    pub py: f32,
    pub pz: f32,
    pub cx: f32,
    pub cy: f32,
    pub cz: f32,
    pub mx: f32,
    pub my: f32,
    pub kx: f32,
    pub ky: f32,
    pub ka_start: f32,
    pub delta_ka_line: f32,
    pub delta_ka_dot: f32,
}

impl RotationTable {
    pub fn read(vram: VramView<'_>, addr: u32) -> Self {
        let long = |off: u32| vram.read_u32(addr + off);
        let word = |off: u32| vram.read_u16(addr + off);
        let coord = |off: u32| fixed_16_16(long(off), 0x1FFF_FFC0, 0x1000_0000);
        let delta = |off: u32| fixed_16_16(long(off), 0x0007_FFC0, 0x0004_0000);
        let matrix = |off: u32| fixed_16_16(long(off), 0x000F_FFC0, 0x0008_0000);
        Self {
            xst: coord(0x00),
            yst: coord(0x04),
            zst: coord(0x08),
            delta_xst: delta(0x0C),
            delta_yst: delta(0x10),
            delta_x: delta(0x14),
            delta_y: delta(0x18),
            a: matrix(0x1C),
            b: matrix(0x20),
            c: matrix(0x24),
            d: matrix(0x28),
            e: matrix(0x2C),
            f: matrix(0x30),
            px: int_14(word(0x34)),
            py: int_14(word(0x36)),
            pz: int_14(word(0x38)),
            cx: int_14(word(0x3C)),
            cy: int_14(word(0x3E)),
            cz: int_14(word(0x40)),
            mx: fixed_16_16(long(0x44), 0x3FFF_FFC0, 0x2000_0000),
            my: fixed_16_16(long(0x48), 0x3FFF_FFC0, 0x2000_0000),
            kx: fixed_16_16(long(0x4C), 0x00FF_FFFF, 0x0080_0000),
            ky: fixed_16_16(long(0x50), 0x00FF_FFFF, 0x0080_0000),
            ka_start: (long(0x54) & 0xFFFF_FFC0) as f32 / 65536.0,
            delta_ka_line: fixed_16_16(long(0x58), 0x03FF_FFC0, 0x0200_0000),
            delta_ka_dot: fixed_16_16(long(0x5C), 0x03FF_FFC0, 0x0200_0000),
        }
    }
}

/// Live sampling state for one rotation parameter (A or B): the decoded
/// table plus the terms derived once per register run, once per
/// scanline, and the coefficient values updated per pixel.
#[derive(Debug, Clone)]
pub struct ParamState {
    pub regs: RotationParamRegs,
    pub table: RotationTable,
    // Per-run terms.
    dx: f32,
    dy: f32,
    xp: f32,
    yp: f32,
    // Per-scanline terms.
    xsp: f32,
    ysp: f32,
    /// Coefficient table row offset for the current scanline.
    pub ktabl_v: f32,
    // Per-pixel coefficient outputs; seeded from the table each run.
    pub kx: f32,
    pub ky: f32,
    /// Line-color index from the last 32-bit coefficient fetched.
    pub line_color: u8,
}

impl ParamState {
    pub fn new(regs: RotationParamRegs, vram: VramView<'_>) -> Self {
        let table = RotationTable::read(vram, regs.table_addr);
        let mut state = Self {
            regs,
            table,
            dx: 0.0,
            dy: 0.0,
            xp: 0.0,
            yp: 0.0,
            xsp: 0.0,
            ysp: 0.0,
            ktabl_v: 0.0,
            kx: table.kx,
            ky: table.ky,
            line_color: 0,
        };
        state.begin_run();
        state
    }

    /// Derive the screen-space deltas and viewpoint projection, constant
    /// for as long as the register snapshot holds.
    pub fn begin_run(&mut self) {
        let t = &self.table;
        self.dx = t.a * t.delta_x + t.b * t.delta_y;
        self.dy = t.d * t.delta_x + t.e * t.delta_y;
        self.xp = t.a * (t.px - t.cx) + t.b * (t.py - t.cy) + t.c * (t.pz - t.cz) + t.cx + t.mx;
        self.yp = t.d * (t.px - t.cx) + t.e * (t.py - t.cy) + t.f * (t.pz - t.cz) + t.cy + t.my;
        self.kx = t.kx;
        self.ky = t.ky;
    }

    /// Derive the screen-start projection for scanline `line`.
    pub fn begin_line(&mut self, line: u32) {
        let t = &self.table;
        let k = line as f32;
        let sx = t.xst + t.delta_xst * k - t.px;
        let sy = t.yst + t.delta_yst * k - t.py;
        let sz = t.zst - t.pz;
        self.xsp = t.a * sx + t.b * sy + t.c * sz;
        self.ysp = t.d * sx + t.e * sy + t.f * sz;
        self.ktabl_v = t.ka_start + t.delta_ka_line * k;
    }

    /// Coefficient table row for dot `dot` on the current scanline.
    pub fn coefficient_row(&self, dot: u32) -> i32 {
        (self.ktabl_v + self.table.delta_ka_dot * dot as f32).ceil() as i32
    }

    /// Inverse-map screen dot `dot` on the current scanline into plane
    /// space.
    pub fn plane_coords(&self, dot: u32) -> (i32, i32) {
        let l = dot as f32;
        let h = (self.kx * (self.xsp + self.dx * l) + self.xp).floor();
        let v = (self.ky * (self.ysp + self.dy * l) + self.yp).floor();
        (h as i32, v as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdp_protocol::{CellDepth, OverScreenMode, RotationSource};

    fn write_long(vram: &mut [u8], addr: usize, value: u32) {
        vram[addr..addr + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn write_word(vram: &mut [u8], addr: usize, value: u16) {
        vram[addr..addr + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn bitmap_regs() -> RotationParamRegs {
        RotationParamRegs {
            table_addr: 0,
            coefficient: None,
            over_screen: OverScreenMode::Repeat,
            over_pattern_name: 0,
            source: RotationSource::Bitmap {
                base_addr: 0,
                width: 512,
                height: 512,
                cell_depth: CellDepth::Rgb555,
                palette: 0,
                color_offset: 0,
                transparent: false,
            },
        }
    }

    #[test]
    fn coordinate_fields_sign_extend() {
        let mut vram = vec![0u8; 0x1000];
        // Xst = -1.0 in 16.16: raw bits 0x1FFF0000 with sign set.
        write_long(&mut vram, 0x00, 0x1FFF_0000);
        // A = 1.0.
        write_long(&mut vram, 0x1C, 0x0001_0000);
        // Px = -2 as a 14-bit integer.
        write_word(&mut vram, 0x34, 0x3FFE);
        let table = RotationTable::read(VramView::new(&vram), 0);
        assert_eq!(table.xst, -1.0);
        assert_eq!(table.a, 1.0);
        assert_eq!(table.px, -2.0);
        assert_eq!(table.kx, 0.0);
    }

    #[test]
    fn identity_table_maps_screen_to_plane() {
        let mut vram = vec![0u8; 0x1000];
        // Identity rotation: A = E = 1.0, kx = ky = 1.0, dot/line deltas 1.0.
        write_long(&mut vram, 0x0C, 0); // delta Xst
        write_long(&mut vram, 0x10, 0x0001_0000); // delta Yst = 1.0
        write_long(&mut vram, 0x14, 0x0001_0000); // delta X = 1.0
        write_long(&mut vram, 0x1C, 0x0001_0000); // A
        write_long(&mut vram, 0x2C, 0x0001_0000); // E
        write_long(&mut vram, 0x4C, 0x0001_0000); // kx
        write_long(&mut vram, 0x50, 0x0001_0000); // ky
        let mut state = ParamState::new(bitmap_regs(), VramView::new(&vram));
        state.begin_line(3);
        assert_eq!(state.plane_coords(0), (0, 3));
        assert_eq!(state.plane_coords(7), (7, 3));
        state.begin_line(10);
        assert_eq!(state.plane_coords(5), (5, 10));
    }

    #[test]
    fn run_derivation_tracks_viewpoint_shift() {
        let mut vram = vec![0u8; 0x1000];
        write_long(&mut vram, 0x1C, 0x0001_0000); // A
        write_long(&mut vram, 0x2C, 0x0001_0000); // E
        write_long(&mut vram, 0x14, 0x0001_0000); // delta X
        write_long(&mut vram, 0x10, 0x0001_0000); // delta Yst
        write_long(&mut vram, 0x4C, 0x0001_0000); // kx
        write_long(&mut vram, 0x50, 0x0001_0000); // ky
        write_long(&mut vram, 0x44, 0x0020_0000); // Mx = 32.0
        let mut state = ParamState::new(bitmap_regs(), VramView::new(&vram));
        state.begin_line(0);
        // The horizontal shift Mx lands on every dot.
        assert_eq!(state.plane_coords(0), (32, 0));
        assert_eq!(state.plane_coords(4), (36, 0));
    }
}
