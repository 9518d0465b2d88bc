//! VDP2 window interval tables and the CPU-side inclusion test.
//!
//! Each window collapses to a per-scanline horizontal interval, packed
//! start-low/end-high into one u32 and uploaded as a 512-entry lookup
//! the composite shader indexes by fragment row. Lines the window does
//! not cover store a sentinel whose start exceeds its end, which no x
//! can satisfy. The functions here are the reference semantics the
//! shader mirrors.

use vdp_protocol::{MAX_SCANLINES, VramView, WindowControl, WindowOp, WindowRegisters};

/// Interval no pixel is inside of (start 0xFFFF, end 0).
pub const ALWAYS_OUTSIDE: u32 = 0x0000_FFFF;

fn pack(start: u16, end: u16, hshift: u32) -> u32 {
    ((start >> hshift) as u32) | (((end >> hshift) as u32) << 16)
}

/// The two windows' per-line interval tables, regenerated each frame
/// and re-uploaded only when a row actually changed.
pub struct WindowTables {
    tables: [Vec<u32>; 2],
    dirty: bool,
}

impl Default for WindowTables {
    fn default() -> Self {
        Self {
            tables: [
                vec![ALWAYS_OUTSIDE; MAX_SCANLINES],
                vec![ALWAYS_OUTSIDE; MAX_SCANLINES],
            ],
            dirty: true,
        }
    }
}

impl WindowTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, window: usize) -> &[u32] {
        &self.tables[window]
    }

    /// True when a row changed since the last `take_dirty`.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Rebuild both tables from the frame's registers. Window H
    /// coordinates are halved below 640-wide modes, where the hardware
    /// counts in half-pixels.
    pub fn regenerate(&mut self, regs: &WindowRegisters, vram: &VramView, width: u32, height: u32) {
        let hshift = if width >= 640 { 0 } else { 1 };
        let height = (height as usize).min(MAX_SCANLINES);
        for (w, area) in regs.areas.iter().enumerate() {
            for v in 0..height {
                let val = if v >= area.start_y as usize && v <= area.end_y as usize {
                    match area.line_table {
                        Some(base) => {
                            let start = vram.read_u16(base + (v as u32) * 4);
                            let end = vram.read_u16(base + (v as u32) * 4 + 2);
                            if (end as i16) < (start as i16) || (end as i16) < 0 {
                                ALWAYS_OUTSIDE
                            } else {
                                pack(start, end, hshift)
                            }
                        }
                        None => {
                            if (area.end_y as i16) < (area.start_y as i16)
                                || (area.end_y as i16) < 0
                            {
                                ALWAYS_OUTSIDE
                            } else {
                                pack(area.start_x, area.end_x, hshift)
                            }
                        }
                    }
                } else {
                    ALWAYS_OUTSIDE
                };
                if self.tables[w][v] != val {
                    self.tables[w][v] = val;
                    self.dirty = true;
                }
            }
        }
    }
}

/// One window's test at (x, y). `inside` selects which side of the
/// interval counts as passing. An all-zero row is the degenerate
/// "no interval" case: it fails the inside test and passes the outside
/// one.
pub fn check_window(table: &[u32], x: u32, y: u32, inside: bool) -> bool {
    let Some(&packed) = table.get(y as usize) else {
        return false;
    };
    let start = packed & 0xFFFF;
    let end = (packed >> 16) & 0xFFFF;
    if inside {
        packed != 0 && x >= start && x <= end
    } else {
        packed == 0 || x < start || x > end
    }
}

/// Whether a layer's pixel at (x, y) survives its window controls.
pub fn layer_visible(control: &WindowControl, tables: &WindowTables, x: u32, y: u32) -> bool {
    match (control.w0_enable, control.w1_enable) {
        (false, false) => true,
        (true, false) => check_window(tables.table(0), x, y, control.w0_inside),
        (false, true) => check_window(tables.table(1), x, y, control.w1_inside),
        (true, true) => {
            let w0 = check_window(tables.table(0), x, y, control.w0_inside);
            let w1 = check_window(tables.table(1), x, y, control.w1_inside);
            match control.op {
                WindowOp::And => w0 && w1,
                WindowOp::Or => w0 || w1,
            }
        }
    }
}
