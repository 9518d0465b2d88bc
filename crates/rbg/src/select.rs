//! Per-pixel rotation parameter selection.
//!
//! RPMD mode 0/1 pin one parameter; mode 2 switches from A to B when
//! A's coefficient entry is invalid; mode 3 switches on a window test.
//! Selection happens per pixel because the coefficient data (and the
//! window interval) vary per dot.

use vdp_protocol::{CramView, RotationMode, VramView};

use crate::coefficient;
use crate::params::ParamState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected {
    A,
    B,
    /// Every candidate parameter's coefficient was invalid.
    Transparent,
}

/// Window input for `RotationMode::WindowSwitch`: a per-line interval
/// table (start in the low half-word, end in the high) plus the area
/// flag naming which side of the interval is active.
#[derive(Clone, Copy)]
pub struct RotationWindow<'a> {
    pub table: &'a [u32],
    pub active_inside: bool,
}

impl RotationWindow<'_> {
    /// True when the window is active at (dot, line). Empty intervals
    /// never activate.
    fn active_at(&self, dot: u32, line: u32) -> bool {
        let packed = self.table.get(line as usize).copied().unwrap_or(0);
        let start = packed & 0xFFFF;
        let end = packed >> 16;
        if start == end {
            return false;
        }
        let inside = dot >= start && dot < end;
        inside == self.active_inside
    }
}

pub fn select(
    mode: RotationMode,
    a: &mut ParamState,
    b: &mut ParamState,
    window: Option<RotationWindow<'_>>,
    dot: u32,
    line: u32,
    vram: VramView<'_>,
    cram: CramView<'_>,
) -> Selected {
    match mode {
        RotationMode::ParameterA => {
            if coefficient::apply(a, dot, vram, cram) {
                Selected::A
            } else {
                Selected::Transparent
            }
        }
        RotationMode::ParameterB => {
            if coefficient::apply(b, dot, vram, cram) {
                Selected::B
            } else {
                Selected::Transparent
            }
        }
        RotationMode::CoefficientSwitch => {
            if a.regs.coefficient.is_none() || coefficient::apply(a, dot, vram, cram) {
                return Selected::A;
            }
            if b.regs.coefficient.is_some() {
                if coefficient::apply(b, dot, vram, cram) {
                    Selected::B
                } else {
                    Selected::Transparent
                }
            } else {
                // B inherits A's latched line color when it has no table
                // of its own.
                b.line_color = a.line_color;
                Selected::B
            }
        }
        RotationMode::WindowSwitch => {
            // The window's active region selects parameter B; with no
            // window configured everything stays on A.
            let use_b = window.map(|w| w.active_at(dot, line)).unwrap_or(false);
            let chosen = if use_b { b } else { a };
            if coefficient::apply(chosen, dot, vram, cram) {
                if use_b { Selected::B } else { Selected::A }
            } else {
                Selected::Transparent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdp_protocol::{
        CellDepth, CoefficientMode, CoefficientSource, CoefficientTable, ColorRamMode,
        OverScreenMode, RotationParamRegs, RotationSource,
    };

    fn regs(coefficient: Option<CoefficientTable>) -> RotationParamRegs {
        RotationParamRegs {
            table_addr: 0x100,
            coefficient,
            over_screen: OverScreenMode::Repeat,
            over_pattern_name: 0,
            source: RotationSource::Bitmap {
                base_addr: 0,
                width: 512,
                height: 256,
                cell_depth: CellDepth::Rgb555,
                palette: 0,
                color_offset: 0,
                transparent: true,
            },
        }
    }

    fn word_table(base_addr: u32) -> CoefficientTable {
        CoefficientTable {
            base_addr,
            long_entries: false,
            source: CoefficientSource::Vram,
            mode: CoefficientMode::ScaleBoth,
            line_color: false,
        }
    }

    #[test]
    fn coefficient_switch_falls_back_to_b() {
        let mut vram = vec![0u8; 0x1000];
        // A's table at 0x200: entry 0 invalid. B's table at 0x300: entry
        // 0 is 1.0.
        vram[0x200] = 0x80;
        vram[0x300] = 0x04;
        vram[0x301] = 0x00;
        let cram_bytes = vec![0u8; 0x1000];
        let vram_view = VramView::new(&vram);
        let cram = CramView::new(&cram_bytes, ColorRamMode::Rgb555Bank0);
        let mut a = ParamState::new(regs(Some(word_table(0x200))), vram_view);
        let mut b = ParamState::new(regs(Some(word_table(0x300))), vram_view);
        a.begin_line(0);
        b.begin_line(0);
        let selected = select(
            RotationMode::CoefficientSwitch,
            &mut a,
            &mut b,
            None,
            0,
            0,
            vram_view,
            cram,
        );
        assert_eq!(selected, Selected::B);
        assert_eq!(b.kx, 1.0);
    }

    #[test]
    fn coefficient_switch_goes_transparent_when_both_invalid() {
        let mut vram = vec![0u8; 0x1000];
        vram[0x200] = 0x80;
        vram[0x300] = 0x80;
        let cram_bytes = vec![0u8; 0x1000];
        let vram_view = VramView::new(&vram);
        let cram = CramView::new(&cram_bytes, ColorRamMode::Rgb555Bank0);
        let mut a = ParamState::new(regs(Some(word_table(0x200))), vram_view);
        let mut b = ParamState::new(regs(Some(word_table(0x300))), vram_view);
        a.begin_line(0);
        b.begin_line(0);
        let selected = select(
            RotationMode::CoefficientSwitch,
            &mut a,
            &mut b,
            None,
            0,
            0,
            vram_view,
            cram,
        );
        assert_eq!(selected, Selected::Transparent);
    }

    #[test]
    fn window_switch_picks_b_in_active_region() {
        let vram = vec![0u8; 0x1000];
        let cram_bytes = vec![0u8; 0x1000];
        let vram_view = VramView::new(&vram);
        let cram = CramView::new(&cram_bytes, ColorRamMode::Rgb555Bank0);
        let mut a = ParamState::new(regs(None), vram_view);
        let mut b = ParamState::new(regs(None), vram_view);
        // Interval [8, 16) active inside.
        let table = vec![8u32 | (16 << 16); 4];
        let window = RotationWindow {
            table: &table,
            active_inside: true,
        };
        let inside = select(
            RotationMode::WindowSwitch,
            &mut a,
            &mut b,
            Some(window),
            10,
            1,
            vram_view,
            cram,
        );
        assert_eq!(inside, Selected::B);
        let outside = select(
            RotationMode::WindowSwitch,
            &mut a,
            &mut b,
            Some(window),
            2,
            1,
            vram_view,
            cram,
        );
        assert_eq!(outside, Selected::A);
    }

    #[test]
    fn empty_window_interval_stays_on_a() {
        let vram = vec![0u8; 0x1000];
        let cram_bytes = vec![0u8; 0x1000];
        let vram_view = VramView::new(&vram);
        let cram = CramView::new(&cram_bytes, ColorRamMode::Rgb555Bank0);
        let mut a = ParamState::new(regs(None), vram_view);
        let mut b = ParamState::new(regs(None), vram_view);
        let table = vec![12u32 | (12 << 16); 4];
        let window = RotationWindow {
            table: &table,
            active_inside: true,
        };
        let selected = select(
            RotationMode::WindowSwitch,
            &mut a,
            &mut b,
            Some(window),
            12,
            0,
            vram_view,
            cram,
        );
        assert_eq!(selected, Selected::A);
    }
}
