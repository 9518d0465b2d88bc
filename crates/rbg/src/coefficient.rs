//! Coefficient table fetch and decode.
//!
//! Coefficient entries scale the rotation's kx/ky terms per dot. They
//! come in two widths: 16-bit entries carry a signed 1.10 fixed-point
//! value with validity in bit 15; 32-bit entries carry a signed 8.16
//! value with validity in bit 31 and a line-color table index in bits
//! 24..=30. Tables live in VRAM or, through the palette mirror, in CRAM.

use vdp_protocol::{CoefficientMode, CoefficientSource, CoefficientTable, CramView, VramView};

use crate::params::ParamState;

/// A decoded coefficient entry. The line-color index is meaningful even
/// on invalid entries; the original hardware latches it before the
/// validity check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientEntry {
    pub valid: bool,
    pub value: f32,
    pub line_color: u8,
}

pub fn decode_word(raw: u16) -> CoefficientEntry {
    let mut bits = u32::from(raw & 0x7FFF);
    if raw & 0x4000 != 0 {
        bits |= 0xFFFF_8000;
    }
    CoefficientEntry {
        valid: raw & 0x8000 == 0,
        value: bits as i32 as f32 / 1024.0,
        line_color: 0,
    }
}

pub fn decode_long(raw: u32) -> CoefficientEntry {
    let mut bits = raw & 0x00FF_FFFF;
    if raw & 0x0080_0000 != 0 {
        bits |= 0xFF00_0000;
    }
    CoefficientEntry {
        valid: raw & 0x8000_0000 == 0,
        value: bits as i32 as f32 / 65536.0,
        line_color: ((raw >> 24) & 0x7F) as u8,
    }
}

pub fn fetch(
    table: &CoefficientTable,
    row: i32,
    vram: VramView<'_>,
    cram: CramView<'_>,
) -> CoefficientEntry {
    let row = row as u32;
    if table.long_entries {
        let addr = table.base_addr.wrapping_add(row << 2);
        let raw = match table.source {
            CoefficientSource::Vram => vram.read_u32(addr & 0x7_FFFF),
            CoefficientSource::Cram => cram.read_coefficient_long(addr),
        };
        decode_long(raw)
    } else {
        let addr = table.base_addr.wrapping_add(row << 1);
        let raw = match table.source {
            CoefficientSource::Vram => vram.read_u16(addr),
            CoefficientSource::Cram => cram.read_coefficient_word(addr),
        };
        decode_word(raw)
    }
}

/// Fetch the coefficient for `dot` and fold it into `param` according
/// to the table's application mode. Returns false when the entry is
/// invalid; the line-color index is latched either way.
pub fn apply(param: &mut ParamState, dot: u32, vram: VramView<'_>, cram: CramView<'_>) -> bool {
    let Some(table) = param.regs.coefficient else {
        return true;
    };
    let entry = fetch(&table, param.coefficient_row(dot), vram, cram);
    if table.long_entries {
        param.line_color = entry.line_color;
    }
    if !entry.valid {
        return false;
    }
    match table.mode {
        CoefficientMode::ScaleBoth => {
            param.kx = entry.value;
            param.ky = entry.value;
        }
        CoefficientMode::ScaleKx => param.kx = entry.value,
        CoefficientMode::ScaleKy => param.ky = entry.value,
        // Reserved mode: the entry gates validity and contributes its
        // line color but rescales nothing.
        CoefficientMode::ViewpointX => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_entries_are_signed_1_10() {
        assert_eq!(decode_word(0x0400).value, 1.0);
        let negative = decode_word(0x7C00);
        assert!(negative.valid);
        assert_eq!(negative.value, -1.0);
        assert!(!decode_word(0x8000).valid);
    }

    #[test]
    fn long_entries_carry_line_color_even_when_invalid() {
        let entry = decode_long(0x8000_0000 | (0x25 << 24));
        assert!(!entry.valid);
        assert_eq!(entry.line_color, 0x25);
        let valid = decode_long(0x0001_0000);
        assert!(valid.valid);
        assert_eq!(valid.value, 1.0);
    }

    #[test]
    fn long_entries_sign_extend_from_bit_23() {
        // -1.0 in 8.16: 0xFF0000 within the 24-bit field.
        let entry = decode_long(0x00FF_0000);
        assert_eq!(entry.value, -1.0);
    }
}
