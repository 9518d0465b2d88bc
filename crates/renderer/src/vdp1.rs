//! VDP1 sprite texture decode into atlas-ready RGBA.
//!
//! Command textures live in VDP1 RAM as 4/8/16-bit dots; the palette
//! half of a dot comes from the command's color bank or lookup table.
//! End codes terminate a row: unless the command disables them, the
//! second end-code dot of a row blanks the rest of that row, and the
//! end-code dots themselves never reach the screen.

use log::warn;

use atlas::Fingerprint;
use vdp_protocol::{
    BlendStep, ColorDepth, CramView, GouraudTable, META_COLOR_CALC, META_MESH, META_SHADOW,
    PixelMeta, SpriteCommand, VramView, pack_meta, rgb555_to_rgba,
};

/// Cache identity of a command's decoded pixels. Everything that can
/// change the rasterized texels participates; screen position does not.
pub fn texture_fingerprint(cmd: &SpriteCommand) -> Fingerprint {
    Fingerprint::of((
        cmd.texture_addr,
        cmd.width,
        cmd.height,
        cmd.color_depth,
        cmd.color_bank,
        cmd.lookup_addr,
        cmd.transparent_pixel_enable,
        cmd.end_code_disable,
        cmd.flip,
        cmd.msb_on,
        cmd.priority,
        (cmd.mesh, cmd.blend),
    ))
}

fn command_meta(cmd: &SpriteCommand) -> PixelMeta {
    let mut flags = 0;
    if cmd.mesh {
        flags |= META_MESH;
    }
    if cmd.msb_on {
        flags |= META_SHADOW;
    }
    if matches!(
        cmd.blend,
        BlendStep::HalfTransparent | BlendStep::GouraudHalfTransparent
    ) {
        flags |= META_COLOR_CALC;
    }
    pack_meta(cmd.priority, flags)
}

/// Walks one row's end-code state.
struct EndCodes {
    enabled: bool,
    count: u32,
    code: u16,
}

impl EndCodes {
    fn new(cmd: &SpriteCommand) -> Self {
        let code = match cmd.color_depth {
            ColorDepth::Bank4 | ColorDepth::Lookup4 => 0xF,
            ColorDepth::Bank8x64 | ColorDepth::Bank8x128 | ColorDepth::Bank8x256 => 0xFF,
            ColorDepth::Rgb555 => 0x7FFF,
        };
        Self {
            enabled: !cmd.end_code_disable,
            count: 0,
            code,
        }
    }

    fn begin_row(&mut self) {
        self.count = 0;
    }

    /// True when `dot` must be blanked (it is an end code, or the row
    /// already hit two of them).
    fn blanks(&mut self, dot: u16) -> bool {
        if !self.enabled {
            return false;
        }
        if self.count >= 2 {
            return true;
        }
        if dot == self.code {
            self.count += 1;
            return true;
        }
        false
    }
}

fn resolve_bank(cram: &CramView, index: u32, meta: PixelMeta) -> u32 {
    cram.rgba(index, meta)
}

/// Decode a textured command into `width * height` RGBA texels, row
/// major. Palette dots resolve through CRAM here so the atlas holds
/// final colors; the meta byte carries priority and the mesh/shadow
/// flags.
pub fn decode_sprite_pixels(cmd: &SpriteCommand, vram: &VramView, cram: &CramView) -> Vec<u32> {
    let meta = command_meta(cmd);
    let transparent_zero = cmd.transparent_pixel_enable;
    let mut end = EndCodes::new(cmd);
    let mut out = Vec::with_capacity((cmd.width * cmd.height) as usize);
    let row_bytes = cmd.width * cmd.color_depth.bits_per_pixel() / 8;

    for row in 0..cmd.height {
        end.begin_row();
        let mut addr = cmd.texture_addr + row * row_bytes;
        match cmd.color_depth {
            ColorDepth::Bank4 => {
                let bank = u32::from(cmd.color_bank & 0xFFF0);
                for x in 0..cmd.width {
                    let byte = vram.read_u8(addr + x / 2);
                    let dot = if x & 1 == 0 { byte >> 4 } else { byte & 0xF };
                    let dot = u16::from(dot);
                    if end.blanks(dot) || (dot == 0 && transparent_zero) {
                        out.push(0);
                    } else {
                        out.push(resolve_bank(cram, u32::from(dot) | bank, meta));
                    }
                }
            }
            ColorDepth::Lookup4 => {
                for x in 0..cmd.width {
                    let byte = vram.read_u8(addr + x / 2);
                    let dot = if x & 1 == 0 { byte >> 4 } else { byte & 0xF };
                    let dot = u16::from(dot);
                    if end.blanks(dot) || (dot == 0 && transparent_zero) {
                        out.push(0);
                    } else {
                        let entry = vram.read_u16(cmd.lookup_addr + u32::from(dot) * 2);
                        if entry & 0x8000 != 0 {
                            out.push(rgb555_to_rgba(entry, meta));
                        } else {
                            out.push(resolve_bank(cram, u32::from(entry), meta));
                        }
                    }
                }
            }
            ColorDepth::Bank8x64 | ColorDepth::Bank8x128 | ColorDepth::Bank8x256 => {
                let (bank_mask, dot_mask) = match cmd.color_depth {
                    ColorDepth::Bank8x64 => (0xFFC0, 0x3F),
                    ColorDepth::Bank8x128 => (0xFF80, 0x7F),
                    _ => (0xFF00, 0xFF),
                };
                let bank = u32::from(cmd.color_bank & bank_mask);
                for x in 0..cmd.width {
                    let dot = u16::from(vram.read_u8(addr + x));
                    if end.blanks(dot) || (dot == 0 && transparent_zero) {
                        out.push(0);
                    } else {
                        out.push(resolve_bank(cram, u32::from(dot & dot_mask) | bank, meta));
                    }
                }
            }
            ColorDepth::Rgb555 => {
                for _ in 0..cmd.width {
                    let dot = vram.read_u16(addr);
                    addr += 2;
                    if end.blanks(dot) || (dot & 0x8000 == 0 && transparent_zero) {
                        out.push(0);
                    } else {
                        out.push(rgb555_to_rgba(dot, meta));
                    }
                }
            }
        }
    }
    out
}

/// Flat color of an untextured part (polygon, polyline, line). A zero
/// word with transparency enabled yields no pixel at all.
pub fn solid_color(cmd: &SpriteCommand, cram: &CramView) -> Option<u32> {
    let meta = command_meta(cmd);
    let word = cmd.color_bank;
    if word == 0 && cmd.transparent_pixel_enable {
        return None;
    }
    if word & 0x8000 != 0 {
        Some(rgb555_to_rgba(word, meta))
    } else {
        Some(resolve_bank(cram, u32::from(word), meta))
    }
}

/// Per-corner signed Gouraud deltas in normalized channel units. The
/// shading table stores 5-bit channels biased by 16 (16 = no change).
pub fn gouraud_deltas(table: &GouraudTable) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for (corner, &word) in table.iter().enumerate() {
        let r = (word & 0x1F) as f32;
        let g = ((word >> 5) & 0x1F) as f32;
        let b = ((word >> 10) & 0x1F) as f32;
        out[corner] = [(r - 16.0) / 31.0, (g - 16.0) / 31.0, (b - 16.0) / 31.0, 0.0];
    }
    out
}

/// A command the rasterizer cannot honor draws nothing; log once per
/// occurrence so the degradation is visible.
pub fn degrade(cmd: &SpriteCommand, why: &str) {
    warn!(
        "vdp1: skipping {:?} at {:08x}: {}",
        cmd.kind, cmd.texture_addr, why
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdp_protocol::{ColorRamMode, ScreenId, SpriteKind, UserClipMode};

    fn base_cmd() -> SpriteCommand {
        SpriteCommand {
            kind: SpriteKind::NormalSprite,
            vertices: [[0, 0]; 4],
            texture_addr: 0,
            width: 8,
            height: 1,
            color_depth: ColorDepth::Bank8x256,
            color_bank: 0x0100,
            lookup_addr: 0,
            blend: BlendStep::Replace,
            gouraud: None,
            flip: 0,
            transparent_pixel_enable: true,
            msb_on: false,
            mesh: false,
            end_code_disable: false,
            user_clip: UserClipMode::Disabled,
            screen: ScreenId::Sprite,
            priority: 3,
        }
    }

    fn cram_with(entries: &[(usize, u16)]) -> Vec<u8> {
        let mut mem = vec![0u8; 0x1000];
        for &(index, color) in entries {
            mem[index * 2..index * 2 + 2].copy_from_slice(&color.to_be_bytes());
        }
        mem
    }

    #[test]
    fn second_end_code_blanks_the_rest_of_the_row() {
        let mut vram = vec![0u8; 0x1000];
        vram[..8].copy_from_slice(&[0x01, 0xFF, 0x02, 0xFF, 0x03, 0x04, 0x05, 0x06]);
        let cram = cram_with(&[(0x101, 0x7FFF), (0x102, 0x7FFF), (0x103, 0x7FFF)]);
        let cmd = base_cmd();
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        assert_ne!(px[0], 0);
        assert_eq!(px[1], 0); // first end code
        assert_ne!(px[2], 0);
        assert_eq!(px[3], 0); // second end code
        assert!(px[4..].iter().all(|&p| p == 0), "row must be blank after two end codes");
    }

    #[test]
    fn end_code_disable_draws_the_code_dots() {
        let mut vram = vec![0u8; 0x1000];
        vram[..8].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x01, 0x01, 0x01, 0x01, 0x01]);
        let cram = cram_with(&[(0x101, 0x001F), (0x1FF, 0x03E0)]);
        let mut cmd = base_cmd();
        cmd.end_code_disable = true;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        assert!(px.iter().all(|&p| p != 0));
    }

    #[test]
    fn end_codes_reset_per_row() {
        let mut vram = vec![0u8; 0x1000];
        vram[..4].copy_from_slice(&[0xFF, 0xFF, 0x01, 0x01]);
        let cram = cram_with(&[(0x101, 0x7C00)]);
        let mut cmd = base_cmd();
        cmd.width = 2;
        cmd.height = 2;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        // Row 0 is all end codes; row 1 draws normally.
        assert_eq!(&px[..2], &[0, 0]);
        assert!(px[2] != 0 && px[3] != 0);
    }

    #[test]
    fn zero_dot_honors_the_transparency_flag() {
        let mut vram = vec![0u8; 0x1000];
        vram[1] = 0x05;
        let cram = cram_with(&[(0x100, 0x7FFF), (0x105, 0x7FFF)]);
        let mut cmd = base_cmd();
        cmd.width = 2;
        let views = VramView::new(&vram);
        let cview = CramView::new(&cram, ColorRamMode::Rgb555Bank0);
        let px = decode_sprite_pixels(&cmd, &views, &cview);
        assert_eq!(px[0], 0);
        assert_ne!(px[1], 0);

        cmd.transparent_pixel_enable = false;
        let px = decode_sprite_pixels(&cmd, &views, &cview);
        assert_ne!(px[0], 0, "SPD draws dot zero through the bank");
    }

    #[test]
    fn bank_composition_merges_dot_and_bank_bits() {
        let mut vram = vec![0u8; 0x1000];
        vram[0] = 0x12; // two 4bpp dots: 1 and 2
        let cram = cram_with(&[(0x0FF1, 0x001F), (0x0FF2, 0x03E0)]);
        let mut cmd = base_cmd();
        cmd.color_depth = ColorDepth::Bank4;
        cmd.color_bank = 0x0FFF; // low nibble ignored by the bank mask
        cmd.width = 2;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        assert_eq!(px[0] & 0xFF, 0xF8); // red from CRAM 0xFF1
        assert_eq!((px[1] >> 8) & 0xFF, 0xF8); // green from CRAM 0xFF2
    }

    #[test]
    fn lookup_mode_distinguishes_rgb_and_bank_entries() {
        let mut vram = vec![0u8; 0x1000];
        vram[0] = 0x12;
        // LUT at 0x200: entry 1 = raw RGB blue, entry 2 = bank index 5.
        vram[0x202..0x204].copy_from_slice(&0xFC00u16.to_be_bytes());
        vram[0x204..0x206].copy_from_slice(&0x0005u16.to_be_bytes());
        let cram = cram_with(&[(0x5, 0x001F)]);
        let mut cmd = base_cmd();
        cmd.color_depth = ColorDepth::Lookup4;
        cmd.lookup_addr = 0x200;
        cmd.width = 2;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        assert_eq!((px[0] >> 16) & 0xFF, 0xF8, "raw RGB entry keeps its blue");
        assert_eq!(px[1] & 0xFF, 0xF8, "bank entry resolves through CRAM");
    }

    #[test]
    fn rgb555_msb_selects_opacity() {
        let mut vram = vec![0u8; 0x1000];
        vram[0..2].copy_from_slice(&0x801Fu16.to_be_bytes());
        vram[2..4].copy_from_slice(&0x001Fu16.to_be_bytes());
        let cram = cram_with(&[]);
        let mut cmd = base_cmd();
        cmd.color_depth = ColorDepth::Rgb555;
        cmd.width = 2;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        assert_ne!(px[0], 0);
        assert_eq!(px[1], 0, "clear MSB with transparency on drops the dot");
    }

    #[test]
    fn meta_byte_carries_priority_and_flags() {
        let mut vram = vec![0u8; 0x1000];
        vram[0..2].copy_from_slice(&0x801Fu16.to_be_bytes());
        let cram = cram_with(&[]);
        let mut cmd = base_cmd();
        cmd.color_depth = ColorDepth::Rgb555;
        cmd.width = 1;
        cmd.mesh = true;
        cmd.msb_on = true;
        let px = decode_sprite_pixels(
            &cmd,
            &VramView::new(&vram),
            &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
        );
        let meta = (px[0] >> 24) as PixelMeta;
        assert_eq!(meta & 0x7, 3);
        assert_ne!(meta & META_MESH, 0);
        assert_ne!(meta & META_SHADOW, 0);
    }

    #[test]
    fn fingerprints_differ_when_decode_inputs_differ() {
        let a = base_cmd();
        let mut b = base_cmd();
        b.color_bank = 0x0200;
        let mut c = base_cmd();
        c.vertices = [[10, 10]; 4]; // position is not part of the identity
        assert_ne!(texture_fingerprint(&a), texture_fingerprint(&b));
        assert_eq!(texture_fingerprint(&a), texture_fingerprint(&c));
    }

    #[test]
    fn gouraud_table_bias_is_sixteen() {
        let table: GouraudTable = [0x0210, 0, 0, 0]; // r=16 g=16 b=0
        let deltas = gouraud_deltas(&table);
        assert_eq!(deltas[0][0], 0.0);
        assert_eq!(deltas[0][1], 0.0);
        assert!((deltas[0][2] + 16.0 / 31.0).abs() < 1e-6);
        // A zero word darkens every channel by the full bias.
        let dark = -16.0 / 31.0;
        assert_eq!(deltas[1], [dark, dark, dark, 0.0]);
    }

    #[test]
    fn solid_color_resolves_like_a_dot() {
        let cram = cram_with(&[(0x42, 0x03E0)]);
        let cview = CramView::new(&cram, ColorRamMode::Rgb555Bank0);
        let mut cmd = base_cmd();
        cmd.kind = SpriteKind::Polygon;
        cmd.color_bank = 0x0042;
        let px = solid_color(&cmd, &cview).unwrap();
        assert_eq!((px >> 8) & 0xFF, 0xF8);
        cmd.color_bank = 0;
        assert!(solid_color(&cmd, &cview).is_none());
    }
}
