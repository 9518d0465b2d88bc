//! Decoded-pixel packing.
//!
//! Layer textures store RGBA8 with the alpha byte repurposed as a meta
//! channel: the compositor needs per-pixel priority and the special
//! function bits, not coverage. Bits:
//!
//! - 0..=2  pixel priority (0 = transparent backdrop)
//! - 3      color calculation enabled for this dot
//! - 4      special function bit of the fetched dot
//! - 5      mesh flag (VDP1 only)
//! - 6      shadow-eligible MSB (sprite data)

pub type PixelMeta = u8;

pub const META_COLOR_CALC: PixelMeta = 1 << 3;
pub const META_SPECIAL_FUNCTION: PixelMeta = 1 << 4;
pub const META_MESH: PixelMeta = 1 << 5;
pub const META_SHADOW: PixelMeta = 1 << 6;

pub fn pack_meta(priority: u8, flags: PixelMeta) -> PixelMeta {
    debug_assert!(priority < 8, "pixel priority out of range");
    (priority & 0x7) | (flags & !0x7)
}

pub fn priority_of(meta: PixelMeta) -> u8 {
    meta & 0x7
}

/// Expand a 15-bit hardware color (0bbbbbgggggrrrrr) to packed RGBA8
/// with `meta` in the alpha byte. Memory layout is R,G,B,A.
pub fn rgb555_to_rgba(color: u16, meta: PixelMeta) -> u32 {
    let r = u32::from(color & 0x1F) << 3;
    let g = u32::from((color >> 5) & 0x1F) << 3;
    let b = u32::from((color >> 10) & 0x1F) << 3;
    r | (g << 8) | (b << 16) | (u32::from(meta) << 24)
}

/// Expand a 24-bit hardware color (00rrggbb word order) to packed RGBA8.
pub fn rgb888_to_rgba(color: u32, meta: PixelMeta) -> u32 {
    let r = (color >> 16) & 0xFF;
    let g = (color >> 8) & 0xFF;
    let b = color & 0xFF;
    r | (g << 8) | (b << 16) | (u32::from(meta) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trip() {
        let meta = pack_meta(5, META_COLOR_CALC | META_SHADOW);
        assert_eq!(priority_of(meta), 5);
        assert_ne!(meta & META_COLOR_CALC, 0);
        assert_ne!(meta & META_SHADOW, 0);
        assert_eq!(meta & META_MESH, 0);
    }

    #[test]
    fn rgb555_channels_land_in_rgba_order() {
        // Pure red, full priority, no flags.
        let px = rgb555_to_rgba(0x001F, pack_meta(7, 0));
        assert_eq!(px & 0xFF, 0xF8);
        assert_eq!((px >> 8) & 0xFF, 0);
        assert_eq!((px >> 16) & 0xFF, 0);
        assert_eq!(px >> 24, 7);
    }

    #[test]
    fn rgb888_swaps_to_rgba_layout() {
        let px = rgb888_to_rgba(0x0012_3456, 0);
        assert_eq!(px & 0xFF, 0x12);
        assert_eq!((px >> 8) & 0xFF, 0x34);
        assert_eq!((px >> 16) & 0xFF, 0x56);
    }
}
