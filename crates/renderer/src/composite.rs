//! Final-frame compositing: layer stacking, windows, mosaic, color
//! calculation.
//!
//! The fragment shader in `composite.wgsl` stacks up to six background
//! layers plus the sprite framebuffer per pixel. The color math and
//! selection rules are implemented twice: the functions here are the
//! tested reference semantics, and the WGSL mirrors them operation for
//! operation. Keep the two in sync when touching either.

use bytemuck::{Pod, Zeroable};

use vdp_protocol::{META_COLOR_CALC, META_SHADOW, PixelMeta, priority_of};

/// Color-calculation modes, numbered as the uniform encodes them.
pub const CC_REPLACE: u32 = 0;
pub const CC_SHADOW: u32 = 1;
pub const CC_HALF_LUMINANCE: u32 = 2;
pub const CC_HALF_TRANSPARENT: u32 = 3;
pub const CC_RATIO: u32 = 4;

pub const LAYER_SLOTS: usize = 7;

/// Per-layer uniform block, mirrored by `LayerParams` in the WGSL.
/// Fields are u32 vec4s so std140/WGSL uniform layout rules cannot
/// introduce padding surprises.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct LayerParams {
    /// enable, w0_enable, w0_inside, w1_enable
    pub window_a: [u32; 4],
    /// w1_inside, op (0 = or, 1 = and), color-calc mode, ratio (0..=31)
    pub window_b: [u32; 4],
    /// mosaic w, mosaic h, rgb-direct flag, reserved
    pub mosaic: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositeUniforms {
    pub layers: [LayerParams; LAYER_SLOTS],
    /// width, height, backdrop color (packed RGBA), flags
    pub screen: [u32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<CompositeUniforms>(), 7 * 48 + 16);

fn unpack(c: u32) -> [u32; 3] {
    [c & 0xFF, (c >> 8) & 0xFF, (c >> 16) & 0xFF]
}

fn pack(rgb: [u32; 3], meta: PixelMeta) -> u32 {
    (rgb[0] & 0xFF) | ((rgb[1] & 0xFF) << 8) | ((rgb[2] & 0xFF) << 16) | (u32::from(meta) << 24)
}

fn meta_of(c: u32) -> PixelMeta {
    (c >> 24) as PixelMeta
}

/// Block-quantize a sample coordinate for mosaic. The hardware repeats
/// the block's top-left dot across the block.
pub fn mosaic_quantize(x: u32, y: u32, mosaic_w: u32, mosaic_h: u32) -> (u32, u32) {
    if mosaic_w <= 1 && mosaic_h <= 1 {
        return (x, y);
    }
    let w = mosaic_w.max(1);
    let h = mosaic_h.max(1);
    (x - x % w, y - y % h)
}

/// Halve the RGB of `below` when its pixel is shadow-eligible (sprite
/// MSB set); otherwise the shadow draws nothing and `below` survives.
pub fn apply_shadow(below: u32) -> u32 {
    let meta = meta_of(below);
    if meta & META_SHADOW != 0 {
        let c = unpack(below);
        pack([c[0] / 2, c[1] / 2, c[2] / 2], meta)
    } else {
        below
    }
}

pub fn half_luminance(color: u32) -> u32 {
    let c = unpack(color);
    pack([c[0] / 2, c[1] / 2, c[2] / 2], meta_of(color))
}

/// Even average of the top color and what is underneath it.
pub fn half_transparent(top: u32, below: u32) -> u32 {
    let a = unpack(top);
    let b = unpack(below);
    pack(
        [(a[0] + b[0]) / 2, (a[1] + b[1]) / 2, (a[2] + b[2]) / 2],
        meta_of(top),
    )
}

/// Ratio blend: `ratio` 32nds of the underneath color mixed into the
/// top (ratio 0 leaves the top untouched).
pub fn ratio_blend(top: u32, below: u32, ratio: u32) -> u32 {
    let ratio = ratio.min(31);
    let a = unpack(top);
    let b = unpack(below);
    let mix = |t: u32, u: u32| (t * (32 - ratio) + u * ratio) / 32;
    pack(
        [mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])],
        meta_of(top),
    )
}

/// Add per-vertex Gouraud deltas (normalized channel units) to a packed
/// color, clamping each channel.
pub fn gouraud_apply(color: u32, delta: [f32; 4]) -> u32 {
    let c = unpack(color);
    let add = |base: u32, d: f32| {
        let v = base as f32 + d * 255.0;
        v.clamp(0.0, 255.0) as u32
    };
    pack(
        [add(c[0], delta[0]), add(c[1], delta[1]), add(c[2], delta[2])],
        meta_of(color),
    )
}

/// One composed pixel: pick the highest-priority visible sample across
/// the layer slots (lower slot index wins ties), then apply its
/// color-calc mode against whatever is directly underneath. A zero
/// priority in the meta byte marks a transparent sample. Per-dot
/// color-calc gating rides in the meta channel, so a layer-level mode
/// only fires for dots whose decode set the flag.
pub fn composite_pixel(samples: &[u32; LAYER_SLOTS], params: &[LayerParams; LAYER_SLOTS], backdrop: u32) -> u32 {
    let mut top: Option<usize> = None;
    let mut below: Option<usize> = None;
    for (i, &sample) in samples.iter().enumerate() {
        if params[i].window_a[0] == 0 || priority_of(meta_of(sample)) == 0 {
            continue;
        }
        let pri = priority_of(meta_of(sample));
        match top {
            Some(t) if priority_of(meta_of(samples[t])) >= pri => match below {
                Some(b) if priority_of(meta_of(samples[b])) >= pri => {}
                _ => below = Some(i),
            },
            _ => {
                below = top;
                top = Some(i);
            }
        }
    }
    let Some(t) = top else {
        return backdrop;
    };
    let top_color = samples[t];
    let under = below.map_or(backdrop, |b| samples[b]);
    let mode = params[t].window_b[2];
    if mode == CC_SHADOW {
        // A shadow dot never contributes its own color.
        return apply_shadow(under);
    }
    if meta_of(top_color) & META_COLOR_CALC == 0 {
        return top_color;
    }
    match mode {
        CC_HALF_LUMINANCE => half_luminance(top_color),
        CC_HALF_TRANSPARENT => half_transparent(top_color, under),
        CC_RATIO => ratio_blend(top_color, under, params[t].window_b[3]),
        _ => top_color,
    }
}
