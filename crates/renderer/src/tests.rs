//! Renderer unit tests.
//!
//! This module validates the CPU half of the frame path end to end:
//! command decode feeding the compositor reference, batching of real
//! expanded geometry, window table generation against layer visibility,
//! and dirty propagation for per-line state uploads.

use super::*;

use vdp_protocol::{
    BlendStep, CellDepth, ColorDepth, ColorRamMode, CramView, LineState, ScreenId,
    ScreenLineStates, SpriteCommand, SpriteKind, UserClipMode, VramView, WindowArea,
    WindowControl, WindowOp, WindowRegisters,
};

use crate::batch::{BatchSystem, ClipRect, Program, ProgramKey};
use crate::composite::{CC_HALF_TRANSPARENT, CC_REPLACE, CC_SHADOW, LAYER_SLOTS, LayerParams};
use crate::geometry::{QuadInput, TESS_GRID, expand_quad, tessellate_quad};

fn sprite(blend: BlendStep, priority: u8) -> SpriteCommand {
    SpriteCommand {
        kind: SpriteKind::NormalSprite,
        vertices: [[0, 0], [15, 0], [15, 15], [0, 15]],
        texture_addr: 0,
        width: 1,
        height: 1,
        color_depth: ColorDepth::Rgb555,
        color_bank: 0,
        lookup_addr: 0,
        blend,
        gouraud: None,
        flip: 0,
        transparent_pixel_enable: true,
        msb_on: false,
        mesh: false,
        end_code_disable: false,
        user_clip: UserClipMode::Disabled,
        screen: ScreenId::Sprite,
        priority,
    }
}

fn decode_one(cmd: &SpriteCommand, word: u16) -> u32 {
    let mut vram = vec![0u8; 0x100];
    vram[..2].copy_from_slice(&word.to_be_bytes());
    let cram = vec![0u8; 0x100];
    let px = vdp1::decode_sprite_pixels(
        cmd,
        &VramView::new(&vram),
        &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
    );
    px[0]
}

fn enabled_params() -> [LayerParams; LAYER_SLOTS] {
    let mut params = [LayerParams::default(); LAYER_SLOTS];
    for p in &mut params {
        p.window_a[0] = 1;
        p.window_b[2] = CC_REPLACE;
    }
    params
}

fn nbg_pixel(r: u32, g: u32, b: u32, priority: u8) -> u32 {
    r | (g << 8) | (b << 16) | (u32::from(priority) << 24)
}

fn quad(x: f32, y: f32, size: f32) -> QuadInput {
    QuadInput {
        vertices: [[x, y], [x + size, y], [x + size, y + size], [x, y + size]],
        atlas_x: 0,
        atlas_y: 0,
        width: 16,
        height: 16,
        flip: 0,
        gouraud: [[0.0; 4]; 4],
        perspective: false,
    }
}

fn key(blend: BlendStep) -> ProgramKey {
    ProgramKey {
        blend,
        screen: ScreenId::Sprite,
        user_clip: UserClipMode::Disabled,
        user_clip_rect: ClipRect::new(0, 0, 0, 0),
        system_clip: ClipRect::new(0, 0, 351, 223),
    }
}

#[test]
fn decoded_half_transparent_sprite_averages_with_the_layer_below() {
    let cmd = sprite(BlendStep::HalfTransparent, 5);
    let px = decode_one(&cmd, 0x801F); // opaque red
    let mut samples = [0u32; LAYER_SLOTS];
    samples[ScreenId::Sprite.index()] = px;
    samples[ScreenId::Nbg0.index()] = nbg_pixel(0, 0, 248, 2);
    let mut params = enabled_params();
    params[ScreenId::Sprite.index()].window_b[2] = CC_HALF_TRANSPARENT;
    let out = composite::composite_pixel(&samples, &params, 0);
    assert_eq!(out & 0xFF, 124, "red halves");
    assert_eq!((out >> 16) & 0xFF, 124, "half the blue below shows through");
}

#[test]
fn replace_sprite_ignores_the_layer_mode_without_the_per_dot_flag() {
    // A replace-step decode leaves the color-calc meta flag clear, so a
    // half-transparent layer mode must not fire for its dots.
    let cmd = sprite(BlendStep::Replace, 5);
    let px = decode_one(&cmd, 0x801F);
    let mut samples = [0u32; LAYER_SLOTS];
    samples[ScreenId::Sprite.index()] = px;
    samples[ScreenId::Nbg0.index()] = nbg_pixel(0, 248, 0, 2);
    let mut params = enabled_params();
    params[ScreenId::Sprite.index()].window_b[2] = CC_HALF_TRANSPARENT;
    let out = composite::composite_pixel(&samples, &params, 0);
    assert_eq!(out & 0x00FF_FFFF, px & 0x00FF_FFFF);
}

#[test]
fn msb_sprite_casts_a_shadow_instead_of_drawing() {
    let mut shadow_cmd = sprite(BlendStep::Replace, 7);
    shadow_cmd.msb_on = true;
    let shadow_px = decode_one(&shadow_cmd, 0x801F);

    // The background underneath is itself shadow-eligible sprite output.
    let mut below_cmd = sprite(BlendStep::Replace, 2);
    below_cmd.msb_on = true;
    below_cmd.screen = ScreenId::Nbg1;
    let below_px = decode_one(&below_cmd, 0xFFFF); // white-ish

    let mut samples = [0u32; LAYER_SLOTS];
    samples[ScreenId::Sprite.index()] = shadow_px;
    samples[ScreenId::Nbg1.index()] = below_px;
    let mut params = enabled_params();
    params[ScreenId::Sprite.index()].window_b[2] = CC_SHADOW;
    let out = composite::composite_pixel(&samples, &params, 0);
    assert_eq!(out & 0xFF, (below_px & 0xFF) / 2);
    assert_ne!(out & 0x00FF_FFFF, shadow_px & 0x00FF_FFFF);
}

#[test]
fn transparent_decode_falls_through_to_the_backdrop() {
    let cmd = sprite(BlendStep::Replace, 5);
    let px = decode_one(&cmd, 0x001F); // MSB clear: transparent dot
    assert_eq!(px, 0);
    let mut samples = [0u32; LAYER_SLOTS];
    samples[ScreenId::Sprite.index()] = px;
    let backdrop = nbg_pixel(9, 9, 9, 0);
    assert_eq!(
        composite::composite_pixel(&samples, &enabled_params(), backdrop),
        backdrop
    );
}

#[test]
fn expanded_quads_batch_into_one_program_per_blend() {
    let mut batches = BatchSystem::new();
    let a = expand_quad(&quad(0.0, 0.0, 16.0));
    let b = expand_quad(&quad(32.0, 0.0, 16.0));
    batches.push_quad(5, key(BlendStep::Replace), &a);
    batches.push_quad(5, key(BlendStep::Replace), &b);
    batches.push_quad(5, key(BlendStep::HalfLuminance), &a);
    let programs = batches.levels()[5].programs();
    assert_eq!(programs.len(), 2);
    let Program::Draw { vertices, .. } = &programs[0] else {
        panic!("expected a draw program");
    };
    assert_eq!(vertices.len(), 12, "two quads share the open program");
}

#[test]
fn tessellated_quads_carry_the_full_grid() {
    let mut input = quad(0.0, 0.0, 16.0);
    input.vertices[2] = [40.0, 18.0]; // distort one corner
    let verts = tessellate_quad(&input);
    assert_eq!(verts.len(), (TESS_GRID * TESS_GRID * 6) as usize);
    let mut batches = BatchSystem::new();
    batches.push_quad(3, key(BlendStep::Replace), &verts);
    assert_eq!(batches.levels()[3].vertex_count(), verts.len());
}

#[test]
fn window_tables_gate_layer_visibility() {
    let mut regs = WindowRegisters {
        areas: [
            WindowArea {
                start_x: 100,
                end_x: 200,
                start_y: 0,
                end_y: 223,
                line_table: None,
            },
            WindowArea {
                start_x: 0,
                end_x: 0,
                start_y: 0,
                end_y: 0,
                line_table: None,
            },
        ],
        control: [WindowControl::DISABLED; 7],
    };
    regs.control[ScreenId::Nbg0.index()] = WindowControl {
        w0_enable: true,
        w0_inside: true,
        w1_enable: false,
        w1_inside: true,
        op: WindowOp::Or,
    };
    let vram = vec![0u8; 0x1000];
    let mut tables = windows::WindowTables::new();
    tables.regenerate(&regs, &VramView::new(&vram), 640, 224);
    let nbg0 = &regs.control[ScreenId::Nbg0.index()];
    assert!(!windows::layer_visible(nbg0, &tables, 150, 10));
    assert!(windows::layer_visible(nbg0, &tables, 50, 10));
    // Layers with no window enabled never mask.
    let nbg1 = &regs.control[ScreenId::Nbg1.index()];
    assert!(windows::layer_visible(nbg1, &tables, 150, 10));
}

#[test]
fn line_state_diff_narrows_repeat_uploads() {
    let mut diff = line_state::LineStateDiff::new();
    let mut states = ScreenLineStates::uniform(ScreenId::Nbg0, LineState::default(), 224);

    let first = diff.update(&states);
    assert_eq!(first.len(), 1);
    assert_eq!((first[0].start, first[0].end), (0, 224));

    states.lines[100].priority = 7;
    let second = diff.update(&states);
    assert_eq!(second.len(), 1);
    assert_eq!((second[0].start, second[0].end), (100, 101));

    assert!(diff.update(&states).is_empty(), "unchanged lines re-upload nothing");
}

#[test]
fn decoded_cell_outranks_a_lower_priority_sprite() {
    let mut vram = vec![0u8; 0x100];
    vram[0x40] = 0x20; // first dot of the cell: palette index 2
    let mut cram = vec![0u8; 0x100];
    cram[0x24..0x26].copy_from_slice(&0x03E0u16.to_be_bytes()); // entry 0x12: green
    let req = vdp2::CellRequest {
        screen: ScreenId::Nbg0,
        char_addr: 0x40,
        depth: CellDepth::Palette16,
        palette: 1,
        color_offset: 0,
        flip: 0,
        transparent: true,
        priority: 6,
        color_calc: false,
        special_function: false,
        dest: [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]],
    };
    let texels = vdp2::decode_cell(
        &req,
        &VramView::new(&vram),
        &CramView::new(&cram, ColorRamMode::Rgb555Bank0),
    );
    let cell_px = texels[0];
    assert_eq!((cell_px >> 8) & 0xFF, 248, "green from the palette entry");

    let sprite_px = decode_one(&sprite(BlendStep::Replace, 2), 0x801F);
    let mut samples = [0u32; LAYER_SLOTS];
    samples[ScreenId::Nbg0.index()] = cell_px;
    samples[ScreenId::Sprite.index()] = sprite_px;
    let out = composite::composite_pixel(&samples, &enabled_params(), 0);
    assert_eq!(out & 0x00FF_FFFF, cell_px & 0x00FF_FFFF);
}

#[test]
fn placement_cache_survives_only_its_own_generation() {
    let fp = vdp1::texture_fingerprint(&sprite(BlendStep::Replace, 5));
    let placement = atlas::Placement {
        x: 0,
        y: 0,
        width: 16,
        height: 16,
    };
    let mut cache = atlas::PlacementCache::new();
    cache.reset(1);
    cache.register(1, fp, placement);
    assert_eq!(cache.lookup(1, fp), Some(placement));
    assert_eq!(cache.lookup(2, fp), None, "a grown atlas invalidates placements");
}
