//! Per-frame orchestration.
//!
//! The submission thread drives one frame as: `begin_frame`, a stream
//! of `queue_sprite` / `queue_rotation_layer` calls, `flush_layer` per
//! background, `flush_batches`, then `composite` and `swap_framebuffers`.
//! Decode jobs run on the worker pool; everything touching the GPU
//! happens here.

use std::sync::Arc;

use log::warn;

use atlas::{AtlasMapError, FenceWaitError, Placement};
use vdp_protocol::{
    BlendStep, ColorRamMode, CramView, MAX_SCANLINES, RendererConfig, RotationRegisters,
    ScreenId, ScreenLineStates, SpecialFunctionSelect, SpriteCommand, SpriteKind, UserClipMode,
    VramView, WindowRegisters, WindowSource,
};

use crate::batch::{ClipRect, Program, ProgramKey};
use crate::geometry::{QuadInput, expand_quad, tessellate_quad};
use crate::lifecycle::{ResolutionResources, drain_gpu};
use crate::vdp2::{CELL_EDGE, CellRequest};
use crate::workers::DecodedLayer;
use crate::{DrawUniforms, RenderBackend, Vertex, init, vdp1, vdp2};

/// Immutable per-frame snapshot handed in by the emulation layer.
pub struct FrameInput<'a> {
    pub vdp1_vram: VramView<'a>,
    pub vdp2_vram: VramView<'a>,
    pub cram: CramView<'a>,
    pub window_regs: WindowRegisters,
    pub backdrop: u32,
}

impl RenderBackend {
    /// Open a frame: recycle the atlases and caches, regenerate window
    /// tables, and map the staging surfaces for this frame's decodes.
    pub fn begin_frame(&mut self, input: &FrameInput<'_>) -> Result<(), AtlasMapError> {
        self.cache.sprite_atlas.maybe_compact(&self.gpu.device);
        self.cache.cell_atlas.maybe_compact(&self.gpu.device);
        self.cache.sprite_atlas.reset();
        self.cache.cell_atlas.reset();
        self.cache
            .sprite_cache
            .reset(self.cache.sprite_atlas.generation());
        self.cache
            .cell_cache
            .reset(self.cache.cell_atlas.generation());
        self.frame.batches.reset();
        self.cache.sprite_atlas.pull(&self.gpu.device)?;
        self.cache.cell_atlas.pull(&self.gpu.device)?;

        // Window and line tables live in native dot space; the shader
        // divides scaled fragment coordinates back down.
        let scale = init::resolution_scale(self.cfg.config.resolution);
        let native_w = self.gpu.resolution.width / scale;
        let native_h = self.gpu.resolution.height / scale;
        self.frame
            .windows
            .regenerate(&input.window_regs, &input.vdp2_vram, native_w, native_h);
        for (slot, control) in input.window_regs.control.iter().enumerate() {
            let p = &mut self.frame.composite_uniforms.layers[slot];
            p.window_a[1] = control.w0_enable as u32;
            p.window_a[2] = control.w0_inside as u32;
            p.window_a[3] = control.w1_enable as u32;
            p.window_b[0] = control.w1_inside as u32;
            p.window_b[1] = matches!(control.op, vdp_protocol::WindowOp::And) as u32;
        }
        self.frame.composite_uniforms.screen = [native_w, native_h, input.backdrop, scale];
        Ok(())
    }

    /// Per-layer compositing controls not derived from window registers:
    /// enable, color-calc mode + ratio, mosaic block size, rgb-direct.
    pub fn set_layer_params(
        &mut self,
        screen: ScreenId,
        enabled: bool,
        color_calc: u32,
        ratio: u32,
        mosaic: (u32, u32),
    ) {
        let p = &mut self.frame.composite_uniforms.layers[screen.index()];
        p.window_a[0] = enabled as u32;
        p.window_b[2] = color_calc;
        p.window_b[3] = ratio;
        p.mosaic[0] = mosaic.0.max(1);
        p.mosaic[1] = mosaic.1.max(1);
    }

    /// Latch the VDP1 user clipping rectangle (user clip set command).
    pub fn set_user_clip(&mut self, rect: ClipRect) {
        self.frame.user_clip_rect = rect;
    }

    /// Latch the VDP1 system clipping rectangle.
    pub fn set_system_clip(&mut self, rect: ClipRect) {
        self.frame.system_clip = rect;
    }

    fn program_key(&self, cmd: &SpriteCommand) -> ProgramKey {
        let user_clip = match cmd.user_clip {
            UserClipMode::Outside => {
                // Scissoring can only keep the inside of a rect; the
                // outside mode degrades to no clipping.
                warn!("vdp1: outside user clip unsupported, drawing unclipped");
                UserClipMode::Disabled
            }
            mode => mode,
        };
        ProgramKey {
            blend: cmd.blend,
            screen: cmd.screen,
            user_clip,
            user_clip_rect: self.frame.user_clip_rect,
            system_clip: self.frame.system_clip,
        }
    }

    /// Queue one VDP1 command. Textured parts decode through the sprite
    /// atlas (cache hit skips the decode); untextured parts rasterize a
    /// single flat texel.
    pub fn queue_sprite(&mut self, cmd: &SpriteCommand, input: &FrameInput<'_>) {
        self.frame.manual_fb.invalidate();
        let placement = if cmd.is_textured() {
            if cmd.width == 0 || cmd.height == 0 {
                vdp1::degrade(cmd, "zero-sized texture");
                return;
            }
            let fingerprint = vdp1::texture_fingerprint(cmd);
            let generation = self.cache.sprite_atlas.generation();
            match self.cache.sprite_cache.lookup(generation, fingerprint) {
                Some(placement) => placement,
                None => {
                    let pixels = vdp1::decode_sprite_pixels(cmd, &input.vdp1_vram, &input.cram);
                    let placement = self.cache.sprite_atlas.allocate(
                        &self.gpu.device,
                        &self.gpu.queue,
                        cmd.width,
                        cmd.height,
                    );
                    self.cache.sprite_atlas.write_rect(placement, &pixels);
                    self.cache.sprite_cache.register(
                        self.cache.sprite_atlas.generation(),
                        fingerprint,
                        placement,
                    );
                    placement
                }
            }
        } else {
            let Some(color) = vdp1::solid_color(cmd, &input.cram) else {
                return;
            };
            let placement =
                self.cache
                    .sprite_atlas
                    .allocate(&self.gpu.device, &self.gpu.queue, 1, 1);
            self.cache.sprite_atlas.write_rect(placement, &[color]);
            placement
        };
        self.push_command_quads(cmd, placement);
    }

    fn push_command_quads(&mut self, cmd: &SpriteCommand, placement: Placement) {
        let key = self.program_key(cmd);
        let gouraud = cmd
            .gouraud
            .as_ref()
            .map(vdp1::gouraud_deltas)
            .unwrap_or_default();
        let corners = |v: &[[i32; 2]; 4]| {
            [
                [v[0][0] as f32, v[0][1] as f32],
                [v[1][0] as f32, v[1][1] as f32],
                [v[2][0] as f32, v[2][1] as f32],
                [v[3][0] as f32, v[3][1] as f32],
            ]
        };
        let quads: Vec<[[f32; 2]; 4]> = match cmd.kind {
            SpriteKind::Polyline => edge_quads(&corners(&cmd.vertices), true),
            SpriteKind::Line => {
                edge_quads(&[corners(&cmd.vertices)[0], corners(&cmd.vertices)[1]], false)
            }
            _ => vec![corners(&cmd.vertices)],
        };
        let distorted = matches!(cmd.kind, SpriteKind::DistortedSprite | SpriteKind::Polygon);
        for vertices in quads {
            let quad = QuadInput {
                vertices,
                atlas_x: placement.x,
                atlas_y: placement.y,
                width: placement.width,
                height: placement.height,
                flip: cmd.flip,
                gouraud,
                perspective: distorted && !self.cfg.tessellate,
            };
            let grew = if distorted && self.cfg.tessellate {
                let verts = tessellate_quad(&quad);
                self.frame.batches.push_quad(cmd.priority, key, &verts)
            } else {
                let verts = expand_quad(&quad);
                self.frame.batches.push_quad(cmd.priority, key, &verts)
            };
            if grew {
                // The buffer moved; pending placements may be stale.
                self.cache
                    .sprite_cache
                    .reset(self.cache.sprite_atlas.generation());
            }
        }
    }

    /// Queue one normal-background tile quad. The cell decodes into the
    /// cell atlas on first sight; repeats across tiles and frames are
    /// cache hits.
    pub fn queue_cell(&mut self, req: &CellRequest, input: &FrameInput<'_>) {
        let fingerprint = vdp2::cell_fingerprint(req);
        let generation = self.cache.cell_atlas.generation();
        let placement = match self.cache.cell_cache.lookup(generation, fingerprint) {
            Some(placement) => placement,
            None => {
                let pixels = vdp2::decode_cell(req, &input.vdp2_vram, &input.cram);
                let placement = self.cache.cell_atlas.allocate(
                    &self.gpu.device,
                    &self.gpu.queue,
                    CELL_EDGE,
                    CELL_EDGE,
                );
                self.cache.cell_atlas.write_rect(placement, &pixels);
                self.cache.cell_cache.register(
                    self.cache.cell_atlas.generation(),
                    fingerprint,
                    placement,
                );
                placement
            }
        };
        let quad = QuadInput {
            vertices: req.dest,
            atlas_x: placement.x,
            atlas_y: placement.y,
            width: placement.width,
            height: placement.height,
            flip: req.flip,
            gouraud: [[0.0; 4]; 4],
            perspective: false,
        };
        let key = ProgramKey {
            blend: BlendStep::Replace,
            screen: req.screen,
            user_clip: UserClipMode::Disabled,
            user_clip_rect: ClipRect::new(0, 0, 0, 0),
            system_clip: ClipRect::new(0, 0, 0, 0),
        };
        if self
            .frame
            .batches
            .push_quad(req.priority, key, &expand_quad(&quad))
        {
            self.cache
                .cell_cache
                .reset(self.cache.cell_atlas.generation());
        }
    }

    /// Dispatch a rotation background's per-scanline sampling to the
    /// worker pool. Snapshots are shared, not copied per job.
    #[allow(clippy::too_many_arguments)]
    pub fn queue_rotation_layer(
        &mut self,
        screen: ScreenId,
        lines: Vec<RotationRegisters>,
        vram: Arc<Vec<u8>>,
        cram: Arc<Vec<u8>>,
        cram_mode: ColorRamMode,
        width: u32,
        window: Option<(WindowSource, Vec<u32>)>,
        special: SpecialFunctionSelect,
    ) {
        self.workers.pool.submit(screen, move || {
            let vram_view = VramView::new(&vram);
            let cram_view = CramView::new(&cram, cram_mode);
            let mut sampler =
                rbg::RbgSampler::new(vram_view, cram_view).with_special_function(special);
            if let Some((source, table)) = &window {
                sampler = sampler.with_window(rbg::RotationWindow {
                    table: table.as_slice(),
                    active_inside: source.inside,
                });
            }
            let layer = sampler.render(&lines, width);
            DecodedLayer {
                screen,
                width: layer.width,
                height: layer.height,
                pixels: layer.pixels,
                line_colors: layer.line_colors,
            }
        });
    }

    /// Join a layer's decode jobs and upload the results into its slot
    /// of the layer array texture. Returns the layer's per-scanline
    /// line-color indices for the caller to fold into its line states.
    pub fn flush_layer(&mut self, screen: ScreenId) -> Vec<u8> {
        let mut line_colors = Vec::new();
        for layer in self.workers.pool.collect_layer(screen) {
            self.upload_layer(&layer);
            if !layer.line_colors.is_empty() {
                line_colors = layer.line_colors;
            }
        }
        line_colors
    }

    fn upload_layer(&self, layer: &DecodedLayer) {
        let width = layer.width.min(self.gpu.resolution.width);
        let height = layer.height.min(self.gpu.resolution.height);
        if width == 0 || height == 0 {
            return;
        }
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.gpu.resolution.layer_array.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer.screen.index() as u32,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&layer.pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(layer.width * 4),
                rows_per_image: Some(layer.height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload all batched geometry and draw every level, ascending. A
    /// program's screen picks its target: sprite programs land in the
    /// VDP1 draw framebuffer, tile programs in their background's slice
    /// of the layer array. One GPU draw per program.
    pub fn flush_batches(&mut self) {
        self.cache
            .sprite_atlas
            .push(&self.gpu.device, &self.gpu.queue);
        self.cache
            .cell_atlas
            .push(&self.gpu.device, &self.gpu.queue);

        // Gather every program's vertices into one contiguous upload.
        let mut staging: Vec<Vertex> = Vec::new();
        for level in self.frame.batches.levels() {
            for program in level.programs() {
                if let Program::Draw { vertices, .. } = program {
                    staging.extend_from_slice(vertices);
                }
            }
        }
        if staging.is_empty() {
            self.frame.batches.reset();
            return;
        }
        if staging.len() > self.gpu.vertex_capacity {
            let capacity = staging.len().next_power_of_two();
            self.gpu.vertex_buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("renderer.vertices"),
                size: (capacity * std::mem::size_of::<Vertex>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.gpu.vertex_capacity = capacity;
            self.cache
                .sprite_cache
                .reset(self.cache.sprite_atlas.generation());
            self.cache
                .cell_cache
                .reset(self.cache.cell_atlas.generation());
        }
        self.gpu
            .queue
            .write_buffer(&self.gpu.vertex_buffer, 0, bytemuck::cast_slice(&staging));

        let sampler = if self.cfg.filter_linear {
            &self.gpu.sampler_linear
        } else {
            &self.gpu.sampler_nearest
        };
        let make_bind = |label, view| {
            self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.gpu.draw_bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.gpu.draw_uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        };
        let sprite_bind = make_bind("renderer.sprite_bind", self.cache.sprite_atlas.view());
        let cell_bind = make_bind("renderer.cell_bind", self.cache.cell_atlas.view());

        // All batched coordinates are native dots. The sprite
        // framebuffer scales them up through the full viewport; layer
        // slices render into their native-sized corner.
        let scale = init::resolution_scale(self.cfg.config.resolution);
        let native_w = self.gpu.resolution.width / scale;
        let native_h = self.gpu.resolution.height / scale;
        let transform = [2.0 / native_w as f32, 2.0 / native_h as f32, -1.0, -1.0];
        let mut cleared = [false; 8];
        let mut vertex_offset: u64 = 0;
        let mut scissor: Option<ClipRect> = None;

        for level in self.frame.batches.levels() {
            for program in level.programs() {
                match program {
                    Program::SetUserClip(rect) => scissor = Some(*rect),
                    Program::ClearUserClip => scissor = None,
                    Program::Draw { key, vertices } => {
                        let count = vertices.len() as u32;
                        if count == 0 {
                            continue;
                        }
                        self.gpu.queue.write_buffer(
                            &self.gpu.draw_uniform_buffer,
                            0,
                            bytemuck::bytes_of(&DrawUniforms {
                                transform,
                                mode: [
                                    matches!(
                                        key.blend,
                                        BlendStep::Gouraud
                                            | BlendStep::GouraudHalfLuminance
                                            | BlendStep::GouraudHalfTransparent
                                    ) as u32,
                                    matches!(
                                        key.blend,
                                        BlendStep::HalfLuminance
                                            | BlendStep::GouraudHalfLuminance
                                    ) as u32,
                                    0,
                                    0,
                                ],
                            }),
                        );
                        let sprite_target = key.screen == ScreenId::Sprite;
                        let (target_slot, view) = if sprite_target {
                            (7, &self.gpu.resolution.framebuffers.draw_target().view)
                        } else {
                            let slot = key.screen.index();
                            (slot, &self.gpu.resolution.layer_views[slot])
                        };
                        let mut encoder = self.gpu.device.create_command_encoder(
                            &wgpu::CommandEncoderDescriptor {
                                label: Some("renderer.batch_pass"),
                            },
                        );
                        {
                            let mut pass =
                                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                                    label: Some("renderer.batch_pass"),
                                    color_attachments: &[Some(
                                        wgpu::RenderPassColorAttachment {
                                            view,
                                            depth_slice: None,
                                            resolve_target: None,
                                            ops: wgpu::Operations {
                                                load: if cleared[target_slot] {
                                                    wgpu::LoadOp::Load
                                                } else {
                                                    wgpu::LoadOp::Clear(
                                                        wgpu::Color::TRANSPARENT,
                                                    )
                                                },
                                                store: wgpu::StoreOp::Store,
                                            },
                                        },
                                    )],
                                    depth_stencil_attachment: None,
                                    timestamp_writes: None,
                                    occlusion_query_set: None,
                                    multiview_mask: None,
                                });
                            if !sprite_target {
                                pass.set_viewport(
                                    0.0,
                                    0.0,
                                    native_w as f32,
                                    native_h as f32,
                                    0.0,
                                    1.0,
                                );
                            }
                            let half = matches!(
                                key.blend,
                                BlendStep::HalfTransparent | BlendStep::GouraudHalfTransparent
                            );
                            pass.set_pipeline(if half {
                                &self.gpu.draw_pipeline_half_transparent
                            } else {
                                &self.gpu.draw_pipeline
                            });
                            if half {
                                pass.set_blend_constant(wgpu::Color {
                                    r: 0.5,
                                    g: 0.5,
                                    b: 0.5,
                                    a: 0.5,
                                });
                            }
                            let clip =
                                effective_scissor(scissor, &key.system_clip, native_w, native_h);
                            let clip = if sprite_target {
                                (clip.0 * scale, clip.1 * scale, clip.2 * scale, clip.3 * scale)
                            } else {
                                clip
                            };
                            pass.set_scissor_rect(clip.0, clip.1, clip.2, clip.3);
                            pass.set_bind_group(
                                0,
                                if sprite_target { &sprite_bind } else { &cell_bind },
                                &[],
                            );
                            let start = vertex_offset * std::mem::size_of::<Vertex>() as u64;
                            let end =
                                start + u64::from(count) * std::mem::size_of::<Vertex>() as u64;
                            pass.set_vertex_buffer(0, self.gpu.vertex_buffer.slice(start..end));
                            pass.draw(0..count, 0..1);
                        }
                        self.gpu.queue.submit(Some(encoder.finish()));
                        cleared[target_slot] = true;
                        vertex_offset += u64::from(count);
                    }
                }
            }
        }
        self.frame.batches.reset();
        self.cache.sprite_atlas.mark_gpu_read(&self.gpu.queue);
        self.cache.cell_atlas.mark_gpu_read(&self.gpu.queue);
    }

    /// Upload dirty per-line state rows for one screen.
    pub fn upload_line_states(&mut self, states: &ScreenLineStates) {
        let ranges = self.frame.line_diff.update(states);
        for range in ranges {
            let mut texels: Vec<[u32; 4]> = Vec::with_capacity(range.len());
            for state in &states.lines[range.start..range.end] {
                let x = (state.color_offset_r as u16 as u32)
                    | ((state.color_offset_g as u16 as u32) << 16);
                let y = (state.color_offset_b as u16 as u32)
                    | ((u32::from(state.priority) | (u32::from(state.color_calc_ratio) << 8))
                        << 16);
                texels.push([x, y, 0, 0]);
            }
            self.gpu.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.gpu.resolution.line_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: range.start as u32,
                        y: states.screen.index() as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&texels),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(range.len() as u32 * 16),
                    rows_per_image: None,
                },
                wgpu::Extent3d {
                    width: range.len() as u32,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    /// Run the composite pass into `target` (an Rgba8Unorm render
    /// attachment) and record the GPU reads this frame performed.
    pub fn composite(&mut self, target: &wgpu::TextureView) {
        if self.frame.windows.take_dirty() {
            let mut rows = Vec::with_capacity(2 * MAX_SCANLINES);
            rows.extend_from_slice(self.frame.windows.table(0));
            rows.extend_from_slice(self.frame.windows.table(1));
            self.gpu.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.gpu.resolution.window_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&rows),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(MAX_SCANLINES as u32 * 4),
                    rows_per_image: Some(MAX_SCANLINES as u32),
                },
                wgpu::Extent3d {
                    width: MAX_SCANLINES as u32,
                    height: 2,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.gpu.queue.write_buffer(
            &self.gpu.composite_uniform_buffer,
            0,
            bytemuck::bytes_of(&self.frame.composite_uniforms),
        );

        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("renderer.composite_bind"),
            layout: &self.gpu.composite_bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.gpu.composite_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        &self.gpu.resolution.layer_array.view,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.gpu.resolution.window_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&self.gpu.resolution.line_view),
                },
            ],
        });

        let mut encoder =
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("renderer.composite_pass"),
                });
        // The displayed VDP1 framebuffer is layer slot 6.
        let display = self.gpu.resolution.framebuffers.display_target();
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &display.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.gpu.resolution.layer_array.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: ScreenId::Sprite.index() as u32,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: display.width,
                height: display.height,
                depth_or_array_layers: 1,
            },
        );
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("renderer.composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.gpu.composite_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        self.gpu
            .resolution
            .framebuffers
            .mark_display_read(&self.gpu.queue);
    }

    /// Exchange the VDP1 draw and display framebuffers at frame change.
    pub fn swap_framebuffers(&mut self) -> Result<(), FenceWaitError> {
        self.frame.manual_fb.invalidate();
        self.gpu.resolution.framebuffers.swap(&self.gpu.device)
    }

    /// CPU copy of the VDP1 draw framebuffer for manual access, memoized
    /// until the next draw or swap.
    pub fn manual_framebuffer(&mut self) -> Result<&[u8], FenceWaitError> {
        self.frame.manual_fb.read(
            &self.gpu.device,
            &self.gpu.queue,
            self.gpu.resolution.framebuffers.draw_target(),
        )
    }

    /// Apply a new configuration; resolution-affecting changes tear down
    /// and rebuild every resolution-sized resource.
    pub fn apply_config(&mut self, config: RendererConfig) -> Result<(), FenceWaitError> {
        let old_scale = init::resolution_scale(self.cfg.config.resolution);
        self.cfg = init::reconcile_config(config);
        let new_scale = init::resolution_scale(self.cfg.config.resolution);
        if new_scale != old_scale {
            drain_gpu(&self.gpu.device, &self.gpu.queue)?;
            let native_w = self.gpu.resolution.width / old_scale;
            let native_h = self.gpu.resolution.height / old_scale;
            self.gpu.resolution =
                ResolutionResources::new(&self.gpu.device, native_w * new_scale, native_h * new_scale);
            self.frame.line_diff.invalidate();
            self.frame.manual_fb.invalidate();
        }
        Ok(())
    }

    /// The emulated resolution changed; rebuild resolution-sized
    /// resources at the configured scale.
    pub fn set_native_resolution(&mut self, width: u32, height: u32) -> Result<(), FenceWaitError> {
        let scale = init::resolution_scale(self.cfg.config.resolution);
        if (width * scale, height * scale) == (self.gpu.resolution.width, self.gpu.resolution.height)
        {
            return Ok(());
        }
        drain_gpu(&self.gpu.device, &self.gpu.queue)?;
        self.gpu.resolution =
            ResolutionResources::new(&self.gpu.device, width * scale, height * scale);
        self.frame.line_diff.invalidate();
        self.frame.manual_fb.invalidate();
        Ok(())
    }
}

/// Intersect the active user clip with the system clip, clamped to the
/// target.
fn effective_scissor(
    user: Option<ClipRect>,
    system: &ClipRect,
    width: u32,
    height: u32,
) -> (u32, u32, u32, u32) {
    let mut x0 = system.x0.max(0);
    let mut y0 = system.y0.max(0);
    let mut x1 = if system.x1 > 0 { system.x1 } else { width as i32 };
    let mut y1 = if system.y1 > 0 { system.y1 } else { height as i32 };
    if let Some(u) = user {
        x0 = x0.max(u.x0);
        y0 = y0.max(u.y0);
        x1 = x1.min(u.x1 + 1);
        y1 = y1.min(u.y1 + 1);
    }
    let x0 = (x0 as u32).min(width);
    let y0 = (y0 as u32).min(height);
    let x1 = (x1.max(0) as u32).min(width);
    let y1 = (y1.max(0) as u32).min(height);
    (x0, y0, x1.saturating_sub(x0).max(1), y1.saturating_sub(y0).max(1))
}

/// Expand a point chain into one-pixel-wide quads, one per edge. The
/// hardware draws lines as degenerate textured parts; a thin quad is
/// the raster equivalent.
fn edge_quads(points: &[[f32; 2]], closed: bool) -> Vec<[[f32; 2]; 4]> {
    let mut quads = Vec::new();
    let n = points.len();
    if n < 2 {
        return quads;
    }
    let edges = if closed { n } else { n - 1 };
    for i in 0..edges {
        let a = points[i];
        let b = points[(i + 1) % n];
        let dx = b[0] - a[0];
        let dy = b[1] - a[1];
        let len = (dx * dx + dy * dy).sqrt();
        let (nx, ny) = if len > 0.0 {
            (-dy / len, dx / len)
        } else {
            (0.0, 1.0)
        };
        quads.push([
            a,
            b,
            [b[0] + nx, b[1] + ny],
            [a[0] + nx, a[1] + ny],
        ]);
    }
    quads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_intersects_user_and_system_clip() {
        let system = ClipRect::new(0, 0, 320, 224);
        let (x, y, w, h) = effective_scissor(
            Some(ClipRect::new(16, 16, 63, 63)),
            &system,
            320,
            224,
        );
        assert_eq!((x, y, w, h), (16, 16, 48, 48));
    }

    #[test]
    fn scissor_without_user_clip_is_the_system_clip() {
        let system = ClipRect::new(0, 0, 320, 224);
        assert_eq!(effective_scissor(None, &system, 640, 480), (0, 0, 320, 224));
    }

    #[test]
    fn polyline_closes_its_outline() {
        let points = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert_eq!(edge_quads(&points, true).len(), 4);
        assert_eq!(edge_quads(&points[..2], false).len(), 1);
    }

    #[test]
    fn line_quads_have_unit_thickness() {
        let quads = edge_quads(&[[0.0, 0.0], [8.0, 0.0]], false);
        let q = quads[0];
        // Horizontal line: the offset edge sits one pixel below.
        assert_eq!(q[3][1] - q[0][1], 1.0);
        assert_eq!(q[0], [0.0, 0.0]);
        assert_eq!(q[1], [8.0, 0.0]);
    }
}
