//! Frame and resource lifecycle: the VDP1 framebuffer pair, manual
//! framebuffer read-back, and the resolution-sized GPU resources.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use atlas::{FenceWaitError, FrameFence, TEARDOWN_WAIT};
use vdp_protocol::MAX_SCANLINES;

const READBACK_POLL: Duration = Duration::from_micros(100);

/// One render target with its sampled view.
#[derive(Debug)]
pub struct LayerTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl LayerTarget {
    pub fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, layers: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

/// The double-buffered VDP1 framebuffer. `draw` receives this frame's
/// commands while `display` feeds the compositor; a swap waits out the
/// incoming draw target's previous GPU read before new data lands in it.
#[derive(Debug)]
pub struct FramebufferPair {
    targets: [LayerTarget; 2],
    fences: [Option<FrameFence>; 2],
    draw_index: usize,
}

impl FramebufferPair {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            targets: [
                LayerTarget::new(device, "vdp1 framebuffer 0", width, height, 1),
                LayerTarget::new(device, "vdp1 framebuffer 1", width, height, 1),
            ],
            fences: [None, None],
            draw_index: 0,
        }
    }

    pub fn draw_target(&self) -> &LayerTarget {
        &self.targets[self.draw_index]
    }

    pub fn display_target(&self) -> &LayerTarget {
        &self.targets[1 - self.draw_index]
    }

    /// Record that the current display target was read by this frame's
    /// composite submission.
    pub fn mark_display_read(&mut self, queue: &wgpu::Queue) {
        self.fences[1 - self.draw_index] = Some(FrameFence::record(queue));
    }

    /// Exchange draw and display. The new draw target's last GPU read
    /// must complete first; a timeout leaves the swap done anyway since
    /// the wait cap already exceeds the frame budget.
    pub fn swap(&mut self, device: &wgpu::Device) -> Result<(), FenceWaitError> {
        self.draw_index = 1 - self.draw_index;
        match self.fences[self.draw_index].take() {
            Some(mut fence) => fence.wait_for_frame(device),
            None => Ok(()),
        }
    }
}

/// Memoized CPU copy of the draw framebuffer for manual (direct VRAM
/// style) accesses. The first access in a frame pays for a synchronous
/// readback; later accesses hit the cache until the frame's VDP1 state
/// is dirtied again.
#[derive(Debug, Default)]
pub struct ManualFramebuffer {
    pixels: Vec<u8>,
    valid: bool,
}

impl ManualFramebuffer {
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn read(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &LayerTarget,
    ) -> Result<&[u8], FenceWaitError> {
        if self.valid {
            return Ok(&self.pixels);
        }
        let bytes_per_row = align_row(source.width * 4);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("manual framebuffer readback"),
            size: u64::from(bytes_per_row) * u64::from(source.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("manual framebuffer blit"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: source.width,
                height: source.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        let deadline = Instant::now() + TEARDOWN_WAIT;
        loop {
            let _ = device.poll(wgpu::PollType::Poll);
            match receiver.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(_)) => return Err(FenceWaitError::TimedOut),
                Err(mpsc::TryRecvError::Disconnected) => return Err(FenceWaitError::TimedOut),
                Err(mpsc::TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return Err(FenceWaitError::TimedOut);
                    }
                    std::thread::sleep(READBACK_POLL);
                }
            }
        }

        let mapped = buffer.slice(..).get_mapped_range();
        self.pixels.clear();
        let row_bytes = (source.width * 4) as usize;
        for row in 0..source.height as usize {
            let start = row * bytes_per_row as usize;
            self.pixels.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        buffer.unmap();
        self.valid = true;
        Ok(&self.pixels)
    }
}

fn align_row(bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    bytes.div_ceil(align) * align
}

/// Everything sized by the emulated resolution, rebuilt wholesale on a
/// resolution or upscale change.
#[derive(Debug)]
pub struct ResolutionResources {
    pub width: u32,
    pub height: u32,
    /// One array layer per screen slot (6 backgrounds + sprite).
    pub layer_array: LayerTarget,
    /// Single-layer render views into `layer_array`, one per slot.
    pub layer_views: Vec<wgpu::TextureView>,
    pub framebuffers: FramebufferPair,
    /// 512x2 R32Uint: one row per window, packed start/end per line.
    pub window_texture: wgpu::Texture,
    pub window_view: wgpu::TextureView,
    /// 512x7 RGBA32Uint: packed per-line state, one row per screen.
    pub line_texture: wgpu::Texture,
    pub line_view: wgpu::TextureView,
}

impl ResolutionResources {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let layer_array = LayerTarget::new(device, "screen layers", width, height, 7);
        let layer_views = (0..7)
            .map(|slot| {
                layer_array.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("screen layer slice"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: slot,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        let framebuffers = FramebufferPair::new(device, width, height);
        let window_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("window intervals"),
            size: wgpu::Extent3d {
                width: MAX_SCANLINES as u32,
                height: 2,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let window_view = window_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let line_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("per-line state"),
            size: wgpu::Extent3d {
                width: MAX_SCANLINES as u32,
                height: 7,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let line_view = line_texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            width,
            height,
            layer_array,
            layer_views,
            framebuffers,
            window_texture,
            window_view,
            line_texture,
            line_view,
        }
    }
}

/// Drain every outstanding submission before releasing resources.
pub fn drain_gpu(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), FenceWaitError> {
    FrameFence::record(queue).wait(device, TEARDOWN_WAIT)
}
