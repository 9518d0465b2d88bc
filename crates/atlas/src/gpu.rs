//! GPU surface behind an atlas: texture plus mappable staging buffer.

use std::sync::{Mutex, mpsc};

use crate::{
    AtlasCreateError, AtlasMapError, COMPACTION_LIMIT, TEXEL_BYTES,
    cache::Placement,
    cursor::{AllocOutcome, AtlasCursor},
    fence::{FenceWaitError, FrameFence},
};

pub struct Atlas {
    label: &'static str,
    cursor: AtlasCursor,
    initial_width: u32,
    initial_height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    /// Serializes staging writes from the hardware-emulation thread
    /// against uploads and remaps from the submission thread.
    staging_lock: Mutex<()>,
    mapped: bool,
    /// Bumped whenever GPU-side storage may have moved; placement caches
    /// key on this.
    generation: u64,
    /// Fence recorded after the last submission sampling this texture.
    pending_read: Option<FrameFence>,
}

impl Atlas {
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        width: u32,
        height: u32,
    ) -> Result<Self, AtlasCreateError> {
        if width == 0 || height == 0 {
            return Err(AtlasCreateError::ZeroSized);
        }
        let limit = device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(AtlasCreateError::ExceedsDeviceLimit {
                requested: width.max(height),
                limit,
            });
        }
        let (texture, view, staging) = create_surface(device, label, width, height);
        Ok(Self {
            label,
            cursor: AtlasCursor::new(width, height),
            initial_width: width,
            initial_height: height,
            texture,
            view,
            staging,
            staging_lock: Mutex::new(()),
            mapped: false,
            generation: 0,
            pending_read: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.cursor.width()
    }

    pub fn height(&self) -> u32 {
        self.cursor.height()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Rewind the allocation cursor. Start-of-frame invariant: the same
    /// allocation sequence then reproduces the same placements.
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// Record that the current texture contents are being read by the
    /// submission just made on `queue`.
    pub fn mark_gpu_read(&mut self, queue: &wgpu::Queue) {
        self.pending_read = Some(FrameFence::record(queue));
    }

    /// Bump-allocate a rectangle, growing the surface as needed. Growth
    /// preserves already-placed pixels, so returned placements stay valid
    /// for the rest of the frame. Exhaustion is recovered here and never
    /// surfaces to the caller.
    pub fn allocate(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
    ) -> Placement {
        loop {
            match self.cursor.allocate(width, height) {
                AllocOutcome::Placed { x, y } => {
                    return Placement {
                        x,
                        y,
                        width,
                        height,
                    };
                }
                AllocOutcome::NeedsGrowth {
                    width: new_width,
                    height: new_height,
                } => {
                    self.grow(device, queue, new_width, new_height);
                }
            }
        }
    }

    /// Map the staging buffer for CPU writes, waiting out any GPU work
    /// that still reads the surface being replaced.
    pub fn pull(&mut self, device: &wgpu::Device) -> Result<(), AtlasMapError> {
        if self.mapped {
            return Ok(());
        }
        if let Some(mut fence) = self.pending_read.take() {
            match fence.wait_for_frame(device) {
                Ok(()) => {}
                Err(FenceWaitError::TimedOut) => return Err(AtlasMapError::FenceTimedOut),
            }
        }
        let _guard = self
            .staging_lock
            .lock()
            .expect("atlas staging lock poisoned");
        map_for_write(device, &self.staging)?;
        self.mapped = true;
        Ok(())
    }

    /// Copy decoded pixels into a placement. Requires a prior `pull()`.
    /// Row-major `pixels`, exactly `placement.width * placement.height`
    /// texels.
    pub fn write_rect(&self, placement: Placement, pixels: &[u32]) {
        assert!(self.mapped, "atlas staging written while unmapped");
        assert_eq!(
            pixels.len() as u32,
            placement.width * placement.height,
            "pixel slice does not match placement extent"
        );
        let _guard = self
            .staging_lock
            .lock()
            .expect("atlas staging lock poisoned");
        let pitch = u64::from(self.cursor.width()) * u64::from(TEXEL_BYTES);
        let row_bytes = u64::from(placement.width) * u64::from(TEXEL_BYTES);
        for row in 0..placement.height {
            let offset = u64::from(placement.y + row) * pitch
                + u64::from(placement.x) * u64::from(TEXEL_BYTES);
            let mut view = self
                .staging
                .slice(offset..offset + row_bytes)
                .get_mapped_range_mut();
            let src = &pixels[(row * placement.width) as usize..][..placement.width as usize];
            view.copy_from_slice(bytemuck::cast_slice(src));
        }
    }

    /// Unmap the staging buffer and upload every written row, then rewind
    /// the cursor for the next frame's allocations.
    pub fn push(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let watermark = self.cursor.watermark();
        {
            let _guard = self
                .staging_lock
                .lock()
                .expect("atlas staging lock poisoned");
            if self.mapped {
                self.staging.unmap();
                self.mapped = false;
            }
        }
        if watermark > 0 {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(self.label),
            });
            encoder.copy_buffer_to_texture(
                wgpu::TexelCopyBufferInfo {
                    buffer: &self.staging,
                    layout: staging_layout(self.cursor.width()),
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: self.cursor.width(),
                    height: watermark,
                    depth_or_array_layers: 1,
                },
            );
            queue.submit(Some(encoder.finish()));
        }
        self.cursor.reset();
    }

    /// Shrink an overgrown atlas back to its initial size. Only legal at
    /// a frame boundary (cursor rewound, nothing placed yet): placements
    /// do not survive compaction, so the generation moves on.
    pub fn maybe_compact(&mut self, device: &wgpu::Device) {
        if self.cursor.width() <= COMPACTION_LIMIT && self.cursor.height() <= COMPACTION_LIMIT {
            return;
        }
        assert_eq!(
            self.cursor.watermark(),
            0,
            "atlas compaction attempted mid-frame"
        );
        assert!(!self.mapped, "atlas compaction attempted while mapped");
        let (texture, view, staging) =
            create_surface(device, self.label, self.initial_width, self.initial_height);
        self.texture = texture;
        self.view = view;
        self.staging = staging;
        self.cursor = AtlasCursor::new(self.initial_width, self.initial_height);
        self.generation += 1;
    }

    /// Replace the surface with a larger one, copying existing content
    /// before the old storage is released. Dropping the old surface
    /// without the copy would lose every placement made earlier this
    /// frame, so the copy is a postcondition of growth, not an
    /// optimization.
    fn grow(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32) {
        let old_width = self.cursor.width();
        let old_height = self.cursor.height();
        let was_mapped = self.mapped;
        {
            let _guard = self
                .staging_lock
                .lock()
                .expect("atlas staging lock poisoned");
            if self.mapped {
                self.staging.unmap();
                self.mapped = false;
            }
        }

        let (texture, view, staging) = create_surface(device, self.label, width, height);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.label),
        });
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: old_width,
                height: old_height.min(height),
                depth_or_array_layers: 1,
            },
        );
        if width == old_width {
            encoder.copy_buffer_to_buffer(
                &self.staging,
                0,
                &staging,
                0,
                u64::from(old_width) * u64::from(old_height.min(height)) * u64::from(TEXEL_BYTES),
            );
        } else {
            // Row pitch changed; rows move one at a time.
            let old_pitch = u64::from(old_width) * u64::from(TEXEL_BYTES);
            let new_pitch = u64::from(width) * u64::from(TEXEL_BYTES);
            for row in 0..old_height.min(height) {
                encoder.copy_buffer_to_buffer(
                    &self.staging,
                    u64::from(row) * old_pitch,
                    &staging,
                    u64::from(row) * new_pitch,
                    old_pitch,
                );
            }
        }
        queue.submit(Some(encoder.finish()));

        self.texture = texture;
        self.view = view;
        self.staging = staging;
        self.cursor.resize(width, height);
        self.generation += 1;

        if was_mapped {
            // The copy wrote into the new staging buffer; it must finish
            // before the buffer can be remapped.
            let mut copy_done = FrameFence::record(queue);
            copy_done
                .wait_for_frame(device)
                .expect("atlas growth copy did not complete");
            let _guard = self
                .staging_lock
                .lock()
                .expect("atlas staging lock poisoned");
            map_for_write(device, &self.staging).expect("remap grown atlas staging");
            self.mapped = true;
        }
    }
}

fn staging_layout(width: u32) -> wgpu::TexelCopyBufferLayout {
    wgpu::TexelCopyBufferLayout {
        offset: 0,
        bytes_per_row: Some(width * TEXEL_BYTES),
        rows_per_image: None,
    }
}

fn create_surface(
    device: &wgpu::Device,
    label: &'static str,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView, wgpu::Buffer) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: u64::from(width) * u64::from(height) * u64::from(TEXEL_BYTES),
        usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    (texture, view, staging)
}

fn map_for_write(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<(), AtlasMapError> {
    let (sender, receiver) = mpsc::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Write, move |result| {
        let _ = sender.send(result);
    });
    loop {
        let _ = device.poll(wgpu::PollType::Poll);
        match receiver.try_recv() {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(_)) | Err(mpsc::TryRecvError::Disconnected) => {
                return Err(AtlasMapError::MapFailed);
            }
            Err(mpsc::TryRecvError::Empty) => std::thread::sleep(std::time::Duration::from_micros(50)),
        }
    }
}
