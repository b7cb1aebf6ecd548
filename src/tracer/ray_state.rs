// Double-buffered ray-state storage for the wavefront.
//
// A generation is four equal-sized Rgba32Float textures: position (xyz +
// SDF-sign w), direction, rng state and color+wavelength. Exactly two
// generations exist; the orchestrator ping-pongs between them so a trace
// pass always reads one and writes the other.

use crate::error::{RenderError, RenderResult};

pub const RAY_STATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Exclusive upper bound of the per-lane rng seeds, matching the largest
/// modulus of the in-shader generator.
const RNG_SEED_MAX: f32 = 4194167.0;

pub struct RayState {
    size: u32,
    pub pos: wgpu::Texture,
    pub pos_view: wgpu::TextureView,
    pub dir: wgpu::Texture,
    pub dir_view: wgpu::TextureView,
    pub rng: wgpu::Texture,
    pub rng_view: wgpu::TextureView,
    pub rgbw: wgpu::Texture,
    pub rgbw_view: wgpu::TextureView,
}

impl RayState {
    /// Allocate and seed one generation of `size * size` rays.
    ///
    /// Direction starts as a fixed forward vector, color as independent
    /// random values per channel and the rng state as independent large
    /// random values per lane, so the per-ray pseudorandom streams are
    /// decorrelated from frame one.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, size: u32) -> RenderResult<Self> {
        let max_dim = device.limits().max_texture_dimension_2d;
        if size == 0 || size > max_dim {
            return Err(RenderError::target(format!(
                "ray grid size {size} outside device limits (1..={max_dim})"
            )));
        }

        let n = (size * size) as usize;
        let mut pos_data = vec![0.0f32; n * 4];
        let mut dir_data = vec![0.0f32; n * 4];
        let mut rng_data = vec![0.0f32; n * 4];
        let mut rgbw_data = vec![0.0f32; n * 4];
        for i in 0..n {
            pos_data[i * 4 + 3] = 1.0; // exterior until traced
            dir_data[i * 4] = 1.0;
            for lane in 0..4 {
                rng_data[i * 4 + lane] = fastrand::f32() * RNG_SEED_MAX;
                rgbw_data[i * 4 + lane] = fastrand::f32();
            }
        }

        let pos = state_texture(device, size, "ray-state-pos");
        let dir = state_texture(device, size, "ray-state-dir");
        let rng = state_texture(device, size, "ray-state-rng");
        let rgbw = state_texture(device, size, "ray-state-rgbw");
        upload(queue, &pos, size, &pos_data);
        upload(queue, &dir, size, &dir_data);
        upload(queue, &rng, size, &rng_data);
        upload(queue, &rgbw, size, &rgbw_data);

        let pos_view = pos.create_view(&wgpu::TextureViewDescriptor::default());
        let dir_view = dir.create_view(&wgpu::TextureViewDescriptor::default());
        let rng_view = rng.create_view(&wgpu::TextureViewDescriptor::default());
        let rgbw_view = rgbw.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            size,
            pos,
            pos_view,
            dir,
            dir_view,
            rng,
            rng_view,
            rgbw,
            rgbw_view,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// All four buffers as the simultaneous write targets of a
    /// multi-output pass.
    pub fn color_attachments(&self) -> [Option<wgpu::RenderPassColorAttachment<'_>>; 4] {
        [
            Some(attachment(&self.pos_view)),
            Some(attachment(&self.dir_view)),
            Some(attachment(&self.rng_view)),
            Some(attachment(&self.rgbw_view)),
        ]
    }
}

fn attachment(view: &wgpu::TextureView) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            store: wgpu::StoreOp::Store,
        },
    }
}

fn state_texture(device: &wgpu::Device, size: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: RAY_STATE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn upload(queue: &wgpu::Queue, texture: &wgpu::Texture, size: u32, data: &[f32]) {
    queue.write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(data),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(16 * size),
            rows_per_image: Some(size),
        },
        wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
    );
}

/// The two-generation ping-pong pair. All buffer-handle aliasing lives in
/// this accessor: a trace step reads `current()` and writes `next()`, then
/// `swap()` exchanges the roles.
pub struct RayStatePair {
    states: [RayState; 2],
    current: usize,
}

impl RayStatePair {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, size: u32) -> RenderResult<Self> {
        let a = RayState::new(device, queue, size)?;
        let b = RayState::new(device, queue, size)?;
        if a.size() != b.size() {
            return Err(RenderError::target(
                "ray-state generations disagree on grid size",
            ));
        }
        Ok(Self {
            states: [a, b],
            current: 0,
        })
    }

    pub fn size(&self) -> u32 {
        self.states[0].size()
    }

    pub fn slot(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &RayState {
        &self.states[self.current]
    }

    pub fn next(&self) -> &RayState {
        &self.states[self.current ^ 1]
    }

    pub fn state(&self, slot: usize) -> &RayState {
        &self.states[slot & 1]
    }

    pub fn swap(&mut self) {
        self.current ^= 1;
    }
}
