// Persistent accumulation targets and readback.
//
// The wave buffer collects one wavefront's segments per frame; the fluence
// buffer accumulates waves across frames and is cleared only on reset; the
// display buffer receives the composited image.

use half::f16;

use crate::error::{RenderError, RenderResult};
use crate::gpu::align_copy_bpr;

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

pub struct AccumulationTargets {
    width: u32,
    height: u32,
    pub wave: wgpu::Texture,
    pub wave_view: wgpu::TextureView,
    pub fluence: wgpu::Texture,
    pub fluence_view: wgpu::TextureView,
    pub display: wgpu::Texture,
    pub display_view: wgpu::TextureView,
}

impl AccumulationTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> RenderResult<Self> {
        let max_dim = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max_dim || height > max_dim {
            return Err(RenderError::target(format!(
                "target resolution {width}x{height} outside device limits (1..={max_dim})"
            )));
        }

        let wave = full_res_texture(device, width, height, HDR_FORMAT, "wave-buffer");
        let fluence = full_res_texture(device, width, height, HDR_FORMAT, "fluence-buffer");
        let display = full_res_texture(device, width, height, DISPLAY_FORMAT, "display-buffer");
        let wave_view = wave.create_view(&wgpu::TextureViewDescriptor::default());
        let fluence_view = fluence.create_view(&wgpu::TextureViewDescriptor::default());
        let display_view = display.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            width,
            height,
            wave,
            wave_view,
            fluence,
            fluence_view,
            display,
            display_view,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Composited display image as tightly packed RGBA8 rows.
    pub fn read_display(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> RenderResult<Vec<u8>> {
        read_texture(device, queue, &self.display, self.width, self.height, 4)
    }

    /// Raw fluence estimate as RGBA f32 rows, decoded from f16.
    pub fn read_fluence(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> RenderResult<Vec<f32>> {
        let bytes = read_texture(device, queue, &self.fluence, self.width, self.height, 8)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
            .collect())
    }
}

fn full_res_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    label: &str,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

/// Copy a texture into a staging buffer, map it and strip row padding.
fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
) -> RenderResult<Vec<u8>> {
    let unpadded_bpr = width * bytes_per_pixel;
    let padded_bpr = align_copy_bpr(unpadded_bpr);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback-staging"),
        size: padded_bpr as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| RenderError::readback("map_async channel closed"))?
        .map_err(|e| RenderError::readback(format!("buffer mapping failed: {e:?}")))?;

    let data = slice.get_mapped_range();
    let mut out = Vec::with_capacity((unpadded_bpr * height) as usize);
    for y in 0..height as usize {
        let row = y * padded_bpr as usize;
        out.extend_from_slice(&data[row..row + unpadded_bpr as usize]);
    }
    drop(data);
    staging.unmap();
    Ok(out)
}
