use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{RenderError, RenderResult};

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter: wgpu::Adapter,
}

static CTX: OnceCell<GpuContext> = OnceCell::new();

/// Device limits the wavefront passes need: the emission and trace passes
/// write all four Rgba32Float ray-state textures in one pass (64 bytes per
/// sample), above the 32-byte downlevel default.
pub fn required_limits() -> wgpu::Limits {
    wgpu::Limits {
        ..wgpu::Limits::downlevel_defaults()
    }
}

/// Process-wide device/queue singleton for embedders that do not manage
/// their own wgpu instance. Tests and the library itself take an explicit
/// device/queue instead.
pub fn ctx() -> RenderResult<&'static GpuContext> {
    CTX.get_or_try_init(|| {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::device("no suitable GPU adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: required_limits(),
                label: Some("gravlens-device"),
            },
            None,
        ))
        .map_err(|e| RenderError::device(format!("request_device failed: {e}")))?;

        Ok(GpuContext {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter,
        })
    })
}

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_row_alignment() {
        let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        assert_eq!(align_copy_bpr(1), a);
        assert_eq!(align_copy_bpr(a), a);
        assert_eq!(align_copy_bpr(a + 1), 2 * a);
    }

    #[test]
    fn mrt_limit_covers_ray_state() {
        // four Rgba32Float attachments = 4 * 16 bytes
        assert!(required_limits().max_color_attachment_bytes_per_sample >= 64);
    }
}
