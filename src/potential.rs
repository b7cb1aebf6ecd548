//! The potential-field contract consumed by the tracer, plus a bundled
//! demonstration field.
//!
//! A field supplies three things: its characteristic length scale, a WGSL
//! code fragment spliced into the trace-program template on every reset,
//! and a per-frame upload of its parameters into the uniform block the
//! trace pipeline reserves at group(1) binding(0).

use bytemuck::{Pod, Zeroable};

/// Size of the per-field uniform block, in bytes. Fields with fewer
/// parameters leave the tail unused.
pub const FIELD_PARAMS_SIZE: u64 = 256;

pub trait PotentialField {
    /// Characteristic length scale; march bounds and emitter geometry are
    /// expressed in units of this scale.
    fn length_scale(&self) -> f32;

    /// WGSL fragment substituted into the trace template. Must define
    /// `field_sdf` and `field_sample`; may declare a group(1) binding(0)
    /// uniform parameter block.
    fn shader_fragment(&self) -> String;

    /// Upload the current parameter values. Called once per frame before
    /// the integration loop, so panel edits land without a recompile.
    fn write_params(&self, queue: &wgpu::Queue, params: &wgpu::Buffer);
}

/// Smooth dielectric sphere with wavelength-dependent refraction.
///
/// Bundled both as the demo scene and as an end-to-end exercise of the
/// code-injection contract.
#[derive(Debug, Clone)]
pub struct SphereLens {
    pub radius: f32,
    pub ior: f32,
    /// Linear variation of the index of refraction across the visible
    /// range; positive values refract blue more strongly than red.
    pub dispersion: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SphereLensParams {
    radius: f32,
    ior: f32,
    dispersion: f32,
    _pad: f32,
}

impl Default for SphereLens {
    fn default() -> Self {
        Self {
            radius: 2.0,
            ior: 1.5,
            dispersion: 0.02,
        }
    }
}

impl PotentialField for SphereLens {
    fn length_scale(&self) -> f32 {
        self.radius
    }

    fn shader_fragment(&self) -> String {
        include_str!("shaders/sphere_lens.wgsl").to_string()
    }

    fn write_params(&self, queue: &wgpu::Queue, params: &wgpu::Buffer) {
        let block = SphereLensParams {
            radius: self.radius,
            ior: self.ior,
            dispersion: self.dispersion,
            _pad: 0.0,
        };
        queue.write_buffer(params, 0, bytemuck::bytes_of(&block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_lens_fragment_satisfies_contract() {
        let fragment = SphereLens::default().shader_fragment();
        assert!(fragment.contains("fn field_sdf"));
        assert!(fragment.contains("fn field_sample"));
        assert!(fragment.contains("@group(1) @binding(0)"));
    }

    #[test]
    fn params_block_fits_reserved_uniform() {
        assert!(std::mem::size_of::<SphereLensParams>() as u64 <= FIELD_PARAMS_SIZE);
    }
}
