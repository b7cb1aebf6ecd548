//! Runtime configuration for the wavefront tracer.
//!
//! Cosmetic parameters (`exposure`, `gamma`, `segment_filter`) are applied
//! at composite/rasterize time and take effect on the next `render()` call
//! without a reset. Everything else is structural: changes must be followed
//! by `Raytracer::reset()` (or `resize()` for the output resolution) before
//! the next cycle, so buffer dimensions and compiled pipelines stay in sync.

use serde::{Deserialize, Serialize};

/// Which side of the field boundary the rasterize pass draws.
///
/// The trace pass stores the SDF sign of each segment start in the position
/// texture's w channel; the rasterizer kills segments on the wrong side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SegmentFilter {
    #[default]
    All,
    InteriorOnly,
    ExteriorOnly,
}

impl SegmentFilter {
    /// Value of the rasterize pass's `sgn` uniform: 0 draws everything,
    /// +1 keeps exterior segments, -1 keeps interior segments.
    pub fn sgn(self) -> f32 {
        match self {
            SegmentFilter::All => 0.0,
            SegmentFilter::ExteriorOnly => 1.0,
            SegmentFilter::InteriorOnly => -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Output resolution of the wave/fluence/display buffers.
    pub width: u32,
    pub height: u32,

    /// Side length of the square ray grid; the wavefront holds
    /// `ray_grid_size^2` rays.
    pub ray_grid_size: u32,

    /// Trace passes per frame (segments per ray path).
    pub max_num_steps: u32,

    /// Sphere-march iterations per trace pass.
    pub march_step_budget: u32,

    /// Maximum march distance per segment, in units of the field's length
    /// scale. Rays that exceed it terminate silently.
    pub march_distance: f32,

    /// Power-of-two display gain, applied at composite time only.
    pub exposure: f32,

    /// Display gamma, applied at composite time only.
    pub gamma: f32,

    /// Distance of the emitter disk from the origin, in length-scale units.
    pub emitter_distance: f32,

    /// Radius of the emitter disk cross-section, in length-scale units.
    pub emitter_radius: f32,

    /// Full cone angle of emitted directions, in degrees.
    pub emitter_spread: f32,

    /// Boundary-side filter for rasterized segments.
    pub segment_filter: SegmentFilter,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            ray_grid_size: 32,
            max_num_steps: 64,
            march_step_budget: 256,
            march_distance: 20.0,
            exposure: 3.0,
            gamma: 2.2,
            emitter_distance: 10.0,
            emitter_radius: 0.001,
            emitter_spread: 135.0,
            segment_filter: SegmentFilter::All,
        }
    }
}

impl TracerConfig {
    /// Rays per wavefront.
    pub fn ray_count(&self) -> u32 {
        self.ray_grid_size * self.ray_grid_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_startup_values() {
        let cfg = TracerConfig::default();
        assert_eq!(cfg.ray_grid_size, 32);
        assert_eq!(cfg.max_num_steps, 64);
        assert_eq!(cfg.ray_count(), 1024);
        assert_eq!(cfg.segment_filter, SegmentFilter::All);
    }

    #[test]
    fn segment_filter_sgn_mapping() {
        assert_eq!(SegmentFilter::All.sgn(), 0.0);
        assert_eq!(SegmentFilter::ExteriorOnly.sgn(), 1.0);
        assert_eq!(SegmentFilter::InteriorOnly.sgn(), -1.0);
    }

    #[test]
    fn config_serde_round_trip() {
        let cfg = TracerConfig {
            ray_grid_size: 64,
            segment_filter: SegmentFilter::InteriorOnly,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TracerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ray_grid_size, 64);
        assert_eq!(back.segment_filter, SegmentFilter::InteriorOnly);
    }
}
