//! Progressive GPU wavefront raytracer for light transport through
//! signed-distance-field potentials (e.g. gravitational lensing).
//!
//! A square grid of rays advances in lock-step through the field each
//! frame: an emission pass seeds the wavefront at a disk source, trace
//! passes sphere-march every ray one segment at a time while a rasterize
//! pass draws each segment additively into a wave buffer, and the wave is
//! folded into a persistent fluence estimate that the compositor
//! normalizes by the running ray count and tonemaps to the display image.
//! Frames accumulate until `reset()`, so the image is an unbiased
//! growing-sample-count Monte Carlo estimate.
//!
//! The field itself is injected: a [`PotentialField`] supplies its length
//! scale, a WGSL code fragment that is substituted into the trace-program
//! template on every reset, and its per-frame uniform values. See
//! [`SphereLens`] for a complete example.
//!
//! ```no_run
//! use gravlens::{Raytracer, SphereLens, TracerConfig};
//!
//! let ctx = gravlens::gpu::ctx()?;
//! let mut tracer = Raytracer::new(
//!     ctx.device.clone(),
//!     ctx.queue.clone(),
//!     TracerConfig::default(),
//! )?;
//! tracer.set_potential(Some(Box::new(SphereLens::default())))?;
//! for _ in 0..100 {
//!     tracer.render();
//! }
//! let image = tracer.read_display()?;
//! # Ok::<(), gravlens::RenderError>(())
//! ```

pub use wgpu;

pub mod camera;
pub mod config;
pub mod error;
pub mod gpu;
pub mod potential;
pub mod spectrum;
pub mod tracer;

pub use camera::Camera;
pub use config::{SegmentFilter, TracerConfig};
pub use error::{RenderError, RenderResult};
pub use potential::{PotentialField, SphereLens};
pub use spectrum::EmissionSpectrum;
pub use tracer::{Raytracer, RenderStats};
