// Pipeline orchestrator for the wavefront integration engine.
//
// One render() call advances one wavefront: clear the wave buffer, emit a
// fresh ray generation, alternate trace and rasterize passes max_num_steps
// times while ping-ponging the two ray-state generations, fold the wave
// into the fluence estimate, then composite the normalized image. All
// passes are recorded on one encoder and submitted in program order; the
// ping-pong invariant guarantees no pass reads a texture it is writing.

mod pipelines;
mod ray_state;
mod targets;

pub use pipelines::TracerPipelines;
pub use ray_state::{RayState, RayStatePair, RAY_STATE_FORMAT};
pub use targets::{AccumulationTargets, DISPLAY_FORMAT, HDR_FORMAT};

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::camera::Camera;
use crate::config::TracerConfig;
use crate::error::RenderResult;
use crate::potential::{PotentialField, FIELD_PARAMS_SIZE};
use crate::spectrum::{EmissionSpectrum, SpectrumTextures};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EmitUniforms {
    emitter_pos: [f32; 3],
    emitter_radius: f32,
    emitter_dir: [f32; 3],
    emitter_spread: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TraceUniforms {
    length_scale: f32,
    min_march: f32,
    max_march: f32,
    march_steps: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LineUniforms {
    view_proj: [[f32; 4]; 4],
    sgn: f32,
    grid_size: u32,
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CompositeUniforms {
    inv_num_rays: f32,
    exposure: f32,
    inv_gamma: f32,
    _pad: f32,
}

/// Rendering statistics since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub ray_count: u64,
    pub waves_traced: u64,
    pub max_num_steps: u32,
}

struct UniformBuffers {
    emit: wgpu::Buffer,
    trace: wgpu::Buffer,
    line: wgpu::Buffer,
    composite: wgpu::Buffer,
    field: wgpu::Buffer,
}

impl UniformBuffers {
    fn new(device: &wgpu::Device) -> Self {
        let create = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        Self {
            emit: create("emit-uniforms", std::mem::size_of::<EmitUniforms>() as u64),
            trace: create("trace-uniforms", std::mem::size_of::<TraceUniforms>() as u64),
            line: create("line-uniforms", std::mem::size_of::<LineUniforms>() as u64),
            composite: create(
                "composite-uniforms",
                std::mem::size_of::<CompositeUniforms>() as u64,
            ),
            field: create("field-uniforms", FIELD_PARAMS_SIZE),
        }
    }
}

/// Per-reset bind groups. The two-element arrays are indexed by the slot a
/// pass reads from, so the swap never touches a bind group's contents.
struct FrameBindGroups {
    emit: [wgpu::BindGroup; 2],
    trace: [wgpu::BindGroup; 2],
    line: [wgpu::BindGroup; 2],
    field: wgpu::BindGroup,
    accum: wgpu::BindGroup,
    composite: wgpu::BindGroup,
}

pub struct Raytracer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: TracerConfig,
    camera: Camera,
    potential: Option<Box<dyn PotentialField>>,
    spectrum: EmissionSpectrum,
    spectrum_tex: SpectrumTextures,
    ubos: UniformBuffers,
    targets: AccumulationTargets,
    states: RayStatePair,
    pipelines: Option<TracerPipelines>,
    binds: Option<FrameBindGroups>,
    rays_traced: u64,
    waves_traced: u64,
    path_length: u32,
    enabled: bool,
}

impl Raytracer {
    /// Create a tracer with no potential field bound; `render()` is a
    /// no-op until one is injected via `set_potential`.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: TracerConfig,
    ) -> RenderResult<Self> {
        let mut camera = Camera::default();
        camera.set_aspect(config.width, config.height);
        let spectrum = EmissionSpectrum::flat();
        let spectrum_tex = spectrum.upload(&device, &queue);
        let ubos = UniformBuffers::new(&device);
        let targets = AccumulationTargets::new(&device, config.width, config.height)?;
        let states = RayStatePair::new(&device, &queue, config.ray_grid_size)?;

        let mut tracer = Self {
            device,
            queue,
            config,
            camera,
            potential: None,
            spectrum,
            spectrum_tex,
            ubos,
            targets,
            states,
            pipelines: None,
            binds: None,
            rays_traced: 0,
            waves_traced: 0,
            path_length: 0,
            enabled: true,
        };
        tracer.reset()?;
        Ok(tracer)
    }

    /// The single authoritative start-over: recompiles every program,
    /// reallocates and reseeds both ray-state generations, clears the
    /// fluence estimate and zeros all counters. There is no partial reset;
    /// cosmetic parameters (exposure, gamma, segment filter) do not need
    /// one.
    ///
    /// On failure the previous pipelines are discarded and `render()`
    /// no-ops until a later reset succeeds.
    pub fn reset(&mut self) -> RenderResult<()> {
        self.rays_traced = 0;
        self.waves_traced = 0;
        self.path_length = 0;
        self.pipelines = None;
        self.binds = None;

        self.states = RayStatePair::new(&self.device, &self.queue, self.config.ray_grid_size)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reset-encoder"),
            });
        clear_target(&mut encoder, &self.targets.fluence_view, "clear-fluence-pass");
        clear_target(&mut encoder, &self.targets.display_view, "clear-display-pass");
        self.queue.submit([encoder.finish()]);

        let Some(field) = self.potential.as_deref() else {
            log::debug!("reset: no potential field bound, skipping shader compilation");
            return Ok(());
        };

        let pipelines = TracerPipelines::new(&self.device, &field.shader_fragment())?;
        let binds = build_bind_groups(
            &self.device,
            &pipelines,
            &self.states,
            &self.spectrum_tex,
            &self.targets,
            &self.ubos,
        );
        self.pipelines = Some(pipelines);
        self.binds = Some(binds);

        log::info!(
            "reset: grid {0}x{0}, {1} steps/wave, {2}x{3} target",
            self.config.ray_grid_size,
            self.config.max_num_steps,
            self.targets.width(),
            self.targets.height()
        );
        Ok(())
    }

    /// Reallocate the full-resolution buffers for a new output size, then
    /// perform a full reset.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.config.width = width;
        self.config.height = height;
        self.camera.set_aspect(width, height);
        self.targets = AccumulationTargets::new(&self.device, width, height)?;
        self.reset()
    }

    /// Advance one wavefront and redraw the display image. Silently
    /// skipped while disabled, while no potential field is bound, or after
    /// a failed reset.
    pub fn render(&mut self) {
        let Self {
            device,
            queue,
            config,
            camera,
            potential,
            ubos,
            targets,
            states,
            pipelines,
            binds,
            rays_traced,
            waves_traced,
            path_length,
            enabled,
            ..
        } = self;

        if !*enabled {
            return;
        }
        let Some(field) = potential.as_deref() else {
            log::trace!("render skipped: no potential field");
            return;
        };
        let (Some(pipelines), Some(binds)) = (pipelines.as_ref(), binds.as_ref()) else {
            log::trace!("render skipped: pipelines not built");
            return;
        };

        let scale = field.length_scale();
        let ray_count = config.ray_count() as u64;
        let total_rays = *rays_traced + ray_count;

        // Per-frame uniform sync, field parameters included
        queue.write_buffer(
            &ubos.emit,
            0,
            bytemuck::bytes_of(&EmitUniforms {
                emitter_pos: [scale * config.emitter_distance, 0.0, 0.0],
                emitter_radius: scale * config.emitter_radius,
                emitter_dir: [-1.0, 0.0, 0.0],
                emitter_spread: config.emitter_spread,
            }),
        );
        queue.write_buffer(
            &ubos.trace,
            0,
            bytemuck::bytes_of(&TraceUniforms {
                length_scale: scale,
                min_march: 1.0e-5 * scale,
                max_march: config.march_distance * scale,
                march_steps: config.march_step_budget,
            }),
        );
        queue.write_buffer(
            &ubos.line,
            0,
            bytemuck::bytes_of(&LineUniforms {
                view_proj: camera.view_proj().to_cols_array_2d(),
                sgn: config.segment_filter.sgn(),
                grid_size: config.ray_grid_size,
                _pad: [0.0; 2],
            }),
        );
        queue.write_buffer(
            &ubos.composite,
            0,
            bytemuck::bytes_of(&CompositeUniforms {
                inv_num_rays: 1.0 / total_rays.max(1) as f32,
                exposure: config.exposure,
                inv_gamma: 1.0 / config.gamma,
                _pad: 0.0,
            }),
        );
        field.write_params(queue, &ubos.field);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("wavefront-frame"),
        });

        // Clear the wave buffer
        clear_target(&mut encoder, &targets.wave_view, "clear-wave-pass");

        // Emit a fresh wavefront into the next generation, seeded from the
        // current generation's rng state, then promote it to current.
        {
            let attachments = states.next().color_attachments();
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("emit-pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipelines.emit);
            pass.set_bind_group(0, &binds.emit[states.slot()], &[]);
            pass.draw(0..3, 0..1);
        }
        states.swap();

        // Integrate the wavefront: trace into next, rasterize the motion
        // segments of current -> next, swap.
        while *path_length < config.max_num_steps {
            {
                let attachments = states.next().color_attachments();
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("trace-pass"),
                    color_attachments: &attachments,
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&pipelines.trace);
                pass.set_bind_group(0, &binds.trace[states.slot()], &[]);
                pass.set_bind_group(1, &binds.field, &[]);
                pass.draw(0..3, 0..1);
            }
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("rasterize-pass"),
                    color_attachments: &[Some(load_attachment(&targets.wave_view))],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&pipelines.line);
                pass.set_bind_group(0, &binds.line[states.slot()], &[]);
                pass.draw(0..config.ray_count() * 2, 0..1);
            }
            states.swap();
            *path_length += 1;
        }

        // Fold the wave into the fluence estimate
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("accumulate-pass"),
                color_attachments: &[Some(load_attachment(&targets.fluence_view))],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipelines.accum);
            pass.set_bind_group(0, &binds.accum, &[]);
            pass.draw(0..3, 0..1);
        }

        // Composite the normalized fluence to the display target
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.display_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipelines.composite);
            pass.set_bind_group(0, &binds.composite, &[]);
            pass.draw(0..3, 0..1);
        }

        queue.submit([encoder.finish()]);

        *rays_traced = total_rays;
        *waves_traced += 1;
        *path_length = 0;
        log::trace!("wave {} traced ({} rays total)", waves_traced, rays_traced);
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            ray_count: self.rays_traced,
            waves_traced: self.waves_traced,
            max_num_steps: self.config.max_num_steps,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Inject (or remove) the potential field; performs a full reset so
    /// the trace program picks up the field's code fragment.
    pub fn set_potential(&mut self, field: Option<Box<dyn PotentialField>>) -> RenderResult<()> {
        self.potential = field;
        self.reset()
    }

    pub fn potential(&self) -> Option<&dyn PotentialField> {
        self.potential.as_deref()
    }

    /// Swap the emission spectrum; performs a full reset so the emission
    /// pass binds the fresh lookup tables.
    pub fn set_spectrum(&mut self, spectrum: EmissionSpectrum) -> RenderResult<()> {
        self.spectrum_tex = spectrum.upload(&self.device, &self.queue);
        self.spectrum = spectrum;
        self.reset()
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Mutable access to the configuration. Cosmetic fields apply on the
    /// next `render()`; structural fields require `reset()`/`resize()`.
    pub fn config_mut(&mut self) -> &mut TracerConfig {
        &mut self.config
    }

    /// Which ping-pong slot currently holds the `current` generation.
    pub fn current_slot(&self) -> usize {
        self.states.slot()
    }

    /// Ray-state generation in the given ping-pong slot, for inspection.
    pub fn ray_state(&self, slot: usize) -> &RayState {
        self.states.state(slot)
    }

    /// Trace steps completed within the current frame; always 0 between
    /// `render()` calls.
    pub fn path_length(&self) -> u32 {
        self.path_length
    }

    pub fn display_view(&self) -> &wgpu::TextureView {
        &self.targets.display_view
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.targets.width(), self.targets.height())
    }

    /// Composited display image as tightly packed RGBA8 rows.
    pub fn read_display(&self) -> RenderResult<Vec<u8>> {
        self.targets.read_display(&self.device, &self.queue)
    }

    /// Raw fluence estimate (RGBA f32), linear and un-normalized.
    pub fn read_fluence(&self) -> RenderResult<Vec<f32>> {
        self.targets.read_fluence(&self.device, &self.queue)
    }
}

fn clear_target(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, label: &str) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

fn load_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        },
    }
}

fn build_bind_groups(
    device: &wgpu::Device,
    pipelines: &TracerPipelines,
    states: &RayStatePair,
    spectrum: &SpectrumTextures,
    targets: &AccumulationTargets,
    ubos: &UniformBuffers,
) -> FrameBindGroups {
    let tex = wgpu::BindingResource::TextureView;

    let emit = [0usize, 1].map(|slot| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("emit-bind-group"),
            layout: &pipelines.emit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tex(&states.state(slot).rng_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tex(&spectrum.icdf_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: tex(&spectrum.rgb_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: ubos.emit.as_entire_binding(),
                },
            ],
        })
    });

    let trace = [0usize, 1].map(|slot| {
        let state = states.state(slot);
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("trace-bind-group"),
            layout: &pipelines.trace_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tex(&state.pos_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tex(&state.dir_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: tex(&state.rng_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: tex(&state.rgbw_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: ubos.trace.as_entire_binding(),
                },
            ],
        })
    });

    // Segment endpoints: A is the generation being read (pre-step
    // positions), B the one being written (post-step positions).
    let line = [0usize, 1].map(|slot| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("line-bind-group"),
            layout: &pipelines.line_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: tex(&states.state(slot).pos_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: tex(&states.state(slot ^ 1).pos_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: tex(&states.state(slot).rgbw_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: ubos.line.as_entire_binding(),
                },
            ],
        })
    });

    let field = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("field-bind-group"),
        layout: &pipelines.field_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: ubos.field.as_entire_binding(),
        }],
    });

    let accum = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("accum-bind-group"),
        layout: &pipelines.accum_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: tex(&targets.wave_view),
        }],
    });

    let composite = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("composite-bind-group"),
        layout: &pipelines.composite_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: tex(&targets.fluence_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: ubos.composite.as_entire_binding(),
            },
        ],
    });

    FrameBindGroups {
        emit,
        trace,
        line,
        field,
        accum,
        composite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<EmitUniforms>(), 32);
        assert_eq!(std::mem::size_of::<TraceUniforms>(), 16);
        assert_eq!(std::mem::size_of::<LineUniforms>(), 80);
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 16);
    }

    #[test]
    fn field_block_holds_any_pod_params() {
        assert!(FIELD_PARAMS_SIZE >= 64);
        assert_eq!(FIELD_PARAMS_SIZE % 16, 0);
    }
}
