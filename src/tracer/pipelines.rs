// Shader program manager.
//
// Compiles the five pass programs, splicing the shared preamble into each
// source and the active field's code into the trace template. The trace
// program is the only one with substitution; the rest are fixed. Any WGSL
// validation failure is fatal to the current reset and surfaced as
// RenderError::Compile.

use crate::error::{RenderError, RenderResult};

use super::ray_state::RAY_STATE_FORMAT;
use super::targets::{DISPLAY_FORMAT, HDR_FORMAT};

const COMMON_SRC: &str = include_str!("../shaders/common.wgsl");
const EMIT_SRC: &str = include_str!("../shaders/emit.wgsl");
const TRACE_TEMPLATE: &str = include_str!("../shaders/trace.wgsl");
const LINE_SRC: &str = include_str!("../shaders/line.wgsl");
const ACCUM_SRC: &str = include_str!("../shaders/accum.wgsl");
const COMPOSITE_SRC: &str = include_str!("../shaders/composite.wgsl");

const INCLUDE_TOKEN: &str = "#include \"common.wgsl\"";
const FIELD_TOKEN: &str = "//FIELD_CODE";
const REQUIRED_FIELD_FNS: [&str; 2] = ["fn field_sdf", "fn field_sample"];

const ADDITIVE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Splice the shared preamble into a pass source.
fn preprocess(source: &str) -> String {
    source.replace(INCLUDE_TOKEN, COMMON_SRC)
}

/// Substitute the field fragment into the trace template, validating the
/// contract before anything reaches the compiler.
fn substitute_field_code(template: &str, fragment: &str) -> RenderResult<String> {
    let occurrences = template.matches(FIELD_TOKEN).count();
    if occurrences != 1 {
        return Err(RenderError::compile(format!(
            "trace template must contain exactly one {FIELD_TOKEN} token, found {occurrences}"
        )));
    }
    for entry in REQUIRED_FIELD_FNS {
        if !fragment.contains(entry) {
            return Err(RenderError::compile(format!(
                "field shader fragment does not define `{entry}`"
            )));
        }
    }
    Ok(template.replacen(FIELD_TOKEN, fragment, 1))
}

/// All render pipelines for the wavefront passes, plus the bind group
/// layouts the orchestrator builds its per-frame bind groups from.
pub struct TracerPipelines {
    pub emit: wgpu::RenderPipeline,
    pub trace: wgpu::RenderPipeline,
    pub line: wgpu::RenderPipeline,
    pub accum: wgpu::RenderPipeline,
    pub composite: wgpu::RenderPipeline,

    pub emit_layout: wgpu::BindGroupLayout,
    pub trace_layout: wgpu::BindGroupLayout,
    pub field_layout: wgpu::BindGroupLayout,
    pub line_layout: wgpu::BindGroupLayout,
    pub accum_layout: wgpu::BindGroupLayout,
    pub composite_layout: wgpu::BindGroupLayout,
}

impl TracerPipelines {
    pub fn new(device: &wgpu::Device, field_fragment: &str) -> RenderResult<Self> {
        let trace_src = substitute_field_code(TRACE_TEMPLATE, field_fragment)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let emit_module = shader_module(device, "emit-shader", &preprocess(EMIT_SRC));
        let trace_module = shader_module(device, "trace-shader", &preprocess(&trace_src));
        let line_module = shader_module(device, "line-shader", &preprocess(LINE_SRC));
        let accum_module = shader_module(device, "accum-shader", &preprocess(ACCUM_SRC));
        let composite_module = shader_module(device, "composite-shader", &preprocess(COMPOSITE_SRC));

        let emit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("emit-bind-group-layout"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1, wgpu::ShaderStages::FRAGMENT),
                texture_entry(2, wgpu::ShaderStages::FRAGMENT),
                uniform_entry(3, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let trace_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("trace-bind-group-layout"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_entry(1, wgpu::ShaderStages::FRAGMENT),
                texture_entry(2, wgpu::ShaderStages::FRAGMENT),
                texture_entry(3, wgpu::ShaderStages::FRAGMENT),
                uniform_entry(4, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let field_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("field-bind-group-layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });
        let line_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("line-bind-group-layout"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::VERTEX),
                texture_entry(1, wgpu::ShaderStages::VERTEX),
                texture_entry(2, wgpu::ShaderStages::VERTEX),
                uniform_entry(3, wgpu::ShaderStages::VERTEX),
            ],
        });
        let accum_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("accum-bind-group-layout"),
            entries: &[texture_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-bind-group-layout"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::FRAGMENT),
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let ray_state_targets = [
            Some(color_target(RAY_STATE_FORMAT, None)),
            Some(color_target(RAY_STATE_FORMAT, None)),
            Some(color_target(RAY_STATE_FORMAT, None)),
            Some(color_target(RAY_STATE_FORMAT, None)),
        ];

        let emit = render_pipeline(
            device,
            "emit-pipeline",
            &[&emit_layout],
            &emit_module,
            &ray_state_targets,
            wgpu::PrimitiveTopology::TriangleList,
        );
        let trace = render_pipeline(
            device,
            "trace-pipeline",
            &[&trace_layout, &field_layout],
            &trace_module,
            &ray_state_targets,
            wgpu::PrimitiveTopology::TriangleList,
        );
        let line = render_pipeline(
            device,
            "line-pipeline",
            &[&line_layout],
            &line_module,
            &[Some(color_target(HDR_FORMAT, Some(ADDITIVE_BLEND)))],
            wgpu::PrimitiveTopology::LineList,
        );
        let accum = render_pipeline(
            device,
            "accum-pipeline",
            &[&accum_layout],
            &accum_module,
            &[Some(color_target(HDR_FORMAT, Some(ADDITIVE_BLEND)))],
            wgpu::PrimitiveTopology::TriangleList,
        );
        let composite = render_pipeline(
            device,
            "composite-pipeline",
            &[&composite_layout],
            &composite_module,
            &[Some(color_target(
                DISPLAY_FORMAT,
                Some(wgpu::BlendState::REPLACE),
            ))],
            wgpu::PrimitiveTopology::TriangleList,
        );

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::compile(err.to_string()));
        }

        Ok(Self {
            emit,
            trace,
            line,
            accum,
            composite,
            emit_layout,
            trace_layout,
            field_layout,
            line_layout,
            accum_layout,
            composite_layout,
        })
    }
}

fn shader_module(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.to_string().into()),
    })
}

fn texture_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn color_target(
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    }
}

fn render_pipeline(
    device: &wgpu::Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    module: &wgpu::ShaderModule,
    targets: &[Option<wgpu::ColorTargetState>],
    topology: wgpu::PrimitiveTopology,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: "fs_main",
            targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_is_spliced_into_every_source() {
        for src in [EMIT_SRC, TRACE_TEMPLATE, ACCUM_SRC, COMPOSITE_SRC] {
            let processed = preprocess(src);
            assert!(!processed.contains(INCLUDE_TOKEN));
            assert!(processed.contains("fn rand("));
        }
    }

    #[test]
    fn template_carries_exactly_one_field_token() {
        assert_eq!(TRACE_TEMPLATE.matches(FIELD_TOKEN).count(), 1);
    }

    #[test]
    fn substitution_replaces_the_token() {
        let fragment = "fn field_sdf(p: vec3<f32>) -> f32 { return 1.0; }\n\
                        fn field_sample() -> f32 { return 1.0; }";
        let out = substitute_field_code(TRACE_TEMPLATE, fragment).unwrap();
        assert!(!out.contains(FIELD_TOKEN));
        assert!(out.contains("fn field_sdf"));
    }

    #[test]
    fn fragment_missing_entry_points_is_rejected() {
        let err = substitute_field_code(TRACE_TEMPLATE, "fn something_else() {}").unwrap_err();
        assert!(err.to_string().contains("field_sdf"));
    }

    #[test]
    fn template_without_token_is_rejected() {
        let err = substitute_field_code("fn fs_main() {}", "fn field_sdf fn field_sample")
            .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }
}
