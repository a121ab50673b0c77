//! Color-conversion / passthrough draw pass.
//!
//! Two situations end with a fullscreen draw into the runtime image instead
//! of (or after) the compute kernel:
//! - an indirect-format swapchain without runtime-level aliasing, where the
//!   kernel wrote the shared intermediate texture and this pass converts it
//!   into the runtime image's own format;
//! - flat passthrough mode, where the application texture is sampled
//!   directly so the user can A/B against the scaled output.
//!
//! The pass is a four-vertex triangle strip with a no-cull rasterizer state
//! and a linear-clamp sampler; render pipelines are cached per destination
//! format. All of it is compiled once per session during capability
//! negotiation.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

const CONVERT_WGSL: &str = r#"struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VsOut {
    let x = f32(vi & 1u);
    let y = f32(vi >> 1u);
    var out: VsOut;
    out.pos = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSampleLevel(src, samp, in.uv, 0.0);
}
"#;

pub struct ConvertPass {
    device: Arc<wgpu::Device>,
    module: wgpu::ShaderModule,
    bind_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<wgpu::TextureFormat, Arc<wgpu::RenderPipeline>>,
}

impl ConvertPass {
    /// Compile the shared conversion shader and fixed-function objects.
    pub fn new(device: Arc<wgpu::Device>) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("convert pass"),
            source: wgpu::ShaderSource::Wgsl(CONVERT_WGSL.into()),
        });
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("convert bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("convert layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("convert linear clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(anyhow!("compiling conversion pass failed: {err}"));
        }

        Ok(Self {
            device,
            module,
            bind_layout,
            pipeline_layout,
            sampler,
            pipelines: HashMap::new(),
        })
    }

    fn pipeline_for(&mut self, target: wgpu::TextureFormat) -> Result<Arc<wgpu::RenderPipeline>> {
        if let Some(pipeline) = self.pipelines.get(&target) {
            return Ok(Arc::clone(pipeline));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("convert"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: "fs_main",
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(anyhow!("convert pipeline for {target:?} failed: {err}"));
        }

        let pipeline = Arc::new(pipeline);
        self.pipelines.insert(target, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Record one fullscreen draw sampling `src_view` into `target_view`.
    pub fn record(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        target_view: &wgpu::TextureView,
        target_format: wgpu::TextureFormat,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) -> Result<()> {
        let pipeline = self.pipeline_for(target_format)?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("convert draw"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("convert"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: timestamps,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..4, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_shader_is_valid_wgsl() {
        let module = naga::front::wgsl::parse_str(CONVERT_WGSL)
            .unwrap_or_else(|err| panic!("convert WGSL parse failed: {err}"));
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        );
        validator
            .validate(&module)
            .unwrap_or_else(|err| panic!("convert WGSL validation failed: {err:?}"));
    }
}
