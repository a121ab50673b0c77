//! Per-device cache of compiled scaler pipelines.
//!
//! Storage-texture formats are part of a bind-group layout's signature, so
//! the cache is keyed by `(kernel, destination format)` and each entry owns
//! its layout alongside the pipeline. Pipeline creation runs inside a
//! validation error scope so shader/pipeline failures surface as `Err` rather
//! than a device loss.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::kernels::{kernel_wgsl, storage_format_token, KernelKind};

#[derive(Clone)]
pub struct KernelEntry {
    pub pipeline: Arc<wgpu::ComputePipeline>,
    pub bind_layout: Arc<wgpu::BindGroupLayout>,
}

/// Compiled kernel pipelines for one device, created lazily per
/// `(kernel, destination format)` pair and shared by every swapchain binding
/// of the session.
pub struct ScalerPipelines {
    device: Arc<wgpu::Device>,
    sampler: Arc<wgpu::Sampler>,
    entries: HashMap<(KernelKind, wgpu::TextureFormat), KernelEntry>,
}

impl ScalerPipelines {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        let sampler = Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("scaler linear clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));
        Self {
            device,
            sampler,
            entries: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn sampler(&self) -> &Arc<wgpu::Sampler> {
        &self.sampler
    }

    /// Fetch (or compile) the pipeline for `kind` writing to `dst_format`.
    pub fn get_or_create(
        &mut self,
        kind: KernelKind,
        dst_format: wgpu::TextureFormat,
    ) -> Result<KernelEntry> {
        if let Some(entry) = self.entries.get(&(kind, dst_format)) {
            return Ok(entry.clone());
        }

        let token = storage_format_token(dst_format).ok_or_else(|| {
            anyhow!("{dst_format:?} is not storage-writable by the scaler kernels")
        })?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kind.name()),
                source: wgpu::ShaderSource::Wgsl(kernel_wgsl(kind, token).into()),
            });

        let bind_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scaler kernel bindings"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: dst_format,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<crate::KernelParams>() as u64,
                            ),
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("scaler kernel layout"),
                bind_group_layouts: &[&bind_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kind.name()),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: "cs_main",
                compilation_options: Default::default(),
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(anyhow!(
                "compiling {} for {dst_format:?} failed: {err}",
                kind.name()
            ));
        }

        let entry = KernelEntry {
            pipeline: Arc::new(pipeline),
            bind_layout: Arc::new(bind_layout),
        };
        self.entries.insert((kind, dst_format), entry.clone());
        tracing::debug!(kernel = kind.name(), ?dst_format, "compiled scaler kernel");
        Ok(entry)
    }

    /// Number of compiled entries, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
