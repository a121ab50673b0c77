//! Per-swapchain scaler bindings.
//!
//! A [`ScalerBinding`] is the one active strategy for a swapchain: exactly one
//! variant exists per swapchain at any time, so "at most one scaler active"
//! is structural rather than a runtime convention. `Flat` carries no GPU
//! state; the other variants own a small parameter uniform and share compiled
//! pipelines through [`ScalerPipelines`].

use std::sync::Arc;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use crate::kernels::KernelKind;
use crate::pipelines::{KernelEntry, ScalerPipelines};

/// Uniform block consumed by every kernel. Layout mirrors the WGSL
/// `KernelParams` struct exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub src_size: [u32; 2],
    pub dst_size: [u32; 2],
    pub inv_dst_size: [f32; 2],
    pub sharpness: f32,
    pub _pad: f32,
}

impl KernelParams {
    pub fn new(sharpness: f32, src: (u32, u32), dst: (u32, u32)) -> Self {
        Self {
            src_size: [src.0, src.1],
            dst_size: [dst.0, dst.1],
            inv_dst_size: [1.0 / dst.0.max(1) as f32, 1.0 / dst.1.max(1) as f32],
            sharpness: sharpness.clamp(0.0, 1.0),
            _pad: 0.0,
        }
    }
}

/// One kernel instance: shared pipeline + private parameter buffer.
pub struct ScalePass {
    kind: KernelKind,
    entry: KernelEntry,
    sampler: Arc<wgpu::Sampler>,
    params_buf: wgpu::Buffer,
    params: KernelParams,
}

impl ScalePass {
    pub fn new(
        pipelines: &mut ScalerPipelines,
        kind: KernelKind,
        dst_format: wgpu::TextureFormat,
        sharpness: f32,
        src: (u32, u32),
        dst: (u32, u32),
    ) -> Result<Self> {
        let entry = pipelines.get_or_create(kind, dst_format)?;
        let params = KernelParams::new(sharpness, src, dst);
        let params_buf = pipelines.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("scaler params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let pass = Self {
            kind,
            entry,
            sampler: Arc::clone(pipelines.sampler()),
            params_buf,
            params,
        };
        Ok(pass)
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn params(&self) -> KernelParams {
        self.params
    }

    /// Upload the initial parameter contents. Split from construction so the
    /// caller controls which queue sees the write.
    pub fn upload_params(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&self.params));
    }

    fn retune(&mut self, queue: &wgpu::Queue, sharpness: f32, src: (u32, u32), dst: (u32, u32)) {
        let next = KernelParams::new(sharpness, src, dst);
        if next == self.params {
            return;
        }
        self.params = next;
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&next));
    }

    fn dispatch(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        dst_view: &wgpu::TextureView,
        timestamps: Option<wgpu::ComputePassTimestampWrites>,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scaler dispatch"),
            layout: &self.entry.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(dst_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.params_buf.as_entire_binding(),
                },
            ],
        });

        let [dst_w, dst_h] = self.params.dst_size;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.kind.name()),
            timestamp_writes: timestamps,
        });
        pass.set_pipeline(&self.entry.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dst_w.div_ceil(8), dst_h.div_ceil(8), 1);
        // Dropping the pass ends the scope; no compute-stage bindings survive
        // past this point.
    }
}

/// The single active strategy bound to a swapchain.
pub enum ScalerBinding {
    /// No compute pass; the passthrough draw samples the app texture.
    Flat,
    Bilinear(ScalePass),
    Sharpen(ScalePass),
    Upscale(ScalePass),
}

impl ScalerBinding {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScalerBinding::Flat => "flat",
            ScalerBinding::Bilinear(p) | ScalerBinding::Sharpen(p) | ScalerBinding::Upscale(p) => {
                p.kind().name()
            }
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, ScalerBinding::Flat)
    }

    fn pass(&self) -> Option<&ScalePass> {
        match self {
            ScalerBinding::Flat => None,
            ScalerBinding::Bilinear(p) | ScalerBinding::Sharpen(p) | ScalerBinding::Upscale(p) => {
                Some(p)
            }
        }
    }

    fn pass_mut(&mut self) -> Option<&mut ScalePass> {
        match self {
            ScalerBinding::Flat => None,
            ScalerBinding::Bilinear(p) | ScalerBinding::Sharpen(p) | ScalerBinding::Upscale(p) => {
                Some(p)
            }
        }
    }

    /// Current parameters, when a kernel is bound.
    pub fn params(&self) -> Option<KernelParams> {
        self.pass().map(|p| p.params())
    }

    /// Update kernel parameters. Safe to call every frame; a call with
    /// unchanged values does not touch the GPU.
    pub fn retune(
        &mut self,
        queue: &wgpu::Queue,
        sharpness: f32,
        src: (u32, u32),
        dst: (u32, u32),
    ) {
        if let Some(pass) = self.pass_mut() {
            pass.retune(queue, sharpness, src, dst);
        }
    }

    /// Record one compute invocation sized to the destination. A no-op for
    /// `Flat`. `timestamps`, when provided, is attached to the pass so the
    /// caller can time it; the binding itself never inspects the queries.
    pub fn dispatch(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src_view: &wgpu::TextureView,
        dst_view: &wgpu::TextureView,
        timestamps: Option<wgpu::ComputePassTimestampWrites>,
    ) {
        if let Some(pass) = self.pass() {
            pass.dispatch(device, encoder, src_view, dst_view, timestamps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_clamp_sharpness_and_invert_extents() {
        let p = KernelParams::new(1.5, (100, 50), (200, 100));
        assert_eq!(p.sharpness, 1.0);
        assert_eq!(p.src_size, [100, 50]);
        assert_eq!(p.dst_size, [200, 100]);
        assert!((p.inv_dst_size[0] - 1.0 / 200.0).abs() < f32::EPSILON);
        assert!((p.inv_dst_size[1] - 1.0 / 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn params_equality_detects_no_op_retunes() {
        let a = KernelParams::new(0.5, (100, 100), (200, 200));
        let b = KernelParams::new(0.5, (100, 100), (200, 200));
        let c = KernelParams::new(0.55, (100, 100), (200, 200));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn params_survive_zero_extents() {
        let p = KernelParams::new(0.5, (0, 0), (0, 0));
        assert!(p.inv_dst_size[0].is_finite());
        assert!(p.inv_dst_size[1].is_finite());
    }
}
