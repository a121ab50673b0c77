//! Layer-wide mutable state.
//!
//! Exactly one [`LayerShared`] exists per layer instance, owned behind a
//! mutex by the layer object and mutated only from intercepted call
//! handlers. Handlers for different swapchains can interleave only at call
//! granularity; nothing here is touched mid-frame from another thread.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;
use xrlift_api::types::{Extent2d, SessionHandle, SwapchainHandle};
use xrlift_scale::{KernelKind, ScalePass, ScalerBinding, ScalerPipelines};

use crate::capability::{SessionCapability, SharedPasses};
use crate::config::Config;
use crate::controls::ScalingMode;
use crate::resources::{SwapchainRecord, SwapchainRoute};
use crate::stats::{FrameStats, GpuTimer};

/// Per-session graphics state, created when a session resolves to a usable
/// device and destroyed with the session.
pub struct SessionState {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub capability: SessionCapability,
    /// `None` when shared-resource creation failed; the session then runs
    /// without upscaling and swapchains pass through.
    pub passes: Option<SharedPasses>,
    pub timer: Option<GpuTimer>,
}

#[derive(Default)]
pub struct LayerShared {
    pub config: Config,
    /// Sharpness requested by interactive controls; becomes
    /// `config.sharpness` once a retune has observed it.
    pub pending_sharpness: f32,
    pub mode: ScalingMode,
    /// Display resolution recorded at view-configuration enumeration.
    pub display: Option<Extent2d>,
    pub sessions: HashMap<SessionHandle, SessionState>,
    pub swapchains: HashMap<SwapchainHandle, SwapchainRecord>,
    pub stats: Option<FrameStats>,
}

impl LayerShared {
    pub fn new(config: Config) -> Self {
        let pending_sharpness = config.sharpness;
        let stats = config.enable_stats.then(FrameStats::new);
        Self {
            config,
            pending_sharpness,
            mode: ScalingMode::default(),
            display: None,
            sessions: HashMap::new(),
            swapchains: HashMap::new(),
            stats,
        }
    }
}

/// The format a swapchain's kernel writes through its storage view.
pub fn kernel_storage_format(
    route: SwapchainRoute,
    original_format: wgpu::TextureFormat,
    caps: &SessionCapability,
) -> wgpu::TextureFormat {
    match route {
        SwapchainRoute::Direct => original_format,
        SwapchainRoute::Alias | SwapchainRoute::Convert => caps.intermediate_format,
    }
}

/// Derive the one active scaler binding for a swapchain from the interactive
/// mode and the configured scale factor.
#[allow(clippy::too_many_arguments)]
pub fn select_binding(
    pipelines: &mut ScalerPipelines,
    queue: &wgpu::Queue,
    mode: ScalingMode,
    scaling: f32,
    sharpness: f32,
    storage_format: wgpu::TextureFormat,
    src: (u32, u32),
    dst: (u32, u32),
) -> Result<ScalerBinding> {
    let binding = match mode {
        ScalingMode::Flat => ScalerBinding::Flat,
        ScalingMode::Bilinear => {
            let pass = ScalePass::new(pipelines, KernelKind::Bilinear, storage_format, sharpness, src, dst)?;
            pass.upload_params(queue);
            ScalerBinding::Bilinear(pass)
        }
        ScalingMode::ContentAdaptive if scaling < 1.0 => {
            let pass = ScalePass::new(pipelines, KernelKind::Upscale, storage_format, sharpness, src, dst)?;
            pass.upload_params(queue);
            ScalerBinding::Upscale(pass)
        }
        ScalingMode::ContentAdaptive => {
            let pass = ScalePass::new(pipelines, KernelKind::Sharpen, storage_format, sharpness, src, dst)?;
            pass.upload_params(queue);
            ScalerBinding::Sharpen(pass)
        }
    };
    Ok(binding)
}

/// Re-derive every registered swapchain's binding after a mode change.
///
/// A swapchain whose rebind fails keeps its previous binding; scaling keeps
/// working in the old mode for it rather than dropping out.
pub fn rebind_swapchains(
    sessions: &mut HashMap<SessionHandle, SessionState>,
    swapchains: &mut HashMap<SwapchainHandle, SwapchainRecord>,
    mode: ScalingMode,
    scaling: f32,
    sharpness: f32,
) {
    for (handle, record) in swapchains.iter_mut() {
        let Some(state) = sessions.get_mut(&record.session) else {
            continue;
        };
        let Some(passes) = state.passes.as_mut() else {
            continue;
        };
        let storage_format =
            kernel_storage_format(record.route, record.original.format, &state.capability);
        match select_binding(
            &mut passes.pipelines,
            &state.queue,
            mode,
            scaling,
            sharpness,
            storage_format,
            record.source_extent(),
            record.target_extent(),
        ) {
            Ok(binding) => record.scaler = binding,
            Err(err) => {
                warn!(swapchain = handle.0, "keeping previous scaler binding: {err:#}");
            }
        }
    }
}
