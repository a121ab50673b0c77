//! The interception layer itself.
//!
//! [`UpscalerLayer`] implements the same [`XrRuntime`] trait as the runtime
//! it wraps, so from the application's side the chain is indistinguishable
//! from an unlayered runtime. Every override follows one shape: call the
//! recorded downstream implementation first, post-process only on success,
//! and return the downstream code unmodified. Local failures (device
//! objects, shader compilation) degrade the affected swapchain or session to
//! passthrough; they are never surfaced as failures of the intercepted call.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use xrlift_api::chain::{
    chain_then, ApiLayerCreateInfo, ApiLayerRequest, NegotiateLoaderInfo, StructureType,
    API_LAYER_CREATE_INFO_STRUCT_VERSION, API_LAYER_NEXT_INFO_STRUCT_VERSION,
    API_LAYER_REQUEST_STRUCT_VERSION, CURRENT_API_VERSION, CURRENT_LOADER_INTERFACE_VERSION,
    LOADER_INFO_STRUCT_VERSION,
};
use xrlift_api::types::{
    Extent2d, FrameEndInfo, GraphicsBinding, InstanceCreateInfo, SessionCreateInfo, SessionHandle,
    SwapchainCreateInfo, SwapchainHandle, SwapchainImage, SystemId, ViewConfigurationType,
    ViewConfigurationView,
};
use xrlift_api::{CallId, ErrorCode, InterceptTable, XrResult, XrRuntime};

use crate::capability::{negotiate_formats, shape_advertised_formats, SharedPasses};
use crate::config::ConfigStore;
use crate::controls::{ControlInput, NoControls, ScalingMode};
use crate::orchestrator::process_frame;
use crate::resources::{build_image_resources, decide_swapchain, SwapchainDisposition, SwapchainRecord};
use crate::state::{kernel_storage_format, select_binding, LayerShared, SessionState};
use crate::stats::GpuTimer;

pub const LAYER_NAME: &str = "XR_APILAYER_NOVENDOR_xrlift";

/// Scale one view dimension by the configured factor.
///
/// The small bias counters the binary representation of factors like 0.7,
/// where the mathematically exact product sits a hair under the integer the
/// caller expects (1600 x 0.7 must report 1120, not 1119).
pub fn scaled_dimension(dimension: u32, factor: f32) -> u32 {
    (dimension as f64 * factor as f64 + 1e-4).floor() as u32
}

/// Loader negotiation entry point.
///
/// Validates the loader's self-description and fills in the layer's half of
/// the request. Any mismatch deactivates the layer; the application keeps
/// running against the unwrapped runtime.
pub fn negotiate(
    loader_info: &NegotiateLoaderInfo,
    layer_name: Option<&str>,
    request: &mut ApiLayerRequest,
) -> XrResult<()> {
    if let Some(name) = layer_name {
        if name != LAYER_NAME {
            warn!(name, "negotiation rejected: unknown layer name");
            return Err(ErrorCode::InitializationFailed);
        }
    }

    let loader_ok = loader_info.struct_type == StructureType::LoaderInfo
        && loader_info.struct_version == LOADER_INFO_STRUCT_VERSION
        && loader_info.struct_size == std::mem::size_of::<NegotiateLoaderInfo>()
        && loader_info.min_interface_version <= CURRENT_LOADER_INTERFACE_VERSION
        && loader_info.max_interface_version >= CURRENT_LOADER_INTERFACE_VERSION
        && loader_info.min_api_version <= CURRENT_API_VERSION
        && loader_info.max_api_version >= CURRENT_API_VERSION;
    let request_ok = request.struct_type == StructureType::ApiLayerRequest
        && request.struct_version == API_LAYER_REQUEST_STRUCT_VERSION
        && request.struct_size == std::mem::size_of::<ApiLayerRequest>();
    if !loader_ok || !request_ok {
        warn!("negotiation rejected: structure validation failed");
        return Err(ErrorCode::InitializationFailed);
    }

    request.layer_interface_version = CURRENT_LOADER_INTERFACE_VERSION;
    request.layer_api_version = CURRENT_API_VERSION;
    info!(layer = LAYER_NAME, "layer is active");
    Ok(())
}

pub struct UpscalerLayer {
    next: Arc<dyn XrRuntime>,
    intercepts: InterceptTable,
    controls: Mutex<Box<dyn ControlInput>>,
    shared: Mutex<LayerShared>,
}

impl UpscalerLayer {
    /// Instance-creation entry point: validate the layer chain description,
    /// load configuration for the calling application, and build the layer.
    pub fn create_instance(
        instance_info: &InstanceCreateInfo,
        layer_info: &ApiLayerCreateInfo,
        configs: &ConfigStore,
        controls: Box<dyn ControlInput>,
    ) -> XrResult<Arc<UpscalerLayer>> {
        let create_ok = layer_info.struct_type == StructureType::ApiLayerCreateInfo
            && layer_info.struct_version == API_LAYER_CREATE_INFO_STRUCT_VERSION
            && layer_info.struct_size == std::mem::size_of::<ApiLayerCreateInfo>();
        let Some(next_info) = layer_info.next_info.as_ref() else {
            warn!("instance creation rejected: no downstream link");
            return Err(ErrorCode::InitializationFailed);
        };
        let next_ok = next_info.struct_type == StructureType::ApiLayerNextInfo
            && next_info.struct_version == API_LAYER_NEXT_INFO_STRUCT_VERSION
            && next_info.struct_size == std::mem::size_of::<xrlift_api::chain::ApiLayerNextInfo>()
            && next_info.layer_name == LAYER_NAME;
        if !create_ok || !next_ok {
            warn!("instance creation rejected: structure validation failed");
            return Err(ErrorCode::InitializationFailed);
        }

        let config = configs.resolve(&instance_info.application_name, &instance_info.engine_name);
        config.dump();

        let next = Arc::clone(&next_info.next_runtime);
        let mut intercepts = InterceptTable::new();
        for call in CallId::ALL {
            if call == CallId::EnumerateSwapchainFormats
                && !next.supports_swapchain_format_enumeration()
            {
                debug!("downstream lacks format enumeration, override not installed");
                continue;
            }
            intercepts.install(call);
        }

        Ok(Arc::new(UpscalerLayer {
            next,
            intercepts,
            controls: Mutex::new(controls),
            shared: Mutex::new(LayerShared::new(config)),
        }))
    }

    /// Convenience constructor for embedding without a loader: wraps `next`
    /// with default controls.
    pub fn wrap(
        next: Arc<dyn XrRuntime>,
        configs: &ConfigStore,
        instance_info: &InstanceCreateInfo,
    ) -> XrResult<Arc<UpscalerLayer>> {
        let next_info = xrlift_api::chain::ApiLayerNextInfo::for_layer(LAYER_NAME, next);
        let layer_info = ApiLayerCreateInfo::with_next(next_info);
        Self::create_instance(instance_info, &layer_info, configs, Box::new(NoControls))
    }

    pub fn intercepts(&self) -> InterceptTable {
        self.intercepts.clone()
    }

    pub fn scaling_mode(&self) -> ScalingMode {
        self.shared.lock().unwrap().mode
    }

    pub fn sharpness(&self) -> f32 {
        self.shared.lock().unwrap().pending_sharpness
    }

    pub fn is_swapchain_handled(&self, swapchain: SwapchainHandle) -> bool {
        self.shared.lock().unwrap().swapchains.contains_key(&swapchain)
    }

    pub fn registered_swapchains(&self) -> usize {
        self.shared.lock().unwrap().swapchains.len()
    }

    pub fn registered_sessions(&self) -> usize {
        self.shared.lock().unwrap().sessions.len()
    }

    /// The scaler kind currently bound to `swapchain`, for diagnostics.
    pub fn scaler_kind(&self, swapchain: SwapchainHandle) -> Option<&'static str> {
        self.shared
            .lock()
            .unwrap()
            .swapchains
            .get(&swapchain)
            .map(|record| record.scaler.kind_name())
    }

    /// The sharpness the bound kernel last received, for diagnostics. `None`
    /// for unregistered swapchains and flat bindings.
    pub fn scaler_sharpness(&self, swapchain: SwapchainHandle) -> Option<f32> {
        self.shared
            .lock()
            .unwrap()
            .swapchains
            .get(&swapchain)
            .and_then(|record| record.scaler.params())
            .map(|params| params.sharpness)
    }

    fn set_up_session(&self, session: SessionHandle, create_info: &SessionCreateInfo) {
        let binding = create_info.bindings.iter().find_map(|b| match b {
            GraphicsBinding::Wgpu(binding) => Some(binding.clone()),
            GraphicsBinding::Vulkan(_) => {
                warn!("Vulkan graphics binding is not supported");
                None
            }
        });
        let Some(binding) = binding else {
            info!("session has no usable graphics binding, leaving it unmanaged");
            return;
        };

        // Capability negotiation runs once per session, against the format
        // list the runtime is willing to advertise.
        let advertised = if self.next.supports_swapchain_format_enumeration() {
            self.next.enumerate_swapchain_formats(session).ok()
        } else {
            None
        };

        let mut shared = self.shared.lock().unwrap();
        let capability =
            negotiate_formats(advertised.as_deref(), shared.config.intermediate_format);
        let passes = SharedPasses::create(&binding.device);
        let timer = shared
            .config
            .enable_stats
            .then(|| GpuTimer::new(&binding.device, &binding.queue))
            .flatten();
        if shared.config.enable_stats && timer.is_none() {
            info!("timestamp queries unavailable, statistics fall back to host timing");
        }

        shared.sessions.insert(
            session,
            SessionState {
                device: binding.device,
                queue: binding.queue,
                capability,
                passes,
                timer,
            },
        );
        // Interactive state starts fresh with each session.
        shared.mode = ScalingMode::default();
        shared.pending_sharpness = shared.config.sharpness;
        info!(session = session.0, "session registered for upscaling");
    }

    fn register_swapchain(
        &self,
        session: SessionHandle,
        swapchain: SwapchainHandle,
        disposition: SwapchainDisposition,
        original: &SwapchainCreateInfo,
    ) {
        let SwapchainDisposition::Handled { route, forward } = disposition else {
            debug!(
                format = ?original.format,
                array_size = original.array_size,
                "swapchain is not handled, forwarded untouched"
            );
            return;
        };

        let mut shared = self.shared.lock().unwrap();
        let shared = &mut *shared;
        let mode = shared.mode;
        let scaling = shared.config.scaling;
        let sharpness = shared.pending_sharpness;
        let Some(state) = shared.sessions.get_mut(&session) else {
            return;
        };
        let Some(passes) = state.passes.as_mut() else {
            return;
        };

        let storage_format = kernel_storage_format(route, original.format, &state.capability);
        let scaler = match select_binding(
            &mut passes.pipelines,
            &state.queue,
            mode,
            scaling,
            sharpness,
            storage_format,
            (original.width, original.height),
            (forward.width, forward.height),
        ) {
            Ok(scaler) => scaler,
            Err(err) => {
                // Feature unavailable for this swapchain only.
                warn!(swapchain = swapchain.0, "scaler creation failed: {err:#}");
                return;
            }
        };

        info!(
            swapchain = swapchain.0,
            route = ?route,
            scaler = scaler.kind_name(),
            app_extent = ?(original.width, original.height),
            runtime_extent = ?(forward.width, forward.height),
            "swapchain registered"
        );
        shared.swapchains.insert(
            swapchain,
            SwapchainRecord {
                session,
                original: original.clone(),
                forwarded: forward,
                route,
                scaler,
                images: Vec::new(),
                intermediate: None,
                last_acquired: 0,
            },
        );
    }
}

impl XrRuntime for UpscalerLayer {
    fn enumerate_view_configuration_views(
        &self,
        system: SystemId,
        config: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        if !self.intercepts.is_installed(CallId::EnumerateViewConfigurationViews) {
            return self.next.enumerate_view_configuration_views(system, config);
        }
        chain_then(
            CallId::EnumerateViewConfigurationViews,
            || self.next.enumerate_view_configuration_views(system, config),
            |views| {
                if config != ViewConfigurationType::PrimaryStereo || views.is_empty() {
                    return;
                }
                let mut shared = self.shared.lock().unwrap();
                let factor = shared.config.scaling;
                shared.display = Some(Extent2d {
                    width: views[0].recommended_image_rect_width,
                    height: views[0].recommended_image_rect_height,
                });
                for view in views.iter_mut() {
                    view.recommended_image_rect_width =
                        scaled_dimension(view.recommended_image_rect_width, factor);
                    view.recommended_image_rect_height =
                        scaled_dimension(view.recommended_image_rect_height, factor);
                }
                info!(
                    scaled = ?(
                        views[0].recommended_image_rect_width,
                        views[0].recommended_image_rect_height,
                    ),
                    display = ?shared.display,
                    "recommended view extent scaled"
                );
            },
        )
    }

    fn supports_swapchain_format_enumeration(&self) -> bool {
        self.next.supports_swapchain_format_enumeration()
    }

    fn enumerate_swapchain_formats(
        &self,
        session: SessionHandle,
    ) -> XrResult<Vec<wgpu::TextureFormat>> {
        if !self.intercepts.is_installed(CallId::EnumerateSwapchainFormats) {
            return self.next.enumerate_swapchain_formats(session);
        }
        chain_then(
            CallId::EnumerateSwapchainFormats,
            || self.next.enumerate_swapchain_formats(session),
            |formats| {
                let shared = self.shared.lock().unwrap();
                shape_advertised_formats(
                    formats,
                    shared.config.prioritize_capable_formats,
                    shared.config.only_advertise_capable_formats,
                );
            },
        )
    }

    fn create_session(&self, create_info: &SessionCreateInfo) -> XrResult<SessionHandle> {
        chain_then(
            CallId::CreateSession,
            || self.next.create_session(create_info),
            |session| self.set_up_session(*session, create_info),
        )
    }

    fn destroy_session(&self, session: SessionHandle) -> XrResult<()> {
        let result = self.next.destroy_session(session);
        if result.is_ok() {
            let mut shared = self.shared.lock().unwrap();
            // Session-scoped teardown releases every swapchain still
            // registered under it; a second destroy is a no-op.
            if shared.sessions.remove(&session).is_some() {
                shared.swapchains.retain(|_, record| record.session != session);
                info!(session = session.0, "session resources released");
            }
        }
        result
    }

    fn create_swapchain(
        &self,
        session: SessionHandle,
        create_info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        let disposition = {
            let shared = self.shared.lock().unwrap();
            match (shared.sessions.get(&session), shared.display) {
                (Some(state), Some(display)) if state.passes.is_some() => {
                    decide_swapchain(create_info, display, &state.capability)
                }
                _ => SwapchainDisposition::Passthrough,
            }
        };

        let forward_info = match &disposition {
            SwapchainDisposition::Handled { forward, .. } => forward,
            SwapchainDisposition::Passthrough => create_info,
        };
        let result = self.next.create_swapchain(session, forward_info);
        match result {
            Ok(swapchain) => {
                self.register_swapchain(session, swapchain, disposition, create_info);
                Ok(swapchain)
            }
            Err(code) => {
                warn!(?code, "downstream swapchain creation failed");
                Err(code)
            }
        }
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        chain_then(
            CallId::DestroySwapchain,
            || self.next.destroy_swapchain(swapchain),
            |_| {
                let mut shared = self.shared.lock().unwrap();
                // Idempotent: destroying an unregistered swapchain is not an
                // error.
                if shared.swapchains.remove(&swapchain).is_some() {
                    info!(swapchain = swapchain.0, "swapchain resources released");
                }
            },
        )
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<SwapchainImage>> {
        chain_then(
            CallId::EnumerateSwapchainImages,
            || self.next.enumerate_swapchain_images(swapchain),
            |images| {
                let mut shared = self.shared.lock().unwrap();
                let shared = &mut *shared;
                let Some(record) = shared.swapchains.get_mut(&swapchain) else {
                    return;
                };
                let Some(state) = shared.sessions.get(&record.session) else {
                    return;
                };

                if record.images.is_empty() {
                    match build_image_resources(
                        &state.device,
                        &record.original,
                        &record.forwarded,
                        record.route,
                        &state.capability,
                        images,
                    ) {
                        Ok((resources, intermediate)) => {
                            record.images = resources;
                            record.intermediate = intermediate;
                        }
                        Err(err) => {
                            // Abort setup for this swapchain only; it keeps
                            // working, unscaled.
                            warn!(
                                swapchain = swapchain.0,
                                "image resource creation failed, swapchain unregistered: {err:#}"
                            );
                            shared.swapchains.remove(&swapchain);
                            return;
                        }
                    }
                }

                // The application must only ever see the app-side textures.
                for (slot, resource) in images.iter_mut().zip(record.images.iter()) {
                    slot.texture = Arc::clone(&resource.app_texture);
                }
            },
        )
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32> {
        chain_then(
            CallId::AcquireSwapchainImage,
            || self.next.acquire_swapchain_image(swapchain),
            |index| {
                let mut shared = self.shared.lock().unwrap();
                if let Some(record) = shared.swapchains.get_mut(&swapchain) {
                    record.last_acquired = *index;
                }
            },
        )
    }

    fn end_frame(&self, session: SessionHandle, frame: &FrameEndInfo) -> XrResult<()> {
        let controls = self.controls.lock().unwrap().poll();
        let corrected = {
            let mut shared = self.shared.lock().unwrap();
            process_frame(&mut shared, controls, session, frame)
        };
        self.next.end_frame(session, &corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dimension_truncates_with_representation_bias() {
        assert_eq!(scaled_dimension(1600, 0.7), 1120);
        assert_eq!(scaled_dimension(1600, 1.0), 1600);
        assert_eq!(scaled_dimension(2468, 0.5), 1234);
        // A fraction that really is below the next integer stays truncated.
        assert_eq!(scaled_dimension(1601, 0.7), 1120);
    }

    #[test]
    fn negotiate_accepts_a_current_loader() {
        let loader = NegotiateLoaderInfo::current();
        let mut request = ApiLayerRequest::new();
        negotiate(&loader, Some(LAYER_NAME), &mut request).expect("negotiation should succeed");
        assert_eq!(request.layer_interface_version, CURRENT_LOADER_INTERFACE_VERSION);
        assert_eq!(request.layer_api_version, CURRENT_API_VERSION);
    }

    #[test]
    fn negotiate_rejects_wrong_layer_name() {
        let loader = NegotiateLoaderInfo::current();
        let mut request = ApiLayerRequest::new();
        assert_eq!(
            negotiate(&loader, Some("XR_APILAYER_NOVENDOR_other"), &mut request),
            Err(ErrorCode::InitializationFailed)
        );
    }

    #[test]
    fn negotiate_rejects_malformed_structures() {
        let mut request = ApiLayerRequest::new();

        let mut bad_type = NegotiateLoaderInfo::current();
        bad_type.struct_type = StructureType::ApiLayerRequest;
        assert_eq!(
            negotiate(&bad_type, None, &mut request),
            Err(ErrorCode::InitializationFailed)
        );

        let mut bad_version = NegotiateLoaderInfo::current();
        bad_version.struct_version = LOADER_INFO_STRUCT_VERSION + 1;
        assert_eq!(
            negotiate(&bad_version, None, &mut request),
            Err(ErrorCode::InitializationFailed)
        );

        let mut bad_size = NegotiateLoaderInfo::current();
        bad_size.struct_size = 8;
        assert_eq!(
            negotiate(&bad_size, None, &mut request),
            Err(ErrorCode::InitializationFailed)
        );

        let mut stale_interface = NegotiateLoaderInfo::current();
        stale_interface.max_interface_version = 0;
        assert_eq!(
            negotiate(&stale_interface, None, &mut request),
            Err(ErrorCode::InitializationFailed)
        );
    }
}
