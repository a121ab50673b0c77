//! Loader negotiation structures and the call-intercept table.
//!
//! The loader hands a layer two things at activation time: a description of
//! itself ([`NegotiateLoaderInfo`]) and a request block the layer fills in
//! ([`ApiLayerRequest`]). Both carry structure tags, versions and sizes that
//! must validate exactly; a mismatch deactivates the layer and the
//! application continues on the unwrapped runtime.
//!
//! Call interception is modeled as an explicit table: one [`CallId`] per
//! overridable entry point, with [`InterceptTable`] recording which ones a
//! layer actually installed. The function-pointer substitution of the wire
//! protocol becomes a decorator: the layer implements
//! [`XrRuntime`](crate::XrRuntime) and forwards non-overridden calls to the
//! recorded `next` implementation.

use std::sync::Arc;

use crate::XrRuntime;

/// Interface version spoken between loader and layer.
pub const CURRENT_LOADER_INTERFACE_VERSION: u32 = 1;

/// Version of the negotiation structure layouts themselves.
pub const LOADER_INFO_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_REQUEST_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_CREATE_INFO_STRUCT_VERSION: u32 = 1;
pub const API_LAYER_NEXT_INFO_STRUCT_VERSION: u32 = 1;

pub const fn make_api_version(major: u16, minor: u16, patch: u32) -> u64 {
    ((major as u64) << 48) | ((minor as u64) << 32) | patch as u64
}

/// API version this crate targets.
pub const CURRENT_API_VERSION: u64 = make_api_version(1, 0, 34);

/// Tag discriminating the negotiation structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureType {
    LoaderInfo,
    ApiLayerRequest,
    ApiLayerCreateInfo,
    ApiLayerNextInfo,
}

/// Loader self-description passed to the negotiation entry point.
#[derive(Debug, Clone)]
pub struct NegotiateLoaderInfo {
    pub struct_type: StructureType,
    pub struct_version: u32,
    pub struct_size: usize,
    pub min_interface_version: u32,
    pub max_interface_version: u32,
    pub min_api_version: u64,
    pub max_api_version: u64,
}

impl NegotiateLoaderInfo {
    /// A well-formed loader info for the current interface/API versions.
    pub fn current() -> Self {
        Self {
            struct_type: StructureType::LoaderInfo,
            struct_version: LOADER_INFO_STRUCT_VERSION,
            struct_size: std::mem::size_of::<NegotiateLoaderInfo>(),
            min_interface_version: CURRENT_LOADER_INTERFACE_VERSION,
            max_interface_version: CURRENT_LOADER_INTERFACE_VERSION,
            min_api_version: make_api_version(1, 0, 0),
            max_api_version: CURRENT_API_VERSION,
        }
    }
}

/// Request block the layer fills in during negotiation.
#[derive(Debug, Clone)]
pub struct ApiLayerRequest {
    pub struct_type: StructureType,
    pub struct_version: u32,
    pub struct_size: usize,
    /// Filled by the layer: interface version it will speak.
    pub layer_interface_version: u32,
    /// Filled by the layer: API version it was built against.
    pub layer_api_version: u64,
}

impl ApiLayerRequest {
    pub fn new() -> Self {
        Self {
            struct_type: StructureType::ApiLayerRequest,
            struct_version: API_LAYER_REQUEST_STRUCT_VERSION,
            struct_size: std::mem::size_of::<ApiLayerRequest>(),
            layer_interface_version: 0,
            layer_api_version: 0,
        }
    }
}

impl Default for ApiLayerRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-layer link of the instance-creation chain.
#[derive(Clone)]
pub struct ApiLayerNextInfo {
    pub struct_type: StructureType,
    pub struct_version: u32,
    pub struct_size: usize,
    /// Name the loader believes this layer has; must match the layer's own.
    pub layer_name: String,
    /// The downstream implementation everything not overridden resolves to.
    pub next_runtime: Arc<dyn XrRuntime>,
}

impl std::fmt::Debug for ApiLayerNextInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiLayerNextInfo")
            .field("layer_name", &self.layer_name)
            .finish_non_exhaustive()
    }
}

impl ApiLayerNextInfo {
    pub fn for_layer(layer_name: &str, next_runtime: Arc<dyn XrRuntime>) -> Self {
        Self {
            struct_type: StructureType::ApiLayerNextInfo,
            struct_version: API_LAYER_NEXT_INFO_STRUCT_VERSION,
            struct_size: std::mem::size_of::<ApiLayerNextInfo>(),
            layer_name: layer_name.to_owned(),
            next_runtime,
        }
    }
}

/// Instance-creation payload handed to an activated layer.
#[derive(Debug, Clone)]
pub struct ApiLayerCreateInfo {
    pub struct_type: StructureType,
    pub struct_version: u32,
    pub struct_size: usize,
    pub next_info: Option<ApiLayerNextInfo>,
}

impl ApiLayerCreateInfo {
    pub fn with_next(next_info: ApiLayerNextInfo) -> Self {
        Self {
            struct_type: StructureType::ApiLayerCreateInfo,
            struct_version: API_LAYER_CREATE_INFO_STRUCT_VERSION,
            struct_size: std::mem::size_of::<ApiLayerCreateInfo>(),
            next_info: Some(next_info),
        }
    }
}

/// Identifier for each entry point a layer may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallId {
    EnumerateViewConfigurationViews,
    EnumerateSwapchainFormats,
    CreateSession,
    DestroySession,
    CreateSwapchain,
    DestroySwapchain,
    EnumerateSwapchainImages,
    AcquireSwapchainImage,
    EndFrame,
}

impl CallId {
    pub const ALL: [CallId; 9] = [
        CallId::EnumerateViewConfigurationViews,
        CallId::EnumerateSwapchainFormats,
        CallId::CreateSession,
        CallId::DestroySession,
        CallId::CreateSwapchain,
        CallId::DestroySwapchain,
        CallId::EnumerateSwapchainImages,
        CallId::AcquireSwapchainImage,
        CallId::EndFrame,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CallId::EnumerateViewConfigurationViews => "enumerate_view_configuration_views",
            CallId::EnumerateSwapchainFormats => "enumerate_swapchain_formats",
            CallId::CreateSession => "create_session",
            CallId::DestroySession => "destroy_session",
            CallId::CreateSwapchain => "create_swapchain",
            CallId::DestroySwapchain => "destroy_swapchain",
            CallId::EnumerateSwapchainImages => "enumerate_swapchain_images",
            CallId::AcquireSwapchainImage => "acquire_swapchain_image",
            CallId::EndFrame => "end_frame",
        }
    }

    fn index(self) -> usize {
        match self {
            CallId::EnumerateViewConfigurationViews => 0,
            CallId::EnumerateSwapchainFormats => 1,
            CallId::CreateSession => 2,
            CallId::DestroySession => 3,
            CallId::CreateSwapchain => 4,
            CallId::DestroySwapchain => 5,
            CallId::EnumerateSwapchainImages => 6,
            CallId::AcquireSwapchainImage => 7,
            CallId::EndFrame => 8,
        }
    }
}

/// Which entry points a layer has actually installed overrides for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterceptTable {
    installed: [bool; CallId::ALL.len()],
}

impl InterceptTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, call: CallId) {
        self.installed[call.index()] = true;
    }

    pub fn is_installed(&self, call: CallId) -> bool {
        self.installed[call.index()]
    }

    pub fn installed_calls(&self) -> impl Iterator<Item = CallId> + '_ {
        CallId::ALL
            .into_iter()
            .filter(move |c| self.installed[c.index()])
    }
}

/// The one shape every override takes: invoke the downstream implementation
/// first, post-process only if it succeeded, and hand the downstream code
/// back unmodified.
///
/// `post` runs on the successful downstream value; it may mutate layer state
/// but cannot change the result the application sees.
pub fn chain_then<T>(
    call: CallId,
    next: impl FnOnce() -> crate::XrResult<T>,
    post: impl FnOnce(&mut T),
) -> crate::XrResult<T> {
    tracing::trace!(call = call.name(), "--> chained call");
    let mut result = next();
    if let Ok(value) = result.as_mut() {
        post(value);
    }
    tracing::trace!(call = call.name(), ok = result.is_ok(), "<-- chained call");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn intercept_table_tracks_installed_calls() {
        let mut table = InterceptTable::new();
        table.install(CallId::CreateSwapchain);
        table.install(CallId::EndFrame);

        assert!(table.is_installed(CallId::CreateSwapchain));
        assert!(!table.is_installed(CallId::EnumerateSwapchainFormats));
        let installed: Vec<_> = table.installed_calls().collect();
        assert_eq!(installed, vec![CallId::CreateSwapchain, CallId::EndFrame]);
    }

    #[test]
    fn chain_then_skips_post_on_downstream_failure() {
        let mut post_ran = false;
        let result: crate::XrResult<u32> = chain_then(
            CallId::CreateSession,
            || Err(ErrorCode::RuntimeFailure),
            |_| post_ran = true,
        );
        assert_eq!(result, Err(ErrorCode::RuntimeFailure));
        assert!(!post_ran);
    }

    #[test]
    fn chain_then_post_processes_success_without_changing_code() {
        let result = chain_then(CallId::AcquireSwapchainImage, || Ok(7u32), |v| *v += 1);
        // The payload may be augmented; the code may not.
        assert_eq!(result, Ok(8));
    }

    #[test]
    fn api_version_packing_is_monotonic() {
        assert!(make_api_version(1, 1, 0) > make_api_version(1, 0, 34));
        assert_eq!(CURRENT_API_VERSION, make_api_version(1, 0, 34));
    }
}
