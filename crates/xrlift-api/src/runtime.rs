use crate::types::{
    FrameEndInfo, SessionCreateInfo, SessionHandle, SwapchainCreateInfo, SwapchainHandle,
    SwapchainImage, SystemId, ViewConfigurationType, ViewConfigurationView,
};
use crate::XrResult;

/// The downstream call surface: the real runtime, or the next layer in the
/// chain.
///
/// A layer implements this trait itself and wraps another `XrRuntime`, so the
/// application cannot tell layered and unlayered runtimes apart. All methods
/// take `&self`; implementations guard their internal maps so that handlers
/// for different swapchains interleave only at call granularity, never
/// mid-call.
///
/// Enumerations return owned vectors rather than the two-call
/// capacity/count protocol of the wire format; the conversion to caller
/// buffers happens in the outermost loader shim, outside this crate.
pub trait XrRuntime: Send + Sync {
    fn enumerate_view_configuration_views(
        &self,
        system: SystemId,
        config: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>>;

    /// Whether [`XrRuntime::enumerate_swapchain_formats`] is provided.
    ///
    /// Older runtime revisions do not expose format enumeration; a layer must
    /// not install an override for a call its downstream cannot service.
    fn supports_swapchain_format_enumeration(&self) -> bool {
        true
    }

    fn enumerate_swapchain_formats(
        &self,
        session: SessionHandle,
    ) -> XrResult<Vec<wgpu::TextureFormat>>;

    fn create_session(&self, create_info: &SessionCreateInfo) -> XrResult<SessionHandle>;

    fn destroy_session(&self, session: SessionHandle) -> XrResult<()>;

    fn create_swapchain(
        &self,
        session: SessionHandle,
        create_info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle>;

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()>;

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<SwapchainImage>>;

    /// Returns the index of the image the application must render into next.
    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32>;

    fn end_frame(&self, session: SessionHandle, frame: &FrameEndInfo) -> XrResult<()>;
}
