use thiserror::Error;

/// Result codes surfaced by a runtime (or a layer chaining to one).
///
/// A layer returns whatever code the downstream call produced; it never
/// manufactures success out of a downstream failure or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    /// A loader/negotiation structure failed type/version/size validation.
    #[error("validation failure")]
    ValidationFailure,
    /// Layer or instance activation failed; the application proceeds without it.
    #[error("initialization failed")]
    InitializationFailed,
    /// The call is not provided by this runtime.
    #[error("function unsupported")]
    FunctionUnsupported,
    /// A session/swapchain handle did not refer to a live object.
    #[error("handle invalid")]
    HandleInvalid,
    /// The session is no longer usable.
    #[error("session lost")]
    SessionLost,
    /// The requested swapchain format is not advertised by the runtime.
    #[error("swapchain format unsupported")]
    SwapchainFormatUnsupported,
    /// The graphics binding did not resolve to a usable device.
    #[error("graphics device invalid")]
    GraphicsDeviceInvalid,
    /// The runtime ran out of a bounded resource.
    #[error("limit reached")]
    LimitReached,
    /// Catch-all for internal runtime errors.
    #[error("runtime failure")]
    RuntimeFailure,
}

pub type XrResult<T> = Result<T, ErrorCode>;
