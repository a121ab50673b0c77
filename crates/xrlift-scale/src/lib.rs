//! `xrlift-scale` holds the upscaling kernels and their per-swapchain bindings.
//!
//! The layer core treats this crate as a narrow collaborator: it constructs a
//! [`ScalerBinding`] per swapchain, calls [`ScalerBinding::retune`] when the
//! source/target geometry or sharpness changes, and [`ScalerBinding::dispatch`]
//! once per view per frame. Nothing outside this crate inspects the kernel
//! math.
//!
//! Kernels are deterministic generated WGSL (storage-texture formats are part
//! of a WGSL pipeline's type signature, so each supported destination format
//! gets its own specialization). Compiled pipelines are cached per device in
//! [`ScalerPipelines`].

mod binding;
mod kernels;
mod pipelines;

pub use binding::{KernelParams, ScalePass, ScalerBinding};
pub use kernels::{kernel_wgsl, storage_format_token, KernelKind};
pub use pipelines::ScalerPipelines;
