//! `xrlift-api` is the XR call surface shared by the upscaling layer and the
//! runtimes it chains to.
//!
//! This crate provides:
//! - Opaque handles, descriptor structs and result codes for the intercepted
//!   calls (see [`types`] and [`ErrorCode`]).
//! - The downstream [`XrRuntime`] trait: the "next" implementation a layer
//!   forwards to, whether that is the real runtime or another layer.
//! - The loader negotiation structures and the call-identifier table used to
//!   install overrides (see [`chain`]).
//! - A simulated runtime backed by a headless `wgpu` device, used by layer
//!   tests (see [`sim::SimRuntime`]).

mod error;
mod runtime;

pub mod chain;
pub mod sim;
pub mod types;

pub use chain::{CallId, InterceptTable};
pub use error::{ErrorCode, XrResult};
pub use runtime::XrRuntime;
