//! `xrlift-layer` is a transparent frame-upscaling layer for XR call chains.
//!
//! The layer sits between an application and its XR runtime. It shrinks the
//! resolution the application is told to render at, fabricates the textures
//! the application actually renders into, and on every presented frame scales
//! those renders back up to the display resolution before the runtime
//! composites them. The application and the runtime both proceed unaware:
//! the only observable differences are the documented resolution substitution
//! and the corrected presentation rectangles.
//!
//! Module map:
//! - [`config`] — key/value configuration and per-title lookup.
//! - [`capability`] — once-per-session format negotiation + shared GPU objects.
//! - [`resources`] — swapchain records and per-image texture/view fabrication.
//! - [`convert`] — the color-conversion / flat passthrough draw.
//! - [`orchestrator`] — the per-frame scale/convert/correct pipeline.
//! - [`controls`] — interactive mode/sharpness controls.
//! - [`stats`] — sliding-window GPU pass timing.
//! - [`layer`] — loader negotiation and the [`XrRuntime`] decorator itself.

pub mod capability;
pub mod config;
pub mod controls;
pub mod convert;
pub mod orchestrator;
pub mod resources;
pub mod state;
pub mod stats;

mod layer;

pub use config::{Config, ConfigStore};
pub use controls::{ControlEvents, ControlInput, NoControls, ScalingMode, ScriptedControls};
pub use layer::{negotiate, scaled_dimension, UpscalerLayer, LAYER_NAME};
pub use xrlift_api::{ErrorCode, XrResult, XrRuntime};
