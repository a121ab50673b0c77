//! Descriptor and handle types for the intercepted call surface.
//!
//! Handles are opaque newtypes over `u64`; they are minted by whichever
//! runtime sits at the end of the chain and mean nothing to a layer beyond
//! identity. Descriptors are plain owned structs: a layer that needs to
//! rewrite one clones it and forwards the copy, so caller-held memory is
//! never mutated in place.

use std::sync::Arc;

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset2d {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2d {
    pub offset: Offset2d,
    pub extent: Extent2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

/// Per-view sizing advertised by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_image_rect_width: u32,
    pub recommended_image_rect_height: u32,
    pub max_image_rect_width: u32,
    pub max_image_rect_height: u32,
    pub recommended_swapchain_sample_count: u32,
}

bitflags! {
    /// Usage bits an application requests for swapchain images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SwapchainUsage: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
        const SAMPLED = 1 << 5;
        const MUTABLE_FORMAT = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsage,
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

/// One entry of the runtime's image ring for a swapchain.
#[derive(Debug, Clone)]
pub struct SwapchainImage {
    pub texture: Arc<wgpu::Texture>,
}

/// Graphics API binding supplied at session creation.
///
/// The original loader-facing form of this is a chain of tagged structures; a
/// session carries exactly one recognized binding, so it is modeled as an enum
/// resolved once at session creation.
#[derive(Clone)]
pub enum GraphicsBinding {
    Wgpu(WgpuBinding),
    /// Raw Vulkan handles as a second back-end. Recognized but not driven by
    /// the upscaling layer.
    Vulkan(VulkanBinding),
}

impl std::fmt::Debug for GraphicsBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphicsBinding::Wgpu(_) => f.write_str("GraphicsBinding::Wgpu"),
            GraphicsBinding::Vulkan(_) => f.write_str("GraphicsBinding::Vulkan"),
        }
    }
}

#[derive(Clone)]
pub struct WgpuBinding {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

/// Opaque Vulkan handle block, mirroring the wire-level binding structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanBinding {
    pub instance: u64,
    pub physical_device: u64,
    pub device: u64,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

#[derive(Debug, Clone)]
pub struct SessionCreateInfo {
    pub system: SystemId,
    /// Binding chain as supplied by the application; the first recognized
    /// entry wins.
    pub bindings: Vec<GraphicsBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posef {
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

impl Posef {
    pub const IDENTITY: Posef = Posef {
        orientation: [0.0, 0.0, 0.0, 1.0],
        position: [0.0, 0.0, 0.0],
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fovf {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fovf {
    pub const SYMMETRIC_90: Fovf = Fovf {
        angle_left: -0.7853982,
        angle_right: 0.7853982,
        angle_up: 0.7853982,
        angle_down: -0.7853982,
    };
}

/// The portion of a swapchain a composited view reads from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubImage {
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2d,
    pub image_array_index: u32,
}

/// Depth submission attached to a projection view. Carried through untouched;
/// depth upscaling is out of scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthInfo {
    pub sub_image: SubImage,
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionView {
    pub pose: Posef,
    pub fov: Fovf,
    pub sub_image: SubImage,
    pub depth: Option<DepthInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionLayerProjection {
    pub space: u64,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionLayerQuad {
    pub space: u64,
    pub sub_image: SubImage,
    pub pose: Posef,
    pub size: [f32; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    Projection(CompositionLayerProjection),
    Quad(CompositionLayerQuad),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameEndInfo {
    pub display_time_ns: i64,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<CompositionLayer>,
}

#[derive(Debug, Clone)]
pub struct InstanceCreateInfo {
    pub application_name: String,
    pub engine_name: String,
    pub api_version: u64,
}
