//! Swapchain resource lifecycle.
//!
//! For every handled swapchain the layer owns a [`SwapchainRecord`]: the
//! application's original descriptor, the routing decision, the active scaler
//! binding, and one [`SwapchainImageResource`] per runtime image. The
//! application only ever sees the app-side textures fabricated here; the
//! runtime's full-resolution images stay behind the layer.
//!
//! View indexing convention: slice index == view index for every view kind
//! (source reads, destination writes, render targets, intermediate reads).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use xrlift_api::types::{Extent2d, SessionHandle, SwapchainCreateInfo, SwapchainImage, SwapchainUsage};
use xrlift_scale::ScalerBinding;

use crate::capability::{is_direct_format, is_indirect_format, SessionCapability};

/// How frames reach the runtime image for a handled swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainRoute {
    /// The kernel writes the runtime image directly.
    Direct,
    /// The runtime allocated its images in the intermediate format; the
    /// kernel writes them directly and the runtime resolves the aliasing.
    Alias,
    /// The kernel writes a shared intermediate texture and a conversion draw
    /// moves the result into the runtime image.
    Convert,
}

/// Outcome of the create-parameter inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapchainDisposition {
    /// Forward the caller's parameters untouched; the layer stays out of the
    /// way for this swapchain.
    Passthrough,
    Handled {
        route: SwapchainRoute,
        /// The rewritten parameters the runtime should see.
        forward: SwapchainCreateInfo,
    },
}

/// Decide whether (and how) a swapchain is handled.
///
/// Handled means: array size within the stereo pair, a single face, a single
/// sample, and a format the scaler can reach. Everything else passes through
/// byte-for-byte.
pub fn decide_swapchain(
    info: &SwapchainCreateInfo,
    display: Extent2d,
    caps: &SessionCapability,
) -> SwapchainDisposition {
    let direct = is_direct_format(info.format);
    let indirect = is_indirect_format(info.format);
    let shape_ok = info.array_size <= 2 && info.face_count == 1 && info.sample_count == 1;
    if !shape_ok || !(direct || indirect) {
        return SwapchainDisposition::Passthrough;
    }

    let mut forward = info.clone();
    forward.width = display.width;
    forward.height = display.height;

    let route = if direct {
        forward.usage |= SwapchainUsage::UNORDERED_ACCESS;
        SwapchainRoute::Direct
    } else if caps.runtime_allocates_intermediate {
        forward.format = caps.intermediate_format;
        forward.usage |= SwapchainUsage::UNORDERED_ACCESS;
        SwapchainRoute::Alias
    } else {
        // The conversion draw writes the runtime image.
        forward.usage |= SwapchainUsage::COLOR_ATTACHMENT;
        SwapchainRoute::Convert
    };

    SwapchainDisposition::Handled { route, forward }
}

/// Per-runtime-image resources for one handled swapchain.
pub struct SwapchainImageResource {
    /// Runtime-owned destination image (display resolution).
    pub runtime_texture: Arc<wgpu::Texture>,
    /// The texture the application renders into (its requested resolution).
    pub app_texture: Arc<wgpu::Texture>,
    /// Per-slice read views of the app texture.
    pub app_srv: Vec<wgpu::TextureView>,
    /// Per-slice storage views of the runtime image (`Direct`/`Alias` only).
    pub dest_storage: Vec<wgpu::TextureView>,
    /// Per-slice render-target views of the runtime image, present when the
    /// conversion/flat draw can run against it.
    pub runtime_rtv: Vec<wgpu::TextureView>,
}

/// The shared conversion intermediate: kernel output, conversion input.
pub struct IntermediateTarget {
    pub texture: wgpu::Texture,
    pub storage: Vec<wgpu::TextureView>,
    pub srv: Vec<wgpu::TextureView>,
}

pub struct SwapchainRecord {
    pub session: SessionHandle,
    /// The application's original descriptor (its render resolution).
    pub original: SwapchainCreateInfo,
    /// The descriptor the runtime actually saw.
    pub forwarded: SwapchainCreateInfo,
    pub route: SwapchainRoute,
    pub scaler: ScalerBinding,
    pub images: Vec<SwapchainImageResource>,
    pub intermediate: Option<IntermediateTarget>,
    pub last_acquired: u32,
}

impl SwapchainRecord {
    pub fn source_extent(&self) -> (u32, u32) {
        (self.original.width, self.original.height)
    }

    pub fn target_extent(&self) -> (u32, u32) {
        (self.forwarded.width, self.forwarded.height)
    }
}

fn slice_view(
    texture: &wgpu::Texture,
    label: &str,
    slice: u32,
    single_mip: bool,
) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        format: None,
        dimension: Some(wgpu::TextureViewDimension::D2),
        aspect: wgpu::TextureAspect::All,
        base_mip_level: 0,
        mip_level_count: if single_mip { Some(1) } else { None },
        base_array_layer: slice,
        array_layer_count: Some(1),
    })
}

fn app_texture_usages(usage: SwapchainUsage, format: wgpu::TextureFormat) -> wgpu::TextureUsages {
    // The scaler always reads the app texture, whatever the app asked for.
    let mut out = wgpu::TextureUsages::TEXTURE_BINDING;
    if usage.contains(SwapchainUsage::COLOR_ATTACHMENT)
        || usage.contains(SwapchainUsage::DEPTH_STENCIL_ATTACHMENT)
    {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(SwapchainUsage::UNORDERED_ACCESS) && !format.is_srgb() {
        out |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(SwapchainUsage::TRANSFER_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(SwapchainUsage::TRANSFER_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    out
}

/// Fabricate the per-image resources after the runtime returned its image
/// ring, plus the shared intermediate when the route needs one.
///
/// Any validation failure surfaces as `Err`; the caller unregisters the
/// swapchain and the application keeps rendering unscaled.
pub fn build_image_resources(
    device: &wgpu::Device,
    original: &SwapchainCreateInfo,
    forwarded: &SwapchainCreateInfo,
    route: SwapchainRoute,
    caps: &SessionCapability,
    runtime_images: &[SwapchainImage],
) -> Result<(Vec<SwapchainImageResource>, Option<IntermediateTarget>)> {
    let slices = original.array_size;
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let mut images = Vec::with_capacity(runtime_images.len());
    for runtime_image in runtime_images {
        let app_texture = Arc::new(device.create_texture(&wgpu::TextureDescriptor {
            label: Some("app swapchain image"),
            size: wgpu::Extent3d {
                width: original.width,
                height: original.height,
                depth_or_array_layers: slices,
            },
            mip_level_count: original.mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: original.format,
            usage: app_texture_usages(original.usage, original.format),
            view_formats: &[],
        }));

        let mut app_srv = Vec::with_capacity(slices as usize);
        let mut dest_storage = Vec::new();
        let mut runtime_rtv = Vec::new();
        for slice in 0..slices {
            app_srv.push(slice_view(&app_texture, "app image read", slice, false));
            if matches!(route, SwapchainRoute::Direct | SwapchainRoute::Alias) {
                dest_storage.push(slice_view(
                    &runtime_image.texture,
                    "runtime image write",
                    slice,
                    true,
                ));
            }
            if forwarded.usage.contains(SwapchainUsage::COLOR_ATTACHMENT) {
                runtime_rtv.push(slice_view(
                    &runtime_image.texture,
                    "runtime image target",
                    slice,
                    true,
                ));
            }
        }

        images.push(SwapchainImageResource {
            runtime_texture: Arc::clone(&runtime_image.texture),
            app_texture,
            app_srv,
            dest_storage,
            runtime_rtv,
        });
    }

    let intermediate = if route == SwapchainRoute::Convert {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("conversion intermediate"),
            size: wgpu::Extent3d {
                width: forwarded.width,
                height: forwarded.height,
                depth_or_array_layers: slices,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: caps.intermediate_format,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let storage = (0..slices)
            .map(|slice| slice_view(&texture, "intermediate write", slice, true))
            .collect();
        let srv = (0..slices)
            .map(|slice| slice_view(&texture, "intermediate read", slice, true))
            .collect();
        Some(IntermediateTarget {
            texture,
            storage,
            srv,
        })
    } else {
        None
    };

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(anyhow!("swapchain image resource creation failed: {err}"));
    }
    Ok((images, intermediate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat as Tf;

    fn caps(alias: bool) -> SessionCapability {
        SessionCapability {
            format_compatible: true,
            intermediate_format: Tf::Rgba8Unorm,
            runtime_allocates_intermediate: alias,
        }
    }

    fn info(format: Tf, array_size: u32, face_count: u32) -> SwapchainCreateInfo {
        SwapchainCreateInfo {
            usage: SwapchainUsage::COLOR_ATTACHMENT | SwapchainUsage::SAMPLED,
            format,
            sample_count: 1,
            width: 1120,
            height: 1120,
            face_count,
            array_size,
            mip_count: 1,
        }
    }

    const DISPLAY: Extent2d = Extent2d {
        width: 1600,
        height: 1600,
    };

    #[test]
    fn direct_formats_get_storage_usage_and_display_extent() {
        let disposition = decide_swapchain(&info(Tf::Rgba8Unorm, 2, 1), DISPLAY, &caps(false));
        let SwapchainDisposition::Handled { route, forward } = disposition else {
            panic!("expected handled");
        };
        assert_eq!(route, SwapchainRoute::Direct);
        assert_eq!(forward.width, 1600);
        assert_eq!(forward.height, 1600);
        assert_eq!(forward.format, Tf::Rgba8Unorm);
        assert!(forward.usage.contains(SwapchainUsage::UNORDERED_ACCESS));
    }

    #[test]
    fn indirect_formats_alias_when_the_runtime_allows() {
        let disposition = decide_swapchain(&info(Tf::Rgba8UnormSrgb, 1, 1), DISPLAY, &caps(true));
        let SwapchainDisposition::Handled { route, forward } = disposition else {
            panic!("expected handled");
        };
        assert_eq!(route, SwapchainRoute::Alias);
        assert_eq!(forward.format, Tf::Rgba8Unorm);
        assert!(forward.usage.contains(SwapchainUsage::UNORDERED_ACCESS));
    }

    #[test]
    fn indirect_formats_convert_when_aliasing_is_unavailable() {
        let disposition = decide_swapchain(&info(Tf::Bgra8UnormSrgb, 1, 1), DISPLAY, &caps(false));
        let SwapchainDisposition::Handled { route, forward } = disposition else {
            panic!("expected handled");
        };
        assert_eq!(route, SwapchainRoute::Convert);
        // The original format survives; no storage usage is requested on an
        // image the kernel cannot write.
        assert_eq!(forward.format, Tf::Bgra8UnormSrgb);
        assert!(!forward.usage.contains(SwapchainUsage::UNORDERED_ACCESS));
        assert!(forward.usage.contains(SwapchainUsage::COLOR_ATTACHMENT));
    }

    #[test]
    fn out_of_shape_swapchains_pass_through() {
        for bad in [
            info(Tf::Rgba8Unorm, 3, 1),
            info(Tf::Rgba8Unorm, 1, 6),
            info(Tf::Rgba16Float, 1, 1),
            info(Tf::Depth24PlusStencil8, 1, 1),
        ] {
            assert_eq!(
                decide_swapchain(&bad, DISPLAY, &caps(true)),
                SwapchainDisposition::Passthrough
            );
        }
        let mut multisampled = info(Tf::Rgba8Unorm, 1, 1);
        multisampled.sample_count = 4;
        assert_eq!(
            decide_swapchain(&multisampled, DISPLAY, &caps(true)),
            SwapchainDisposition::Passthrough
        );
    }
}
