//! Per-session capability negotiation.
//!
//! Run once when a session resolves to a usable graphics device. Decides
//! which pixel formats the scaler can write directly, whether indirect
//! formats can be aliased by asking the runtime to allocate in the
//! intermediate format, and compiles the shared GPU objects (conversion
//! pass, kernel pipeline cache). Everything here degrades instead of
//! failing: a session without upscaling capability still renders.

use std::sync::Arc;

use tracing::{info, warn};
use xrlift_scale::ScalerPipelines;

use crate::convert::ConvertPass;

/// Formats the compute kernels can write through a storage view.
pub fn is_direct_format(format: wgpu::TextureFormat) -> bool {
    matches!(
        format,
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8Snorm
    )
}

/// Formats the scaler cannot write directly but can reach through
/// runtime-level aliasing or an explicit conversion draw.
pub fn is_indirect_format(format: wgpu::TextureFormat) -> bool {
    matches!(
        format,
        wgpu::TextureFormat::Rgba8UnormSrgb
            | wgpu::TextureFormat::Bgra8Unorm
            | wgpu::TextureFormat::Bgra8UnormSrgb
    )
}

/// Depth scaling is out of scope; the seam stays so the routing decision
/// reads the same as for color.
pub fn is_supported_depth_format(_format: wgpu::TextureFormat) -> bool {
    false
}

pub fn is_capable_format(format: wgpu::TextureFormat) -> bool {
    is_direct_format(format) || is_indirect_format(format) || is_supported_depth_format(format)
}

/// Outcome of the once-per-session format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCapability {
    /// A direct format is available end to end.
    pub format_compatible: bool,
    /// Format used for aliasing and the conversion intermediate.
    pub intermediate_format: wgpu::TextureFormat,
    /// The runtime can allocate swapchain images in the intermediate format,
    /// so indirect swapchains skip the explicit conversion draw.
    pub runtime_allocates_intermediate: bool,
}

/// Negotiate against the runtime's advertised format list.
///
/// `advertised` is `None` when the runtime revision has no format
/// enumeration; negotiation then assumes direct formats work but never
/// requests aliasing it cannot verify.
pub fn negotiate_formats(
    advertised: Option<&[wgpu::TextureFormat]>,
    intermediate_format: wgpu::TextureFormat,
) -> SessionCapability {
    let capability = match advertised {
        Some(formats) => SessionCapability {
            format_compatible: formats.iter().copied().any(is_direct_format),
            intermediate_format,
            runtime_allocates_intermediate: formats.contains(&intermediate_format),
        },
        None => SessionCapability {
            format_compatible: true,
            intermediate_format,
            runtime_allocates_intermediate: false,
        },
    };
    info!(
        format_compatible = capability.format_compatible,
        intermediate_format = ?capability.intermediate_format,
        runtime_allocates_intermediate = capability.runtime_allocates_intermediate,
        "negotiated session formats"
    );
    capability
}

/// GPU objects shared by every handled swapchain of a session.
pub struct SharedPasses {
    pub convert: ConvertPass,
    pub pipelines: ScalerPipelines,
}

impl SharedPasses {
    /// Compile the session's shared objects. `None` means upscaling is
    /// unavailable for this session; swapchain creation then routes
    /// everything through untouched.
    pub fn create(device: &Arc<wgpu::Device>) -> Option<Self> {
        match ConvertPass::new(Arc::clone(device)) {
            Ok(convert) => Some(Self {
                convert,
                pipelines: ScalerPipelines::new(Arc::clone(device)),
            }),
            Err(err) => {
                warn!("session continues without upscaling: {err:#}");
                None
            }
        }
    }
}

/// Reorder `formats` so capable ones come first, preserving relative order
/// within each class; optionally drop the incapable tail.
pub fn shape_advertised_formats(
    formats: &mut Vec<wgpu::TextureFormat>,
    prioritize: bool,
    only_capable: bool,
) {
    if prioritize || only_capable {
        let mut capable: Vec<_> = formats
            .iter()
            .copied()
            .filter(|f| is_capable_format(*f))
            .collect();
        let incapable: Vec<_> = formats
            .iter()
            .copied()
            .filter(|f| !is_capable_format(*f))
            .collect();
        if !only_capable {
            capable.extend(incapable);
        }
        *formats = capable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat as Tf;

    #[test]
    fn direct_and_indirect_sets_are_disjoint() {
        for format in [Tf::Rgba8Unorm, Tf::Rgba8Snorm] {
            assert!(is_direct_format(format));
            assert!(!is_indirect_format(format));
        }
        for format in [Tf::Rgba8UnormSrgb, Tf::Bgra8Unorm, Tf::Bgra8UnormSrgb] {
            assert!(is_indirect_format(format));
            assert!(!is_direct_format(format));
        }
        assert!(!is_capable_format(Tf::Depth24PlusStencil8));
        assert!(!is_capable_format(Tf::Rgba16Float));
    }

    #[test]
    fn negotiation_detects_runtime_intermediate_support() {
        let caps = negotiate_formats(
            Some(&[Tf::Rgba8UnormSrgb, Tf::Rgba8Unorm]),
            Tf::Rgba8Unorm,
        );
        assert!(caps.format_compatible);
        assert!(caps.runtime_allocates_intermediate);

        let caps = negotiate_formats(Some(&[Tf::Rgba8UnormSrgb]), Tf::Rgba8Unorm);
        assert!(!caps.format_compatible);
        assert!(!caps.runtime_allocates_intermediate);
    }

    #[test]
    fn negotiation_without_enumeration_is_conservative() {
        let caps = negotiate_formats(None, Tf::Rgba8Unorm);
        assert!(caps.format_compatible);
        assert!(!caps.runtime_allocates_intermediate);
    }

    #[test]
    fn format_shaping_prioritizes_stably() {
        let mut formats = vec![
            Tf::Depth24PlusStencil8,
            Tf::Rgba8UnormSrgb,
            Tf::Rgba16Float,
            Tf::Rgba8Unorm,
        ];
        shape_advertised_formats(&mut formats, true, false);
        assert_eq!(
            formats,
            vec![
                Tf::Rgba8UnormSrgb,
                Tf::Rgba8Unorm,
                Tf::Depth24PlusStencil8,
                Tf::Rgba16Float
            ]
        );
    }

    #[test]
    fn format_shaping_can_drop_incapable_formats() {
        let mut formats = vec![Tf::Depth24PlusStencil8, Tf::Rgba8Unorm, Tf::Rgba16Float];
        shape_advertised_formats(&mut formats, false, true);
        assert_eq!(formats, vec![Tf::Rgba8Unorm]);
    }

    #[test]
    fn format_shaping_off_leaves_order_alone() {
        let mut formats = vec![Tf::Rgba16Float, Tf::Rgba8Unorm];
        let expected = formats.clone();
        shape_advertised_formats(&mut formats, false, false);
        assert_eq!(formats, expected);
    }
}
