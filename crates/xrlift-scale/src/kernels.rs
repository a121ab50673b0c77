//! Generated WGSL for the scaling kernels.
//!
//! All kernels share one bind-group interface:
//! - `@binding(0)` source texture (the application's render, float-sampled)
//! - `@binding(1)` linear-clamp sampler
//! - `@binding(2)` destination storage texture (write-only)
//! - `@binding(3)` kernel parameter uniform
//!
//! The destination storage format is baked into the WGSL, so generation takes
//! the format token as input. Formatting is kept stable (explicit `\n`,
//! fixed member order) so identical inputs always produce identical source.

/// The compute kernels a swapchain binding can be backed by.
///
/// `Flat` needs no kernel (the passthrough draw samples the application
/// texture directly) and therefore has no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Plain bilinear resample, kept as a comparison baseline.
    Bilinear,
    /// Content-adaptive sharpening at identical source/target size.
    Sharpen,
    /// Bilinear resample plus content-adaptive sharpening.
    Upscale,
}

impl KernelKind {
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Bilinear => "bilinear",
            KernelKind::Sharpen => "cas_sharpen",
            KernelKind::Upscale => "cas_upscale",
        }
    }
}

/// WGSL storage-texture token for a destination format, if the scaler can
/// write it directly.
pub fn storage_format_token(format: wgpu::TextureFormat) -> Option<&'static str> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm => Some("rgba8unorm"),
        wgpu::TextureFormat::Rgba8Snorm => Some("rgba8snorm"),
        _ => None,
    }
}

fn header(storage_format: &str) -> String {
    let mut out = String::new();
    out.push_str("struct KernelParams {\n");
    out.push_str("    src_size: vec2<u32>,\n");
    out.push_str("    dst_size: vec2<u32>,\n");
    out.push_str("    inv_dst_size: vec2<f32>,\n");
    out.push_str("    sharpness: f32,\n");
    out.push_str("    _pad: f32,\n");
    out.push_str("};\n\n");
    out.push_str("@group(0) @binding(0) var src: texture_2d<f32>;\n");
    out.push_str("@group(0) @binding(1) var samp: sampler;\n");
    out.push_str(&format!(
        "@group(0) @binding(2) var dst: texture_storage_2d<{storage_format}, write>;\n"
    ));
    out.push_str("@group(0) @binding(3) var<uniform> params: KernelParams;\n\n");
    out
}

/// Shared CAS-style weighting: amplification from the local contrast window,
/// folded into a cross-tap blend. `sharpness` in [0, 1] maps to the peak
/// range used by the content-adaptive kernels.
const CAS_RESOLVE: &str = r"fn cas_resolve(b: vec3<f32>, d: vec3<f32>, e: vec3<f32>, f: vec3<f32>, h: vec3<f32>, sharpness: f32) -> vec3<f32> {
    let mn = min(min(min(d, e), min(f, b)), h);
    let mx = max(max(max(d, e), max(f, b)), h);
    let rcp_mx = 1.0 / max(mx, vec3<f32>(1.0 / 32768.0));
    let amp = sqrt(clamp(min(mn, 1.0 - mx) * rcp_mx, vec3<f32>(0.0), vec3<f32>(1.0)));
    let peak = -1.0 / mix(8.0, 5.0, sharpness);
    let w = amp * peak;
    let rcp_weight = 1.0 / (1.0 + 4.0 * w);
    return clamp((b * w + d * w + f * w + h * w + e) * rcp_weight, vec3<f32>(0.0), vec3<f32>(1.0));
}

";

/// Generate the WGSL module for `kind` writing to `storage_format`.
pub fn kernel_wgsl(kind: KernelKind, storage_format: &str) -> String {
    let mut out = header(storage_format);

    match kind {
        KernelKind::Bilinear => {
            out.push_str("@compute @workgroup_size(8, 8, 1)\n");
            out.push_str("fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
            out.push_str("    if (gid.x >= params.dst_size.x || gid.y >= params.dst_size.y) {\n");
            out.push_str("        return;\n");
            out.push_str("    }\n");
            out.push_str("    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5)) * params.inv_dst_size;\n");
            out.push_str("    let color = textureSampleLevel(src, samp, uv, 0.0);\n");
            out.push_str("    textureStore(dst, vec2<i32>(gid.xy), color);\n");
            out.push_str("}\n");
        }
        KernelKind::Sharpen => {
            out.push_str(CAS_RESOLVE);
            out.push_str("@compute @workgroup_size(8, 8, 1)\n");
            out.push_str("fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
            out.push_str("    if (gid.x >= params.dst_size.x || gid.y >= params.dst_size.y) {\n");
            out.push_str("        return;\n");
            out.push_str("    }\n");
            out.push_str("    let p = vec2<i32>(gid.xy);\n");
            out.push_str("    let lim = vec2<i32>(params.src_size) - vec2<i32>(1, 1);\n");
            out.push_str("    let b = textureLoad(src, clamp(p + vec2<i32>(0, -1), vec2<i32>(0, 0), lim), 0).rgb;\n");
            out.push_str("    let d = textureLoad(src, clamp(p + vec2<i32>(-1, 0), vec2<i32>(0, 0), lim), 0).rgb;\n");
            out.push_str("    let e4 = textureLoad(src, clamp(p, vec2<i32>(0, 0), lim), 0);\n");
            out.push_str("    let f = textureLoad(src, clamp(p + vec2<i32>(1, 0), vec2<i32>(0, 0), lim), 0).rgb;\n");
            out.push_str("    let h = textureLoad(src, clamp(p + vec2<i32>(0, 1), vec2<i32>(0, 0), lim), 0).rgb;\n");
            out.push_str("    let sharpened = cas_resolve(b, d, e4.rgb, f, h, params.sharpness);\n");
            out.push_str("    textureStore(dst, p, vec4<f32>(sharpened, e4.a));\n");
            out.push_str("}\n");
        }
        KernelKind::Upscale => {
            out.push_str(CAS_RESOLVE);
            out.push_str("@compute @workgroup_size(8, 8, 1)\n");
            out.push_str("fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {\n");
            out.push_str("    if (gid.x >= params.dst_size.x || gid.y >= params.dst_size.y) {\n");
            out.push_str("        return;\n");
            out.push_str("    }\n");
            out.push_str("    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5)) * params.inv_dst_size;\n");
            out.push_str("    let step = 1.0 / vec2<f32>(params.src_size);\n");
            out.push_str("    let b = textureSampleLevel(src, samp, uv + vec2<f32>(0.0, -step.y), 0.0).rgb;\n");
            out.push_str("    let d = textureSampleLevel(src, samp, uv + vec2<f32>(-step.x, 0.0), 0.0).rgb;\n");
            out.push_str("    let e4 = textureSampleLevel(src, samp, uv, 0.0);\n");
            out.push_str("    let f = textureSampleLevel(src, samp, uv + vec2<f32>(step.x, 0.0), 0.0).rgb;\n");
            out.push_str("    let h = textureSampleLevel(src, samp, uv + vec2<f32>(0.0, step.y), 0.0).rgb;\n");
            out.push_str("    let sharpened = cas_resolve(b, d, e4.rgb, f, h, params.sharpness);\n");
            out.push_str("    textureStore(dst, vec2<i32>(gid.xy), vec4<f32>(sharpened, e4.a));\n");
            out.push_str("}\n");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMATS: [&str; 2] = ["rgba8unorm", "rgba8snorm"];
    const KINDS: [KernelKind; 3] = [KernelKind::Bilinear, KernelKind::Sharpen, KernelKind::Upscale];

    #[test]
    fn kernels_are_valid_wgsl() {
        for kind in KINDS {
            for format in FORMATS {
                let source = kernel_wgsl(kind, format);
                let module = naga::front::wgsl::parse_str(&source).unwrap_or_else(|err| {
                    panic!("{}/{format} WGSL parse failed: {err}", kind.name())
                });
                let mut validator = naga::valid::Validator::new(
                    naga::valid::ValidationFlags::all(),
                    naga::valid::Capabilities::empty(),
                );
                validator.validate(&module).unwrap_or_else(|err| {
                    panic!("{}/{format} WGSL validation failed: {err:?}", kind.name())
                });
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = kernel_wgsl(KernelKind::Upscale, "rgba8unorm");
        let b = kernel_wgsl(KernelKind::Upscale, "rgba8unorm");
        assert_eq!(a, b);
    }

    #[test]
    fn storage_format_tokens_cover_direct_formats_only() {
        assert_eq!(
            storage_format_token(wgpu::TextureFormat::Rgba8Unorm),
            Some("rgba8unorm")
        );
        assert_eq!(
            storage_format_token(wgpu::TextureFormat::Rgba8Snorm),
            Some("rgba8snorm")
        );
        assert_eq!(storage_format_token(wgpu::TextureFormat::Rgba8UnormSrgb), None);
        assert_eq!(storage_format_token(wgpu::TextureFormat::Bgra8Unorm), None);
    }
}
