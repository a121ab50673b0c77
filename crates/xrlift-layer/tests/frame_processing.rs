//! Frame-path integration tests: rectangle correction, scaler selection,
//! interactive controls, and the conversion routes, driven end to end through
//! the intercepted call surface.

mod common;

use std::sync::Arc;

use xrlift_api::sim::SimRuntime;
use xrlift_api::types::{
    CompositionLayer, CompositionLayerProjection, EnvironmentBlendMode, Extent2d, FrameEndInfo,
    Fovf, GraphicsBinding, InstanceCreateInfo, Offset2d, Posef, ProjectionView, Rect2d,
    SessionCreateInfo, SessionHandle, SubImage, SwapchainCreateInfo, SwapchainHandle,
    SwapchainUsage, SystemId, ViewConfigurationType, WgpuBinding,
};
use xrlift_api::XrRuntime;
use xrlift_layer::{ConfigStore, ControlEvents, ScriptedControls, UpscalerLayer};

const DISPLAY: Extent2d = Extent2d {
    width: 1600,
    height: 1600,
};

const APP_NAME: &str = "FrameTest";

fn instance_info() -> InstanceCreateInfo {
    InstanceCreateInfo {
        application_name: APP_NAME.into(),
        engine_name: String::new(),
        api_version: xrlift_api::chain::CURRENT_API_VERSION,
    }
}

fn configs(pairs: &[(&str, &str)]) -> ConfigStore {
    let mut store = ConfigStore::new();
    store.insert(APP_NAME, pairs.iter().copied());
    store
}

struct Stack {
    sim: Arc<SimRuntime>,
    layer: Arc<UpscalerLayer>,
    session: SessionHandle,
}

fn build_stack(
    gpu: &common::TestGpu,
    config_pairs: &[(&str, &str)],
    controls: Vec<ControlEvents>,
    sim_formats: Option<Vec<wgpu::TextureFormat>>,
) -> Stack {
    let mut sim = SimRuntime::new(Arc::clone(&gpu.device), DISPLAY);
    if let Some(formats) = sim_formats {
        sim = sim.with_formats(formats);
    }
    let sim = Arc::new(sim);

    let next_info = xrlift_api::chain::ApiLayerNextInfo::for_layer(
        xrlift_layer::LAYER_NAME,
        Arc::clone(&sim) as Arc<dyn XrRuntime>,
    );
    let layer_info = xrlift_api::chain::ApiLayerCreateInfo::with_next(next_info);
    let layer = UpscalerLayer::create_instance(
        &instance_info(),
        &layer_info,
        &configs(config_pairs),
        Box::new(ScriptedControls::new(controls)),
    )
    .expect("instance creation");

    layer
        .enumerate_view_configuration_views(SystemId(1), ViewConfigurationType::PrimaryStereo)
        .expect("view enumeration");
    let session = layer
        .create_session(&SessionCreateInfo {
            system: SystemId(1),
            bindings: vec![GraphicsBinding::Wgpu(WgpuBinding {
                device: Arc::clone(&gpu.device),
                queue: Arc::clone(&gpu.queue),
            })],
        })
        .expect("session creation");

    Stack { sim, layer, session }
}

fn make_swapchain(
    stack: &Stack,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> SwapchainHandle {
    let swapchain = stack
        .layer
        .create_swapchain(
            stack.session,
            &SwapchainCreateInfo {
                usage: SwapchainUsage::COLOR_ATTACHMENT | SwapchainUsage::SAMPLED,
                format,
                sample_count: 1,
                width,
                height,
                face_count: 1,
                array_size: 2,
                mip_count: 1,
            },
        )
        .expect("swapchain creation");
    stack
        .layer
        .enumerate_swapchain_images(swapchain)
        .expect("image enumeration");
    stack
        .layer
        .acquire_swapchain_image(swapchain)
        .expect("image acquisition");
    swapchain
}

fn projection_frame(swapchain: SwapchainHandle, width: u32, height: u32) -> FrameEndInfo {
    FrameEndInfo {
        display_time_ns: 0,
        blend_mode: EnvironmentBlendMode::Opaque,
        layers: vec![CompositionLayer::Projection(CompositionLayerProjection {
            space: 1,
            views: (0..2)
                .map(|slice| ProjectionView {
                    pose: Posef::IDENTITY,
                    fov: Fovf::SYMMETRIC_90,
                    sub_image: SubImage {
                        swapchain,
                        image_rect: Rect2d {
                            offset: Offset2d { x: 0, y: 0 },
                            extent: Extent2d { width, height },
                        },
                        image_array_index: slice,
                    },
                    depth: None,
                })
                .collect(),
        })],
    }
}

fn frame_extents(frame: &FrameEndInfo) -> Vec<Extent2d> {
    frame
        .layers
        .iter()
        .filter_map(|layer| match layer {
            CompositionLayer::Projection(p) => Some(p),
            _ => None,
        })
        .flat_map(|p| p.views.iter().map(|v| v.sub_image.image_rect.extent))
        .collect()
}

#[test]
fn end_frame_corrects_extents_in_a_private_copy() {
    let Some(gpu) = common::test_gpu("end_frame_corrects_extents_in_a_private_copy") else {
        return;
    };
    let stack = build_stack(&gpu, &[("scaling", "0.7")], Vec::new(), None);
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);

    let frame = projection_frame(swapchain, 1120, 1120);
    let before = frame.clone();
    stack.layer.end_frame(stack.session, &frame).expect("end frame");

    // Caller memory is never rewritten.
    assert_eq!(frame, before);

    // The runtime saw the display-resolution extents.
    let downstream = stack.sim.last_end_frame().expect("frame reached the sim");
    for extent in frame_extents(&downstream) {
        assert_eq!(extent, DISPLAY);
    }
}

#[test]
fn unregistered_swapchain_extents_are_left_alone() {
    let Some(gpu) = common::test_gpu("unregistered_swapchain_extents_are_left_alone") else {
        return;
    };
    let stack = build_stack(&gpu, &[("scaling", "0.7")], Vec::new(), None);

    // Depth formats are outside the supported set: forwarded untouched.
    let swapchain = stack
        .layer
        .create_swapchain(
            stack.session,
            &SwapchainCreateInfo {
                usage: SwapchainUsage::DEPTH_STENCIL_ATTACHMENT,
                format: wgpu::TextureFormat::Depth24PlusStencil8,
                sample_count: 1,
                width: 1120,
                height: 1120,
                face_count: 1,
                array_size: 2,
                mip_count: 1,
            },
        )
        .unwrap();

    let frame = projection_frame(swapchain, 1120, 1120);
    stack.layer.end_frame(stack.session, &frame).unwrap();

    let downstream = stack.sim.last_end_frame().unwrap();
    for extent in frame_extents(&downstream) {
        assert_eq!(
            extent,
            Extent2d {
                width: 1120,
                height: 1120
            }
        );
    }
}

#[test]
fn scale_factor_selects_the_kernel_variant() {
    let Some(gpu) = common::test_gpu("scale_factor_selects_the_kernel_variant") else {
        return;
    };

    let upscale = build_stack(&gpu, &[("scaling", "0.7")], Vec::new(), None);
    let swapchain = make_swapchain(&upscale, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);
    assert_eq!(upscale.layer.scaler_kind(swapchain), Some("cas_upscale"));

    let sharpen_only = build_stack(&gpu, &[("scaling", "1.0")], Vec::new(), None);
    let swapchain = make_swapchain(&sharpen_only, wgpu::TextureFormat::Rgba8Unorm, 1600, 1600);
    assert_eq!(sharpen_only.layer.scaler_kind(swapchain), Some("cas_sharpen"));
}

#[test]
fn mode_toggle_cycles_through_the_scalers() {
    let Some(gpu) = common::test_gpu("mode_toggle_cycles_through_the_scalers") else {
        return;
    };
    let toggle = ControlEvents {
        toggle_mode: true,
        sharpness_steps: 0,
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7")],
        vec![toggle, toggle, toggle],
        None,
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);
    let frame = projection_frame(swapchain, 1120, 1120);

    assert_eq!(stack.layer.scaler_kind(swapchain), Some("cas_upscale"));

    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("flat"));

    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("bilinear"));

    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("cas_upscale"));
}

#[test]
fn mode_toggle_skips_bilinear_when_disabled() {
    let Some(gpu) = common::test_gpu("mode_toggle_skips_bilinear_when_disabled") else {
        return;
    };
    let toggle = ControlEvents {
        toggle_mode: true,
        sharpness_steps: 0,
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7"), ("disable_bilinear_scaler", "true")],
        vec![toggle, toggle],
        None,
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);
    let frame = projection_frame(swapchain, 1120, 1120);

    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("flat"));

    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("cas_upscale"));
}

#[test]
fn sharpness_step_reaches_the_next_retune() {
    let Some(gpu) = common::test_gpu("sharpness_step_reaches_the_next_retune") else {
        return;
    };
    let step_up = ControlEvents {
        toggle_mode: false,
        sharpness_steps: 1,
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7"), ("sharpness", "0.5")],
        vec![step_up],
        None,
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);
    assert!((stack.layer.scaler_sharpness(swapchain).unwrap() - 0.5).abs() < 1e-6);

    let frame = projection_frame(swapchain, 1120, 1120);
    stack.layer.end_frame(stack.session, &frame).unwrap();

    assert!((stack.layer.sharpness() - 0.55).abs() < 1e-6);
    assert!((stack.layer.scaler_sharpness(swapchain).unwrap() - 0.55).abs() < 1e-6);
}

#[test]
fn sharpness_clamps_at_the_top_of_the_range() {
    let Some(gpu) = common::test_gpu("sharpness_clamps_at_the_top_of_the_range") else {
        return;
    };
    let step_up = ControlEvents {
        toggle_mode: false,
        sharpness_steps: 1,
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7"), ("sharpness", "0.98")],
        vec![step_up],
        None,
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);

    let frame = projection_frame(swapchain, 1120, 1120);
    stack.layer.end_frame(stack.session, &frame).unwrap();
    assert_eq!(stack.layer.sharpness(), 1.0);
    assert_eq!(stack.layer.scaler_sharpness(swapchain), Some(1.0));
}

#[test]
fn indirect_format_aliases_when_the_runtime_can_allocate_it() {
    let Some(gpu) = common::test_gpu("indirect_format_aliases_when_the_runtime_can_allocate_it")
    else {
        return;
    };
    let stack = build_stack(&gpu, &[("scaling", "0.7")], Vec::new(), None);
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8UnormSrgb, 1120, 1120);

    // Downstream allocation switched to the intermediate format with scaler
    // write access; the app-visible images keep the requested format.
    let downstream = stack.sim.swapchain_info(swapchain).unwrap();
    assert_eq!(downstream.format, wgpu::TextureFormat::Rgba8Unorm);
    assert!(downstream.usage.contains(SwapchainUsage::UNORDERED_ACCESS));

    let images = stack.layer.enumerate_swapchain_images(swapchain).unwrap();
    assert_eq!(
        images[0].texture.format(),
        wgpu::TextureFormat::Rgba8UnormSrgb
    );

    let frame = projection_frame(swapchain, 1120, 1120);
    stack.layer.end_frame(stack.session, &frame).expect("end frame");
}

#[test]
fn indirect_format_converts_when_aliasing_is_unavailable() {
    let Some(gpu) = common::test_gpu("indirect_format_converts_when_aliasing_is_unavailable")
    else {
        return;
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7")],
        Vec::new(),
        Some(vec![wgpu::TextureFormat::Rgba8UnormSrgb]),
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8UnormSrgb, 1120, 1120);

    // The runtime image keeps the application's format; the kernel writes an
    // intermediate and the conversion draw bridges the two.
    let downstream = stack.sim.swapchain_info(swapchain).unwrap();
    assert_eq!(downstream.format, wgpu::TextureFormat::Rgba8UnormSrgb);
    assert!(!downstream.usage.contains(SwapchainUsage::UNORDERED_ACCESS));

    let frame = projection_frame(swapchain, 1120, 1120);
    stack.layer.end_frame(stack.session, &frame).expect("end frame");

    let extents = frame_extents(&stack.sim.last_end_frame().unwrap());
    assert!(extents.iter().all(|e| *e == DISPLAY));
}

#[test]
fn stats_window_survives_several_frames() {
    let Some(gpu) = common::test_gpu("stats_window_survives_several_frames") else {
        return;
    };
    let stack = build_stack(
        &gpu,
        &[("scaling", "0.7"), ("enable_stats", "true")],
        Vec::new(),
        None,
    );
    let swapchain = make_swapchain(&stack, wgpu::TextureFormat::Rgba8Unorm, 1120, 1120);
    let frame = projection_frame(swapchain, 1120, 1120);

    for _ in 0..4 {
        stack.layer.end_frame(stack.session, &frame).expect("end frame");
    }
    assert_eq!(stack.layer.scaler_kind(swapchain), Some("cas_upscale"));
}
