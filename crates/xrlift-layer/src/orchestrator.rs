//! Per-frame orchestration.
//!
//! Runs on the application's submission thread inside the intercepted
//! end-of-frame call, before the downstream runtime sees the frame:
//!
//! 1. poll interactive controls (mode toggle, sharpness steps);
//! 2. per registered view: retune on sharpness change, dispatch the scaler,
//!    run the conversion/flat draw when one is pending;
//! 3. correct the declared sub-image rectangles to the display resolution in
//!    a private copy of the frame-end payload;
//! 4. flush all recorded GPU work, then hand the corrected copy back for
//!    forwarding.
//!
//! The conversion draw is recorded on its own command encoder unless
//! `fast_context_switch` is set, in which case it shares the frame encoder.
//! Either way every command buffer is submitted before the downstream call,
//! which assumes the frame's rendering is complete.

use std::time::Instant;

use tracing::{debug, info, warn};
use xrlift_api::types::{CompositionLayer, FrameEndInfo, SessionHandle};

use crate::controls::{stepped_sharpness, ControlEvents};
use crate::resources::SwapchainRoute;
use crate::state::{rebind_swapchains, LayerShared};
use crate::stats::{FrameStats, PassKind};

/// Process one presented frame. Returns the corrected private copy of the
/// frame-end payload to forward downstream; the caller's `frame` is left
/// untouched.
pub fn process_frame(
    shared: &mut LayerShared,
    controls: ControlEvents,
    session: SessionHandle,
    frame: &FrameEndInfo,
) -> FrameEndInfo {
    apply_controls(shared, controls);

    let mut corrected = frame.clone();

    let display = shared.display;
    let sessions = &mut shared.sessions;
    let swapchains = &mut shared.swapchains;
    let config = &shared.config;
    let stats = &mut shared.stats;
    let pending_sharpness = shared.pending_sharpness;

    let Some(state) = sessions.get_mut(&session) else {
        return corrected;
    };
    if state.passes.is_none() {
        return corrected;
    }
    let Some(display) = display else {
        return corrected;
    };

    let sharpness_changed = (config.sharpness - pending_sharpness).abs() > f32::EPSILON;
    let stats_enabled = stats.is_some();
    let mut retuned = false;
    let mut processed_any = false;

    let mut frame_encoder = state
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame scale"),
        });
    let mut deferred_encoder = (!config.fast_context_switch).then(|| {
        state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame convert"),
            })
    });

    for (layer_index, layer) in frame.layers.iter().enumerate() {
        let CompositionLayer::Projection(projection) = layer else {
            continue;
        };
        for (view_index, view) in projection.views.iter().enumerate() {
            let Some(record) = swapchains.get_mut(&view.sub_image.swapchain) else {
                continue;
            };
            if record.images.is_empty() {
                // The app never enumerated images; nothing to scale.
                continue;
            }
            // Depth submissions ride along untouched.
            if view.depth.is_some() {
                debug!("depth sub-image present, carried through unscaled");
            }

            let slice = view.sub_image.image_array_index as usize;
            let image_index = record.last_acquired as usize;
            let Some(image) = record.images.get(image_index) else {
                continue;
            };
            let Some(src_view) = image.app_srv.get(slice) else {
                warn!(
                    swapchain = view.sub_image.swapchain.0,
                    slice, "view references an array slice the swapchain does not have"
                );
                continue;
            };

            if sharpness_changed {
                record.scaler.retune(
                    &state.queue,
                    pending_sharpness,
                    record.source_extent(),
                    record.target_extent(),
                );
                retuned = true;
            }

            // Scale pass: app render -> runtime image or intermediate.
            let dst_view = match record.route {
                SwapchainRoute::Convert => record
                    .intermediate
                    .as_ref()
                    .and_then(|i| i.storage.get(slice)),
                SwapchainRoute::Direct | SwapchainRoute::Alias => image.dest_storage.get(slice),
            };
            if let Some(dst_view) = dst_view {
                let timestamps = if stats_enabled {
                    state
                        .timer
                        .as_mut()
                        .and_then(|t| t.compute_timestamps(PassKind::Scale))
                } else {
                    None
                };
                record
                    .scaler
                    .dispatch(&state.device, &mut frame_encoder, src_view, dst_view, timestamps);
                processed_any = true;
            }

            // Conversion or flat passthrough draw into the runtime image.
            let needs_draw = record.route == SwapchainRoute::Convert || record.scaler.is_flat();
            if needs_draw {
                let draw_src = if record.scaler.is_flat() {
                    Some(src_view)
                } else {
                    record.intermediate.as_ref().and_then(|i| i.srv.get(slice))
                };
                let target = image.runtime_rtv.get(slice);
                match (draw_src, target) {
                    (Some(draw_src), Some(target)) => {
                        let encoder = deferred_encoder.as_mut().unwrap_or(&mut frame_encoder);
                        let timestamps = if stats_enabled {
                            state
                                .timer
                                .as_mut()
                                .and_then(|t| t.render_timestamps(PassKind::Convert))
                        } else {
                            None
                        };
                        let Some(passes) = state.passes.as_mut() else {
                            continue;
                        };
                        processed_any = true;
                        if let Err(err) = passes.convert.record(
                            encoder,
                            draw_src,
                            target,
                            record.forwarded.format,
                            timestamps,
                        ) {
                            warn!(
                                swapchain = view.sub_image.swapchain.0,
                                "conversion draw skipped: {err:#}"
                            );
                        }
                    }
                    _ => {
                        debug!(
                            swapchain = view.sub_image.swapchain.0,
                            "conversion draw has no usable source/target for this view"
                        );
                    }
                }
            }

            // Correct the declared extent in the private copy only.
            if let Some(CompositionLayer::Projection(corrected_projection)) =
                corrected.layers.get_mut(layer_index)
            {
                if let Some(corrected_view) = corrected_projection.views.get_mut(view_index) {
                    corrected_view.sub_image.image_rect.extent = display;
                }
            }
        }
    }

    if retuned {
        shared.config.sharpness = pending_sharpness;
    }

    // Flush: scale work first, then the deferred conversion list, all before
    // the downstream submission call.
    if let Some(timer) = state.timer.as_mut() {
        if let Some(stats) = stats.as_mut() {
            let resolve_encoder = deferred_encoder.as_mut().unwrap_or(&mut frame_encoder);
            timer.resolve(resolve_encoder, stats);
        }
    }

    let submit_started = Instant::now();
    match deferred_encoder {
        Some(deferred) => {
            state
                .queue
                .submit([frame_encoder.finish(), deferred.finish()]);
        }
        None => {
            state.queue.submit([frame_encoder.finish()]);
        }
    }

    if let Some(stats) = stats.as_mut() {
        match state.timer.as_mut() {
            Some(timer) => {
                timer.after_submit();
                timer.collect(&state.device, stats);
            }
            None if processed_any => {
                // No timestamp support: approximate with host-side submit time.
                stats.record_pass(PassKind::Scale, submit_started.elapsed());
            }
            None => {}
        }
        if let Some(window) = stats.end_frame() {
            FrameStats::log_window(&window);
        }
    }

    corrected
}

fn apply_controls(shared: &mut LayerShared, controls: ControlEvents) {
    if controls.toggle_mode {
        let next = shared.mode.next(!shared.config.disable_bilinear_scaler);
        info!(mode = next.name(), "interactive scaling mode toggled");
        shared.mode = next;
        rebind_swapchains(
            &mut shared.sessions,
            &mut shared.swapchains,
            next,
            shared.config.scaling,
            shared.pending_sharpness,
        );
        if let Some(stats) = shared.stats.as_mut() {
            stats.reset();
        }
    }
    if controls.sharpness_steps != 0 {
        shared.pending_sharpness =
            stepped_sharpness(shared.pending_sharpness, controls.sharpness_steps);
        info!(sharpness = shared.pending_sharpness, "sharpness adjusted");
    }
}
