//! Per-pass GPU timing statistics.
//!
//! [`FrameStats`] accumulates pass durations and frame counts over a sliding
//! one-second window; on rollover it hands back a snapshot (which the caller
//! logs) and starts the next window. A scaling-mode change also resets the
//! window so numbers from different modes never mix.
//!
//! [`GpuTimer`] measures the scale and conversion passes with timestamp
//! queries when the device exposes them. Readback is pipelined: each frame
//! resolves into one of a small ring of staging buffers and the result is
//! collected a frame or two later without stalling the submission thread.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::info;

pub const STATS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Scale,
    Convert,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub scale_passes: u64,
    pub scale_time_us: u64,
    pub convert_passes: u64,
    pub convert_time_us: u64,
    pub dropped_samples: u64,
}

impl StatsSnapshot {
    pub fn mean_scale_us(&self) -> u64 {
        if self.scale_passes == 0 {
            0
        } else {
            self.scale_time_us / self.scale_passes
        }
    }

    pub fn mean_convert_us(&self) -> u64 {
        if self.convert_passes == 0 {
            0
        } else {
            self.convert_time_us / self.convert_passes
        }
    }
}

#[derive(Debug)]
pub struct FrameStats {
    window_started: Instant,
    current: StatsSnapshot,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            window_started: Instant::now(),
            current: StatsSnapshot::default(),
        }
    }

    pub fn record_pass(&mut self, kind: PassKind, duration: Duration) {
        let us = duration.as_micros() as u64;
        match kind {
            PassKind::Scale => {
                self.current.scale_passes += 1;
                self.current.scale_time_us += us;
            }
            PassKind::Convert => {
                self.current.convert_passes += 1;
                self.current.convert_time_us += us;
            }
        }
    }

    pub fn record_dropped_sample(&mut self) {
        self.current.dropped_samples += 1;
    }

    /// Count one presented frame; returns the finished window on rollover.
    pub fn end_frame(&mut self) -> Option<StatsSnapshot> {
        self.current.frames += 1;
        if self.window_started.elapsed() < STATS_WINDOW {
            return None;
        }
        let done = self.current;
        self.reset();
        Some(done)
    }

    pub fn reset(&mut self) {
        self.window_started = Instant::now();
        self.current = StatsSnapshot::default();
    }

    pub fn log_window(snapshot: &StatsSnapshot) {
        info!(
            frames = snapshot.frames,
            scale_passes = snapshot.scale_passes,
            mean_scale_us = snapshot.mean_scale_us(),
            convert_passes = snapshot.convert_passes,
            mean_convert_us = snapshot.mean_convert_us(),
            dropped_samples = snapshot.dropped_samples,
            "pass timing window"
        );
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

// Two timestamps per pass kind: begin/end for scale, begin/end for convert.
const QUERIES_PER_FRAME: u32 = 4;
const READBACK_RING: usize = 3;

struct PendingReadback {
    slot: usize,
    rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
    used: [bool; 2],
}

/// Timestamp-query timing for the scale/convert passes.
///
/// `None` from [`GpuTimer::new`] means the device lacks
/// `Features::TIMESTAMP_QUERY`; callers fall back to host-side submit timing.
pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve_buf: wgpu::Buffer,
    readback: Vec<wgpu::Buffer>,
    period_ns: f32,
    next_slot: usize,
    used: [bool; 2],
    pending: Vec<PendingReadback>,
}

impl GpuTimer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return None;
        }
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("pass timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERIES_PER_FRAME,
        });
        let size = QUERIES_PER_FRAME as u64 * 8;
        let resolve_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = (0..READBACK_RING)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("timestamp readback {i}")),
                    size,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                })
            })
            .collect();
        Some(Self {
            query_set,
            resolve_buf,
            readback,
            period_ns: queue.get_timestamp_period(),
            next_slot: 0,
            used: [false; 2],
            pending: Vec::new(),
        })
    }

    fn base_query(kind: PassKind) -> u32 {
        match kind {
            PassKind::Scale => 0,
            PassKind::Convert => 2,
        }
    }

    /// Timestamp writes for a compute pass of `kind` this frame, if the
    /// slot is free (one timed pass per kind per frame).
    pub fn compute_timestamps(&mut self, kind: PassKind) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let index = Self::base_query(kind);
        let slot = &mut self.used[(index / 2) as usize];
        if *slot {
            return None;
        }
        *slot = true;
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(index),
            end_of_pass_write_index: Some(index + 1),
        })
    }

    /// As [`GpuTimer::compute_timestamps`], for a render pass.
    pub fn render_timestamps(&mut self, kind: PassKind) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        let index = Self::base_query(kind);
        let slot = &mut self.used[(index / 2) as usize];
        if *slot {
            return None;
        }
        *slot = true;
        Some(wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(index),
            end_of_pass_write_index: Some(index + 1),
        })
    }

    /// Record query resolution at the end of the frame's GPU work. Returns
    /// whether anything was resolved.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder, stats: &mut FrameStats) -> bool {
        if !self.used.iter().any(|u| *u) {
            return false;
        }
        let slot = self.next_slot;
        if self.pending.iter().any(|p| p.slot == slot) {
            // The ring wrapped before the GPU caught up; drop this frame's
            // sample rather than stall.
            stats.record_dropped_sample();
            self.used = [false; 2];
            return false;
        }
        encoder.resolve_query_set(&self.query_set, 0..QUERIES_PER_FRAME, &self.resolve_buf, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buf,
            0,
            &self.readback[slot],
            0,
            QUERIES_PER_FRAME as u64 * 8,
        );
        true
    }

    /// Kick off the asynchronous map of this frame's readback. Call after the
    /// frame's command buffers were submitted.
    pub fn after_submit(&mut self) {
        if !self.used.iter().any(|u| *u) {
            return;
        }
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.readback.len();

        let (tx, rx) = mpsc::channel();
        self.readback[slot]
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |res| {
                let _ = tx.send(res);
            });
        self.pending.push(PendingReadback {
            slot,
            rx,
            used: self.used,
        });
        self.used = [false; 2];
    }

    /// Collect any readbacks that completed; feeds `stats`.
    pub fn collect(&mut self, device: &wgpu::Device, stats: &mut FrameStats) {
        let _ = device.poll(wgpu::Maintain::Poll);

        let mut finished = Vec::new();
        for (i, pending) in self.pending.iter().enumerate() {
            match pending.rx.try_recv() {
                Ok(Ok(())) => finished.push(i),
                Ok(Err(_)) | Err(mpsc::TryRecvError::Disconnected) => {
                    stats.record_dropped_sample();
                    finished.push(i);
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }

        // Highest index first so removal keeps earlier indices valid.
        for i in finished.into_iter().rev() {
            let pending = self.pending.remove(i);
            let buffer = &self.readback[pending.slot];
            {
                let mapped = buffer.slice(..).get_mapped_range();
                let raw: &[u8] = &mapped;
                let mut ticks = [0u64; QUERIES_PER_FRAME as usize];
                for (t, chunk) in ticks.iter_mut().zip(raw.chunks_exact(8)) {
                    *t = u64::from_le_bytes(chunk.try_into().unwrap());
                }
                for (pass_index, kind) in [(0, PassKind::Scale), (1, PassKind::Convert)] {
                    if !pending.used[pass_index] {
                        continue;
                    }
                    let begin = ticks[pass_index * 2];
                    let end = ticks[pass_index * 2 + 1];
                    if end > begin {
                        let ns = (end - begin) as f64 * self.period_ns as f64;
                        stats.record_pass(kind, Duration::from_nanos(ns as u64));
                    }
                }
            }
            buffer.unmap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rolls_over_and_resets() {
        let mut stats = FrameStats::new();
        stats.record_pass(PassKind::Scale, Duration::from_micros(120));
        stats.record_pass(PassKind::Scale, Duration::from_micros(80));
        stats.record_pass(PassKind::Convert, Duration::from_micros(40));
        assert!(stats.end_frame().is_none());

        // Force rollover without sleeping.
        stats.window_started = Instant::now() - STATS_WINDOW;
        let snapshot = stats.end_frame().expect("window should roll over");
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.scale_passes, 2);
        assert_eq!(snapshot.mean_scale_us(), 100);
        assert_eq!(snapshot.convert_passes, 1);

        // Fresh window after rollover.
        assert!(stats.end_frame().is_none());
        stats.window_started = Instant::now() - STATS_WINDOW;
        let next = stats.end_frame().expect("second rollover");
        assert_eq!(next.frames, 2);
        assert_eq!(next.scale_passes, 0);
    }

    #[test]
    fn reset_discards_partial_window() {
        let mut stats = FrameStats::new();
        stats.record_pass(PassKind::Scale, Duration::from_micros(500));
        stats.reset();
        stats.window_started = Instant::now() - STATS_WINDOW;
        let snapshot = stats.end_frame().unwrap();
        assert_eq!(snapshot.scale_passes, 0);
        assert_eq!(snapshot.frames, 1);
    }

    #[test]
    fn snapshot_means_handle_empty_windows() {
        let snapshot = StatsSnapshot::default();
        assert_eq!(snapshot.mean_scale_us(), 0);
        assert_eq!(snapshot.mean_convert_us(), 0);
    }
}
