//! Pipeline throughput counters.
//!
//! `MetricsTracker` keeps, per source, cumulative frame counters plus a
//! fixed one-second FPS window: at each window boundary the reported rate
//! becomes `frames_in_window / elapsed` and the window counter resets.
//! A plain fixed-window estimator, not an exponential moving average, so
//! the number shown matches what actually happened in the last second.
//!
//! Writers are the pipeline workers; readers take `snapshot()` copies and
//! never hold anything across the poll.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::frame::SourceId;

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct SourceWindow {
    frames_in_window: u64,
    window_start: Instant,
    fps: f64,
    processed_total: u64,
    dropped_total: u64,
    stale_total: u64,
}

impl SourceWindow {
    fn new(now: Instant) -> Self {
        Self {
            frames_in_window: 0,
            window_start: now,
            fps: 0.0,
            processed_total: 0,
            dropped_total: 0,
            stale_total: 0,
        }
    }
}

/// Read-only view of one source's counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceMetrics {
    pub fps: f64,
    pub processed_total: u64,
    pub dropped_total: u64,
    pub stale_total: u64,
}

/// Read-only view of the whole tracker.
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub sources: Vec<SourceMetrics>,
    pub queue_depth: usize,
}

impl MetricsSnapshot {
    /// Mean FPS across sources, for the aggregate log line.
    pub fn average_fps(&self) -> f64 {
        if self.sources.is_empty() {
            return 0.0;
        }
        self.sources.iter().map(|s| s.fps).sum::<f64>() / self.sources.len() as f64
    }
}

struct Inner {
    windows: Vec<SourceWindow>,
    queue_depth: usize,
}

pub struct MetricsTracker {
    inner: Mutex<Inner>,
}

impl MetricsTracker {
    pub fn new(sources: usize) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(Inner {
                windows: (0..sources).map(|_| SourceWindow::new(now)).collect(),
                queue_depth: 0,
            }),
        }
    }

    /// Record a completed frame for a source.
    pub fn frame_processed(&self, source: SourceId) {
        self.frame_processed_at(source, Instant::now());
    }

    fn frame_processed_at(&self, source: SourceId, now: Instant) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let Some(window) = inner.windows.get_mut(source) else {
            return;
        };
        window.frames_in_window += 1;
        window.processed_total += 1;

        let elapsed = now.saturating_duration_since(window.window_start);
        if elapsed >= FPS_WINDOW {
            window.fps = window.frames_in_window as f64 / elapsed.as_secs_f64();
            window.frames_in_window = 0;
            window.window_start = now;
        }
    }

    /// Record a frame the capture side had to drop at the channel.
    pub fn frame_dropped(&self, source: SourceId) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        if let Some(window) = inner.windows.get_mut(source) {
            window.dropped_total += 1;
        }
    }

    /// Record a frame discarded by the staleness gate.
    pub fn frame_stale(&self, source: SourceId) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        if let Some(window) = inner.windows.get_mut(source) {
            window.stale_total += 1;
        }
    }

    /// Update the channel-depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.lock().expect("metrics lock poisoned").queue_depth = depth;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            sources: inner
                .windows
                .iter()
                .map(|w| SourceMetrics {
                    fps: w.fps,
                    processed_total: w.processed_total,
                    dropped_total: w.dropped_total,
                    stale_total: w.stale_total,
                })
                .collect(),
            queue_depth: inner.queue_depth,
        }
    }
}
