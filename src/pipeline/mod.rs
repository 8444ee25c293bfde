//! Worker threads and pipeline lifecycle.
//!
//! One capture worker per camera pulls frames at whatever rate the source
//! delivers and offers them to the shared bounded channel. A single
//! processing worker drains the channel, runs detection with the matching
//! per-camera model, and publishes the newest result per camera. Because
//! processing is single-threaded, the background models are single-writer
//! by construction and carry no locks.
//!
//! Every worker observes the stop flag within its bounded wait (capture:
//! idle sleep, processing: take timeout), so `stop()` completes promptly
//! and releases every camera handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::cache::ResultCache;
use crate::channel::{BoundedFrameChannel, Offer, Take};
use crate::config::PipelineConfig;
use crate::detect::{
    make_estimator, DetectError, Detector, ForegroundEstimator, ModelParams, ProcessingMode,
};
use crate::frame::Frame;
use crate::ingest::{FrameSource, ReadOutcome};
use crate::metrics::MetricsTracker;

/// Bounded wait inside the processing loop; doubles as the stop-flag
/// observation interval.
const TAKE_WAIT: Duration = Duration::from_millis(100);
/// Idle wait when a source has no frame yet. Small enough that a stop
/// request is still observed well inside the 100 ms bound.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Running pipeline handle. Dropping it without calling `stop` leaves the
/// workers running detached; call `stop` to shut down and join.
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    channel: Arc<BoundedFrameChannel>,
    cache: Arc<ResultCache>,
    metrics: Arc<MetricsTracker>,
    capture_handles: Vec<JoinHandle<()>>,
    processing_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn capture workers for every source plus the processing worker.
    ///
    /// Source order defines camera indices: `sources[i]` becomes camera
    /// `i` everywhere (models, cache slots, metrics).
    pub fn start(config: PipelineConfig, sources: Vec<Box<dyn FrameSource>>) -> Result<Self> {
        if sources.is_empty() {
            return Err(anyhow!("pipeline needs at least one camera source"));
        }
        let cameras = sources.len();
        let stop = Arc::new(AtomicBool::new(false));
        let channel = Arc::new(BoundedFrameChannel::new(config.channel_capacity));
        let cache = Arc::new(ResultCache::new(cameras));
        let metrics = Arc::new(MetricsTracker::new(cameras));

        let mut worker = ProcessingWorker::new(
            &config,
            cameras,
            channel.clone(),
            cache.clone(),
            metrics.clone(),
            stop.clone(),
        );
        let processing_handle = std::thread::spawn(move || worker.run());

        let capture_handles = sources
            .into_iter()
            .enumerate()
            .map(|(id, source)| {
                let channel = channel.clone();
                let metrics = metrics.clone();
                let stop = stop.clone();
                std::thread::spawn(move || run_capture(id, source, channel, metrics, stop))
            })
            .collect();

        log::info!(
            "pipeline started: {} cameras, channel capacity {}, {:?} mode",
            cameras,
            config.channel_capacity,
            config.mode
        );

        Ok(Self {
            stop,
            channel,
            cache,
            metrics,
            capture_handles,
            processing_handle: Some(processing_handle),
        })
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        self.cache.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsTracker> {
        self.metrics.clone()
    }

    /// Signal shutdown without joining. `stop` must still be called to
    /// reap the worker threads.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop all workers and wait for them to exit.
    pub fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.channel.close();
        for (id, handle) in self.capture_handles.drain(..).enumerate() {
            handle
                .join()
                .map_err(|_| anyhow!("capture worker {} panicked", id))?;
        }
        if let Some(handle) = self.processing_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("processing worker panicked"))?;
        }
        log::info!("pipeline stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Capture worker
// ----------------------------------------------------------------------------

fn run_capture(
    source_id: usize,
    mut source: Box<dyn FrameSource>,
    channel: Arc<BoundedFrameChannel>,
    metrics: Arc<MetricsTracker>,
    stop: Arc<AtomicBool>,
) {
    if let Err(err) = source.open() {
        log::error!("camera {}: open failed: {:#}", source_id, err);
        return;
    }
    log::info!("camera {}: capturing from {}", source_id, source.describe());

    while !stop.load(Ordering::Relaxed) {
        match source.read_frame() {
            Ok(ReadOutcome::Captured(img)) => {
                let frame = Frame::new(
                    img.pixels,
                    img.width,
                    img.height,
                    img.format,
                    source_id,
                    Instant::now(),
                );
                match channel.offer(frame) {
                    Offer::Accepted => {}
                    Offer::Dropped => {
                        // Overload: this frame is sacrificed, queued frames
                        // keep their order.
                        metrics.frame_dropped(source_id);
                        log::debug!("camera {}: channel full, frame dropped", source_id);
                    }
                    Offer::Closed => break,
                }
            }
            Ok(ReadOutcome::Pending) => std::thread::sleep(IDLE_WAIT),
            Ok(ReadOutcome::Closed) => {
                log::info!("camera {}: source closed, stopping this capture", source_id);
                break;
            }
            Err(err) => {
                log::warn!("camera {}: read failed, retrying: {:#}", source_id, err);
                std::thread::sleep(IDLE_WAIT);
            }
        }
    }
    source.release();
}

// ----------------------------------------------------------------------------
// Processing worker
// ----------------------------------------------------------------------------

struct ProcessingWorker {
    detector: Detector,
    estimators: Vec<Box<dyn ForegroundEstimator>>,
    mode: ProcessingMode,
    params: ModelParams,
    staleness_budget: Duration,
    channel: Arc<BoundedFrameChannel>,
    cache: Arc<ResultCache>,
    metrics: Arc<MetricsTracker>,
    stop: Arc<AtomicBool>,
}

impl ProcessingWorker {
    fn new(
        config: &PipelineConfig,
        cameras: usize,
        channel: Arc<BoundedFrameChannel>,
        cache: Arc<ResultCache>,
        metrics: Arc<MetricsTracker>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let params = ModelParams {
            history: config.detection.history,
            var_threshold: config.detection.var_threshold,
        };
        Self {
            detector: Detector::new(config.detection.clone()),
            estimators: (0..cameras)
                .map(|_| make_estimator(config.mode, params))
                .collect(),
            mode: config.mode,
            params,
            staleness_budget: config.staleness_budget,
            channel,
            cache,
            metrics,
            stop,
        }
    }

    fn run(&mut self) {
        log::info!("processing worker running ({:?} mode)", self.mode);
        loop {
            match self.channel.take(TAKE_WAIT) {
                Take::TimedOut => {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Take::Closed => break,
                Take::Frame(frame) => {
                    self.metrics.set_queue_depth(self.channel.depth());
                    self.handle_frame(frame);
                }
            }
        }
        log::info!("processing worker stopped");
    }

    fn handle_frame(&mut self, frame: Frame) {
        let source = frame.source;

        // Under sustained overload, catching up on old frames only makes
        // the output lag worse; recency wins over completeness.
        let age = frame.age(Instant::now());
        if age > self.staleness_budget {
            self.metrics.frame_stale(source);
            log::debug!("camera {}: frame {} ms old, discarded", source, age.as_millis());
            return;
        }

        let Some(estimator) = self.estimators.get_mut(source) else {
            log::warn!("frame from unknown camera {} discarded", source);
            return;
        };
        match self.detector.process(frame, estimator.as_mut()) {
            Ok(result) => {
                self.cache.publish(result);
                self.metrics.frame_processed(source);
            }
            Err(DetectError::Foreground(err)) if self.mode == ProcessingMode::Accelerated => {
                self.fall_back(err);
            }
            Err(err) => {
                log::warn!("camera {}: frame skipped: {}", source, err);
            }
        }
    }

    /// One-time switch to the baseline path after an accelerated failure.
    ///
    /// Sticky for the rest of the run; the models are rebuilt for the
    /// baseline backend, so warm-up restarts once.
    fn fall_back(&mut self, err: anyhow::Error) {
        log::warn!(
            "accelerated foreground estimation failed ({:#}); using baseline for the rest of the run",
            err
        );
        self.mode = ProcessingMode::Baseline;
        self.estimators = (0..self.estimators.len())
            .map(|_| make_estimator(self.mode, self.params))
            .collect();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
