//! vigil - dual-camera motion detection pipeline.
//!
//! Live frames from independent camera sources flow through a bounded
//! hand-off into a single processing worker, which maintains one adaptive
//! background model per camera and turns foreground regions into filtered,
//! annotated detections. The display side polls the latest result per
//! camera on its own cadence and never blocks the pipeline.
//!
//! # Architecture
//!
//! ```text
//! camera 0 --> capture worker 0 --\
//!                                  +--> BoundedFrameChannel --> processing
//! camera 1 --> capture worker 1 --/        (FIFO, drop-newest)    worker
//!                                                                   |
//!                         ResultCache (latest per camera) <---------+
//!                         MetricsTracker (fps, queue depth)
//! ```
//!
//! Design rules the modules enforce:
//! - Frames are owned by exactly one stage at a time; hand-off moves them.
//! - Overload drops the newest frame, never a queued one, and staleness is
//!   checked again right before processing.
//! - Background models are touched only by the processing worker and are
//!   never reset mid-run (the one exception is the sticky fallback from
//!   the accelerated to the baseline estimation path).
//!
//! # Module Structure
//!
//! - `frame`: frame, mask and detection types
//! - `channel`: bounded capture-to-processing hand-off
//! - `ingest`: camera sources (synthetic, V4L2)
//! - `detect`: background model, morphology, contours, detector
//! - `pipeline`: worker threads and lifecycle
//! - `cache` / `metrics`: what the display side reads
//! - `config`: file + environment configuration

pub mod cache;
pub mod channel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod pipeline;

pub use cache::ResultCache;
pub use channel::{BoundedFrameChannel, Offer, Take};
pub use config::{CameraSettings, DetectionSettings, PipelineConfig};
pub use detect::{DetectError, Detector, ForegroundEstimator, ModelParams, ProcessingMode};
pub use frame::{DetectionBox, Frame, Mask, PixelFormat, ProcessedResult, SourceId};
pub use ingest::{
    open_source, FrameSource, ReadOutcome, SceneScript, SyntheticConfig, SyntheticSource,
};
pub use metrics::{MetricsSnapshot, MetricsTracker, SourceMetrics};
pub use pipeline::Pipeline;
