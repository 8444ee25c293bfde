//! Camera frame sources.
//!
//! Sources behind this module:
//! - Synthetic scenes (`stub://` device strings, tests and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source hands back raw captured images; the capture worker owns
//! timestamping and channel hand-off. Failure taxonomy is explicit:
//! `Err` from `read_frame` is always transient (skip and continue),
//! permanent loss of the source is reported in-band as
//! `ReadOutcome::Closed` and stops only that camera's worker.

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::frame::PixelFormat;

pub use synthetic::{SceneScript, SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Raw image as delivered by a camera, before the capture worker stamps
/// it into a `Frame`.
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Result of one non-blocking read attempt.
pub enum ReadOutcome {
    Captured(CapturedImage),
    /// No frame available yet; caller should idle briefly and retry.
    Pending,
    /// The source is permanently gone. Terminal for this source only.
    Closed,
}

/// Contract between the capture workers and whatever delivers frames.
pub trait FrameSource: Send {
    /// Human-readable identity for log lines.
    fn describe(&self) -> String;

    /// Acquire the underlying device. Called once before the read loop.
    fn open(&mut self) -> Result<()>;

    /// Attempt to read the next frame. `Err` means transient failure.
    fn read_frame(&mut self) -> Result<ReadOutcome>;

    /// Release the underlying device. Idempotent; called on worker exit.
    fn release(&mut self);
}

/// Build a source for a camera config entry.
///
/// `stub://` devices select the synthetic source; anything else is a local
/// device node.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig::from_camera(
            settings,
        ))));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings.clone())?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "device '{}' requires the ingest-v4l2 feature",
            settings.device
        ))
    }
}
