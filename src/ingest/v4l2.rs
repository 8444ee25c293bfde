//! V4L2 camera source.
//!
//! Captures BGR frames from a local device node (e.g. /dev/video0) using
//! memory-mapped streaming. The device and its stream are tied together in
//! a self-referencing struct so the mmap'd buffers cannot outlive the
//! device handle.
//!
//! Failure mapping follows the ingest taxonomy: a failed capture is
//! transient (`Err`), a vanished device node (ENODEV) is `Closed`.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use crate::config::CameraSettings;
use crate::frame::PixelFormat;

use super::{CapturedImage, FrameSource, ReadOutcome};

const ENODEV: i32 = 19;

pub struct V4l2Source {
    settings: CameraSettings,
    state: Option<V4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!("{} (v4l2)", self.settings.device)
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{})",
            self.settings.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(ReadOutcome::Closed);
        };
        let result = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
                .map_err(|err| (err.raw_os_error(), err))
        });
        let pixels = match result {
            Ok(pixels) => pixels,
            Err((Some(ENODEV), err)) => {
                log::warn!(
                    "V4l2Source: device {} disappeared: {}",
                    self.settings.device,
                    err
                );
                self.state = None;
                return Ok(ReadOutcome::Closed);
            }
            Err((_, err)) => {
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        let expected = self.active_width as usize * self.active_height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow::anyhow!(
                "v4l2 buffer length {} does not match {}x{} bgr",
                pixels.len(),
                self.active_width,
                self.active_height
            ));
        }

        self.frame_count += 1;
        Ok(ReadOutcome::Captured(CapturedImage {
            pixels,
            width: self.active_width,
            height: self.active_height,
            format: PixelFormat::Bgr8,
        }))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.settings.device);
        }
    }
}
