//! Frame detection: foreground estimation through box annotation.
//!
//! One `Detector` instance is shared across cameras (it is stateless); the
//! per-camera state lives in each camera's `ForegroundEstimator`. The
//! stage order is fixed:
//!
//! downscale -> estimate -> binarize -> median -> open -> close ->
//! regions -> filter -> rescale -> annotate
//!
//! Geometry found at working resolution is mapped back through the inverse
//! scale factor, and annotation always happens on the original-resolution
//! frame so the downscale optimization never degrades the rendered output.

use std::fmt;

use crate::config::DetectionSettings;
use crate::detect::contours::{find_regions, Region};
use crate::detect::model::ForegroundEstimator;
use crate::detect::morphology::{close, open, Kernel};
use crate::detect::ops;
use crate::frame::{DetectionBox, Frame, Mask, ProcessedResult};

/// Scores at or above this binarize to foreground. High on purpose: it
/// suppresses low-confidence ghost pixels that a permissive cutoff would
/// let through.
const BINARY_CUTOFF: u8 = 200;

const BOX_THICKNESS: u32 = 2;
/// BGR green, same as the annotation the display side always showed.
const BOX_COLOR: [u8; 3] = [0, 255, 0];

/// Detection failure, split by which half of the pipeline failed.
///
/// `Foreground` wraps an estimator error; the processing worker uses that
/// distinction to decide whether the accelerated path should be abandoned.
/// `Frame` covers everything else and only ever costs the one frame.
#[derive(Debug)]
pub enum DetectError {
    Foreground(anyhow::Error),
    Frame(anyhow::Error),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::Foreground(err) => write!(f, "foreground estimation failed: {}", err),
            DetectError::Frame(err) => write!(f, "frame processing failed: {}", err),
        }
    }
}

impl std::error::Error for DetectError {}

pub struct Detector {
    settings: DetectionSettings,
}

impl Detector {
    pub fn new(settings: DetectionSettings) -> Self {
        Self { settings }
    }

    /// Run the full detection pass for one frame.
    ///
    /// Consumes the frame; its buffer becomes the annotated output frame.
    /// The estimator is updated as a side effect (online model).
    pub fn process(
        &self,
        frame: Frame,
        estimator: &mut dyn ForegroundEstimator,
    ) -> Result<ProcessedResult, DetectError> {
        let luma = ops::luma(&frame).map_err(DetectError::Frame)?;

        // Working resolution: wide frames are scaled down for throughput,
        // and every geometric quantity derived below is scaled back up.
        let (orig_w, orig_h) = (frame.width, frame.height);
        let (work_w, work_h) = self.working_dims(orig_w, orig_h);
        let scaled = work_w != orig_w;
        let working = if scaled {
            ops::resize_gray_bilinear(&luma, orig_w, orig_h, work_w, work_h)
        } else {
            luma
        };

        let scores = estimator
            .apply(&working, work_w, work_h)
            .map_err(DetectError::Foreground)?;

        let binary = ops::threshold_binary(&ops::median3(&scores, work_w, work_h), BINARY_CUTOFF);
        let opened = open(&binary, work_w, work_h, Kernel::Small);
        let cleaned = close(&opened, work_w, work_h, Kernel::Large);

        let max_area = work_w as f32 * work_h as f32 * self.settings.max_area_fraction;
        let inv_scale = orig_w as f32 / work_w as f32;
        let boxes: Vec<DetectionBox> = find_regions(&cleaned, work_w, work_h)
            .into_iter()
            .filter(|r| self.region_passes(r, max_area))
            .map(|r| rescale_region(&r, inv_scale, orig_w, orig_h))
            .collect();

        // Annotate at original resolution. The frame is exclusively owned
        // by this stage, so drawing happens directly on its buffer.
        let (format, source, captured_at) = (frame.format, frame.source, frame.captured_at);
        let mut annotated = frame.into_pixels();
        for b in &boxes {
            ops::draw_rect(
                &mut annotated,
                orig_w,
                orig_h,
                format,
                b.x,
                b.y,
                b.w,
                b.h,
                BOX_THICKNESS,
                BOX_COLOR,
            );
        }

        let mask_data = if scaled {
            ops::resize_gray_nearest(&cleaned, work_w, work_h, orig_w, orig_h)
        } else {
            cleaned
        };

        Ok(ProcessedResult {
            source,
            captured_at,
            mask: Mask::from_data(mask_data, orig_w, orig_h),
            boxes,
            frame: Frame::new(annotated, orig_w, orig_h, format, source, captured_at),
        })
    }

    /// Dimensions the frame is processed at.
    fn working_dims(&self, width: u32, height: u32) -> (u32, u32) {
        let cap = self.settings.working_width;
        if width <= cap {
            return (width, height);
        }
        let scaled_h =
            ((height as u64 * cap as u64 + width as u64 / 2) / width as u64).max(1) as u32;
        (cap, scaled_h)
    }

    /// Size and shape filter, all bounds strict.
    ///
    /// The area band rejects both sensor speckle and whole-frame lighting
    /// changes; the aspect band rejects degenerate slivers.
    fn region_passes(&self, region: &Region, max_area: f32) -> bool {
        let area = region.area as f32;
        if area <= self.settings.min_area as f32 || area >= max_area {
            return false;
        }
        let aspect = region.width() as f32 / region.height() as f32;
        aspect > self.settings.aspect_min && aspect < self.settings.aspect_max
    }
}

/// Map a working-resolution region back to original-frame coordinates.
fn rescale_region(region: &Region, inv_scale: f32, frame_w: u32, frame_h: u32) -> DetectionBox {
    let x = ((region.min_x as f32 * inv_scale).round() as u32).min(frame_w.saturating_sub(1));
    let y = ((region.min_y as f32 * inv_scale).round() as u32).min(frame_h.saturating_sub(1));
    let w = ((region.width() as f32 * inv_scale).round() as u32).min(frame_w - x);
    let h = ((region.height() as f32 * inv_scale).round() as u32).min(frame_h - y);
    let area = (region.area as f32 * inv_scale * inv_scale).round() as u32;
    DetectionBox::new(x, y, w, h, area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::model::{BaselineEstimator, ModelParams};
    use crate::frame::PixelFormat;
    use std::time::Instant;

    const PARAMS: ModelParams = ModelParams {
        history: 100,
        var_threshold: 25.0,
    };

    fn settings(working_width: u32) -> DetectionSettings {
        DetectionSettings {
            working_width,
            min_area: 40,
            ..DetectionSettings::default()
        }
    }

    fn gray_frame(luma: Vec<u8>, w: u32, h: u32) -> Frame {
        Frame::new(luma, w, h, PixelFormat::Gray8, 0, Instant::now())
    }

    fn background(w: u32, h: u32) -> Vec<u8> {
        vec![40u8; (w * h) as usize]
    }

    fn with_square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> Vec<u8> {
        let mut px = background(w, h);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                px[(y * w + x) as usize] = 230;
            }
        }
        px
    }

    fn warm_up(detector: &Detector, est: &mut BaselineEstimator, w: u32, h: u32, frames: u32) {
        for _ in 0..frames {
            detector
                .process(gray_frame(background(w, h), w, h), est)
                .unwrap();
        }
    }

    #[test]
    fn detects_square_at_native_resolution() {
        let detector = Detector::new(settings(128));
        let mut est = BaselineEstimator::new(PARAMS);
        warm_up(&detector, &mut est, 128, 64, 50);

        let result = detector
            .process(gray_frame(with_square(128, 64, 20, 10, 24), 128, 64), &mut est)
            .unwrap();
        assert_eq!(result.boxes.len(), 1, "boxes: {:?}", result.boxes);
        let b = result.boxes[0];
        assert!((b.x as i32 - 20).abs() <= 1, "x={}", b.x);
        assert!((b.y as i32 - 10).abs() <= 1, "y={}", b.y);
        assert!((b.w as i32 - 24).abs() <= 2, "w={}", b.w);
        assert!((b.h as i32 - 24).abs() <= 2, "h={}", b.h);
        assert!((b.aspect - 1.0).abs() < 0.2);
    }

    #[test]
    fn downscaled_box_lands_within_a_pixel_of_native_box() {
        // Same scene through two detectors: one forced to half working
        // resolution, one native. Rescaled geometry must agree to ±1 px
        // at working resolution (±2 px after the 2x upscale).
        let native = Detector::new(settings(128));
        let halved = Detector::new(settings(64));
        let mut est_native = BaselineEstimator::new(PARAMS);
        let mut est_halved = BaselineEstimator::new(PARAMS);
        warm_up(&native, &mut est_native, 128, 64, 50);
        warm_up(&halved, &mut est_halved, 128, 64, 50);

        let scene = with_square(128, 64, 20, 10, 24);
        let direct = native
            .process(gray_frame(scene.clone(), 128, 64), &mut est_native)
            .unwrap();
        let roundtrip = halved
            .process(gray_frame(scene, 128, 64), &mut est_halved)
            .unwrap();

        assert_eq!(direct.boxes.len(), 1);
        assert_eq!(roundtrip.boxes.len(), 1);
        let (d, r) = (direct.boxes[0], roundtrip.boxes[0]);
        assert!((d.x as i32 - r.x as i32).abs() <= 2, "{:?} vs {:?}", d, r);
        assert!((d.y as i32 - r.y as i32).abs() <= 2, "{:?} vs {:?}", d, r);
        assert!((d.w as i32 - r.w as i32).abs() <= 2, "{:?} vs {:?}", d, r);
        assert!((d.h as i32 - r.h as i32).abs() <= 2, "{:?} vs {:?}", d, r);

        // Mask comes back at original resolution either way.
        assert_eq!(roundtrip.mask.width, 128);
        assert_eq!(roundtrip.mask.height, 64);
    }

    #[test]
    fn whole_frame_change_is_suppressed_by_max_area() {
        let detector = Detector::new(settings(128));
        let mut est = BaselineEstimator::new(PARAMS);
        warm_up(&detector, &mut est, 128, 64, 50);

        // Lights on: everything deviates at once.
        let result = detector
            .process(gray_frame(vec![230u8; 128 * 64], 128, 64), &mut est)
            .unwrap();
        assert!(result.boxes.is_empty(), "boxes: {:?}", result.boxes);
        // The mask still reports the change; only the box filter dropped it.
        assert!(result.mask.count_foreground() > 128 * 64 / 2);
    }

    #[test]
    fn annotation_is_drawn_on_original_resolution_frame() {
        let detector = Detector::new(settings(64));
        let mut est = BaselineEstimator::new(PARAMS);
        warm_up(&detector, &mut est, 128, 64, 50);

        let result = detector
            .process(gray_frame(with_square(128, 64, 20, 10, 24), 128, 64), &mut est)
            .unwrap();
        assert_eq!(result.frame.width, 128);
        assert_eq!(result.frame.height, 64);
        assert_eq!(result.boxes.len(), 1);
        let b = result.boxes[0];
        // Border pixel of the drawn box is bright in a gray frame.
        let px = result.frame.pixels()[(b.y * 128 + b.x) as usize];
        assert_eq!(px, 255);
    }

    #[test]
    fn region_filter_excludes_boundary_values() {
        let settings = DetectionSettings {
            working_width: 128,
            min_area: 500,
            max_area_fraction: 0.30,
            ..DetectionSettings::default()
        };
        let detector = Detector::new(settings);
        let max_area = 10_000.0;

        let region = |w: u32, h: u32, area: u32| Region {
            min_x: 0,
            min_y: 0,
            max_x: w - 1,
            max_y: h - 1,
            area,
        };

        // Area bounds: strict on both ends.
        assert!(!detector.region_passes(&region(30, 30, 500), max_area));
        assert!(detector.region_passes(&region(30, 30, 501), max_area));
        assert!(!detector.region_passes(&region(110, 110, 10_000), max_area));
        assert!(detector.region_passes(&region(100, 100, 9_999), max_area));

        // Aspect bounds: 0.2 and 5.0 excluded.
        assert!(!detector.region_passes(&region(50, 10, 501), max_area)); // 5.0
        assert!(detector.region_passes(&region(49, 10, 501), max_area));
        assert!(!detector.region_passes(&region(10, 50, 501), max_area)); // 0.2
        assert!(detector.region_passes(&region(10, 49, 501), max_area));
    }

    #[test]
    fn estimator_failure_is_reported_as_foreground_error() {
        let detector = Detector::new(settings(128));
        let mut est = BaselineEstimator::new(PARAMS);
        detector
            .process(gray_frame(background(128, 64), 128, 64), &mut est)
            .unwrap();
        // Dimension change mid-run makes the estimator refuse the frame.
        let err = detector
            .process(gray_frame(background(64, 32), 64, 32), &mut est)
            .unwrap_err();
        assert!(matches!(err, DetectError::Foreground(_)), "{}", err);
    }
}
