//! Adaptive background modeling.
//!
//! Each camera owns one model: a per-pixel running mean/variance over luma
//! at working resolution, updated online on every frame it sees. There is
//! no separate training phase and no cross-camera sharing; the single
//! processing worker is the only writer, so the model needs no internal
//! locking.
//!
//! Two estimator backends implement the same contract:
//! - `baseline`: full-resolution f32 statistics, one pixel per cell.
//! - `accelerated`: statistics over 2x2-subsampled luma (a quarter of the
//!   work), scores replicated back to full resolution. Requires even
//!   working dimensions; violations surface as errors, which the
//!   processing worker treats as the cue to fall back to baseline.

use anyhow::{anyhow, Result};

/// Which foreground-estimation code path the pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingMode {
    Accelerated,
    Baseline,
}

/// Tunable parameters of the background model.
#[derive(Clone, Copy, Debug)]
pub struct ModelParams {
    /// Number of frames contributing to the running estimate.
    pub history: u32,
    /// How far (in variances) a pixel must deviate to count as foreground.
    pub var_threshold: f32,
}

/// Variance assigned to a pixel on its first observation.
const INITIAL_VARIANCE: f32 = 225.0;
/// Variance floor, so a perfectly static warm-up cannot turn single-LSB
/// sensor flicker into foreground.
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 5_000.0;
/// Pixels currently classified foreground learn this much slower, so a
/// moving object neither bleaches into the background nor leaves a ghost.
const FOREGROUND_LEARNING_DIVISOR: f32 = 16.0;

/// Per-camera foreground estimator.
///
/// `apply` scores each luma pixel 0..255 against the model and folds the
/// frame into the running statistics in the same pass.
pub trait ForegroundEstimator: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

/// Build the estimator for a mode. Called once per camera at pipeline
/// start, and again for every camera if the worker falls back to baseline.
pub fn make_estimator(mode: ProcessingMode, params: ModelParams) -> Box<dyn ForegroundEstimator> {
    match mode {
        ProcessingMode::Accelerated => Box::new(AcceleratedEstimator::new(params)),
        ProcessingMode::Baseline => Box::new(BaselineEstimator::new(params)),
    }
}

// ----------------------------------------------------------------------------
// Shared per-pixel statistics
// ----------------------------------------------------------------------------

/// Running Gaussian state for one grid of cells.
///
/// Dimensions lock in on the first frame; a later mismatch is an error
/// rather than a silent re-initialization, because the spec forbids
/// resetting a camera's model mid-run.
struct ModelState {
    params: ModelParams,
    width: u32,
    height: u32,
    mean: Vec<f32>,
    var: Vec<f32>,
    frames_seen: u64,
}

impl ModelState {
    fn new(params: ModelParams) -> Self {
        Self {
            params,
            width: 0,
            height: 0,
            mean: Vec::new(),
            var: Vec::new(),
            frames_seen: 0,
        }
    }

    fn apply(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let cells = width as usize * height as usize;
        if luma.len() != cells {
            return Err(anyhow!(
                "luma buffer length {} does not match {}x{}",
                luma.len(),
                width,
                height
            ));
        }
        if self.frames_seen == 0 {
            self.width = width;
            self.height = height;
            self.mean = luma.iter().map(|&v| v as f32).collect();
            self.var = vec![INITIAL_VARIANCE; cells];
            self.frames_seen = 1;
            return Ok(vec![0u8; cells]);
        }
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame dimensions changed from {}x{} to {}x{} mid-run",
                self.width,
                self.height,
                width,
                height
            ));
        }

        self.frames_seen += 1;
        let alpha = (1.0 / self.frames_seen as f32).max(1.0 / self.params.history as f32);
        let k = self.params.var_threshold;

        let mut scores = vec![0u8; cells];
        for i in 0..cells {
            let x = luma[i] as f32;
            let d = x - self.mean[i];
            let d2 = d * d;
            let gate = k * self.var[i];
            let matched = d2 <= gate;

            let ratio = d2 / gate;
            scores[i] = (ratio.min(1.0) * 255.0) as u8;

            let a = if matched {
                alpha
            } else {
                alpha / FOREGROUND_LEARNING_DIVISOR
            };
            self.mean[i] += a * d;
            self.var[i] =
                (self.var[i] + a * (d2 - self.var[i])).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        Ok(scores)
    }
}

// ----------------------------------------------------------------------------
// Baseline backend
// ----------------------------------------------------------------------------

pub struct BaselineEstimator {
    state: ModelState,
}

impl BaselineEstimator {
    pub fn new(params: ModelParams) -> Self {
        Self {
            state: ModelState::new(params),
        }
    }
}

impl ForegroundEstimator for BaselineEstimator {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn apply(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        self.state.apply(luma, width, height)
    }
}

// ----------------------------------------------------------------------------
// Accelerated backend (2x2 subsampled)
// ----------------------------------------------------------------------------

pub struct AcceleratedEstimator {
    state: ModelState,
}

impl AcceleratedEstimator {
    pub fn new(params: ModelParams) -> Self {
        Self {
            state: ModelState::new(params),
        }
    }
}

impl ForegroundEstimator for AcceleratedEstimator {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn apply(&mut self, luma: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(anyhow!(
                "accelerated estimator requires even dimensions, got {}x{}",
                width,
                height
            ));
        }
        let cells = width as usize * height as usize;
        if luma.len() != cells {
            return Err(anyhow!(
                "luma buffer length {} does not match {}x{}",
                luma.len(),
                width,
                height
            ));
        }

        let (sw, sh) = (width / 2, height / 2);
        let stride = width as usize;
        let mut small = vec![0u8; sw as usize * sh as usize];
        for sy in 0..sh as usize {
            for sx in 0..sw as usize {
                let top = 2 * sy * stride + 2 * sx;
                let bottom = top + stride;
                let sum = luma[top] as u16
                    + luma[top + 1] as u16
                    + luma[bottom] as u16
                    + luma[bottom + 1] as u16;
                small[sy * sw as usize + sx] = (sum / 4) as u8;
            }
        }

        let small_scores = self.state.apply(&small, sw, sh)?;

        let mut scores = vec![0u8; cells];
        for sy in 0..sh as usize {
            for sx in 0..sw as usize {
                let s = small_scores[sy * sw as usize + sx];
                let top = 2 * sy * stride + 2 * sx;
                let bottom = top + stride;
                scores[top] = s;
                scores[top + 1] = s;
                scores[bottom] = s;
                scores[bottom + 1] = s;
            }
        }
        Ok(scores)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
