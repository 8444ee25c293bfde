use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::ProcessingMode;

const DEFAULT_CHANNEL_CAPACITY: usize = 10;
const DEFAULT_STALENESS_MS: u64 = 100;
const DEFAULT_WORKING_WIDTH: u32 = 1280;
const DEFAULT_HISTORY: u32 = 100;
const DEFAULT_VAR_THRESHOLD: f32 = 25.0;
const DEFAULT_MIN_AREA: u32 = 500;
const DEFAULT_MAX_AREA_FRACTION: f32 = 0.30;
const DEFAULT_ASPECT_MIN: f32 = 0.2;
const DEFAULT_ASPECT_MAX: f32 = 5.0;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    channel_capacity: Option<usize>,
    staleness_ms: Option<u64>,
    mode: Option<String>,
    detection: Option<DetectionConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    working_width: Option<u32>,
    history: Option<u32>,
    var_threshold: Option<f32>,
    min_area: Option<u32>,
    max_area_fraction: Option<f32>,
    aspect_min: Option<f32>,
    aspect_max: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub staleness_budget: Duration,
    pub mode: ProcessingMode,
    pub detection: DetectionSettings,
    pub cameras: Vec<CameraSettings>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Frames wider than this are downscaled before processing.
    pub working_width: u32,
    /// Background model history length, in frames.
    pub history: u32,
    /// Deviation sensitivity of the background model.
    pub var_threshold: f32,
    /// Regions at or below this pixel area are discarded.
    pub min_area: u32,
    /// Maximum region area as a fraction of the working frame area.
    pub max_area_fraction: f32,
    pub aspect_min: f32,
    pub aspect_max: f32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device string: `stub://name` selects the synthetic source, anything
    /// else a local device node.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            working_width: DEFAULT_WORKING_WIDTH,
            history: DEFAULT_HISTORY,
            var_threshold: DEFAULT_VAR_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            max_area_fraction: DEFAULT_MAX_AREA_FRACTION,
            aspect_min: DEFAULT_ASPECT_MIN,
            aspect_max: DEFAULT_ASPECT_MAX,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "stub://cam0".to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            staleness_budget: Duration::from_millis(DEFAULT_STALENESS_MS),
            mode: ProcessingMode::Accelerated,
            detection: DetectionSettings::default(),
            cameras: vec![
                CameraSettings::default(),
                CameraSettings {
                    device: "stub://cam1".to_string(),
                    ..CameraSettings::default()
                },
            ],
        }
    }
}

impl PipelineConfig {
    /// Load configuration: JSON file named by `VIGIL_CONFIG` (if set),
    /// then `VIGIL_*` environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, with an explicit config path taking precedence over
    /// the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = PipelineConfig::default();
        let channel_capacity = file.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let staleness_budget =
            Duration::from_millis(file.staleness_ms.unwrap_or(DEFAULT_STALENESS_MS));
        let mode = match file.mode.as_deref() {
            Some(raw) => parse_mode(raw)?,
            None => defaults.mode,
        };

        let det = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            working_width: det.working_width.unwrap_or(DEFAULT_WORKING_WIDTH),
            history: det.history.unwrap_or(DEFAULT_HISTORY),
            var_threshold: det.var_threshold.unwrap_or(DEFAULT_VAR_THRESHOLD),
            min_area: det.min_area.unwrap_or(DEFAULT_MIN_AREA),
            max_area_fraction: det.max_area_fraction.unwrap_or(DEFAULT_MAX_AREA_FRACTION),
            aspect_min: det.aspect_min.unwrap_or(DEFAULT_ASPECT_MIN),
            aspect_max: det.aspect_max.unwrap_or(DEFAULT_ASPECT_MAX),
        };

        let cameras = match file.cameras {
            Some(list) if !list.is_empty() => list
                .into_iter()
                .enumerate()
                .map(|(i, cam)| CameraSettings {
                    device: cam.device.unwrap_or_else(|| format!("stub://cam{}", i)),
                    width: cam.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                    height: cam.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                    target_fps: cam.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                })
                .collect(),
            _ => defaults.cameras,
        };

        Ok(Self {
            channel_capacity,
            staleness_budget,
            mode,
            detection,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(capacity) = std::env::var("VIGIL_CHANNEL_CAPACITY") {
            self.channel_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("VIGIL_CHANNEL_CAPACITY must be an integer"))?;
        }
        if let Ok(staleness) = std::env::var("VIGIL_STALENESS_MS") {
            let ms: u64 = staleness
                .parse()
                .map_err(|_| anyhow!("VIGIL_STALENESS_MS must be an integer number of ms"))?;
            self.staleness_budget = Duration::from_millis(ms);
        }
        if let Ok(mode) = std::env::var("VIGIL_MODE") {
            if !mode.trim().is_empty() {
                self.mode = parse_mode(&mode)?;
            }
        }
        if let Ok(devices) = std::env::var("VIGIL_CAMERAS") {
            let parsed = split_csv(&devices);
            if !parsed.is_empty() {
                self.cameras = parsed
                    .into_iter()
                    .map(|device| CameraSettings {
                        device,
                        ..CameraSettings::default()
                    })
                    .collect();
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow!("channel_capacity must be at least 1"));
        }
        if self.staleness_budget.is_zero() {
            return Err(anyhow!("staleness_ms must be greater than zero"));
        }
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let det = &self.detection;
        if det.working_width < 64 {
            return Err(anyhow!("working_width must be at least 64"));
        }
        if det.history == 0 {
            return Err(anyhow!("history must be at least 1"));
        }
        if det.var_threshold <= 0.0 {
            return Err(anyhow!("var_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&det.max_area_fraction) {
            return Err(anyhow!("max_area_fraction must lie in [0, 1]"));
        }
        if det.aspect_min <= 0.0 || det.aspect_max <= det.aspect_min {
            return Err(anyhow!(
                "aspect bounds must satisfy 0 < aspect_min < aspect_max"
            ));
        }
        for cam in &self.cameras {
            if cam.device.trim().is_empty() {
                return Err(anyhow!("camera device must not be empty"));
            }
            if cam.width == 0 || cam.height == 0 {
                return Err(anyhow!("camera resolution must be non-zero"));
            }
        }
        Ok(())
    }
}

fn parse_mode(raw: &str) -> Result<ProcessingMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "accelerated" => Ok(ProcessingMode::Accelerated),
        "baseline" => Ok(ProcessingMode::Baseline),
        other => Err(anyhow!(
            "mode must be 'accelerated' or 'baseline', got '{}'",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
