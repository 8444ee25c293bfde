//! vigild - dual-camera motion detection daemon
//!
//! This daemon:
//! 1. Loads pipeline configuration (file + environment)
//! 2. Opens one frame source per configured camera
//! 3. Runs the capture/processing pipeline
//! 4. Plays the display role: polls the result cache and metrics on its
//!    own cadence, logging per-camera FPS, queue depth and detections
//! 5. Shuts the pipeline down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil::{open_source, FrameSource, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "vigild", about = "Dual-camera motion detection pipeline")]
struct Args {
    /// JSON config file (also read from VIGIL_CONFIG)
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the processing mode: accelerated or baseline
    #[arg(long)]
    mode: Option<String>,

    /// Comma-separated camera devices (stub://name or /dev/videoN)
    #[arg(long)]
    cameras: Option<String>,

    /// Seconds between status log lines
    #[arg(long, default_value_t = 1)]
    stats_interval: u64,

    /// Directory to write the latest annotated frame per camera as JPEG
    #[cfg(feature = "snapshot")]
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    // CLI overrides piggyback on the env override layer of the config.
    if let Some(mode) = &args.mode {
        std::env::set_var("VIGIL_MODE", mode);
    }
    if let Some(cameras) = &args.cameras {
        std::env::set_var("VIGIL_CAMERAS", cameras);
    }
    let config = PipelineConfig::load_from(args.config.as_deref())?;

    log::info!(
        "vigild {} starting: {} cameras, {:?} mode",
        env!("CARGO_PKG_VERSION"),
        config.cameras.len(),
        config.mode
    );

    let sources: Vec<Box<dyn FrameSource>> = config
        .cameras
        .iter()
        .map(open_source)
        .collect::<Result<_>>()?;

    let pipeline = Pipeline::start(config, sources)?;
    let cache = pipeline.cache();
    let metrics = pipeline.metrics();

    let stop_requested = Arc::new(AtomicBool::new(false));
    {
        let stop_requested = stop_requested.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            stop_requested.store(true, Ordering::SeqCst);
        })?;
    }

    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    let mut last_stats = Instant::now();
    while !stop_requested.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats.elapsed() >= stats_interval {
            let snap = metrics.snapshot();
            let fps: Vec<String> = snap
                .sources
                .iter()
                .enumerate()
                .map(|(i, s)| format!("cam{}={:.1}", i, s.fps))
                .collect();
            let boxes: Vec<String> = (0..snap.sources.len())
                .map(|i| {
                    let n = cache.latest(i).map(|r| r.boxes.len()).unwrap_or(0);
                    format!("cam{}={}", i, n)
                })
                .collect();
            log::info!(
                "fps [{}] avg={:.1} | queue={} | detections [{}] | dropped={} stale={}",
                fps.join(" "),
                snap.average_fps(),
                snap.queue_depth,
                boxes.join(" "),
                snap.sources.iter().map(|s| s.dropped_total).sum::<u64>(),
                snap.sources.iter().map(|s| s.stale_total).sum::<u64>(),
            );

            #[cfg(feature = "snapshot")]
            if let Some(dir) = &args.snapshot_dir {
                if let Err(err) = write_snapshots(dir, &cache, snap.sources.len()) {
                    log::warn!("snapshot write failed: {:#}", err);
                }
            }

            last_stats = Instant::now();
        }
    }

    pipeline.stop()
}

/// Dump the latest annotated frame per camera as JPEG, standing in for a
/// live display.
#[cfg(feature = "snapshot")]
fn write_snapshots(dir: &PathBuf, cache: &vigil::ResultCache, cameras: usize) -> Result<()> {
    use vigil::PixelFormat;

    std::fs::create_dir_all(dir)?;
    for camera in 0..cameras {
        let Some(result) = cache.latest(camera) else {
            continue;
        };
        let frame = &result.frame;
        let (w, h) = (frame.width, frame.height);
        let rgb: Vec<u8> = match frame.format {
            PixelFormat::Bgr8 => frame
                .pixels()
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Gray8 => frame
                .pixels()
                .iter()
                .flat_map(|&v| [v, v, v])
                .collect(),
        };
        let img = image::RgbImage::from_raw(w, h, rgb)
            .ok_or_else(|| anyhow::anyhow!("frame buffer does not match {}x{}", w, h))?;
        let path = dir.join(format!("cam{}.jpg", camera));
        img.save_with_format(&path, image::ImageFormat::Jpeg)?;
    }
    Ok(())
}
