use std::sync::Mutex;

use tempfile::NamedTempFile;

use vigil::{PipelineConfig, ProcessingMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIGIL_CONFIG",
        "VIGIL_CHANNEL_CAPACITY",
        "VIGIL_STALENESS_MS",
        "VIGIL_MODE",
        "VIGIL_CAMERAS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_the_documented_pipeline() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.channel_capacity, 10);
    assert_eq!(cfg.staleness_budget.as_millis(), 100);
    assert_eq!(cfg.mode, ProcessingMode::Accelerated);
    assert_eq!(cfg.detection.working_width, 1280);
    assert_eq!(cfg.detection.history, 100);
    assert_eq!(cfg.detection.min_area, 500);
    assert!((cfg.detection.max_area_fraction - 0.30).abs() < 1e-6);
    assert!((cfg.detection.aspect_min - 0.2).abs() < 1e-6);
    assert!((cfg.detection.aspect_max - 5.0).abs() < 1e-6);
    assert_eq!(cfg.cameras.len(), 2);
    assert!(cfg.cameras[0].device.starts_with("stub://"));

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "channel_capacity": 4,
        "staleness_ms": 250,
        "mode": "baseline",
        "detection": {
            "working_width": 640,
            "history": 80,
            "var_threshold": 50.0,
            "min_area": 300
        },
        "cameras": [
            { "device": "stub://left", "width": 640, "height": 480, "target_fps": 15 },
            { "device": "stub://right" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIGIL_CONFIG", file.path());
    std::env::set_var("VIGIL_STALENESS_MS", "80");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.channel_capacity, 4);
    // Env override wins over the file.
    assert_eq!(cfg.staleness_budget.as_millis(), 80);
    assert_eq!(cfg.mode, ProcessingMode::Baseline);
    assert_eq!(cfg.detection.working_width, 640);
    assert_eq!(cfg.detection.history, 80);
    assert!((cfg.detection.var_threshold - 50.0).abs() < 1e-6);
    assert_eq!(cfg.detection.min_area, 300);
    // Unspecified detection fields keep their defaults.
    assert!((cfg.detection.aspect_max - 5.0).abs() < 1e-6);
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].device, "stub://left");
    assert_eq!(cfg.cameras[0].width, 640);
    assert_eq!(cfg.cameras[0].target_fps, 15);
    // Partially specified camera entry falls back to defaults.
    assert_eq!(cfg.cameras[1].device, "stub://right");
    assert_eq!(cfg.cameras[1].width, 1280);

    clear_env();
}

#[test]
fn camera_list_env_override_replaces_configured_cameras() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_CAMERAS", "stub://a, stub://b, stub://c");
    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.cameras.len(), 3);
    assert_eq!(cfg.cameras[1].device, "stub://b");

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIGIL_CHANNEL_CAPACITY", "0");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_STALENESS_MS", "0");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("VIGIL_MODE", "turbo");
    assert!(PipelineConfig::load().is_err());
    clear_env();
}
