use std::sync::Mutex;

use tempfile::NamedTempFile;

use platewatch::PlatewatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATEWATCH_CONFIG",
        "PLATEWATCH_SOURCE",
        "PLATEWATCH_PREVIEW_ADDR",
        "PLATEWATCH_SAMPLE_INTERVAL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "path": "/media/traffic.mp4",
            "fps_cap": 25
        },
        "pipeline": {
            "sample_interval": 3,
            "frame_queue_capacity": 8,
            "plate_ttl_frames": 6,
            "slow_cycle_ms": 150
        },
        "output": {
            "crops_dir": "out/crops",
            "plates_dir": "out/plates",
            "min_crop_size": 40
        },
        "preview": {
            "enabled": false,
            "addr": "0.0.0.0:9100"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PLATEWATCH_CONFIG", file.path());
    std::env::set_var("PLATEWATCH_SOURCE", "stub://override");
    std::env::set_var("PLATEWATCH_SAMPLE_INTERVAL", "7");

    let cfg = PlatewatchConfig::load().expect("load config");

    assert_eq!(cfg.source.path, "stub://override");
    assert_eq!(cfg.source.fps_cap, 25);
    assert_eq!(cfg.pipeline.sample_interval, 7);
    assert_eq!(cfg.pipeline.frame_queue_capacity, 8);
    // Omitted fields keep their defaults.
    assert_eq!(cfg.pipeline.plate_queue_capacity, 10);
    assert_eq!(cfg.pipeline.min_car_size, 100);
    assert_eq!(cfg.pipeline.plate_ttl_frames, 6);
    assert_eq!(cfg.pipeline.slow_cycle_ms, 150);
    assert_eq!(cfg.output.crops_dir, std::path::Path::new("out/crops"));
    assert_eq!(cfg.output.plates_dir, std::path::Path::new("out/plates"));
    assert_eq!(cfg.output.crop_margin, 5);
    assert_eq!(cfg.output.plate_crop_margin, 10);
    assert_eq!(cfg.output.min_crop_size, 40);
    assert!(!cfg.preview.enabled);
    assert_eq!(cfg.preview.addr, "0.0.0.0:9100");

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PlatewatchConfig::load().expect("load defaults");

    assert_eq!(cfg.source.path, "stub://traffic");
    assert_eq!(cfg.source.fps_cap, 30);
    assert_eq!(cfg.pipeline.sample_interval, 5);
    assert_eq!(cfg.pipeline.frame_queue_capacity, 5);
    assert_eq!(cfg.pipeline.plate_queue_capacity, 10);
    assert_eq!(cfg.pipeline.plate_ttl_frames, 4);
    assert_eq!(cfg.pipeline.slow_cycle_ms, 200);
    assert_eq!(cfg.pipeline.min_car_size, 100);
    assert_eq!(cfg.output.crops_dir, std::path::Path::new("crops"));
    assert_eq!(cfg.output.plates_dir, std::path::Path::new("plates"));
    assert_eq!(cfg.output.min_crop_size, 30);
    assert!(cfg.preview.enabled);

    clear_env();
}

#[test]
fn rejects_invalid_sample_interval_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PLATEWATCH_SAMPLE_INTERVAL", "not-a-number");
    assert!(PlatewatchConfig::load().is_err());

    std::env::set_var("PLATEWATCH_SAMPLE_INTERVAL", "0");
    assert!(PlatewatchConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_shared_output_directory() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "output": {
            "crops_dir": "out/same",
            "plates_dir": "out/same"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("PLATEWATCH_CONFIG", file.path());

    assert!(PlatewatchConfig::load().is_err());

    clear_env();
}
