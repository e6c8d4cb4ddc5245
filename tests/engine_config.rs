use std::sync::Mutex;

use tempfile::NamedTempFile;

use track_data_engine::config::EngineConfig;
use track_data_engine::ingest::ResumePolicy;
use track_data_engine::Device;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRACK_CONFIG",
        "TRACK_DATA_ROOT",
        "TRACK_OUTPUT_DIR",
        "TRACK_DEVICE",
        "TRACK_COMMIT_EVERY",
        "TRACK_TARGET_SIZE",
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
        "data_root": "/data/subject01",
        "video_path": "take2.mp4",
        "output_dir": "take2",
        "device": "cuda:1",
        "store": { "commit_every": 250, "capacity_bytes": 1073741824 },
        "frames": { "target_size": 256, "jpeg_quality": 90, "visualization_frames": 120 },
        "matting": { "threshold": 0.4, "background": [0, 0, 0] }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TRACK_CONFIG", file.path());
    std::env::set_var("TRACK_DEVICE", "cpu");
    std::env::set_var("TRACK_TARGET_SIZE", "384");

    let cfg = EngineConfig::load().expect("load config");

    assert_eq!(cfg.resolved_video_path().to_str(), Some("/data/subject01/take2.mp4"));
    assert_eq!(cfg.resolved_output_dir().to_str(), Some("/data/subject01/take2"));
    assert_eq!(cfg.device, Device::Cpu);
    assert_eq!(cfg.target_size, 384);
    assert_eq!(cfg.commit_every, 250);
    assert_eq!(cfg.capacity_bytes, 1 << 30);
    assert_eq!(cfg.jpeg_quality, 90);
    assert_eq!(cfg.visualization_frames, 120);
    assert_eq!(cfg.matting.threshold, 0.4);
    assert_eq!(cfg.matting.background, [0, 0, 0]);

    clear_env();
}

#[test]
fn toml_config_is_read_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.toml");
    std::fs::write(
        &path,
        "device = \"mps\"\n\n[store]\ncommit_every = 64\n",
    )
    .unwrap();
    std::env::set_var("TRACK_OUTPUT_DIR", "run7");

    let cfg = EngineConfig::from_path(&path).expect("load toml config");
    assert_eq!(cfg.device, Device::Mps);
    assert_eq!(cfg.commit_every, 64);
    assert_eq!(cfg.target_size, 512);
    assert!(cfg.resolved_output_dir().ends_with("run7"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRACK_DEVICE", "tpu");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("TRACK_COMMIT_EVERY", "0");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains("commit interval"));
    clear_env();
}

#[test]
fn ingest_settings_follow_flags() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EngineConfig::from_data_root("/data/subject02").unwrap();
    assert_eq!(cfg.resolved_video_path().to_str(), Some("/data/subject02/video.mp4"));

    let plain = cfg.ingest_settings(ResumePolicy::SkipExisting, false, false);
    assert!(plain.matting.is_none());
    assert!(plain.visualization.is_none());

    let full = cfg.ingest_settings(ResumePolicy::Rebuild, true, true);
    assert_eq!(full.resume, ResumePolicy::Rebuild);
    assert_eq!(full.matting, Some(cfg.matting));
    assert_eq!(full.visualization.map(|v| v.max_frames), Some(cfg.visualization_frames));
}
