use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};

use track_data_engine::persist::{ArtifactKind, ArtifactRegistry, PersistenceFacade};
use track_data_engine::{ArtifactValue, DataEngine, DataError, Device, GlobalParam, SaveOptions, VideoClip};

fn gradient(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x * 9) as u8, (y * 13) as u8, 77]))
}

#[test]
fn png_still_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DataEngine::open(dir.path(), Device::Cpu);
    let image = gradient(12, 9);
    engine
        .save(
            "texture_preview",
            &ArtifactValue::Image(DynamicImage::ImageRgb8(image.clone())),
            &SaveOptions::default(),
        )
        .unwrap();
    match engine.load("texture_preview").unwrap() {
        ArtifactValue::Image(loaded) => assert_eq!(loaded.to_rgb8(), image),
        other => panic!("expected an image, got {}", other.kind_name()),
    }
}

#[test]
fn jpeg_still_keeps_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DataEngine::open(dir.path(), Device::Cpu);
    assert!(!engine.check_exists("calibration").unwrap());
    let options = SaveOptions {
        jpeg_quality: Some(95),
        ..SaveOptions::default()
    };
    let path = engine
        .save(
            "calibration",
            &ArtifactValue::Image(DynamicImage::ImageRgb8(gradient(20, 10))),
            &options,
        )
        .unwrap();
    assert_eq!(path, dir.path().join("calibration.jpg"));
    assert!(engine.check_exists("calibration").unwrap());
    match engine.load("calibration").unwrap() {
        ArtifactValue::Image(loaded) => assert_eq!((loaded.width(), loaded.height()), (20, 10)),
        other => panic!("expected an image, got {}", other.kind_name()),
    }
}

#[test]
fn clip_fps_can_be_overridden_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DataEngine::open(dir.path(), Device::Cpu);
    let mut clip = VideoClip::new(30.0);
    clip.frames = vec![gradient(8, 8); 4];
    let options = SaveOptions {
        fps: Some(7.5),
        ..SaveOptions::default()
    };
    engine
        .save("visualization", &ArtifactValue::Video(clip), &options)
        .unwrap();
    match engine.load("visualization").unwrap() {
        ArtifactValue::Video(loaded) => {
            assert_eq!(loaded.fps, 7.5);
            assert_eq!(loaded.len(), 4);
        }
        other => panic!("expected a clip, got {}", other.kind_name()),
    }
}

#[test]
fn free_form_json_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DataEngine::open(dir.path(), Device::Cpu);
    let value = serde_json::json!({"fps": 25, "frames": ["f_0000000.jpg"]});
    engine
        .save(
            "smoothed_pose",
            &ArtifactValue::Json(value.clone()),
            &SaveOptions::default(),
        )
        .unwrap();
    match engine.load("smoothed_pose").unwrap() {
        ArtifactValue::Json(loaded) => assert_eq!(loaded, value),
        other => panic!("expected json, got {}", other.kind_name()),
    }
}

#[test]
fn extension_decides_kind() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ArtifactRegistry::new(dir.path())
        .with_artifact("mesh", "head.obj")
        .with_artifact("emoca", "emoca_v2.pth");
    assert_eq!(registry.kind("emoca").unwrap(), ArtifactKind::TensorBlob);
    let persist = PersistenceFacade::new(Arc::new(registry));

    let err = persist
        .save(
            "mesh",
            &ArtifactValue::Json(serde_json::json!({})),
            &SaveOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DataError::UnsupportedArtifactKind { .. }));
    assert!(matches!(
        persist.load("albedo"),
        Err(DataError::UnknownArtifact(_))
    ));
    assert!(matches!(
        persist.save(
            "visualization",
            &ArtifactValue::Image(DynamicImage::new_rgb8(1, 1)),
            &SaveOptions::default()
        ),
        Err(DataError::ArtifactValueMismatch { .. })
    ));
}

#[test]
fn missing_global_params_surface_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DataEngine::open(dir.path(), Device::Cpu);
    assert!(matches!(
        engine.global(GlobalParam::Texture),
        Err(DataError::Io(_))
    ));
}
