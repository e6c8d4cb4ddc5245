use std::collections::BTreeMap;

use ndarray::{s, ArrayD, IxDyn};

use track_data_engine::ingest::{IngestSettings, IngestionPipeline, SyntheticSource};
use track_data_engine::{
    AnnotationCollection, AnnotationRecord, ArtifactValue, AssembleOptions, ChannelMode,
    CollatePolicy, DataEngine, DataError, Device, Modality, SaveOptions,
};

const KEYS: [&str; 3] = ["f_0000000.jpg", "f_0000001.jpg", "f_0000002.jpg"];

fn landmarks(points: usize, value: f32) -> AnnotationRecord {
    AnnotationRecord::Tensor(ArrayD::from_shape_fn(IxDyn(&[points, 2]), |idx| {
        value + idx[0] as f32
    }))
}

fn expression(value: f32) -> AnnotationRecord {
    let mut group = BTreeMap::new();
    group.insert("exp".to_string(), ArrayD::from_elem(IxDyn(&[50]), value));
    group.insert("pose".to_string(), ArrayD::from_elem(IxDyn(&[6]), -value));
    AnnotationRecord::Group(group)
}

fn save(engine: &DataEngine, modality: Modality, records: Vec<(&str, AnnotationRecord)>) {
    let collection: AnnotationCollection = records
        .into_iter()
        .map(|(k, r)| (k.to_string(), r))
        .collect();
    engine
        .save(
            modality.name(),
            &ArtifactValue::Collection(collection),
            &SaveOptions::default(),
        )
        .unwrap();
}

fn engine_with_frames(dir: &std::path::Path) -> DataEngine {
    let mut engine = DataEngine::open(dir, Device::Cpu);
    let mut source = SyntheticSource::new(48, 32, KEYS.len() as u64, 25.0);
    let mut pipeline = IngestionPipeline::new(IngestSettings {
        target_size: 16,
        ..IngestSettings::default()
    });
    engine.build_frame_store(&mut source, &mut pipeline).unwrap();
    engine
}

#[test]
fn two_keys_stack_along_leading_axis() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    save(
        &engine,
        Modality::Landmarks,
        vec![(KEYS[0], landmarks(68, 0.0)), (KEYS[1], landmarks(68, 100.0))],
    );

    let batch = engine.assemble(&KEYS[..2], &[Modality::Landmarks]).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.frames.shape(), &[2, 3, 16, 16]);
    let stacked = batch.field(Modality::Landmarks).unwrap().as_tensor().unwrap();
    assert_eq!(stacked.shape(), &[2, 68, 2]);

    for (i, key) in KEYS[..2].iter().enumerate() {
        let single = engine.get_frame(key, ChannelMode::Rgb).unwrap();
        assert_eq!(batch.frames.slice(s![i, .., .., ..]), single);
        let record = engine.landmarks(key).unwrap().as_tensor().unwrap().clone();
        assert_eq!(stacked.index_axis(ndarray::Axis(0), i), record.view());
    }
}

#[test]
fn differing_landmark_shapes_fail_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    save(
        &engine,
        Modality::Landmarks,
        vec![(KEYS[0], landmarks(68, 0.0)), (KEYS[1], landmarks(70, 0.0))],
    );
    let err = engine
        .assemble(&KEYS[..2], &[Modality::Landmarks])
        .unwrap_err();
    assert!(matches!(err, DataError::BatchShapeMismatch { ref field, .. } if field == "landmarks"));
}

#[test]
fn missing_modality_for_one_key_is_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    save(
        &engine,
        Modality::Landmarks,
        KEYS.iter().map(|k| (*k, landmarks(68, 1.0))).collect(),
    );
    save(
        &engine,
        Modality::Expression,
        vec![(KEYS[0], expression(0.1)), (KEYS[2], expression(0.3))],
    );

    let err = engine
        .assemble(&KEYS, &[Modality::Landmarks, Modality::Expression])
        .unwrap_err();
    assert!(matches!(
        err,
        DataError::IncompleteAnnotation { ref key, .. } if key == KEYS[1]
    ));

    let options = AssembleOptions {
        channels: ChannelMode::Gray,
        policy: CollatePolicy::SkipIncomplete,
    };
    let batch = engine
        .assemble_with(&KEYS, &[Modality::Landmarks, Modality::Expression], &options)
        .unwrap();
    assert_eq!(batch.keys, vec![KEYS[0].to_string(), KEYS[2].to_string()]);
    assert_eq!(batch.frames.shape(), &[2, 1, 16, 16]);
    let expr = batch.field(Modality::Expression).unwrap();
    assert_eq!(expr.member("exp").unwrap().shape(), &[2, 50]);
    assert_eq!(expr.member("pose").unwrap()[[1, 0]], -0.3);
}

#[test]
fn unwritten_modality_counts_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    save(
        &engine,
        Modality::Landmarks,
        KEYS.iter().map(|k| (*k, landmarks(68, 1.0))).collect(),
    );

    let err = engine
        .assemble(&KEYS, &[Modality::Landmarks, Modality::Expression])
        .unwrap_err();
    assert!(matches!(
        err,
        DataError::IncompleteAnnotation { ref modality, ref key }
            if modality == "expression" && key == KEYS[0]
    ));

    let options = AssembleOptions {
        policy: CollatePolicy::SkipIncomplete,
        ..AssembleOptions::default()
    };
    let err = engine
        .assemble_with(&KEYS, &[Modality::Expression], &options)
        .unwrap_err();
    assert!(matches!(err, DataError::EmptyBatch));
}

#[test]
fn scalar_lighting_collates_per_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    let lighting = |v: f64| {
        let mut scalars = BTreeMap::new();
        scalars.insert("ambient".to_string(), v);
        AnnotationRecord::Scalars(scalars)
    };
    save(
        &engine,
        Modality::Lighting,
        KEYS.iter()
            .enumerate()
            .map(|(i, k)| (*k, lighting(i as f64)))
            .collect(),
    );
    let batch = engine.assemble(&KEYS, &[Modality::Lighting]).unwrap();
    let ambient = batch
        .field(Modality::Lighting)
        .unwrap()
        .scalars("ambient")
        .unwrap();
    assert_eq!(ambient.to_vec(), vec![0.0, 1.0, 2.0]);
}

#[test]
fn empty_and_unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_frames(dir.path());
    save(
        &engine,
        Modality::Landmarks,
        vec![("f_0000009.jpg", landmarks(68, 0.0))],
    );
    let none: [&str; 0] = [];
    assert!(matches!(
        engine.assemble(&none, &[Modality::Landmarks]),
        Err(DataError::EmptyBatch)
    ));
    assert!(matches!(
        engine.assemble(&["f_0000009.jpg"], &[Modality::Landmarks]),
        Err(DataError::KeyNotFound { .. })
    ));
}
