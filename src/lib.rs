//! Track Data Engine
//!
//! Storage layer of a face-tracking pipeline: decoded video frames go into a
//! durable, ordered, read-mostly frame store, and per-frame annotations
//! produced by upstream stages are served from a lazily loaded cache.
//! Downstream fitting stages ask for batches that join both by frame key.
//!
//! # Module Structure
//!
//! - `storage`: frame store (SQLite, one writer, lock-free immutable readers)
//! - `ingest`: video sources and the ingestion pipeline
//! - `matting`: optional background removal before normalization
//! - `annotation`: annotation records and the once-per-modality cache
//! - `batch`: field-wise collation of frames and annotations
//! - `persist`: named artifacts (tensor blobs, JSON, stills, clips)
//! - `config`, `device`, `error`, `key`, `codec`: supporting types
//!
//! `DataEngine` ties these together for one output directory.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array3;

pub mod annotation;
pub mod batch;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod ingest;
pub mod key;
pub mod matting;
pub mod persist;
pub mod storage;

pub use annotation::{AnnotationCache, AnnotationCollection, AnnotationRecord, GlobalParam, Modality};
pub use batch::{AssembleOptions, Batch, BatchAssembler, BatchField, CollatePolicy};
pub use codec::{ChannelMode, FrameCodec};
pub use config::EngineConfig;
pub use device::Device;
pub use error::{DataError, Result};
pub use ingest::{IngestReport, IngestSettings, IngestionPipeline, ResumePolicy, VideoSource};
pub use key::FrameKey;
pub use persist::{ArtifactKind, ArtifactRegistry, ArtifactValue, PersistenceFacade, SaveOptions, VideoClip};
pub use storage::{FrameReader, FrameWriter, StoreHandle};

/// Owns every handle and cache for one run's output directory.
///
/// The frame store is opened lazily on first read and stays open until the
/// engine is dropped or the store is rebuilt.
pub struct DataEngine {
    registry: Arc<ArtifactRegistry>,
    persist: PersistenceFacade,
    annotations: AnnotationCache,
    store: StoreHandle,
    codec: FrameCodec,
    device: Device,
    frame_keys: Option<Vec<FrameKey>>,
}

impl DataEngine {
    pub fn new(registry: ArtifactRegistry, device: Device) -> Self {
        let registry = Arc::new(registry);
        let persist = PersistenceFacade::new(registry.clone());
        Self {
            annotations: AnnotationCache::new(persist.clone()),
            registry,
            persist,
            store: StoreHandle::default(),
            codec: FrameCodec::default(),
            device,
            frame_keys: None,
        }
    }

    pub fn open(output_dir: impl Into<PathBuf>, device: Device) -> Self {
        Self::new(ArtifactRegistry::new(output_dir), device)
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::open(config.resolved_output_dir(), config.device)
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn persistence(&self) -> &PersistenceFacade {
        &self.persist
    }

    pub fn annotations(&self) -> &AnnotationCache {
        &self.annotations
    }

    pub fn store_state(&self) -> &'static str {
        self.store.state_name()
    }

    pub fn has_frame_store(&self) -> bool {
        let path = self.registry.store_path();
        let exists = path.exists();
        if exists {
            log::info!("found frame store at {}", path.display());
        }
        exists
    }

    /// Run `pipeline` over `source` into this engine's frame store.
    ///
    /// An open reader is closed first so the store can be rebuilt or resumed.
    pub fn build_frame_store(
        &mut self,
        source: &mut dyn VideoSource,
        pipeline: &mut IngestionPipeline,
    ) -> Result<IngestReport> {
        if let StoreHandle::ReaderOpen(_) = self.store {
            self.store.close();
        }
        self.frame_keys = None;
        pipeline.run(
            source,
            &mut self.store,
            self.registry.store_path(),
            Some(&self.persist),
        )
    }

    /// Delete the frame store directory. Returns whether one existed.
    pub fn clear_frame_store(&mut self) -> Result<bool> {
        self.store.close();
        self.frame_keys = None;
        let path = self.registry.store_path();
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(path)?;
        log::info!("removed frame store at {}", path.display());
        Ok(true)
    }

    pub fn frame_reader(&mut self) -> Result<&FrameReader> {
        self.store.reader(self.registry.store_path(), "frame_reader")
    }

    /// Decoded `C x H x W` frame.
    pub fn get_frame(&mut self, key: &str, mode: ChannelMode) -> Result<Array3<u8>> {
        let bytes = self
            .store
            .reader(self.registry.store_path(), "get_frame")?
            .get(key)?;
        self.codec.decode(&bytes, mode)
    }

    /// All frame keys in index order, read once per open store.
    pub fn frame_keys(&mut self) -> Result<&[FrameKey]> {
        if self.frame_keys.is_none() {
            let keys = self
                .store
                .reader(self.registry.store_path(), "frame_keys")?
                .keys_ordered()?;
            self.frame_keys = Some(keys);
        }
        Ok(self.frame_keys.as_deref().unwrap_or_default())
    }

    pub fn annotation(&self, modality: Modality, key: &str) -> Result<&AnnotationRecord> {
        self.annotations.get(modality, key)
    }

    pub fn landmarks(&self, key: &str) -> Result<&AnnotationRecord> {
        self.annotations.get(Modality::Landmarks, key)
    }

    pub fn expression(&self, key: &str) -> Result<&AnnotationRecord> {
        self.annotations.get(Modality::Expression, key)
    }

    pub fn global(&self, param: GlobalParam) -> Result<&AnnotationRecord> {
        self.annotations.global(param)
    }

    pub fn camera_params(&self) -> Result<&AnnotationRecord> {
        self.annotations.global(GlobalParam::Camera)
    }

    /// Strict RGB batch of `keys` with `modalities`.
    pub fn assemble<S: AsRef<str>>(&mut self, keys: &[S], modalities: &[Modality]) -> Result<Batch> {
        self.assemble_with(keys, modalities, &AssembleOptions::default())
    }

    pub fn assemble_with<S: AsRef<str>>(
        &mut self,
        keys: &[S],
        modalities: &[Modality],
        options: &AssembleOptions,
    ) -> Result<Batch> {
        let reader = self.store.reader(self.registry.store_path(), "assemble")?;
        BatchAssembler::new(reader, &self.annotations).assemble(keys, modalities, options)
    }

    pub fn save(&self, name: &str, value: &ArtifactValue, options: &SaveOptions) -> Result<PathBuf> {
        self.persist.save(name, value, options)
    }

    pub fn load(&self, name: &str) -> Result<ArtifactValue> {
        self.persist.load(name)
    }

    pub fn check_exists(&self, name: &str) -> Result<bool> {
        self.persist.check_exists(name)
    }
}

impl fmt::Display for DataEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data engine on {} ({})", self.registry.output_dir().display(), self.device)?;
        write!(f, "{}", self.registry)
    }
}
