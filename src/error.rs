//! Error taxonomy for the data engine.
//!
//! Every variant is fatal to the operation that produced it. Nothing in the
//! library retries; callers decide whether a failure is recoverable.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("frame store already exists at {}", path.display())]
    StoreAlreadyExists { path: PathBuf },

    #[error("frame store not found at {}", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("frame {key} not found in store")]
    KeyNotFound { key: String },

    #[error("no {modality} annotation recorded for frame {key}")]
    AnnotationNotFound { modality: String, key: String },

    #[error("cannot collate field '{field}': {detail}")]
    BatchShapeMismatch { field: String, detail: String },

    #[error("frame {key} is missing the {modality} annotation; batch would be incomplete")]
    IncompleteAnnotation { modality: String, key: String },

    #[error("artifact '{name}' at {} has no supported format kind", path.display())]
    UnsupportedArtifactKind { name: String, path: PathBuf },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("device '{device}' unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("invalid frame key '{0}'")]
    InvalidFrameKey(String),

    #[error("artifact '{0}' is not registered")]
    UnknownArtifact(String),

    #[error("unknown modality '{0}'")]
    UnknownModality(String),

    #[error("artifact '{name}' is a {kind} and cannot hold a {value}")]
    ArtifactValueMismatch {
        name: String,
        kind: &'static str,
        value: &'static str,
    },

    #[error("artifact '{name}' is corrupt: {detail}")]
    CorruptArtifact { name: String, detail: String },

    #[error("{op} requires the store handle to be {expected}, but it is {actual}")]
    InvalidHandleState {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot assemble an empty batch")]
    EmptyBatch,

    #[error("frame store at {} exceeded its capacity of {capacity_bytes} bytes", path.display())]
    StoreFull { path: PathBuf, capacity_bytes: u64 },

    #[error("ingestion interrupted after {committed} committed frames; store at {} is incomplete", path.display())]
    Interrupted { path: PathBuf, committed: u64 },

    #[error("matting failed: {0}")]
    Matting(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),
}
