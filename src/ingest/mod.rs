//! Frame ingestion.
//!
//! A `VideoSource` yields decoded frames; the `IngestionPipeline` turns them
//! into a frame store. Sources:
//! - local video files through FFmpeg (feature: ingest-ffmpeg)
//! - `stub://` synthetic clips, always available

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod normalize;
pub mod pipeline;
mod source;

pub use file::{FileConfig, FileSource, SyntheticSource};
pub use pipeline::{
    IngestProgress, IngestReport, IngestSettings, IngestState, IngestionPipeline, ResumePolicy,
    VisualizationSettings, DEFAULT_TARGET_SIZE,
};
pub use source::{VideoMetadata, VideoSource};
