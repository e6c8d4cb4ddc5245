//! Local file video source.
//!
//! `FileSource` opens a local video file through FFmpeg (feature
//! `ingest-ffmpeg`) or, for `stub://` paths, a deterministic synthetic clip.
//! Stub paths accept `width`, `height`, `frames` and `fps` query parameters,
//! e.g. `stub://clip?width=64&height=48&frames=12`.

use image::{DynamicImage, Rgb, RgbImage};

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::source::{VideoMetadata, VideoSource};
use crate::error::{DataError, Result};

const STUB_SCHEME: &str = "stub://";

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g. "/data/subject01/video.mp4") or a `stub://` path.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(DataError::Config(format!(
                "'{}' is not a local path (no URL schemes)",
                config.path
            )));
        }
        if let Some(rest) = config.path.strip_prefix(STUB_SCHEME) {
            log::info!("FileSource: opened {} (synthetic)", config.path);
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::from_query(rest)?),
            });
        }
        #[cfg(feature = "ingest-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(&config.path)?),
            })
        }
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            Err(DataError::DecodeFailure(format!(
                "decoding '{}' requires the ingest-ffmpeg feature",
                config.path
            )))
        }
    }
}

impl VideoSource for FileSource {
    fn metadata(&self) -> &VideoMetadata {
        match &self.backend {
            FileBackend::Synthetic(source) => source.metadata(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.metadata(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source
// ----------------------------------------------------------------------------

/// Deterministic generated clip: every frame differs, every run is identical.
pub struct SyntheticSource {
    metadata: VideoMetadata,
    emitted: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frames: u64, fps: f64) -> Self {
        Self {
            metadata: VideoMetadata {
                fps,
                width,
                height,
                frame_count: Some(frames),
                duration_s: (fps > 0.0).then(|| frames as f64 / fps),
            },
            emitted: 0,
        }
    }

    fn from_query(rest: &str) -> Result<Self> {
        let (mut width, mut height, mut frames, mut fps) = (640u32, 480u32, 48u64, 25.0f64);
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| DataError::Config(format!("bad stub parameter '{}'", pair)))?;
            let bad = || DataError::Config(format!("bad value for stub parameter '{}'", name));
            match name {
                "width" => width = value.parse().map_err(|_| bad())?,
                "height" => height = value.parse().map_err(|_| bad())?,
                "frames" => frames = value.parse().map_err(|_| bad())?,
                "fps" => fps = value.parse().map_err(|_| bad())?,
                other => {
                    return Err(DataError::Config(format!(
                        "unknown stub parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(Self::new(width, height, frames, fps))
    }

    fn render(&self, index: u64) -> RgbImage {
        let shift = (index % 256) as u32;
        RgbImage::from_fn(self.metadata.width, self.metadata.height, |x, y| {
            Rgb([
                ((x + shift * 3) % 256) as u8,
                ((y + shift * 5) % 256) as u8,
                ((x / 8 + y / 8 + shift) % 2 * 255) as u8,
            ])
        })
    }
}

impl VideoSource for SyntheticSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if Some(self.emitted) == self.metadata.frame_count {
            return Ok(None);
        }
        let frame = self.render(self.emitted);
        self.emitted += 1;
        Ok(Some(DynamicImage::ImageRgb8(frame)))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}
