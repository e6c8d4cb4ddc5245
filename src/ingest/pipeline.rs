//! Video to frame store ingestion.
//!
//! Each decoded frame is optionally matted, normalized to a square of the
//! target size, JPEG encoded and inserted under its sequential frame key.
//! Inserts are committed in chunks; a failure rolls back the open chunk and
//! leaves the store directory behind for a later resume or rebuild.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;

use super::normalize::normalize_frame;
use super::source::VideoSource;
use crate::codec::{FrameCodec, DEFAULT_JPEG_QUALITY};
use crate::error::{DataError, Result};
use crate::key::FrameKey;
use crate::matting::{matte_frame, MattingSettings, SharedBackend};
use crate::persist::{names, ArtifactValue, PersistenceFacade, SaveOptions, VideoClip};
use crate::storage::{StoreHandle, DEFAULT_CAPACITY_BYTES, DEFAULT_COMMIT_EVERY};

pub const DEFAULT_TARGET_SIZE: u32 = 512;
pub const DEFAULT_VISUALIZATION_FRAMES: usize = 300;

/// What to do when the store directory already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Leave the existing store untouched and report success.
    #[default]
    SkipExisting,
    /// Reopen the store and insert only the frames it lacks.
    Resume,
    /// Delete the store and ingest from scratch.
    Rebuild,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisualizationSettings {
    /// Upper bound on sampled frames; frames are taken at a uniform stride.
    pub max_frames: usize,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_VISUALIZATION_FRAMES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IngestSettings {
    pub target_size: u32,
    pub commit_every: usize,
    pub capacity_bytes: u64,
    pub jpeg_quality: u8,
    pub resume: ResumePolicy,
    /// Background removal, applied before resizing.
    pub matting: Option<MattingSettings>,
    pub visualization: Option<VisualizationSettings>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            commit_every: DEFAULT_COMMIT_EVERY,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            resume: ResumePolicy::default(),
            matting: None,
            visualization: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestState {
    NotStarted,
    Decoding,
    Matting,
    Resizing,
    Encoding,
    Committing,
    Done,
    Failed(String),
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestState::NotStarted => f.write_str("not started"),
            IngestState::Decoding => f.write_str("decoding"),
            IngestState::Matting => f.write_str("matting"),
            IngestState::Resizing => f.write_str("resizing"),
            IngestState::Encoding => f.write_str("encoding"),
            IngestState::Committing => f.write_str("committing"),
            IngestState::Done => f.write_str("done"),
            IngestState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-frame progress passed to the observer.
#[derive(Clone, Copy, Debug)]
pub struct IngestProgress {
    pub frames_seen: u64,
    pub frames_written: u64,
    pub total: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub state: IngestState,
    /// The store directory was present before the run.
    pub store_existed: bool,
    pub frames_seen: u64,
    pub frames_written: u64,
    /// Frames already present in a resumed store.
    pub frames_skipped: u64,
    pub commits: u64,
    pub visualization_frames: usize,
}

impl IngestReport {
    fn new(store_existed: bool) -> Self {
        Self {
            state: IngestState::NotStarted,
            store_existed,
            frames_seen: 0,
            frames_written: 0,
            frames_skipped: 0,
            commits: 0,
            visualization_frames: 0,
        }
    }
}

type ProgressFn = Box<dyn FnMut(&IngestProgress) + Send>;

pub struct IngestionPipeline {
    settings: IngestSettings,
    codec: FrameCodec,
    matting: Option<SharedBackend>,
    interrupt: Option<Arc<AtomicBool>>,
    progress: Option<ProgressFn>,
    state: IngestState,
}

impl IngestionPipeline {
    pub fn new(settings: IngestSettings) -> Self {
        let codec = FrameCodec::new(settings.jpeg_quality);
        Self {
            settings,
            codec,
            matting: None,
            interrupt: None,
            progress: None,
            state: IngestState::NotStarted,
        }
    }

    /// Backend used when `settings.matting` is set.
    pub fn with_matting(mut self, backend: SharedBackend) -> Self {
        self.matting = Some(backend);
        self
    }

    /// Flag polled between frames; once set the run aborts with `Interrupted`.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn with_progress<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&IngestProgress) + Send + 'static,
    {
        self.progress = Some(Box::new(observer));
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    /// Ingest every frame of `source` into the store at `store_path`.
    ///
    /// `persist` receives the visualization clip when one is requested.
    pub fn run(
        &mut self,
        source: &mut dyn VideoSource,
        handle: &mut StoreHandle,
        store_path: &Path,
        persist: Option<&PersistenceFacade>,
    ) -> Result<IngestReport> {
        let store_existed = store_path.exists();
        let mut report = IngestReport::new(store_existed);

        if self.settings.matting.is_some() && self.matting.is_none() {
            return Err(DataError::Matting(
                "matting requested without a backend".to_string(),
            ));
        }

        let resume = match (store_existed, self.settings.resume) {
            (true, ResumePolicy::SkipExisting) => {
                log::info!(
                    "frame store {} already exists, skipping ingestion",
                    store_path.display()
                );
                self.state = IngestState::Done;
                report.state = IngestState::Done;
                return Ok(report);
            }
            (true, ResumePolicy::Rebuild) => {
                handle.ensure_unopened("begin_write")?;
                log::info!("removing frame store {} for rebuild", store_path.display());
                fs::remove_dir_all(store_path)?;
                false
            }
            (true, ResumePolicy::Resume) => true,
            (false, _) => false,
        };

        handle.begin_write(
            store_path,
            self.settings.capacity_bytes,
            self.settings.commit_every,
            resume,
        )?;

        match self.ingest_frames(source, handle, store_path, persist, &mut report) {
            Ok(()) => {
                self.state = IngestState::Committing;
                let stats = match handle.finish_write() {
                    Ok(stats) => stats,
                    Err(e) => return Err(self.fail(handle, store_path, e)),
                };
                report.commits = stats.commits;
                self.state = IngestState::Done;
                report.state = IngestState::Done;
                log::info!(
                    "ingested {} frames into {} ({} written, {} already present, {} commits)",
                    report.frames_seen,
                    store_path.display(),
                    report.frames_written,
                    report.frames_skipped,
                    report.commits
                );
                Ok(report)
            }
            Err(e) => Err(self.fail(handle, store_path, e)),
        }
    }

    fn fail(&mut self, handle: &mut StoreHandle, store_path: &Path, err: DataError) -> DataError {
        handle.close();
        self.state = IngestState::Failed(err.to_string());
        log::warn!(
            "frame store {} is incomplete; remove it or resume before retrying",
            store_path.display()
        );
        err
    }

    fn ingest_frames(
        &mut self,
        source: &mut dyn VideoSource,
        handle: &mut StoreHandle,
        store_path: &Path,
        persist: Option<&PersistenceFacade>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let metadata = source.metadata().clone();
        let mut clip = match (self.settings.visualization, persist) {
            (Some(vis), Some(persist)) if !persist.check_exists(names::VISUALIZATION)? => {
                Some(ClipSampler::new(vis.max_frames, metadata.frame_count, metadata.fps))
            }
            _ => None,
        };

        let mut index = 0u64;
        loop {
            if let Some(flag) = &self.interrupt {
                if flag.load(Ordering::SeqCst) {
                    let committed = handle.writer("ingest")?.committed();
                    return Err(DataError::Interrupted {
                        path: store_path.to_path_buf(),
                        committed,
                    });
                }
            }

            self.state = IngestState::Decoding;
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let key = FrameKey::new(index);
            index += 1;
            report.frames_seen += 1;

            let present = handle.writer("ingest")?.contains(key.as_str())?;
            let sampled = clip.as_ref().map(|c| c.wants(index - 1)).unwrap_or(false);
            if present && !sampled {
                report.frames_skipped += 1;
                self.notify(report, metadata.frame_count);
                continue;
            }

            let frame = match (&self.settings.matting, &self.matting) {
                (Some(settings), Some(backend)) => {
                    self.state = IngestState::Matting;
                    let mut guard = backend
                        .lock()
                        .map_err(|_| DataError::Matting("backend lock poisoned".to_string()))?;
                    matte_frame(&mut *guard, &frame, settings)?
                }
                _ => frame,
            };

            self.state = IngestState::Resizing;
            let normalized = normalize_frame(&frame, self.settings.target_size)?;
            if let Some(clip) = clip.as_mut() {
                clip.offer(index - 1, &normalized);
            }
            if present {
                report.frames_skipped += 1;
                self.notify(report, metadata.frame_count);
                continue;
            }

            self.state = IngestState::Encoding;
            let bytes = self.codec.encode(&normalized)?;

            self.state = IngestState::Committing;
            if handle.writer("ingest")?.put(key.as_str(), &bytes)? {
                report.frames_written += 1;
            } else {
                report.frames_skipped += 1;
            }
            self.notify(report, metadata.frame_count);
        }

        if let (Some(clip), Some(persist)) = (clip, persist) {
            report.visualization_frames = clip.clip.len();
            if !clip.clip.is_empty() {
                let path = persist.save(
                    names::VISUALIZATION,
                    &ArtifactValue::Video(clip.clip),
                    &SaveOptions::default(),
                )?;
                log::info!(
                    "wrote {} visualization frames to {}",
                    report.visualization_frames,
                    path.display()
                );
            }
        }
        Ok(())
    }

    fn notify(&mut self, report: &IngestReport, total: Option<u64>) {
        if let Some(observer) = self.progress.as_mut() {
            observer(&IngestProgress {
                frames_seen: report.frames_seen,
                frames_written: report.frames_written,
                total,
            });
        }
    }
}

/// Uniform-stride frame sampler for the visualization clip.
struct ClipSampler {
    stride: u64,
    max_frames: usize,
    clip: VideoClip,
}

impl ClipSampler {
    fn new(max_frames: usize, frame_count: Option<u64>, source_fps: f64) -> Self {
        let max = max_frames.max(1) as u64;
        let stride = frame_count
            .map(|n| n.div_ceil(max).max(1))
            .unwrap_or(1);
        Self {
            stride,
            max_frames,
            clip: VideoClip::new(source_fps / stride as f64),
        }
    }

    fn wants(&self, index: u64) -> bool {
        index % self.stride == 0 && self.clip.len() < self.max_frames
    }

    fn offer(&mut self, index: u64, frame: &RgbImage) {
        if self.wants(index) {
            self.clip.frames.push(frame.clone());
        }
    }
}
