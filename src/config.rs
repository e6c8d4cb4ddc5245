use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::codec::DEFAULT_JPEG_QUALITY;
use crate::device::Device;
use crate::ingest::{IngestSettings, ResumePolicy, VisualizationSettings, DEFAULT_TARGET_SIZE};
use crate::matting::{MattingSettings, DEFAULT_BACKGROUND, DEFAULT_THRESHOLD};
use crate::storage::{DEFAULT_CAPACITY_BYTES, DEFAULT_COMMIT_EVERY};

const DEFAULT_VIDEO_PATH: &str = "video.mp4";
const DEFAULT_VISUALIZATION_FRAMES: usize = crate::ingest::pipeline::DEFAULT_VISUALIZATION_FRAMES;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    data_root: Option<PathBuf>,
    video_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    device: Option<String>,
    store: Option<StoreConfigFile>,
    frames: Option<FramesConfigFile>,
    matting: Option<MattingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    commit_every: Option<usize>,
    capacity_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FramesConfigFile {
    target_size: Option<u32>,
    jpeg_quality: Option<u8>,
    visualization_frames: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MattingConfigFile {
    threshold: Option<f32>,
    background: Option<[u8; 3]>,
}

/// Settings for one tracking run.
///
/// `video_path` and `output_dir` are relative to `data_root` unless absolute.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_root: PathBuf,
    pub video_path: PathBuf,
    pub output_dir: PathBuf,
    pub device: Device,
    pub target_size: u32,
    pub commit_every: usize,
    pub capacity_bytes: u64,
    pub jpeg_quality: u8,
    pub visualization_frames: usize,
    pub matting: MattingSettings,
}

impl EngineConfig {
    /// File named by `TRACK_CONFIG` (if set), then `TRACK_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRACK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Config file at `path`, then `TRACK_*` overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults for a data directory holding `video.mp4`.
    pub fn from_data_root(data_root: impl Into<PathBuf>) -> Result<Self> {
        let mut cfg = Self::from_file(EngineConfigFile::default())?;
        cfg.data_root = data_root.into();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self> {
        let device = match file.device.as_deref() {
            Some(raw) => raw.parse().map_err(|e| anyhow!("{}", e))?,
            None => Device::default(),
        };
        let store = file.store.unwrap_or_default();
        let frames = file.frames.unwrap_or_default();
        let matting = file.matting.unwrap_or_default();
        Ok(Self {
            data_root: file.data_root.unwrap_or_else(|| PathBuf::from(".")),
            video_path: file
                .video_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_PATH)),
            output_dir: file.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            device,
            target_size: frames.target_size.unwrap_or(DEFAULT_TARGET_SIZE),
            commit_every: store.commit_every.unwrap_or(DEFAULT_COMMIT_EVERY),
            capacity_bytes: store.capacity_bytes.unwrap_or(DEFAULT_CAPACITY_BYTES),
            jpeg_quality: frames.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            visualization_frames: frames
                .visualization_frames
                .unwrap_or(DEFAULT_VISUALIZATION_FRAMES),
            matting: MattingSettings {
                threshold: matting.threshold.unwrap_or(DEFAULT_THRESHOLD),
                background: matting.background.unwrap_or(DEFAULT_BACKGROUND),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("TRACK_DATA_ROOT") {
            if !root.trim().is_empty() {
                self.data_root = PathBuf::from(root);
            }
        }
        if let Ok(dir) = std::env::var("TRACK_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("TRACK_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device
                    .parse()
                    .map_err(|e| anyhow!("TRACK_DEVICE: {}", e))?;
            }
        }
        if let Ok(every) = std::env::var("TRACK_COMMIT_EVERY") {
            self.commit_every = every
                .parse()
                .map_err(|_| anyhow!("TRACK_COMMIT_EVERY must be a positive integer"))?;
        }
        if let Ok(size) = std::env::var("TRACK_TARGET_SIZE") {
            self.target_size = size
                .parse()
                .map_err(|_| anyhow!("TRACK_TARGET_SIZE must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.target_size == 0 {
            return Err(anyhow!("target size must be greater than zero"));
        }
        if self.commit_every == 0 {
            return Err(anyhow!("commit interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if !(0.0..=1.0).contains(&self.matting.threshold) {
            return Err(anyhow!("matting threshold must be within 0..=1"));
        }
        if self.capacity_bytes == 0 {
            return Err(anyhow!("store capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn resolved_video_path(&self) -> PathBuf {
        self.data_root.join(&self.video_path)
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        self.data_root.join(&self.output_dir)
    }

    /// Pipeline settings; matting and the clip are enabled by the caller's flags.
    pub fn ingest_settings(
        &self,
        resume: ResumePolicy,
        matting: bool,
        visualization: bool,
    ) -> IngestSettings {
        IngestSettings {
            target_size: self.target_size,
            commit_every: self.commit_every,
            capacity_bytes: self.capacity_bytes,
            jpeg_quality: self.jpeg_quality,
            resume,
            matting: matting.then_some(self.matting),
            visualization: visualization.then_some(VisualizationSettings {
                max_frames: self.visualization_frames,
            }),
        }
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
