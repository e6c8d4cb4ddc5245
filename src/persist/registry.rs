use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::annotation::{GlobalParam, Modality};
use crate::error::{DataError, Result};

/// Directory of the frame store inside the output directory.
pub const FRAME_STORE_DIR: &str = "frames";

/// Built-in artifact names beyond the per-modality and global ones.
pub mod names {
    pub const VISUALIZATION: &str = "visualization";
    pub const CALIBRATION: &str = "calibration";
    pub const TEXTURE_PREVIEW: &str = "texture_preview";
}

/// On-disk format of an artifact, derived from its file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    TensorBlob,
    Json,
    StillImage,
    Video,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "bin" | "pth" => Some(ArtifactKind::TensorBlob),
            "json" => Some(ArtifactKind::Json),
            "jpg" | "jpeg" | "png" => Some(ArtifactKind::StillImage),
            "mjpeg" => Some(ArtifactKind::Video),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::TensorBlob => "tensor blob",
            ArtifactKind::Json => "json document",
            ArtifactKind::StillImage => "still image",
            ArtifactKind::Video => "video clip",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: Option<ArtifactKind>,
}

/// Logical artifact name to (path, kind).
///
/// Every path is `output_dir/<file name>`, fixed when the entry is registered.
#[derive(Clone, Debug)]
pub struct ArtifactRegistry {
    output_dir: PathBuf,
    store_path: PathBuf,
    entries: BTreeMap<String, ArtifactEntry>,
}

impl ArtifactRegistry {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let store_path = output_dir.join(FRAME_STORE_DIR);
        let mut registry = Self {
            output_dir,
            store_path,
            entries: BTreeMap::new(),
        };
        for modality in Modality::ALL {
            registry.insert(modality.name(), modality.file_name());
        }
        for param in GlobalParam::ALL {
            registry.insert(param.name(), param.file_name());
        }
        registry.insert(names::VISUALIZATION, "track.mjpeg");
        registry.insert(names::CALIBRATION, "calibration.jpg");
        registry.insert(names::TEXTURE_PREVIEW, "texture.png");
        registry
    }

    /// Register an extra artifact, replacing any entry with the same name.
    pub fn with_artifact(mut self, name: &str, file_name: &str) -> Self {
        self.insert(name, file_name);
        self
    }

    fn insert(&mut self, name: &str, file_name: &str) {
        let path = self.output_dir.join(file_name);
        let kind = ArtifactKind::from_path(&path);
        self.entries.insert(
            name.to_string(),
            ArtifactEntry {
                name: name.to_string(),
                path,
                kind,
            },
        );
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn entry(&self, name: &str) -> Result<&ArtifactEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| DataError::UnknownArtifact(name.to_string()))
    }

    pub fn path(&self, name: &str) -> Result<&Path> {
        Ok(&self.entry(name)?.path)
    }

    pub fn kind(&self, name: &str) -> Result<ArtifactKind> {
        let entry = self.entry(name)?;
        entry.kind.ok_or_else(|| DataError::UnsupportedArtifactKind {
            name: entry.name.clone(),
            path: entry.path.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.entries.values()
    }
}

impl fmt::Display for ArtifactRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16} {}", "frame_store", self.store_path.display())?;
        for entry in self.entries.values() {
            let kind = entry.kind.map(ArtifactKind::name).unwrap_or("unsupported");
            writeln!(f, "{:<16} {} ({})", entry.name, entry.path.display(), kind)?;
        }
        Ok(())
    }
}
