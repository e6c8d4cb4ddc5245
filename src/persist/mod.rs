//! Named artifact save/load.
//!
//! Every artifact lives at a registry-derived path and is (de)serialized
//! according to the kind its file extension declares. Writes go to a
//! temporary sibling and are renamed into place.

mod clip;
mod registry;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationCollection, AnnotationRecord};
use crate::codec::{self, FrameCodec};
use crate::error::{DataError, Result};

pub use clip::VideoClip;
pub use registry::{names, ArtifactEntry, ArtifactKind, ArtifactRegistry, FRAME_STORE_DIR};

const BLOB_MAGIC: &[u8; 4] = b"TKTB";

/// A value that can be saved to or loaded from a named artifact.
#[derive(Clone, Debug)]
pub enum ArtifactValue {
    /// Frame key to record, one per modality.
    Collection(AnnotationCollection),
    /// A single record, e.g. global camera parameters.
    Record(AnnotationRecord),
    Json(serde_json::Value),
    Image(DynamicImage),
    Video(VideoClip),
}

impl ArtifactValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArtifactValue::Collection(_) => "annotation collection",
            ArtifactValue::Record(_) => "annotation record",
            ArtifactValue::Json(_) => "json value",
            ArtifactValue::Image(_) => "image",
            ArtifactValue::Video(_) => "video clip",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SaveOptions {
    /// Overrides the clip's own frame rate when saving video.
    pub fps: Option<f64>,
    pub pretty_json: bool,
    /// Quality of JPEG stills and clip frames; codec default when unset.
    pub jpeg_quality: Option<u8>,
}

#[derive(Serialize, Deserialize)]
enum TensorBlob {
    Collection(AnnotationCollection),
    Record(AnnotationRecord),
}

#[derive(Clone, Debug)]
pub struct PersistenceFacade {
    registry: Arc<ArtifactRegistry>,
}

impl PersistenceFacade {
    pub fn new(registry: Arc<ArtifactRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn save(&self, name: &str, value: &ArtifactValue, options: &SaveOptions) -> Result<PathBuf> {
        let kind = self.registry.kind(name)?;
        let path = self.registry.path(name)?.to_path_buf();
        let mismatch = || DataError::ArtifactValueMismatch {
            name: name.to_string(),
            kind: kind.name(),
            value: value.kind_name(),
        };

        let bytes = match (kind, value) {
            (ArtifactKind::TensorBlob, ArtifactValue::Collection(c)) => {
                encode_blob(&TensorBlob::Collection(c.clone()))?
            }
            (ArtifactKind::TensorBlob, ArtifactValue::Record(r)) => {
                encode_blob(&TensorBlob::Record(r.clone()))?
            }
            (ArtifactKind::Json, ArtifactValue::Collection(c)) => encode_json(c, options)?,
            (ArtifactKind::Json, ArtifactValue::Record(r)) => encode_json(r, options)?,
            (ArtifactKind::Json, ArtifactValue::Json(v)) => encode_json(v, options)?,
            (ArtifactKind::StillImage, ArtifactValue::Image(image)) => {
                let format = ImageFormat::from_path(&path)?;
                match (format, options.jpeg_quality) {
                    (ImageFormat::Jpeg, Some(quality)) => {
                        FrameCodec::new(quality).encode(&image.to_rgb8())?
                    }
                    _ => codec::encode_still(image, format)?,
                }
            }
            (ArtifactKind::Video, ArtifactValue::Video(clip)) => {
                let codec = options
                    .jpeg_quality
                    .map(FrameCodec::new)
                    .unwrap_or_default();
                match options.fps {
                    Some(fps) => VideoClip {
                        fps,
                        frames: clip.frames.clone(),
                    }
                    .encode(&codec)?,
                    None => clip.encode(&codec)?,
                }
            }
            _ => return Err(mismatch()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, &bytes)?;
        log::debug!("saved {} ({}, {} bytes)", name, kind.name(), bytes.len());
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<ArtifactValue> {
        let kind = self.registry.kind(name)?;
        let path = self.registry.path(name)?;
        let bytes = read_file(path)?;
        match kind {
            ArtifactKind::TensorBlob => Ok(match decode_blob(name, &bytes)? {
                TensorBlob::Collection(c) => ArtifactValue::Collection(c),
                TensorBlob::Record(r) => ArtifactValue::Record(r),
            }),
            ArtifactKind::Json => Ok(ArtifactValue::Json(serde_json::from_slice(&bytes)?)),
            ArtifactKind::StillImage => {
                let format = ImageFormat::from_path(path)?;
                let image = image::load_from_memory_with_format(&bytes, format)
                    .map_err(|e| DataError::DecodeFailure(format!("{}: {}", name, e)))?;
                Ok(ArtifactValue::Image(image))
            }
            ArtifactKind::Video => Ok(ArtifactValue::Video(VideoClip::decode(
                &bytes,
                &FrameCodec::default(),
            )?)),
        }
    }

    pub fn check_exists(&self, name: &str) -> Result<bool> {
        let path = self.registry.path(name)?;
        let exists = path.exists();
        if exists {
            log::info!("found {} at {}", name, path.display());
        }
        Ok(exists)
    }

    /// Load a per-frame collection from either a tensor blob or a JSON artifact.
    pub fn load_collection(&self, name: &str) -> Result<AnnotationCollection> {
        match self.load(name)? {
            ArtifactValue::Collection(c) => Ok(c),
            ArtifactValue::Json(value) => serde_json::from_value(value).map_err(|e| {
                DataError::CorruptArtifact {
                    name: name.to_string(),
                    detail: format!("not an annotation collection: {}", e),
                }
            }),
            other => Err(DataError::CorruptArtifact {
                name: name.to_string(),
                detail: format!("expected an annotation collection, found a {}", other.kind_name()),
            }),
        }
    }

    /// Load a single record, as stored for global parameters.
    pub fn load_record(&self, name: &str) -> Result<AnnotationRecord> {
        match self.load(name)? {
            ArtifactValue::Record(r) => Ok(r),
            ArtifactValue::Json(value) => serde_json::from_value(value).map_err(|e| {
                DataError::CorruptArtifact {
                    name: name.to_string(),
                    detail: format!("not an annotation record: {}", e),
                }
            }),
            other => Err(DataError::CorruptArtifact {
                name: name.to_string(),
                detail: format!("expected an annotation record, found a {}", other.kind_name()),
            }),
        }
    }
}

fn encode_blob(blob: &TensorBlob) -> Result<Vec<u8>> {
    let mut out = BLOB_MAGIC.to_vec();
    out.extend(bincode::serde::encode_to_vec(
        blob,
        bincode::config::standard(),
    )?);
    Ok(out)
}

fn decode_blob(name: &str, bytes: &[u8]) -> Result<TensorBlob> {
    let payload = bytes
        .strip_prefix(BLOB_MAGIC.as_slice())
        .ok_or_else(|| DataError::CorruptArtifact {
            name: name.to_string(),
            detail: "missing tensor blob header".to_string(),
        })?;
    let (blob, read) = bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if read != payload.len() {
        return Err(DataError::CorruptArtifact {
            name: name.to_string(),
            detail: format!("{} trailing bytes", payload.len() - read),
        });
    }
    Ok(blob)
}

fn encode_json<T: Serialize>(value: &T, options: &SaveOptions) -> Result<Vec<u8>> {
    if options.pretty_json {
        Ok(serde_json::to_vec_pretty(value)?)
    } else {
        Ok(serde_json::to_vec(value)?)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
