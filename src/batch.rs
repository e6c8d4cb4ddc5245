//! Batch assembly.
//!
//! A batch gathers, for an ordered list of frame keys, the decoded frames and
//! the requested annotation modalities, stacking every field along a new
//! leading axis in input order.

use std::collections::BTreeMap;
use std::io;

use ndarray::{Array1, Array3, Array4, ArrayD, ArrayViewD, Axis};

use crate::annotation::{AnnotationCache, AnnotationRecord, Modality};
use crate::codec::{ChannelMode, FrameCodec};
use crate::error::{DataError, Result};
use crate::storage::FrameReader;

/// What to do with a key that lacks one of the requested modalities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollatePolicy {
    /// Fail the whole batch with `IncompleteAnnotation`.
    #[default]
    Strict,
    /// Drop the key from the batch and keep going.
    SkipIncomplete,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AssembleOptions {
    pub channels: ChannelMode,
    pub policy: CollatePolicy,
}

/// One collated annotation field.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchField {
    Tensor(ArrayD<f32>),
    Group(BTreeMap<String, ArrayD<f32>>),
    Scalars(BTreeMap<String, Array1<f64>>),
}

impl BatchField {
    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            BatchField::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&ArrayD<f32>> {
        match self {
            BatchField::Group(g) => g.get(name),
            _ => None,
        }
    }

    pub fn scalars(&self, name: &str) -> Option<&Array1<f64>> {
        match self {
            BatchField::Scalars(s) => s.get(name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Batch {
    /// Keys actually collated, in input order.
    pub keys: Vec<String>,
    /// `N x C x H x W`.
    pub frames: Array4<u8>,
    pub fields: BTreeMap<Modality, BatchField>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn field(&self, modality: Modality) -> Option<&BatchField> {
        self.fields.get(&modality)
    }
}

pub struct BatchAssembler<'a> {
    reader: &'a FrameReader,
    annotations: &'a AnnotationCache,
    codec: FrameCodec,
}

impl<'a> BatchAssembler<'a> {
    pub fn new(reader: &'a FrameReader, annotations: &'a AnnotationCache) -> Self {
        Self {
            reader,
            annotations,
            codec: FrameCodec::default(),
        }
    }

    /// Collate `keys` with every modality in `modalities`.
    ///
    /// A modality whose artifact was never written counts as missing for
    /// every key, so it fails a strict batch with `IncompleteAnnotation`.
    pub fn assemble<S: AsRef<str>>(
        &self,
        keys: &[S],
        modalities: &[Modality],
        options: &AssembleOptions,
    ) -> Result<Batch> {
        if keys.is_empty() {
            return Err(DataError::EmptyBatch);
        }
        let mut requested: Vec<Modality> = Vec::with_capacity(modalities.len());
        for m in modalities {
            if !requested.contains(m) {
                requested.push(*m);
            }
        }

        let mut kept: Vec<&str> = Vec::with_capacity(keys.len());
        let mut records: Vec<Vec<&AnnotationRecord>> = vec![Vec::new(); requested.len()];
        'keys: for key in keys {
            let key = key.as_ref();
            let mut row = Vec::with_capacity(requested.len());
            for modality in &requested {
                let lookup = match self.annotations.try_get(*modality, key) {
                    Err(DataError::Io(e)) if e.kind() == io::ErrorKind::NotFound => None,
                    other => other?,
                };
                match lookup {
                    Some(record) => row.push(record),
                    None if options.policy == CollatePolicy::SkipIncomplete => {
                        log::warn!("dropping {} from batch: no {} annotation", key, modality);
                        continue 'keys;
                    }
                    None => {
                        return Err(DataError::IncompleteAnnotation {
                            modality: modality.name().to_string(),
                            key: key.to_string(),
                        })
                    }
                }
            }
            kept.push(key);
            for (column, record) in records.iter_mut().zip(row) {
                column.push(record);
            }
        }
        if kept.is_empty() {
            return Err(DataError::EmptyBatch);
        }

        let mut frames = Vec::with_capacity(kept.len());
        for key in &kept {
            let bytes = self.reader.get(key)?;
            frames.push(self.codec.decode(&bytes, options.channels)?);
        }
        let frames = collate_frames(&frames)?;

        let mut fields = BTreeMap::new();
        for (modality, column) in requested.iter().zip(&records) {
            fields.insert(*modality, collate_records(modality.name(), column)?);
        }

        Ok(Batch {
            keys: kept.into_iter().map(str::to_string).collect(),
            frames,
            fields,
        })
    }
}

/// Stack `C x H x W` frames into `N x C x H x W`.
pub fn collate_frames(frames: &[Array3<u8>]) -> Result<Array4<u8>> {
    let first = frames.first().ok_or(DataError::EmptyBatch)?;
    for (idx, frame) in frames.iter().enumerate() {
        if frame.shape() != first.shape() {
            return Err(DataError::BatchShapeMismatch {
                field: "frames".to_string(),
                detail: format!(
                    "item {} has shape {:?}, item 0 has {:?}",
                    idx,
                    frame.shape(),
                    first.shape()
                ),
            });
        }
    }
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Stack one field's per-key records along a new leading axis.
pub fn collate_records(field: &str, records: &[&AnnotationRecord]) -> Result<BatchField> {
    let first = *records.first().ok_or(DataError::EmptyBatch)?;
    let mismatch = |idx: usize, record: &AnnotationRecord| DataError::BatchShapeMismatch {
        field: field.to_string(),
        detail: format!(
            "item {} is {}, item 0 is {}",
            idx,
            record.signature(),
            first.signature()
        ),
    };

    match first {
        AnnotationRecord::Tensor(head) => {
            let mut views: Vec<ArrayViewD<f32>> = Vec::with_capacity(records.len());
            for (idx, record) in records.iter().enumerate() {
                match record {
                    AnnotationRecord::Tensor(t) if t.shape() == head.shape() => views.push(t.view()),
                    _ => return Err(mismatch(idx, record)),
                }
            }
            Ok(BatchField::Tensor(ndarray::stack(Axis(0), &views)?))
        }
        AnnotationRecord::Group(head) => {
            for (idx, record) in records.iter().enumerate() {
                let same = match record {
                    AnnotationRecord::Group(g) => {
                        g.len() == head.len()
                            && g.iter().all(|(name, t)| {
                                head.get(name).map(|h| h.shape() == t.shape()).unwrap_or(false)
                            })
                    }
                    _ => false,
                };
                if !same {
                    return Err(mismatch(idx, record));
                }
            }
            let mut out = BTreeMap::new();
            for name in head.keys() {
                let views: Vec<ArrayViewD<f32>> = records
                    .iter()
                    .filter_map(|r| r.member(name))
                    .map(|t| t.view())
                    .collect();
                out.insert(name.clone(), ndarray::stack(Axis(0), &views)?);
            }
            Ok(BatchField::Group(out))
        }
        AnnotationRecord::Scalars(head) => {
            for (idx, record) in records.iter().enumerate() {
                let same = match record {
                    AnnotationRecord::Scalars(s) => {
                        s.len() == head.len() && s.keys().all(|k| head.contains_key(k))
                    }
                    _ => false,
                };
                if !same {
                    return Err(mismatch(idx, record));
                }
            }
            let out = head
                .keys()
                .map(|name| {
                    let column: Array1<f64> = records
                        .iter()
                        .filter_map(|r| r.scalar(name))
                        .collect();
                    (name.clone(), column)
                })
                .collect();
            Ok(BatchField::Scalars(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn tensor(shape: &[usize], value: f32) -> AnnotationRecord {
        AnnotationRecord::Tensor(ArrayD::from_elem(IxDyn(shape), value))
    }

    #[test]
    fn tensors_stack_in_input_order() {
        let a = tensor(&[68, 2], 1.0);
        let b = tensor(&[68, 2], 2.0);
        let field = collate_records("landmarks", &[&a, &b]).unwrap();
        let stacked = field.as_tensor().unwrap();
        assert_eq!(stacked.shape(), &[2, 68, 2]);
        assert_eq!(stacked[[0, 0, 0]], 1.0);
        assert_eq!(stacked[[1, 67, 1]], 2.0);
    }

    #[test]
    fn differing_shapes_fail_the_field() {
        let a = tensor(&[68, 2], 1.0);
        let b = tensor(&[70, 2], 1.0);
        assert!(matches!(
            collate_records("landmarks", &[&a, &b]),
            Err(DataError::BatchShapeMismatch { .. })
        ));
    }

    #[test]
    fn groups_stack_per_member() {
        let group = |v: f32| {
            let mut g = BTreeMap::new();
            g.insert("exp".to_string(), ArrayD::from_elem(IxDyn(&[50]), v));
            g.insert("pose".to_string(), ArrayD::from_elem(IxDyn(&[6]), v));
            AnnotationRecord::Group(g)
        };
        let (a, b, c) = (group(0.0), group(1.0), group(2.0));
        let field = collate_records("expression", &[&a, &b, &c]).unwrap();
        assert_eq!(field.member("exp").unwrap().shape(), &[3, 50]);
        assert_eq!(field.member("pose").unwrap()[[2, 5]], 2.0);
    }

    #[test]
    fn group_member_sets_must_agree() {
        let mut g1 = BTreeMap::new();
        g1.insert("exp".to_string(), ArrayD::zeros(IxDyn(&[50])));
        let mut g2 = g1.clone();
        g2.insert("jaw".to_string(), ArrayD::zeros(IxDyn(&[3])));
        let (a, b) = (AnnotationRecord::Group(g1), AnnotationRecord::Group(g2));
        assert!(matches!(
            collate_records("expression", &[&a, &b]),
            Err(DataError::BatchShapeMismatch { .. })
        ));
    }

    #[test]
    fn scalars_become_vectors() {
        let scalars = |v: f64| {
            let mut s = BTreeMap::new();
            s.insert("ambient".to_string(), v);
            s.insert("key".to_string(), v * 2.0);
            AnnotationRecord::Scalars(s)
        };
        let (a, b) = (scalars(0.25), scalars(0.5));
        let field = collate_records("lighting", &[&a, &b]).unwrap();
        assert_eq!(field.scalars("key").unwrap().to_vec(), vec![0.5, 1.0]);
    }

    #[test]
    fn mixed_record_kinds_are_rejected() {
        let a = tensor(&[3], 0.0);
        let b = AnnotationRecord::Scalars(BTreeMap::new());
        assert!(matches!(
            collate_records("texture", &[&a, &b]),
            Err(DataError::BatchShapeMismatch { .. })
        ));
    }

    #[test]
    fn frame_sizes_must_agree() {
        let frames = vec![Array3::<u8>::zeros((3, 4, 4)), Array3::<u8>::zeros((3, 4, 5))];
        assert!(matches!(
            collate_frames(&frames),
            Err(DataError::BatchShapeMismatch { .. })
        ));
    }
}
