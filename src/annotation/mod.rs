//! Per-frame annotation records.
//!
//! Upstream stages (landmark detection, expression regression, lighting and
//! pose fitting) write one whole-collection artifact per modality. Each
//! collection maps a frame key to one `AnnotationRecord`.

mod cache;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

pub use cache::AnnotationCache;

/// Mapping from frame key to record, as persisted for one modality.
pub type AnnotationCollection = BTreeMap<String, AnnotationRecord>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Landmarks,
    Expression,
    Lighting,
    SmoothedPose,
    Texture,
}

impl Modality {
    pub const COUNT: usize = 5;

    pub const ALL: [Modality; Self::COUNT] = [
        Modality::Landmarks,
        Modality::Expression,
        Modality::Lighting,
        Modality::SmoothedPose,
        Modality::Texture,
    ];

    /// Name used both for display and as the registry artifact name.
    pub fn name(self) -> &'static str {
        match self {
            Modality::Landmarks => "landmarks",
            Modality::Expression => "expression",
            Modality::Lighting => "lighting",
            Modality::SmoothedPose => "smoothed_pose",
            Modality::Texture => "texture",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Modality::Landmarks => "landmarks.bin",
            Modality::Expression => "expression.bin",
            Modality::Lighting => "lighting.json",
            Modality::SmoothedPose => "smoothed_results.json",
            Modality::Texture => "texture_fit.json",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Modality {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| DataError::UnknownModality(s.to_string()))
    }
}

/// Records stored once per run rather than once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlobalParam {
    Camera,
    Texture,
}

impl GlobalParam {
    pub const COUNT: usize = 2;

    pub const ALL: [GlobalParam; Self::COUNT] = [GlobalParam::Camera, GlobalParam::Texture];

    pub fn name(self) -> &'static str {
        match self {
            GlobalParam::Camera => "camera_params",
            GlobalParam::Texture => "texture_params",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            GlobalParam::Camera => "camera_params.bin",
            GlobalParam::Texture => "texture.bin",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// One annotation value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationRecord {
    /// A single dense tensor, e.g. `68 x 2` landmarks.
    Tensor(ArrayD<f32>),
    /// Named tensors, e.g. expression, pose and shape coefficients.
    Group(BTreeMap<String, ArrayD<f32>>),
    /// Named scalars, e.g. lighting estimates.
    Scalars(BTreeMap<String, f64>),
}

impl AnnotationRecord {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AnnotationRecord::Tensor(_) => "tensor",
            AnnotationRecord::Group(_) => "tensor group",
            AnnotationRecord::Scalars(_) => "scalar group",
        }
    }

    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            AnnotationRecord::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&ArrayD<f32>> {
        match self {
            AnnotationRecord::Group(g) => g.get(name),
            _ => None,
        }
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self {
            AnnotationRecord::Scalars(s) => s.get(name).copied(),
            _ => None,
        }
    }

    /// Compact shape signature used in mismatch messages.
    pub fn signature(&self) -> String {
        match self {
            AnnotationRecord::Tensor(t) => format!("tensor{:?}", t.shape()),
            AnnotationRecord::Group(g) => {
                let members: Vec<String> = g
                    .iter()
                    .map(|(name, t)| format!("{}{:?}", name, t.shape()))
                    .collect();
                format!("group{{{}}}", members.join(", "))
            }
            AnnotationRecord::Scalars(s) => {
                let names: Vec<&str> = s.keys().map(String::as_str).collect();
                format!("scalars{{{}}}", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn modality_names_parse_back() {
        for m in Modality::ALL {
            assert_eq!(m.name().parse::<Modality>().unwrap(), m);
        }
        assert!(matches!(
            "albedo".parse::<Modality>(),
            Err(DataError::UnknownModality(_))
        ));
    }

    #[test]
    fn signature_names_members() {
        let mut group = BTreeMap::new();
        group.insert("exp".to_string(), ArrayD::zeros(IxDyn(&[50])));
        group.insert("pose".to_string(), ArrayD::zeros(IxDyn(&[6])));
        let record = AnnotationRecord::Group(group);
        assert_eq!(record.signature(), "group{exp[50], pose[6]}");
        assert_eq!(record.member("pose").map(|t| t.len()), Some(6));
    }

    #[test]
    fn records_serialize_with_snake_case_tags() {
        let mut scalars = BTreeMap::new();
        scalars.insert("ambient".to_string(), 0.25);
        let json = serde_json::to_value(AnnotationRecord::Scalars(scalars)).unwrap();
        assert_eq!(json["scalars"]["ambient"], 0.25);
    }
}
