//! Frame keys.
//!
//! Keys are written as `f_<7-digit index>.jpg`. The fixed width keeps
//! lexicographic and numeric order aligned for new stores, but ordering is
//! always computed from the parsed index so legacy keys like `f_12.jpg` still
//! sort correctly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{DataError, Result};

/// Extension appended to every key written by this crate.
pub const FRAME_EXT: &str = ".jpg";

/// Zero-padding width of the numeric index.
pub const INDEX_WIDTH: usize = 7;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    index: u64,
    raw: String,
}

impl FrameKey {
    /// Canonical key for the frame at `index`.
    pub fn new(index: u64) -> Self {
        Self {
            index,
            raw: format!("f_{:0width$}{}", index, FRAME_EXT, width = INDEX_WIDTH),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        static FRAME_KEY_RE: OnceLock<Regex> = OnceLock::new();
        let re = FRAME_KEY_RE.get_or_init(|| {
            Regex::new(r"^f_(\d+)(\.[A-Za-z0-9]+)?$").expect("frame key pattern compiles")
        });

        let caps = re
            .captures(raw)
            .ok_or_else(|| DataError::InvalidFrameKey(raw.to_string()))?;
        let index = caps[1]
            .parse::<u64>()
            .map_err(|_| DataError::InvalidFrameKey(raw.to_string()))?;
        Ok(Self {
            index,
            raw: raw.to_string(),
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

impl Ord for FrameKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for FrameKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for FrameKey {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for FrameKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Sort raw keys by their numeric frame index.
pub fn sort_keys<I, S>(keys: I) -> Result<Vec<FrameKey>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = keys
        .into_iter()
        .map(|k| FrameKey::parse(k.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    parsed.sort();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_zero_padded() {
        assert_eq!(FrameKey::new(42).as_str(), "f_0000042.jpg");
        assert_eq!(FrameKey::new(0).as_str(), "f_0000000.jpg");
    }

    #[test]
    fn parse_round_trips_canonical_keys() {
        let key = FrameKey::parse("f_0001234.jpg").unwrap();
        assert_eq!(key.index(), 1234);
        assert_eq!(key, FrameKey::new(1234));
    }

    #[test]
    fn legacy_keys_sort_numerically() {
        let sorted = sort_keys(["f_10.jpg", "f_2.jpg", "f_0000001.jpg"]).unwrap();
        let names: Vec<_> = sorted.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["f_0000001.jpg", "f_2.jpg", "f_10.jpg"]);
    }

    #[test]
    fn rejects_foreign_keys() {
        assert!(matches!(
            FrameKey::parse("frame_001.jpg"),
            Err(DataError::InvalidFrameKey(_))
        ));
        assert!(FrameKey::parse("f_.jpg").is_err());
    }

    #[test]
    fn keys_without_extension_are_accepted() {
        let key = FrameKey::parse("f_0000010").unwrap();
        assert_eq!(key.index(), 10);
        assert_eq!(key.as_str(), "f_0000010");
    }
}
