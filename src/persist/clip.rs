//! Frame-rate-stamped clip container.
//!
//! Layout (little endian):
//!
//! ```text
//! magic "TKCL" | fps f64 | width u32 | height u32 | count u32
//! count x ( len u32 | jpeg bytes )
//! ```

use image::RgbImage;

use crate::codec::FrameCodec;
use crate::error::{DataError, Result};

const CLIP_MAGIC: &[u8; 4] = b"TKCL";

#[derive(Clone, Debug, Default)]
pub struct VideoClip {
    pub fps: f64,
    pub frames: Vec<RgbImage>,
}

impl VideoClip {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            frames: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| f.dimensions())
    }

    pub(crate) fn encode(&self, codec: &FrameCodec) -> Result<Vec<u8>> {
        let (width, height) = self.dimensions().unwrap_or((0, 0));
        let count = u32::try_from(self.frames.len()).map_err(|_| corrupt("too many frames"))?;

        let mut out = Vec::new();
        out.extend_from_slice(CLIP_MAGIC);
        out.extend_from_slice(&self.fps.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        for (idx, frame) in self.frames.iter().enumerate() {
            if frame.dimensions() != (width, height) {
                return Err(corrupt(&format!(
                    "frame {} is {:?}, expected {:?}",
                    idx,
                    frame.dimensions(),
                    (width, height)
                )));
            }
            let bytes = codec.encode(frame)?;
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    pub(crate) fn decode(bytes: &[u8], codec: &FrameCodec) -> Result<Self> {
        let mut cursor = 0usize;
        if read_slice(bytes, &mut cursor, 4)? != CLIP_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let fps_bytes = read_slice(bytes, &mut cursor, 8)?;
        let mut fps_raw = [0u8; 8];
        fps_raw.copy_from_slice(fps_bytes);
        let fps = f64::from_le_bytes(fps_raw);
        let width = read_u32(bytes, &mut cursor)?;
        let height = read_u32(bytes, &mut cursor)?;
        let count = read_u32(bytes, &mut cursor)? as usize;
        // Every frame carries at least its 4-byte length.
        if count > (bytes.len() - cursor) / 4 {
            return Err(corrupt("frame count exceeds payload"));
        }

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u32(bytes, &mut cursor)? as usize;
            let frame = codec
                .decode_image(read_slice(bytes, &mut cursor, len)?)?
                .to_rgb8();
            if frame.dimensions() != (width, height) {
                return Err(corrupt("frame dimensions disagree with header"));
            }
            frames.push(frame);
        }
        if cursor != bytes.len() {
            return Err(corrupt("trailing bytes"));
        }
        Ok(Self { fps, frames })
    }
}

fn corrupt(detail: &str) -> DataError {
    DataError::CorruptArtifact {
        name: "video clip".to_string(),
        detail: detail.to_string(),
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| corrupt("truncated"))?;
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn header_carries_fps_and_dimensions() {
        let codec = FrameCodec::default();
        let mut clip = VideoClip::new(12.5);
        clip.frames.push(RgbImage::from_pixel(8, 4, Rgb([10, 20, 30])));
        clip.frames.push(RgbImage::from_pixel(8, 4, Rgb([30, 20, 10])));

        let bytes = clip.encode(&codec).unwrap();
        let decoded = VideoClip::decode(&bytes, &codec).unwrap();
        assert_eq!(decoded.fps, 12.5);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.dimensions(), Some((8, 4)));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let codec = FrameCodec::default();
        let mut clip = VideoClip::new(25.0);
        clip.frames.push(RgbImage::new(8, 8));
        clip.frames.push(RgbImage::new(4, 4));
        assert!(matches!(
            clip.encode(&codec),
            Err(DataError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn truncated_clip_is_corrupt() {
        let codec = FrameCodec::default();
        let mut clip = VideoClip::new(25.0);
        clip.frames.push(RgbImage::new(8, 8));
        let bytes = clip.encode(&codec).unwrap();
        assert!(matches!(
            VideoClip::decode(&bytes[..bytes.len() - 3], &codec),
            Err(DataError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn oversized_frame_count_is_corrupt() {
        let codec = FrameCodec::default();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CLIP_MAGIC);
        bytes.extend_from_slice(&25.0f64.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            VideoClip::decode(&bytes, &codec),
            Err(DataError::CorruptArtifact { .. })
        ));
    }
}
