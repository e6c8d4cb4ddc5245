use image::DynamicImage;

use crate::error::Result;

/// Stream properties known before decoding starts.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Frame count when the container declares one.
    pub frame_count: Option<u64>,
    pub duration_s: Option<f64>,
}

/// A decoder yielding frames in presentation order.
pub trait VideoSource {
    fn metadata(&self) -> &VideoMetadata;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}
