//! Binary frame codec.
//!
//! Frames are stored as baseline JPEG, RGB channel order, 8 bits per channel.
//! Decoded frames use channel-first (`C x H x W`) layout so they stack straight
//! into `N x C x H x W` batches.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, RgbImage};
use ndarray::Array3;

use crate::error::{DataError, Result};

pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Channel layout requested when decoding a stored frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelMode {
    #[default]
    Rgb,
    Gray,
}

impl ChannelMode {
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Rgb => 3,
            ChannelMode::Gray => 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    quality: u8,
}

impl FrameCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RgbImage) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder
            .encode(
                frame.as_raw(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )?;
        Ok(buf)
    }

    /// Decode stored bytes into an image without layout conversion.
    pub fn decode_image(&self, bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map_err(|e| DataError::DecodeFailure(format!("jpeg decode: {}", e)))
    }

    /// Decode stored bytes into a `C x H x W` array.
    pub fn decode(&self, bytes: &[u8], mode: ChannelMode) -> Result<Array3<u8>> {
        let image = self.decode_image(bytes)?;
        Ok(to_chw(&image, mode))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

pub fn to_chw(image: &DynamicImage, mode: ChannelMode) -> Array3<u8> {
    match mode {
        ChannelMode::Rgb => {
            let rgb = image.to_rgb8();
            let (w, h) = rgb.dimensions();
            Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
                rgb.get_pixel(x as u32, y as u32)[c]
            })
        }
        ChannelMode::Gray => {
            let luma = image.to_luma8();
            let (w, h) = luma.dimensions();
            Array3::from_shape_fn((1, h as usize, w as usize), |(_, y, x)| {
                luma.get_pixel(x as u32, y as u32)[0]
            })
        }
    }
}

/// Encode any image to bytes in the given container format.
pub(crate) fn encode_still(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, format)?,
        _ => image.write_to(&mut buf, format)?,
    }
    Ok(buf.into_inner())
}
