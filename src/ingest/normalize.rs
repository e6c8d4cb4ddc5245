//! Spatial normalization of decoded frames.
//!
//! Frames are resized so the shorter side equals the target, then
//! center-cropped to a square. Both steps run on `f32` RGB; the result is
//! quantized back to 8 bits once at the end.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb32FImage, RgbImage};

use crate::error::{DataError, Result};

/// Resize so that `min(width, height) == target`, keeping aspect ratio.
///
/// The long side is `long * target / short`, truncated.
pub fn resize_shorter_side(image: &Rgb32FImage, target: u32) -> Result<Rgb32FImage> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(DataError::DecodeFailure(format!(
            "cannot resize a {}x{} frame",
            w, h
        )));
    }
    let (new_w, new_h) = if h <= w {
        (scale(w, target, h), target)
    } else {
        (target, scale(h, target, w))
    };
    if (new_w, new_h) == (w, h) {
        return Ok(image.clone());
    }
    Ok(imageops::resize(image, new_w, new_h, FilterType::Triangle))
}

fn scale(long: u32, target: u32, short: u32) -> u32 {
    (u64::from(long) * u64::from(target) / u64::from(short)) as u32
}

/// Crop a `size x size` square from the center.
///
/// Offsets are `(dim - size) / 2`, rounded half to even.
pub fn center_crop(image: &Rgb32FImage, size: u32) -> Result<Rgb32FImage> {
    let (w, h) = image.dimensions();
    if w < size || h < size {
        return Err(DataError::DecodeFailure(format!(
            "cannot crop {}x{} out of a {}x{} frame",
            size, size, w, h
        )));
    }
    let left = (f64::from(w - size) / 2.0).round_ties_even() as u32;
    let top = (f64::from(h - size) / 2.0).round_ties_even() as u32;
    Ok(imageops::crop_imm(image, left, top, size, size).to_image())
}

fn quantize(image: &Rgb32FImage) -> RgbImage {
    let (w, h) = image.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let p = image.get_pixel(x, y);
        image::Rgb(p.0.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
    })
}

/// Resize, crop and fix bit depth: any frame in, `target x target` RGB8 out.
pub fn normalize_frame(image: &DynamicImage, target: u32) -> Result<RgbImage> {
    let float = image.to_rgb32f();
    let resized = resize_shorter_side(&float, target)?;
    let cropped = center_crop(&resized, target)?;
    Ok(quantize(&cropped))
}
