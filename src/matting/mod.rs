//! Alpha matting: replace background pixels with a fixed color.

mod backend;
pub mod backends;
mod registry;

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

use crate::error::{DataError, Result};

pub use backend::MattingBackend;
pub use backends::{KeyedBackend, StubBackend};
pub use registry::{BackendRegistry, SharedBackend};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MattingSettings {
    /// Pixels with alpha strictly below this are background.
    pub threshold: f32,
    pub background: [u8; 3],
}

impl Default for MattingSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            background: DEFAULT_BACKGROUND,
        }
    }
}

/// `1 x 3 x H x W` tensor with channel values in `0..=255`.
pub fn frame_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        f32::from(image.get_pixel(x as u32, y as u32)[c])
    })
}

pub fn matte_frame(
    backend: &mut dyn MattingBackend,
    image: &DynamicImage,
    settings: &MattingSettings,
) -> Result<DynamicImage> {
    let mut rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let alpha = backend.alpha(frame_tensor(&rgb).view())?;
    if alpha.dim() != (h as usize, w as usize) {
        return Err(DataError::Matting(format!(
            "{} returned a {:?} alpha map for a {}x{} frame",
            backend.name(),
            alpha.dim(),
            h,
            w
        )));
    }
    let background = Rgb(settings.background);
    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        if alpha[[y as usize, x as usize]] < settings.threshold {
            *pixel = background;
        }
    }
    Ok(DynamicImage::ImageRgb8(rgb))
}
