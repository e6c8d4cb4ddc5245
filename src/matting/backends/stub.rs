use ndarray::{Array2, ArrayView4, Axis};

use crate::device::Device;
use crate::error::{DataError, Result};
use crate::matting::backend::MattingBackend;

/// Keeps every pixel: alpha is 1 everywhere.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MattingBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, device: Device) -> bool {
        device.is_cpu()
    }

    fn alpha(&mut self, input: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(Array2::ones((h, w)))
    }
}

/// Chroma-key matting: pixels exactly equal to `key` are background.
pub struct KeyedBackend {
    key: [f32; 3],
}

impl KeyedBackend {
    pub fn new(key: [u8; 3]) -> Self {
        Self {
            key: key.map(f32::from),
        }
    }
}

impl MattingBackend for KeyedBackend {
    fn name(&self) -> &'static str {
        "keyed"
    }

    fn supports(&self, device: Device) -> bool {
        device.is_cpu()
    }

    fn alpha(&mut self, input: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = input.dim();
        if n != 1 || c != 3 {
            return Err(DataError::Matting(format!(
                "expected a 1x3xHxW frame, got {}x{}x{}x{}",
                n, c, h, w
            )));
        }
        let frame = input.index_axis(Axis(0), 0);
        Ok(Array2::from_shape_fn((h, w), |(y, x)| {
            let is_key = (0..3).all(|ch| frame[[ch, y, x]] == self.key[ch]);
            if is_key {
                0.0
            } else {
                1.0
            }
        }))
    }
}
