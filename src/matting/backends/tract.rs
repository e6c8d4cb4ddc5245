#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use ndarray::{Array2, ArrayView4};
use tract_onnx::prelude::*;

use crate::device::Device;
use crate::error::{DataError, Result};
use crate::matting::backend::MattingBackend;

/// ONNX matting model run on the CPU through tract.
///
/// The model takes a `1 x 3 x H x W` frame in `0..=255` and produces a single
/// channel alpha map of the same spatial size. The input size is fixed when
/// the plan is built.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: usize,
    height: usize,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> AnyResult<Self> {
        let model_path = model_path.as_ref();
        let (width, height) = (width as usize, height as usize);
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, height, width)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "loaded matting model {} for {}x{} frames",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }
}

impl MattingBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, device: Device) -> bool {
        device.is_cpu()
    }

    fn alpha(&mut self, input: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = input.dim();
        if (n, c, h, w) != (1, 3, self.height, self.width) {
            return Err(DataError::Matting(format!(
                "frame {}x{}x{}x{} does not match model input 1x3x{}x{}",
                n, c, h, w, self.height, self.width
            )));
        }
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(&[1, 3, h, w], &data)
            .map_err(|e| DataError::Matting(format!("{:#}", e)))?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| DataError::Matting(format!("ONNX inference failed: {:#}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| DataError::Matting("model produced no outputs".to_string()))?;
        let alpha = output
            .as_slice::<f32>()
            .map_err(|e| DataError::Matting(format!("alpha tensor was not f32: {:#}", e)))?;
        if alpha.len() != h * w {
            return Err(DataError::Matting(format!(
                "alpha has {} values, expected {}",
                alpha.len(),
                h * w
            )));
        }
        Ok(Array2::from_shape_vec((h, w), alpha.to_vec())?)
    }
}
