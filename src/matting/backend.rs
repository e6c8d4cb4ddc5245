use ndarray::{Array2, ArrayView4};

use crate::device::Device;
use crate::error::Result;

/// Per-pixel foreground estimator.
///
/// Input is one `1 x 3 x H x W` frame with channel values in `0..=255`;
/// output is an `H x W` alpha map in `0..=1`. Backends see the frame only for
/// the duration of the call.
pub trait MattingBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can run on `device`.
    fn supports(&self, device: Device) -> bool;

    fn alpha(&mut self, input: ArrayView4<'_, f32>) -> Result<Array2<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
