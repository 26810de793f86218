//! Graph layers.
//!
//! A layer is built once with a fixed configuration and then invoked many
//! times. Each call either consumes a host tensor or a texture-resident one;
//! the layer keeps its result on the device when another layer will consume
//! it, and downloads it otherwise.

pub mod pixel_shuffle;
pub mod prelu;

pub use pixel_shuffle::{DataFormat, Direction, PixelShuffle, PixelShuffleConfig, Size};
pub use prelu::PRelu;

use std::sync::Arc;

use crate::error::{Error, GpuFailure, Result};
use crate::ops::texture::{Input, Resident, TextureDevice};
use crate::tensors::Tensor;

/// Common contract of every layer.
pub trait Layer<D: TextureDevice> {
    /// Layer class name, as used in model descriptions.
    fn class_name(&self) -> &'static str;

    /// The device this layer executes on, if any.
    fn device(&self) -> Option<&Arc<D>>;

    /// Runs the layer. When `download` is set the result is returned
    /// host-resident; otherwise it stays wherever the layer produced it.
    fn forward(&mut self, x: Input<'_, D::Texture>, download: bool) -> Result<Resident<D::Texture>>;

    /// Whether another layer consumes this layer's output.
    fn has_consumers(&self) -> bool;

    fn set_has_consumers(&mut self, has_consumers: bool);

    /// Loads the weight called `name`.
    fn set_weight(&mut self, name: &str, _value: Tensor<f32>) -> Result<()> {
        Err(Error::UnknownWeight { layer: self.class_name(), name: name.to_owned() })
    }

    /// Graph entry point: keeps device results resident when the output
    /// feeds another layer.
    fn call(&mut self, x: &Resident<D::Texture>) -> Result<Resident<D::Texture>> {
        let download = !self.has_consumers();
        self.forward(x.as_input(), download)
    }

    /// Host in, host out.
    fn apply(&mut self, x: &Tensor<f32>) -> Result<Tensor<f32>> {
        match self.forward(Input::Host(x), true)? {
            Resident::Host(out) => Ok(out),
            Resident::Device(out) => match self.device() {
                Some(device) => out.to_host(device.as_ref()),
                None => Err(GpuFailure::Unavailable.into()),
            },
        }
    }
}

/// Brings a layer input to host memory.
pub(crate) fn host_input<'a, D: TextureDevice>(
    x: Input<'a, D::Texture>,
    device: Option<&Arc<D>>,
) -> Result<std::borrow::Cow<'a, Tensor<f32>>> {
    use std::borrow::Cow;
    match (x, device) {
        (Input::Host(t), _) => Ok(Cow::Borrowed(t)),
        (Input::Device(t), Some(device)) => Ok(Cow::Owned(t.to_host(device.as_ref())?)),
        (Input::Device(_), None) => Err(GpuFailure::Unavailable.into()),
    }
}
