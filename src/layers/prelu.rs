//! Parametric ReLU: `max(x, 0) + alpha * min(x, 0)`.
//!
//! `alpha` is a learned weight whose shape only has to be broadcastable to
//! the input. Axes are compared position by position: every axis where
//! `alpha` differs from the input must have extent 1 and is repeated to
//! match. Axes missing from a lower-rank `alpha` count as extent 1, so
//! `alpha` lines up with the leading axes of the input. The repeated weight
//! is cached per input shape, on the host and, for device layers, as a
//! texture.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::layers::{Layer, host_input};
use crate::layout::coords;
use crate::ops::DefaultDevice;
use crate::ops::cpu;
use crate::ops::dispatch::{self, ExecutionPath};
use crate::ops::texture::{DeviceTensor, Input, Resident, Texels, TextureDevice};
use crate::tensors::{Shape, Tensor};

/// Repeats `alpha` until it has the shape of `input`.
///
/// # Returns
/// - the tiled weight, of shape `input`
/// - [`Error::Untileable`] if some axis differs and is not 1 in `alpha`
pub fn broadcast_alpha(alpha: &Tensor<f32>, input: &Shape) -> Result<Tensor<f32>> {
    let untileable = || Error::Untileable {
        weight: alpha.shape().dims().to_vec(),
        input: input.dims().to_vec(),
    };
    let rank = input.rank();
    if alpha.shape().rank() > rank {
        return Err(untileable());
    }

    let mut padded = alpha.shape().dims().to_vec();
    padded.resize(rank, 1);
    let mut reps = Vec::with_capacity(rank);
    for (&a, &x) in padded.iter().zip(input.dims()) {
        reps.push(match (a, x) {
            _ if a == x => 1,
            (1, x) => x,
            _ => return Err(untileable()),
        });
    }
    alpha.clone().reshape(padded)?.tile(&reps)
}

struct TiledAlpha<T> {
    input: Shape,
    host: Tensor<f32>,
    texture: Option<T>,
}

/// PReLU layer.
///
/// # Example
/// ```rust
/// use subpixel::layers::{Layer, PRelu};
/// use subpixel::tensors::Tensor;
///
/// let mut layer = PRelu::new();
/// layer.set_weight("alpha", Tensor::new(vec![2], vec![0.5, 0.1])).unwrap();
/// let y = layer.apply(&Tensor::new(vec![2, 2], vec![-2.0, -10.0, 3.0, 4.0])).unwrap();
/// assert_eq!(y.data(), &[-1.0, -5.0, 3.0, 4.0]);
/// ```
pub struct PRelu<D: TextureDevice = DefaultDevice> {
    path: ExecutionPath<D>,
    alpha: Option<Tensor<f32>>,
    tiled: Option<TiledAlpha<D::Texture>>,
    has_consumers: bool,
}

impl PRelu<DefaultDevice> {
    /// A host-executed layer.
    pub fn new() -> Self {
        Self::with_path(ExecutionPath::Cpu)
    }

    /// A layer on whatever the global backend selects.
    pub fn from_backend() -> Self {
        Self::with_path(dispatch::default_path())
    }
}

impl Default for PRelu<DefaultDevice> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: TextureDevice> PRelu<D> {
    pub fn with_device(device: Arc<D>) -> Self {
        Self::with_path(ExecutionPath::Device(device))
    }

    pub fn with_path(path: ExecutionPath<D>) -> Self {
        Self { path, alpha: None, tiled: None, has_consumers: false }
    }

    pub fn alpha(&self) -> Option<&Tensor<f32>> {
        self.alpha.as_ref()
    }
}

/// Returns the cached tiled weight for `input`, rebuilding it on a shape change.
fn tiled_for<'a, T>(
    cache: &'a mut Option<TiledAlpha<T>>,
    alpha: Option<&Tensor<f32>>,
    input: &Shape,
) -> Result<&'a mut TiledAlpha<T>> {
    let alpha = alpha.ok_or(Error::MissingWeight("alpha"))?;
    let tiled = match cache.take() {
        Some(tiled) if tiled.input == *input => tiled,
        _ => {
            tracing::debug!(alpha = %alpha.shape(), input = %input, "tiling alpha");
            TiledAlpha { input: input.clone(), host: broadcast_alpha(alpha, input)?, texture: None }
        }
    };
    Ok(cache.insert(tiled))
}

impl<D: TextureDevice> Layer<D> for PRelu<D> {
    fn class_name(&self) -> &'static str {
        "PReLU"
    }

    fn device(&self) -> Option<&Arc<D>> {
        self.path.device()
    }

    fn forward(&mut self, x: Input<'_, D::Texture>, download: bool) -> Result<Resident<D::Texture>> {
        let shape = match x {
            Input::Host(t) => t.shape(),
            Input::Device(t) => t.shape(),
        };
        coords::check_rank(shape.rank())?;
        let tiled = tiled_for(&mut self.tiled, self.alpha.as_ref(), shape)?;

        let ExecutionPath::Device(device) = &self.path else {
            let host = host_input::<D>(x, None)?;
            return Ok(Resident::Host(cpu::prelu(&host, &tiled.host)?));
        };

        let uploaded;
        let input = match x {
            Input::Device(t) => t,
            Input::Host(t) => {
                uploaded = DeviceTensor::upload(device.as_ref(), t)?;
                &uploaded
            }
        };
        let layout = input.layout();
        let alpha = match &mut tiled.texture {
            Some(texture) => texture,
            slot => slot.insert(device.upload(layout, Texels::Float(tiled.host.data()))?),
        };

        let mut output = device.allocate(layout)?;
        device.prelu(input.texture(), alpha, &mut output)?;
        let out = DeviceTensor::new(output, shape.clone())?;
        if download {
            Ok(Resident::Host(out.to_host(device.as_ref())?))
        } else {
            Ok(Resident::Device(out))
        }
    }

    fn has_consumers(&self) -> bool {
        self.has_consumers
    }

    fn set_has_consumers(&mut self, has_consumers: bool) {
        self.has_consumers = has_consumers;
    }

    fn set_weight(&mut self, name: &str, value: Tensor<f32>) -> Result<()> {
        if name != "alpha" {
            return Err(Error::UnknownWeight { layer: self.class_name(), name: name.to_owned() });
        }
        self.alpha = Some(value);
        self.tiled = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::texture::HostDevice;

    #[test]
    fn alpha_is_tiled_along_unit_axes() {
        let alpha = Tensor::new(vec![1, 4], vec![0.1, 0.2, 0.3, 0.4]);
        let tiled = broadcast_alpha(&alpha, &Shape::new([3, 4]).unwrap()).unwrap();
        assert_eq!(tiled.shape().dims(), &[3, 4]);
        assert_eq!(&tiled.data()[8..], &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn lower_rank_alpha_is_compared_axis_by_axis() {
        let alpha = Tensor::new(vec![2], vec![1.0, 2.0]);
        let tiled = broadcast_alpha(&alpha, &Shape::new([2, 3, 2]).unwrap()).unwrap();
        assert_eq!(tiled.data(), &[[1.0; 6], [2.0; 6]].concat());

        let alpha = Tensor::new(vec![3], vec![0.1, 0.2, 0.3]);
        let tiled = broadcast_alpha(&alpha, &Shape::new([3, 4]).unwrap()).unwrap();
        assert_eq!(tiled.shape().dims(), &[3, 4]);
        assert_eq!(&tiled.data()[4..8], &[0.2; 4]);

        // A trailing-aligned alpha does not match the leading axis.
        let alpha = Tensor::new(vec![4], vec![0.0; 4]);
        assert!(broadcast_alpha(&alpha, &Shape::new([3, 4]).unwrap()).is_err());
    }

    #[test]
    fn unsupported_input_rank_is_rejected() {
        let device = Arc::new(HostDevice::new());
        let mut layer = PRelu::with_device(Arc::clone(&device));
        layer.set_weight("alpha", Tensor::new(vec![1], vec![0.5])).unwrap();
        for dims in [vec![2], vec![1, 1, 1, 1, 1, 2]] {
            let x = Tensor::new(dims, vec![-1.0, 1.0]);
            assert!(matches!(layer.apply(&x), Err(Error::InvalidRank { .. })));
        }
        assert_eq!(device.uploads(), 0);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn mismatched_alpha_is_rejected() {
        let alpha = Tensor::new(vec![2, 4], vec![0.0; 8]);
        let err = broadcast_alpha(&alpha, &Shape::new([3, 4]).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Untileable { .. }));
    }

    #[test]
    fn call_before_alpha_is_loaded_fails() {
        let mut layer = PRelu::from_backend();
        let err = layer.apply(&Tensor::new(vec![1, 1], vec![1.0])).unwrap_err();
        assert!(matches!(err, Error::MissingWeight("alpha")));
        assert!(matches!(
            layer.set_weight("beta", Tensor::new(vec![1], vec![0.0])),
            Err(Error::UnknownWeight { .. })
        ));
    }

    #[test]
    fn device_layer_uploads_alpha_once_per_shape() {
        let device = Arc::new(HostDevice::new());
        let mut layer = PRelu::with_device(Arc::clone(&device));
        layer.set_weight("alpha", Tensor::new(vec![1, 2], vec![0.5, 0.25])).unwrap();
        let x = Tensor::new(vec![2, 2], vec![-4.0, -4.0, 1.0, -8.0]);

        let first = layer.apply(&x).unwrap();
        assert_eq!(first.data(), &[-2.0, -1.0, 1.0, -2.0]);
        let uploads = device.uploads();
        layer.apply(&x).unwrap();
        // Only the input is uploaded again.
        assert_eq!(device.uploads(), uploads + 1);
    }
}
