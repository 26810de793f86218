//! Sub-pixel rearrangement.
//!
//! `PixelShuffle` trades channel depth for spatial resolution: with block
//! size `(rh, rw)` an `(H, W, C)` input becomes `(H * rh, W * rw, C / (rh * rw))`.
//! The inverse direction folds `rh x rw` spatial blocks back into channels.
//!
//! Every variant is one reshape, one axis permutation and one reshape. The
//! data format and direction are resolved into a fixed permutation when the
//! layer is built; only the extents depend on the input.
//!
//! When `C` is not a multiple of `rh * rw` only the first
//! `rh * rw * (C / (rh * rw))` channels of each pixel are used.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::layers::{Layer, host_input};
use crate::layout::{LayoutPlan, Permutation, Phase, StridedView};
use crate::ops::DefaultDevice;
use crate::ops::cpu;
use crate::ops::dispatch::{self, ExecutionPath};
use crate::ops::gather::GpuLayoutExecutor;
use crate::ops::texture::{DeviceTensor, Input, Resident, TextureDevice};
use crate::tensors::Shape;

/// Axis order of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    /// `(C, H, W)`
    ChannelsFirst,
    /// `(H, W, C)`
    #[default]
    ChannelsLast,
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataFormat::ChannelsFirst => "channels_first",
            DataFormat::ChannelsLast => "channels_last",
        })
    }
}

impl FromStr for DataFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "channels_first" => Ok(DataFormat::ChannelsFirst),
            "channels_last" => Ok(DataFormat::ChannelsLast),
            other => Err(Error::UnknownDataFormat(other.to_owned())),
        }
    }
}

/// Whether channels are spread over space or gathered back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Shuffle,
    Unshuffle,
}

/// Block size `(rows, cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub rows: usize,
    pub cols: usize,
}

impl Default for Size {
    fn default() -> Self {
        Self { rows: 2, cols: 2 }
    }
}

impl From<usize> for Size {
    fn from(factor: usize) -> Self {
        Self { rows: factor, cols: factor }
    }
}

impl From<(usize, usize)> for Size {
    fn from((rows, cols): (usize, usize)) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Construction-time settings of a [`PixelShuffle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelShuffleConfig {
    pub size: Size,
    pub data_format: DataFormat,
    pub direction: Direction,
}

impl PixelShuffleConfig {
    pub fn new(size: impl Into<Size>) -> Self {
        Self { size: size.into(), ..Self::default() }
    }

    pub fn data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    /// The inverse rearrangement with the same block size.
    pub fn inverse(mut self) -> Self {
        self.direction = match self.direction {
            Direction::Shuffle => Direction::Unshuffle,
            Direction::Unshuffle => Direction::Shuffle,
        };
        self
    }
}

impl fmt::Display for PixelShuffleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "size {} data format {}", self.size, self.data_format)?;
        if self.direction == Direction::Unshuffle {
            f.write_str(" inverse")?;
        }
        Ok(())
    }
}

/// Permutation and extent rules fixed by the configuration.
#[derive(Debug, Clone)]
struct Template {
    config: PixelShuffleConfig,
    permutation: Permutation,
}

impl Template {
    fn new(config: PixelShuffleConfig) -> Result<Self> {
        let Size { rows, cols } = config.size;
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidFactor { rows, cols });
        }
        let axes: [usize; 5] = match (config.direction, config.data_format) {
            (_, DataFormat::ChannelsLast) => [0, 2, 1, 3, 4],
            (Direction::Shuffle, DataFormat::ChannelsFirst) => [2, 3, 0, 4, 1],
            (Direction::Unshuffle, DataFormat::ChannelsFirst) => [2, 4, 0, 1, 3],
        };
        Ok(Self { config, permutation: Permutation::new(axes)? })
    }

    /// Validates `input` and derives its plan. Rank 3 is one sample, rank 4
    /// carries a leading batch axis.
    fn plan(&self, input: &Shape) -> Result<LayoutPlan> {
        let batched = match input.rank() {
            3 => false,
            4 => true,
            rank => return Err(Error::InvalidRank { rank, min: 3, max: 4 }),
        };
        let sample = &input.dims()[usize::from(batched)..];
        let (view, output) = match self.config.direction {
            Direction::Shuffle => self.shuffle(sample)?,
            Direction::Unshuffle => self.unshuffle(sample)?,
        };
        LayoutPlan::new(input.clone(), batched, view, self.permutation.clone(), output)
    }

    fn shuffle(&self, sample: &[usize]) -> Result<(StridedView, Vec<usize>)> {
        let Size { rows: rh, cols: rw } = self.config.size;
        let len: usize = sample.iter().product();
        let (h, w, c) = match self.config.data_format {
            DataFormat::ChannelsLast => (sample[0], sample[1], sample[2]),
            DataFormat::ChannelsFirst => (sample[1], sample[2], sample[0]),
        };
        let oc = c / (rh * rw);
        if oc == 0 {
            return Err(Error::TooFewChannels { channels: c, rows: rh, cols: rw });
        }

        match self.config.data_format {
            DataFormat::ChannelsLast => {
                let view = StridedView::new(
                    vec![h, w, rh, rw, oc],
                    vec![w * c, c, rw * oc, oc, 1],
                    len,
                )?;
                Ok((view, vec![h * rh, w * rw, oc]))
            }
            DataFormat::ChannelsFirst => {
                let plane = h * w;
                let view = StridedView::new(
                    vec![rh, rw, oc, h, w],
                    vec![rw * oc * plane, oc * plane, plane, w, 1],
                    len,
                )?;
                Ok((view, vec![oc, h * rh, w * rw]))
            }
        }
    }

    fn unshuffle(&self, sample: &[usize]) -> Result<(StridedView, Vec<usize>)> {
        let Size { rows: rh, cols: rw } = self.config.size;
        let (h_axis, w_axis) = match self.config.data_format {
            DataFormat::ChannelsLast => (0, 1),
            DataFormat::ChannelsFirst => (1, 2),
        };
        for (axis, factor) in [(h_axis, rh), (w_axis, rw)] {
            if sample[axis] % factor != 0 {
                return Err(Error::Indivisible { axis, extent: sample[axis], factor });
            }
        }
        let (h, w) = (sample[h_axis] / rh, sample[w_axis] / rw);

        Ok(match self.config.data_format {
            DataFormat::ChannelsLast => {
                let c = sample[2];
                (StridedView::contiguous(&[h, rh, w, rw, c]), vec![h, w, rh * rw * c])
            }
            DataFormat::ChannelsFirst => {
                let c = sample[0];
                (StridedView::contiguous(&[c, h, rh, w, rw]), vec![rh * rw * c, h, w])
            }
        })
    }
}

/// Pixel-shuffle layer.
///
/// Runs on the host or on a [`TextureDevice`], chosen when the layer is
/// built. On a device the three stages are separate gather passes whose
/// index maps and intermediate textures are kept for as long as the input
/// shape does not change.
///
/// # Example
/// ```rust
/// use subpixel::layers::{Layer, PixelShuffle, PixelShuffleConfig};
/// use subpixel::tensors::Tensor;
///
/// let mut layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
/// let x = Tensor::new(vec![2, 2, 8], (0..32).map(|v| v as f32).collect());
/// let y = layer.apply(&x).unwrap();
/// assert_eq!(y.shape().dims(), &[4, 4, 2]);
/// ```
pub struct PixelShuffle<D: TextureDevice = DefaultDevice> {
    template: Template,
    plan: Option<LayoutPlan>,
    executor: Option<GpuLayoutExecutor<D>>,
    has_consumers: bool,
}

impl PixelShuffle<DefaultDevice> {
    /// A host-executed layer.
    pub fn new(config: PixelShuffleConfig) -> Result<Self> {
        Self::with_path(config, ExecutionPath::Cpu)
    }

    /// A layer on whatever the global backend selects.
    pub fn from_backend(config: PixelShuffleConfig) -> Result<Self> {
        Self::with_path(config, dispatch::default_path())
    }
}

impl<D: TextureDevice> PixelShuffle<D> {
    /// A layer executing on `device`.
    pub fn with_device(config: PixelShuffleConfig, device: Arc<D>) -> Result<Self> {
        Self::with_path(config, ExecutionPath::Device(device))
    }

    pub fn with_path(config: PixelShuffleConfig, path: ExecutionPath<D>) -> Result<Self> {
        let template = Template::new(config)?;
        let executor = match path {
            ExecutionPath::Cpu => None,
            ExecutionPath::Device(device) => Some(GpuLayoutExecutor::new(device)),
        };
        Ok(Self { template, plan: None, executor, has_consumers: false })
    }

    pub fn config(&self) -> &PixelShuffleConfig {
        &self.template.config
    }

    /// Human-readable summary, e.g. `size 2x2 data format channels_last`.
    pub fn description(&self) -> String {
        self.template.config.to_string()
    }

    /// The layout plan this layer runs for `input`.
    pub fn plan(&self, input: &Shape) -> Result<LayoutPlan> {
        self.template.plan(input)
    }

    /// Output shape for `input`, validating it on the way.
    pub fn output_shape(&self, input: &Shape) -> Result<Shape> {
        Ok(self.template.plan(input)?.output().clone())
    }

    /// The device executor, when the layer runs on a device.
    pub fn executor(&self) -> Option<&GpuLayoutExecutor<D>> {
        self.executor.as_ref()
    }

    /// Index maps built by this layer so far; always zero on the host.
    pub fn map_builds(&self) -> usize {
        self.executor.as_ref().map_or(0, GpuLayoutExecutor::map_builds)
    }
}

/// Returns the plan for `input`, rebuilding it only when the shape changed.
fn plan_for<'a>(
    cached: &'a mut Option<LayoutPlan>,
    template: &Template,
    input: &Shape,
) -> Result<&'a LayoutPlan> {
    let plan = match cached.take() {
        Some(plan) if plan.input() == input => plan,
        _ => template.plan(input)?,
    };
    Ok(cached.insert(plan))
}

impl<D: TextureDevice> Layer<D> for PixelShuffle<D> {
    fn class_name(&self) -> &'static str {
        "PixelShuffle"
    }

    fn device(&self) -> Option<&Arc<D>> {
        self.executor.as_ref().map(GpuLayoutExecutor::device)
    }

    fn forward(&mut self, x: Input<'_, D::Texture>, download: bool) -> Result<Resident<D::Texture>> {
        let shape = match x {
            Input::Host(t) => t.shape(),
            Input::Device(t) => t.shape(),
        };
        let plan = plan_for(&mut self.plan, &self.template, shape)?;
        tracing::trace!(phase = ?Phase::ShapeValidated, input = %shape, output = %plan.output());

        let Some(executor) = self.executor.as_mut() else {
            let host = host_input::<D>(x, None)?;
            let out = cpu::execute_plan(plan, &host)?;
            tracing::trace!(phase = ?Phase::Done);
            return Ok(Resident::Host(out));
        };

        let device = Arc::clone(executor.device());
        let uploaded;
        let input = match x {
            Input::Device(t) => t,
            Input::Host(t) => {
                uploaded = DeviceTensor::upload(device.as_ref(), t)?;
                &uploaded
            }
        };
        let out = executor.execute(plan, input)?;

        let result = if download {
            tracing::trace!(phase = ?Phase::DeviceTransfer);
            Resident::Host(out.to_host(device.as_ref())?)
        } else {
            Resident::Device(out)
        };
        tracing::trace!(phase = ?Phase::Done);
        Ok(result)
    }

    fn has_consumers(&self) -> bool {
        self.has_consumers
    }

    fn set_has_consumers(&mut self, has_consumers: bool) {
        self.has_consumers = has_consumers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::texture::HostDevice;
    use crate::tensors::Tensor;

    fn iota(dims: &[usize]) -> Tensor<f32> {
        let len = dims.iter().product::<usize>();
        Tensor::new(dims.to_vec(), (0..len).map(|v| v as f32).collect())
    }

    #[test]
    fn config_defaults_and_description() {
        let config = PixelShuffleConfig::default();
        assert_eq!(config.size, Size { rows: 2, cols: 2 });
        assert_eq!(config.data_format, DataFormat::ChannelsLast);
        assert_eq!(config.to_string(), "size 2x2 data format channels_last");
        assert_eq!(
            PixelShuffleConfig::new((3, 2)).data_format(DataFormat::ChannelsFirst).to_string(),
            "size 3x2 data format channels_first"
        );
        assert_eq!("channels_first".parse::<DataFormat>().unwrap(), DataFormat::ChannelsFirst);
        assert!("nhwc".parse::<DataFormat>().is_err());
    }

    #[test]
    fn zero_factor_is_rejected_at_construction() {
        assert!(matches!(
            PixelShuffle::new(PixelShuffleConfig::new((0, 2))),
            Err(Error::InvalidFactor { rows: 0, cols: 2 })
        ));
    }

    #[test]
    fn truncates_trailing_channels() {
        let layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
        let out = layer.output_shape(&Shape::new([4, 4, 10]).unwrap()).unwrap();
        assert_eq!(out.dims(), &[8, 8, 2]);
    }

    #[test]
    fn too_few_channels_fail_validation() {
        let mut layer = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
        let err = layer.apply(&iota(&[2, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::TooFewChannels { channels: 3, .. }));
    }

    #[test]
    fn unshuffle_requires_divisible_extents() {
        let layer = PixelShuffle::new(PixelShuffleConfig::new(2).inverse()).unwrap();
        let err = layer.output_shape(&Shape::new([4, 5, 1]).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Indivisible { axis: 1, extent: 5, factor: 2 }));
    }

    #[test]
    fn channels_first_matches_channels_last_after_transpose() {
        // (C, H, W) input equal to the (H, W, C) input with its axes moved.
        let last = iota(&[2, 3, 8]);
        let mut first = vec![0.0; last.len()];
        for h in 0..2 {
            for w in 0..3 {
                for c in 0..8 {
                    first[(c * 2 + h) * 3 + w] = last.data()[(h * 3 + w) * 8 + c];
                }
            }
        }
        let first = Tensor::new(vec![8, 2, 3], first);

        let mut cl = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
        let mut cf = PixelShuffle::new(
            PixelShuffleConfig::new(2).data_format(DataFormat::ChannelsFirst),
        )
        .unwrap();
        let out_last = cl.apply(&last).unwrap();
        let out_first = cf.apply(&first).unwrap();
        assert_eq!(out_last.shape().dims(), &[4, 6, 2]);
        assert_eq!(out_first.shape().dims(), &[2, 4, 6]);
        for y in 0..4 {
            for x in 0..6 {
                for c in 0..2 {
                    assert_eq!(
                        out_last.data()[(y * 6 + x) * 2 + c],
                        out_first.data()[(c * 4 + y) * 6 + x]
                    );
                }
            }
        }
    }

    #[test]
    fn device_output_stays_resident_for_consumers() {
        let device = Arc::new(HostDevice::new());
        let config = PixelShuffleConfig::new(2);
        let mut shuffle = PixelShuffle::with_device(config, Arc::clone(&device)).unwrap();
        let mut unshuffle = PixelShuffle::with_device(config.inverse(), Arc::clone(&device)).unwrap();
        shuffle.set_has_consumers(true);

        let x = iota(&[2, 2, 8]);
        let mid = shuffle.call(&Resident::Host(x.clone())).unwrap();
        assert!(!mid.is_host());
        assert_eq!(mid.shape().dims(), &[4, 4, 2]);

        let uploads = device.uploads();
        let back = unshuffle.call(&mid).unwrap();
        // Only the three index maps are uploaded; the input is already resident.
        assert_eq!(device.uploads(), uploads + 3);
        match back {
            Resident::Host(t) => assert_eq!(t, x),
            Resident::Device(_) => panic!("terminal layer must download"),
        }
    }
}
