//! 2D-texture residency.
//!
//! Device execution stores every tensor as a single-channel 2D texture.
//! This module defines how a logical shape is laid out on such a texture,
//! the [`TextureDevice`] trait the GPU executors program against, and
//! [`HostDevice`], a host emulation of the same addressing used where no
//! adapter is available.
//!
//! # Layout
//! - rank 1: one row, `len` texels wide
//! - rank 2: `shape[0]` rows of `shape[1]` texels
//! - rank 3 and above: rows are all leading axes flattened, columns the last axis
//!
//! If a side exceeds the device limit the tensor is packed into a near-square
//! texture `ceil(sqrt(len))` wide instead. Texel `(x, y)` always holds flat
//! element `y * width + x`; trailing padding texels hold zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, GpuFailure, Result};
use crate::tensors::{Shape, Tensor};

/// Placement of a flat tensor on a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureLayout {
    pub width: usize,
    pub height: usize,
    /// Number of meaningful texels; the rest is padding.
    pub len: usize,
}

impl TextureLayout {
    /// Chooses the layout for a tensor of shape `dims` on a device whose
    /// textures are at most `max_side` texels per side.
    ///
    /// # Returns
    /// - the natural row/column layout when both sides fit
    /// - a near-square packing otherwise
    /// - [`Error::TextureTooLarge`] if neither fits
    pub fn for_dims(dims: &[usize], max_side: usize) -> Result<Self> {
        let len: usize = dims.iter().product();
        let (width, height) = match dims {
            [] => (1, 1),
            [n] => (*n, 1),
            [.., last] => (*last, len / *last),
        };
        if width <= max_side && height <= max_side {
            return Ok(Self { width, height, len });
        }

        let width = ceil_sqrt(len);
        let height = len.div_ceil(width);
        if width <= max_side && height <= max_side {
            Ok(Self { width, height, len })
        } else {
            Err(Error::TextureTooLarge { len, limit: max_side })
        }
    }

    /// Total texels including padding.
    pub fn texels(&self) -> usize {
        self.width * self.height
    }

    /// Texel coordinate of flat element `position`.
    pub fn texel(&self, position: usize) -> (usize, usize) {
        (position % self.width, position / self.width)
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root < n {
        root += 1;
    }
    while root > 1 && (root - 1) * (root - 1) >= n {
        root -= 1;
    }
    root.max(1)
}

/// Element type stored in a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// Activations (`r32float`).
    Float,
    /// Index maps (`r32sint`).
    Int,
}

/// Texel payload for an upload.
#[derive(Debug, Clone, Copy)]
pub enum Texels<'a> {
    Float(&'a [f32]),
    Int(&'a [i32]),
}

impl Texels<'_> {
    pub fn format(&self) -> TexelFormat {
        match self {
            Texels::Float(_) => TexelFormat::Float,
            Texels::Int(_) => TexelFormat::Int,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Texels::Float(v) => v.len(),
            Texels::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A texture allocated by a [`TextureDevice`].
pub trait DeviceTexture {
    fn layout(&self) -> TextureLayout;
    fn format(&self) -> TexelFormat;
}

/// A device that executes gather programs over 2D textures.
///
/// Every call is synchronous: when it returns, the work it submitted has
/// completed.
pub trait TextureDevice {
    type Texture: DeviceTexture;

    /// Largest texture side, in texels.
    fn max_texture_side(&self) -> usize;

    /// Uploads `texels` into a new texture. Padding texels are zeroed.
    fn upload(&self, layout: TextureLayout, texels: Texels<'_>) -> Result<Self::Texture>;

    /// Allocates a zeroed float texture to be written by a pass.
    fn allocate(&self, layout: TextureLayout) -> Result<Self::Texture>;

    /// Reads back the first `layout.len` texels in row-major order.
    fn download(&self, texture: &Self::Texture) -> Result<Vec<f32>>;

    /// Gather pass: output texel at flat position `p` receives
    /// `input[index_map[p]]`.
    fn gather(
        &self,
        input: &Self::Texture,
        index_map: &Self::Texture,
        output: &mut Self::Texture,
    ) -> Result<()>;

    /// Elementwise `max(x, 0) + alpha * min(x, 0)` over equally laid out textures.
    fn prelu(
        &self,
        x: &Self::Texture,
        alpha: &Self::Texture,
        output: &mut Self::Texture,
    ) -> Result<()>;

    /// Layout for a tensor of shape `dims` on this device.
    fn layout_for(&self, dims: &[usize]) -> Result<TextureLayout> {
        TextureLayout::for_dims(dims, self.max_texture_side())
    }
}

pub(crate) fn expect_format<T: DeviceTexture>(texture: &T, expected: TexelFormat) -> Result<()> {
    let found = texture.format();
    if found == expected {
        Ok(())
    } else {
        Err(Error::TexelFormat { expected, found })
    }
}

/// A texture plus the logical shape it stores.
///
/// Rank 3 and higher tensors are flattened onto the texture; the shape kept
/// here is what lets them be restored on download.
#[derive(Debug)]
pub struct DeviceTensor<T> {
    texture: T,
    shape: Shape,
}

impl<T: DeviceTexture> DeviceTensor<T> {
    pub fn new(texture: T, shape: Shape) -> Result<Self> {
        let layout = texture.layout();
        if layout.len != shape.len() {
            return Err(Error::ElementCount { shape: shape.into_dims(), len: layout.len });
        }
        Ok(Self { texture, shape })
    }

    /// Copies a host tensor onto `device`.
    pub fn upload<D>(device: &D, tensor: &Tensor<f32>) -> Result<Self>
    where
        D: TextureDevice<Texture = T>,
    {
        let layout = device.layout_for(tensor.shape().dims())?;
        let texture = device.upload(layout, Texels::Float(tensor.data()))?;
        Self::new(texture, tensor.shape().clone())
    }

    /// Copies the texture back and restores the logical shape.
    pub fn to_host<D>(&self, device: &D) -> Result<Tensor<f32>>
    where
        D: TextureDevice<Texture = T>,
    {
        let data = device.download(&self.texture)?;
        Tensor::from_shape(self.shape.clone(), data)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn texture(&self) -> &T {
        &self.texture
    }

    pub fn layout(&self) -> TextureLayout {
        self.texture.layout()
    }
}

/// A logical tensor living either in host memory or on a texture device.
#[derive(Debug)]
pub enum Resident<T> {
    Host(Tensor<f32>),
    Device(DeviceTensor<T>),
}

impl<T: DeviceTexture> Resident<T> {
    pub fn shape(&self) -> &Shape {
        match self {
            Resident::Host(t) => t.shape(),
            Resident::Device(t) => t.shape(),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Resident::Host(_))
    }

    /// Brings the tensor to host memory, downloading it if needed.
    pub fn into_host<D>(self, device: Option<&D>) -> Result<Tensor<f32>>
    where
        D: TextureDevice<Texture = T>,
    {
        match (self, device) {
            (Resident::Host(t), _) => Ok(t),
            (Resident::Device(t), Some(device)) => t.to_host(device),
            (Resident::Device(_), None) => Err(GpuFailure::Unavailable.into()),
        }
    }
}

impl<T> From<Tensor<f32>> for Resident<T> {
    fn from(tensor: Tensor<f32>) -> Self {
        Resident::Host(tensor)
    }
}

/// Borrowed view of a layer input in either residency.
#[derive(Debug)]
pub enum Input<'a, T> {
    Host(&'a Tensor<f32>),
    Device(&'a DeviceTensor<T>),
}

impl<T> Clone for Input<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Input<'_, T> {}

impl<T> Resident<T> {
    /// Borrows the tensor as a layer input.
    pub fn as_input(&self) -> Input<'_, T> {
        match self {
            Resident::Host(t) => Input::Host(t),
            Resident::Device(t) => Input::Device(t),
        }
    }
}

/// Host emulation of a texture device.
///
/// Textures are plain texel vectors addressed exactly as the WGSL programs
/// address theirs. Every pass and every live texture is counted so tests can
/// observe how the executors use the device.
#[derive(Debug)]
pub struct HostDevice {
    max_side: usize,
    passes: AtomicUsize,
    uploads: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl HostDevice {
    /// WebGPU's default `max_texture_dimension_2d`.
    pub const DEFAULT_MAX_SIDE: usize = 8192;

    pub fn new() -> Self {
        Self::with_max_side(Self::DEFAULT_MAX_SIDE)
    }

    /// A device with a custom side limit, useful to force packed layouts.
    pub fn with_max_side(max_side: usize) -> Self {
        Self {
            max_side: max_side.max(1),
            passes: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Passes run since creation.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Uploads performed since creation.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Textures currently alive.
    pub fn live_textures(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn texture(&self, layout: TextureLayout, format: TexelFormat, bits: Vec<u32>) -> HostTexture {
        self.live.fetch_add(1, Ordering::Relaxed);
        HostTexture { layout, format, bits, live: Arc::clone(&self.live) }
    }

    fn check_capacity(&self, layout: TextureLayout) -> Result<()> {
        if layout.width > self.max_side || layout.height > self.max_side {
            return Err(Error::TextureTooLarge { len: layout.len, limit: self.max_side });
        }
        Ok(())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Texels of a [`HostDevice`] texture, stored as raw 32-bit patterns.
#[derive(Debug)]
pub struct HostTexture {
    layout: TextureLayout,
    format: TexelFormat,
    bits: Vec<u32>,
    live: Arc<AtomicUsize>,
}

impl HostTexture {
    fn load_f32(&self, x: usize, y: usize) -> f32 {
        f32::from_bits(self.bits[y * self.layout.width + x])
    }

    fn load_i32(&self, x: usize, y: usize) -> i32 {
        self.bits[y * self.layout.width + x] as i32
    }

    fn store_f32(&mut self, x: usize, y: usize, value: f32) {
        self.bits[y * self.layout.width + x] = value.to_bits();
    }
}

impl DeviceTexture for HostTexture {
    fn layout(&self) -> TextureLayout {
        self.layout
    }

    fn format(&self) -> TexelFormat {
        self.format
    }
}

impl Drop for HostTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TextureDevice for HostDevice {
    type Texture = HostTexture;

    fn max_texture_side(&self) -> usize {
        self.max_side
    }

    fn upload(&self, layout: TextureLayout, texels: Texels<'_>) -> Result<HostTexture> {
        self.check_capacity(layout)?;
        if texels.len() != layout.len {
            return Err(Error::ElementCount { shape: vec![layout.len], len: texels.len() });
        }
        let mut bits = vec![0u32; layout.texels()];
        match texels {
            Texels::Float(values) => {
                for (dst, v) in bits.iter_mut().zip(values) {
                    *dst = v.to_bits();
                }
            }
            Texels::Int(values) => {
                for (dst, &v) in bits.iter_mut().zip(values) {
                    *dst = v as u32;
                }
            }
        }
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(self.texture(layout, texels.format(), bits))
    }

    fn allocate(&self, layout: TextureLayout) -> Result<HostTexture> {
        self.check_capacity(layout)?;
        Ok(self.texture(layout, TexelFormat::Float, vec![0; layout.texels()]))
    }

    fn download(&self, texture: &HostTexture) -> Result<Vec<f32>> {
        expect_format(texture, TexelFormat::Float)?;
        let layout = texture.layout;
        Ok((0..layout.len)
            .map(|p| {
                let (x, y) = layout.texel(p);
                texture.load_f32(x, y)
            })
            .collect())
    }

    fn gather(
        &self,
        input: &HostTexture,
        index_map: &HostTexture,
        output: &mut HostTexture,
    ) -> Result<()> {
        expect_format(input, TexelFormat::Float)?;
        expect_format(index_map, TexelFormat::Int)?;
        expect_format(output, TexelFormat::Float)?;
        if index_map.layout != output.layout {
            return Err(Error::ShapeMismatch {
                expected: vec![output.layout.height, output.layout.width],
                found: vec![index_map.layout.height, index_map.layout.width],
            });
        }

        let out = output.layout;
        let src = input.layout;
        for y in 0..out.height {
            for x in 0..out.width {
                let value = if y * out.width + x < out.len {
                    let at = index_map.load_i32(x, y) as usize;
                    debug_assert!(at < src.len, "index {at} outside input of {}", src.len);
                    let (sx, sy) = src.texel(at);
                    input.load_f32(sx, sy)
                } else {
                    0.0
                };
                output.store_f32(x, y, value);
            }
        }
        self.passes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn prelu(&self, x: &HostTexture, alpha: &HostTexture, output: &mut HostTexture) -> Result<()> {
        for t in [x, alpha] {
            expect_format(t, TexelFormat::Float)?;
            if t.layout != output.layout {
                return Err(Error::ShapeMismatch {
                    expected: vec![output.layout.height, output.layout.width],
                    found: vec![t.layout.height, t.layout.width],
                });
            }
        }
        expect_format(output, TexelFormat::Float)?;

        let layout = output.layout;
        for ty in 0..layout.height {
            for tx in 0..layout.width {
                let v = x.load_f32(tx, ty);
                let a = alpha.load_f32(tx, ty);
                output.store_f32(tx, ty, v.max(0.0) + a * v.min(0.0));
            }
        }
        self.passes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_layouts_follow_rank() {
        let l = TextureLayout::for_dims(&[7], 100).unwrap();
        assert_eq!((l.width, l.height), (7, 1));
        let l = TextureLayout::for_dims(&[3, 5], 100).unwrap();
        assert_eq!((l.width, l.height), (5, 3));
        let l = TextureLayout::for_dims(&[2, 3, 4, 5], 100).unwrap();
        assert_eq!((l.width, l.height, l.len), (5, 24, 120));
    }

    #[test]
    fn oversized_sides_fall_back_to_square_packing() {
        let l = TextureLayout::for_dims(&[1, 50], 16).unwrap();
        assert_eq!((l.width, l.height, l.len), (8, 7, 50));
        assert!(matches!(
            TextureLayout::for_dims(&[300], 16),
            Err(Error::TextureTooLarge { len: 300, limit: 16 })
        ));
    }

    #[test]
    fn ceil_sqrt_is_exact() {
        for n in 1..500usize {
            let r = ceil_sqrt(n);
            assert!(r * r >= n);
            assert!((r - 1) * (r - 1) < n);
        }
    }

    #[test]
    fn host_gather_follows_index_map_and_zeroes_padding() {
        let device = HostDevice::with_max_side(4);
        let input = device
            .upload(TextureLayout::for_dims(&[2, 3], 4).unwrap(), Texels::Float(&[1., 2., 3., 4., 5., 6.]))
            .unwrap();
        // A 6-wide row exceeds the limit and is packed 3x2.
        let layout = TextureLayout::for_dims(&[6], 4).unwrap();
        assert_eq!((layout.width, layout.height), (3, 2));
        let map = device.upload(layout, Texels::Int(&[5, 4, 3, 2, 1, 0])).unwrap();
        let mut out = device.allocate(layout).unwrap();
        device.gather(&input, &map, &mut out).unwrap();
        assert_eq!(device.download(&out).unwrap(), vec![6., 5., 4., 3., 2., 1.]);
        assert_eq!(device.passes(), 1);

        let padded = TextureLayout::for_dims(&[5], 4).unwrap();
        assert_eq!(padded.texels(), 6);
        let map = device.upload(padded, Texels::Int(&[0, 0, 0, 0, 0])).unwrap();
        let mut out = device.allocate(padded).unwrap();
        device.gather(&input, &map, &mut out).unwrap();
        assert_eq!(out.load_f32(2, 1), 0.0);
    }

    #[test]
    fn gather_rejects_wrong_formats() {
        let device = HostDevice::new();
        let layout = TextureLayout::for_dims(&[4], 16).unwrap();
        let input = device.upload(layout, Texels::Float(&[0.; 4])).unwrap();
        let float_map = device.upload(layout, Texels::Float(&[0.; 4])).unwrap();
        let mut out = device.allocate(layout).unwrap();
        assert!(matches!(
            device.gather(&input, &float_map, &mut out),
            Err(Error::TexelFormat { expected: TexelFormat::Int, .. })
        ));
    }

    #[test]
    fn live_textures_are_counted() {
        let device = HostDevice::new();
        let layout = TextureLayout::for_dims(&[2, 2], 16).unwrap();
        let a = device.allocate(layout).unwrap();
        let b = device.allocate(layout).unwrap();
        assert_eq!(device.live_textures(), 2);
        drop(a);
        assert_eq!(device.live_textures(), 1);
        drop(b);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn device_tensor_restores_rank() {
        let device = HostDevice::new();
        let t = Tensor::new(vec![2, 2, 3], (0..12).map(|v| v as f32).collect());
        let on_device = DeviceTensor::upload(&device, &t).unwrap();
        assert_eq!(on_device.layout().width, 3);
        assert_eq!(on_device.layout().height, 4);
        assert_eq!(on_device.to_host(&device).unwrap(), t);
    }
}
