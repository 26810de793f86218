//! subpixel: pixel-shuffle layout engine and PReLU for Rust.
//!
//! Rearranges tensors between channel depth and spatial resolution (sub-pixel
//! convolution upsampling and its inverse) with two interchangeable
//! executors: strided gathers over host memory, and gather passes over 2D
//! textures on a GPU.
//!
//! # Features
//!
//! - Rank-generic layout engine: reshape, permute, reshape for ranks 2 through 5.
//! - Index maps built once per input shape and kept on the device.
//! - Identical results on the host and on the device.
//! - PReLU with broadcast weights.
//!
//! # Modules
//!
//! - [`tensors`]: shapes and host tensors.
//! - [`layout`]: coordinates, permutations, strided views, index maps, plans.
//! - [`ops`]: CPU kernels, the texture device abstraction and its executors.
//! - [`layers`]: the `PixelShuffle` and `PRelu` layers.
//! - [`backend`]: process-wide backend selection.
//!
//! # Cargo features
//!
//! - `wgpu`: enables [`ops::wgpu::WgpuDevice`] and makes it the default device.
//!
//! # Example
//!
//! ```rust
//! use subpixel::layers::{Layer, PixelShuffle, PixelShuffleConfig};
//! use subpixel::tensor;
//!
//! let mut up = PixelShuffle::new(PixelShuffleConfig::new(2)).unwrap();
//! let x = tensor!([[[1.0, 2.0, 3.0, 4.0]]]);
//! let y = up.apply(&x).unwrap();
//! assert_eq!(y.shape().dims(), &[2, 2, 1]);
//! assert_eq!(y.data(), &[1.0, 2.0, 3.0, 4.0]);
//! ```

pub mod backend;
pub mod error;
pub mod layers;
pub mod layout;
pub mod ops;
pub mod tensors;

pub use error::{Error, GpuFailure, Result};
pub use tensors::{Shape, Tensor};
