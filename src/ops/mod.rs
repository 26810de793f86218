//! Executors.
//!
//! - [`cpu`]: rayon kernels over host buffers
//! - [`texture`]: 2D-texture residency and the [`texture::TextureDevice`] trait
//! - [`gather`]: three-pass layout executor for texture devices
//! - [`wgpu`]: the WGPU-backed texture device (feature `wgpu`)
//! - [`dispatch`]: picks CPU or device from the global backend

pub mod cpu;
pub mod dispatch;
pub mod gather;
pub mod texture;

#[cfg(feature = "wgpu")]
pub mod wgpu;

/// The device layers use by default: the `wgpu` device when the feature is
/// enabled, otherwise the host emulation.
#[cfg(feature = "wgpu")]
pub type DefaultDevice = wgpu::WgpuDevice;
/// The device layers use by default: the `wgpu` device when the feature is
/// enabled, otherwise the host emulation.
#[cfg(not(feature = "wgpu"))]
pub type DefaultDevice = texture::HostDevice;
