//! Execution path selection
//!
//! Layers decide once, when they are built, whether they run on the host or
//! on a texture device. This module turns the global [`Backend`] into that
//! decision.
//!
//! # Behavior
//! - `Backend::Cpu` always yields [`ExecutionPath::Cpu`]
//! - `Backend::Wgpu` yields the shared device when one can be acquired
//! - otherwise it logs a warning and falls back to the CPU
//!
//! # Example
//! ```rust
//! use subpixel::backend::{set_backend, Backend};
//! use subpixel::ops::dispatch::{select, ExecutionPath};
//! use subpixel::ops::texture::HostDevice;
//! use std::sync::Arc;
//!
//! set_backend(Backend::Wgpu);
//! let path = select(|| Some(Arc::new(HostDevice::new())));
//! assert!(matches!(path, ExecutionPath::Device(_)));
//! ```

use std::sync::Arc;

use crate::backend::{Backend, get_backend};

/// Where a layer runs its kernels.
#[derive(Debug)]
pub enum ExecutionPath<D> {
    Cpu,
    Device(Arc<D>),
}

impl<D> Clone for ExecutionPath<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Cpu => Self::Cpu,
            Self::Device(device) => Self::Device(Arc::clone(device)),
        }
    }
}

impl<D> ExecutionPath<D> {
    pub fn device(&self) -> Option<&Arc<D>> {
        match self {
            Self::Cpu => None,
            Self::Device(device) => Some(device),
        }
    }
}

/// Resolves the global backend into an execution path.
///
/// `acquire` is only invoked when the device backend is selected.
pub fn select<D>(acquire: impl FnOnce() -> Option<Arc<D>>) -> ExecutionPath<D> {
    match get_backend() {
        Backend::Cpu => ExecutionPath::Cpu,
        Backend::Wgpu => match acquire() {
            Some(device) => ExecutionPath::Device(device),
            None => {
                tracing::warn!("wgpu backend selected but no device is available; using the CPU");
                ExecutionPath::Cpu
            }
        },
    }
}

/// Resolves the global backend against the shared `wgpu` device.
#[cfg(feature = "wgpu")]
pub fn default_path() -> ExecutionPath<super::wgpu::WgpuDevice> {
    select(super::wgpu::shared_device)
}

/// Without the `wgpu` feature every layer runs on the CPU.
#[cfg(not(feature = "wgpu"))]
pub fn default_path() -> ExecutionPath<super::texture::HostDevice> {
    select(|| None)
}
