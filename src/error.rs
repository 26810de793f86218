//! Error types shared by the layout engine, the executors and the layers.
//!
//! Every fallible operation in this crate returns [`Result`]. Shape problems
//! are reported before any data is touched; device problems surface as
//! [`Error::Gpu`].

use thiserror::Error;

use crate::ops::texture::TexelFormat;

/// Crate-wide result alias.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong while planning or executing an operator.
#[derive(Debug, Error)]
pub enum Error {
    /// A shape's rank lies outside the supported range.
    #[error("rank {rank} is not supported (expected {min}..={max})")]
    InvalidRank {
        /// The rank that was supplied.
        rank: usize,
        /// Smallest accepted rank.
        min: usize,
        /// Largest accepted rank.
        max: usize,
    },

    /// A shape contains a zero-sized axis.
    #[error("shape {shape:?} has a zero-sized axis")]
    EmptyAxis {
        /// The offending shape.
        shape: Vec<usize>,
    },

    /// A buffer length does not match the element count of a shape.
    #[error("shape {shape:?} is incompatible with {len} data elements")]
    ElementCount {
        /// The requested shape.
        shape: Vec<usize>,
        /// Number of elements actually present.
        len: usize,
    },

    /// An axis list is not a permutation of `0..rank`.
    #[error("{axes:?} is not a permutation of 0..{rank}")]
    InvalidPermutation {
        /// The rejected axis list.
        axes: Vec<usize>,
        /// The rank the list was checked against.
        rank: usize,
    },

    /// A block size factor is zero.
    #[error("block size factors must be positive, got {rows}x{cols}")]
    InvalidFactor {
        /// Vertical factor.
        rows: usize,
        /// Horizontal factor.
        cols: usize,
    },

    /// The channel axis is too small to fill a single block.
    #[error("{channels} channels cannot fill one {rows}x{cols} block")]
    TooFewChannels {
        /// Channel extent of the input.
        channels: usize,
        /// Vertical factor.
        rows: usize,
        /// Horizontal factor.
        cols: usize,
    },

    /// A spatial extent is not a multiple of its block factor.
    #[error("extent {extent} of axis {axis} is not divisible by {factor}")]
    Indivisible {
        /// Axis index within the sample shape.
        axis: usize,
        /// Extent of that axis.
        extent: usize,
        /// Factor it had to divide by.
        factor: usize,
    },

    /// A weight cannot be broadcast against an input.
    #[error("weight of shape {weight:?} cannot be tiled to {input:?}")]
    Untileable {
        /// Shape of the weight.
        weight: Vec<usize>,
        /// Shape it had to cover.
        input: Vec<usize>,
    },

    /// An operator input does not have the shape the operator was planned for.
    #[error("expected input of shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        /// Shape the operator expected.
        expected: Vec<usize>,
        /// Shape that was supplied.
        found: Vec<usize>,
    },

    /// Flat offsets no longer fit the signed 32-bit texel format.
    #[error("{len} elements exceed the 32-bit index range")]
    IndexOverflow {
        /// Element count that overflowed.
        len: usize,
    },

    /// A data format string was not recognised.
    #[error("unknown data format `{0}`")]
    UnknownDataFormat(String),

    /// A required weight has not been loaded yet.
    #[error("weight `{0}` has not been loaded")]
    MissingWeight(&'static str),

    /// A layer was asked to load a weight it does not own.
    #[error("layer `{layer}` has no weight named `{name}`")]
    UnknownWeight {
        /// Name of the layer class.
        layer: &'static str,
        /// The weight name that was supplied.
        name: String,
    },

    /// No 2D texture layout fits within the device limit.
    #[error("{len} elements do not fit a texture of at most {limit}x{limit} texels")]
    TextureTooLarge {
        /// Element count of the tensor.
        len: usize,
        /// Maximum side length supported by the device.
        limit: usize,
    },

    /// A texture was bound where a different texel format is required.
    #[error("expected a {expected:?} texture, got {found:?}")]
    TexelFormat {
        /// Format the pass needs.
        expected: TexelFormat,
        /// Format of the texture that was bound.
        found: TexelFormat,
    },

    /// The texture device failed.
    #[error(transparent)]
    Gpu(#[from] GpuFailure),
}

/// A failure raised while talking to a texture device.
#[derive(Debug, Error)]
pub enum GpuFailure {
    /// No compatible adapter could be acquired.
    #[error("no compatible adapter: {0}")]
    Adapter(String),
    /// The adapter refused to create a device.
    #[error("device request failed: {0}")]
    Device(String),
    /// Waiting on submitted work failed.
    #[error("device poll failed: {0}")]
    Poll(String),
    /// Mapping a readback buffer failed.
    #[error("buffer mapping failed: {0}")]
    Map(String),
    /// Device-resident data was handed to a layer that has no device.
    #[error("no texture device is attached")]
    Unavailable,
}
