//! Core tensor data structures.
//!
//! # Core Tensor Utilities
//!
//! This module defines how dense, row-major, multi-dimensional arrays are
//! represented on the host.
//!
//! It supports:
//! - Construction of N-dimensional tensors with a checked shape
//! - Free reinterpretation of the shape (`reshape`)
//! - Repetition along axes (`tile`), used to broadcast layer weights
//! - Compile-time tensor literals through the `tensor!` macro
//!
//! ## Design Highlights
//! - `Shape` owns the extents and guarantees none of them is zero
//! - `Tensor<T>` guarantees `data.len() == shape.len()` at all times
//! - Layout is always row-major: the last axis varies fastest
//!
//! ## Example
//!
//! ```rust
//! use subpixel::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape().dims(), &[2, 3]);
//! ```

use core::fmt;
use core::ops::Index;

use crate::error::{Error, Result};
use crate::layout::coords::{self, CoordWalker};

/// Extents of a row-major tensor, one per axis.
///
/// Extents are never zero. A rank-0 shape describes a single scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Builds a shape, rejecting zero-sized axes.
    pub fn new(dims: impl Into<Vec<usize>>) -> Result<Self> {
        let dims = dims.into();
        if dims.contains(&0) {
            return Err(Error::EmptyAxis { shape: dims });
        }
        Ok(Self(dims))
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements, the product of all extents.
    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    /// Always `false`: shapes cannot contain a zero extent.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        coords::strides(&self.0)
    }

    /// Splits off the leading axis.
    pub fn split_first(&self) -> Option<(usize, Shape)> {
        self.0
            .split_first()
            .map(|(&first, rest)| (first, Shape(rest.to_vec())))
    }

    /// Prepends an axis of extent `extent`.
    pub fn with_leading(&self, extent: usize) -> Result<Shape> {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(extent);
        dims.extend_from_slice(&self.0);
        Shape::new(dims)
    }

    pub fn into_dims(self) -> Vec<usize> {
        self.0
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.0[axis]
    }
}

impl AsRef<[usize]> for Shape {
    fn as_ref(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str(")")
    }
}

/// An N-dimensional array with a shape and flat row-major data.
///
/// - All elements have the same type (`T`).
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2x3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the shape has a zero extent or if the number of elements
    /// in `data` does not match the shape product. Use [`Tensor::try_new`]
    /// for untrusted input.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        match Self::try_new(shape, data) {
            Ok(tensor) => tensor,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible counterpart of [`Tensor::new`].
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        Self::from_shape(Shape::new(shape)?, data)
    }

    /// Pairs an already validated shape with its data.
    pub fn from_shape(shape: Shape, data: Vec<T>) -> Result<Self> {
        if shape.len() != data.len() {
            return Err(Error::ElementCount { shape: shape.into_dims(), len: data.len() });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Reinterprets the same data under a new shape with the same element count.
    ///
    /// No element moves.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        Self::try_new(shape, self.data)
    }
}

impl<T: Copy> Tensor<T> {
    /// Repeats the tensor `reps[i]` times along each axis `i`.
    ///
    /// `reps` must have one entry per axis and no zero entries.
    pub fn tile(&self, reps: &[usize]) -> Result<Self> {
        if reps.len() != self.shape.rank() {
            return Err(Error::Untileable {
                weight: self.shape.dims().to_vec(),
                input: reps.to_vec(),
            });
        }
        let dims: Vec<usize> = self
            .shape
            .dims()
            .iter()
            .zip(reps)
            .map(|(&extent, &rep)| extent * rep)
            .collect();
        let shape = Shape::new(dims)?;
        if reps.iter().all(|&rep| rep == 1) {
            return Ok(self.clone());
        }

        let source = self.shape.dims();
        let mut wrapped = vec![0; source.len()];
        let mut data = Vec::with_capacity(shape.len());
        let mut walker = CoordWalker::new(shape.dims());
        while let Some(at) = walker.step() {
            for ((w, &c), &extent) in wrapped.iter_mut().zip(at).zip(source) {
                *w = c % extent;
            }
            data.push(self.data[coords::flatten(source, &wrapped)]);
        }
        Ok(Self { shape, data })
    }
}

/// Builds a [`Tensor`] from a nested array literal.
///
/// Every row of a level must have the same shape.
///
/// # Example
///
/// ```rust
/// use subpixel::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    // Innermost row; also accepts negative literals.
    ([ $( $lit:literal ),+ $(,)? ]) => {{
        let data = vec![ $( $lit ),+ ];
        $crate::tensors::Tensor::new(vec![data.len()], data)
    }};

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape().clone();
        assert!(children.iter().all(|c| *c.shape() == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape.dims());
        let mut data = Vec::with_capacity(children.len() * first_shape.len());
        for c in children { data.extend(c.into_data()); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
