//! Strided views.
//!
//! A view reads a flat row-major buffer through arbitrary per-axis strides.
//! Permuting a view only reorders its extents and strides; no element moves
//! until the view is walked.

use crate::error::{Error, Result};
use crate::layout::coords::{self, CoordWalker};
use crate::layout::permutation::Permutation;

/// A read pattern over a flat buffer: logical extents plus the element stride
/// of each axis.
///
/// A contiguous view uses row-major strides. Views with other strides select
/// a subset of the buffer or visit it out of order without copying.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StridedView {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl StridedView {
    /// Row-major view of `shape`.
    pub fn contiguous(shape: &[usize]) -> Self {
        Self { shape: shape.to_vec(), strides: coords::strides(shape) }
    }

    /// A view with explicit strides.
    ///
    /// Fails if the largest reachable offset does not fit a buffer of
    /// `buffer_len` elements.
    pub fn new(shape: Vec<usize>, strides: Vec<usize>, buffer_len: usize) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(Error::ElementCount { shape, len: strides.len() });
        }
        if shape.contains(&0) {
            return Err(Error::EmptyAxis { shape });
        }
        let view = Self { shape, strides };
        if view.max_offset() >= buffer_len {
            return Err(Error::ElementCount { shape: view.shape, len: buffer_len });
        }
        Ok(view)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of logical elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == coords::strides(&self.shape)
    }

    /// Buffer offset of the last logical element.
    pub fn max_offset(&self) -> usize {
        self.shape
            .iter()
            .zip(&self.strides)
            .map(|(&extent, &stride)| (extent - 1) * stride)
            .sum()
    }

    /// Reorders the axes of the view: axis `k` of the result is axis
    /// `permutation[k]` of `self`. No data moves.
    pub fn permuted(&self, permutation: &Permutation) -> Self {
        Self {
            shape: permutation.apply(&self.shape),
            strides: permutation.apply(&self.strides),
        }
    }

    /// Buffer offset of the element at `coords`.
    pub fn offset(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.rank());
        coords.iter().zip(&self.strides).map(|(&c, &s)| c * s).sum()
    }

    /// Buffer offset of the element at logical row-major position `position`.
    pub fn offset_at(&self, position: usize) -> usize {
        let mut rest = position;
        let mut offset = 0;
        for (&extent, &stride) in self.shape.iter().zip(&self.strides).rev() {
            offset += (rest % extent) * stride;
            rest /= extent;
        }
        offset
    }

    /// Extent and stride of the innermost axis.
    pub fn innermost(&self) -> (usize, usize) {
        match (self.shape.last(), self.strides.last()) {
            (Some(&extent), Some(&stride)) => (extent, stride),
            _ => (1, 0),
        }
    }

    /// Calls `f` with every buffer offset in logical row-major order.
    pub fn for_each_offset(&self, mut f: impl FnMut(usize)) {
        let mut walker = CoordWalker::new(&self.shape);
        while let Some(at) = walker.step() {
            f(self.offset(at));
        }
    }
}
