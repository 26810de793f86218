//! Row-major coordinate arithmetic for shapes of rank 2 through 5.

use crate::error::{Error, Result};

/// Smallest rank the layout engine accepts.
pub const MIN_RANK: usize = 2;
/// Largest rank the layout engine accepts.
pub const MAX_RANK: usize = 5;

/// Rejects ranks outside `MIN_RANK..=MAX_RANK`.
pub fn check_rank(rank: usize) -> Result<()> {
    if (MIN_RANK..=MAX_RANK).contains(&rank) {
        Ok(())
    } else {
        Err(Error::InvalidRank { rank, min: MIN_RANK, max: MAX_RANK })
    }
}

/// Row-major strides of `shape`: the last axis has stride 1.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Converts a coordinate tuple into its row-major flat offset.
///
/// Callers guarantee `coords[i] < shape[i]`; this is checked in debug builds.
pub fn flatten(shape: &[usize], coords: &[usize]) -> usize {
    debug_assert_eq!(shape.len(), coords.len());
    let mut offset = 0;
    let mut stride = 1;
    for (&extent, &coord) in shape.iter().zip(coords).rev() {
        debug_assert!(coord < extent, "coordinate {coord} out of range for extent {extent}");
        offset += coord * stride;
        stride *= extent;
    }
    offset
}

/// Converts a flat offset back into coordinates, writing them into `coords`.
pub fn unflatten_into(shape: &[usize], offset: usize, coords: &mut [usize]) {
    debug_assert_eq!(shape.len(), coords.len());
    let mut rest = offset;
    for (coord, &extent) in coords.iter_mut().zip(shape).rev() {
        *coord = rest % extent;
        rest /= extent;
    }
    debug_assert_eq!(rest, 0, "offset {offset} out of range for {shape:?}");
}

/// Converts a flat offset back into coordinates.
///
/// Inverse of [`flatten`] for every `offset < product(shape)`.
pub fn unflatten(shape: &[usize], offset: usize) -> Vec<usize> {
    let mut coords = vec![0; shape.len()];
    unflatten_into(shape, offset, &mut coords);
    coords
}

/// Row-major odometer over every coordinate of a shape.
///
/// Yields borrowed coordinates so walking a large shape does not allocate
/// per element.
#[derive(Debug, Clone)]
pub struct CoordWalker<'a> {
    shape: &'a [usize],
    coords: Vec<usize>,
    remaining: usize,
    started: bool,
}

impl<'a> CoordWalker<'a> {
    /// Starts a walk at the all-zero coordinate.
    pub fn new(shape: &'a [usize]) -> Self {
        Self {
            shape,
            coords: vec![0; shape.len()],
            remaining: shape.iter().product(),
            started: false,
        }
    }

    /// Advances to the next coordinate, or returns `None` once every
    /// coordinate has been visited.
    pub fn step(&mut self) -> Option<&[usize]> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.started {
            for axis in (0..self.shape.len()).rev() {
                self.coords[axis] += 1;
                if self.coords[axis] < self.shape[axis] {
                    break;
                }
                self.coords[axis] = 0;
            }
        }
        self.started = true;
        Some(&self.coords)
    }
}
