//! Axis permutations.

use core::fmt;

use crate::error::{Error, Result};

/// A validated reordering of tensor axes.
///
/// Output axis `k` takes input axis `axes[k]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permutation(Vec<usize>);

impl Permutation {
    /// Validates that `axes` mentions every index in `0..axes.len()` exactly once.
    pub fn new(axes: impl Into<Vec<usize>>) -> Result<Self> {
        let axes = axes.into();
        let rank = axes.len();
        let mut seen = vec![false; rank];
        for &axis in &axes {
            if axis >= rank || seen[axis] {
                return Err(Error::InvalidPermutation { axes, rank });
            }
            seen[axis] = true;
        }
        Ok(Self(axes))
    }

    /// The permutation that leaves every axis in place.
    pub fn identity(rank: usize) -> Self {
        Self((0..rank).collect())
    }

    pub fn axes(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(k, &axis)| k == axis)
    }

    /// Reorders per-axis values: `out[k] = values[axes[k]]`.
    ///
    /// Used for both extents and strides.
    pub fn apply(&self, values: &[usize]) -> Vec<usize> {
        debug_assert_eq!(values.len(), self.rank());
        self.0.iter().map(|&axis| values[axis]).collect()
    }

    /// The permutation that undoes this one.
    pub fn inverse(&self) -> Self {
        let mut inverse = vec![0; self.rank()];
        for (k, &axis) in self.0.iter().enumerate() {
            inverse[axis] = k;
        }
        Self(inverse)
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
