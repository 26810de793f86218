//! Parallel CPU kernels
//!
//! # CPU Backend
//!
//! Host implementations of the layout executor and the broadcast
//! elementwise kernels. Reshapes never move data here: a [`LayoutPlan`]
//! already composes the reshape-in view with the permutation, so executing
//! it is a single strided gather.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon), split by
//!   sample and then by output row
//! - Rank-generic: every kernel walks strides, never per-rank loops
//!
//! ## Implemented Ops
//!
//! - `execute_plan`: reshape, permute, reshape over a whole (batched) tensor
//! - `gather_view`: generalized transpose of one buffer through a strided view
//! - `prelu`: `max(x, 0) + alpha * min(x, 0)` with a pre-tiled `alpha`

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::layout::{LayoutPlan, StridedView};
use crate::tensors::Tensor;

/// Runs a layout plan on the host.
///
/// # Returns
/// - A new tensor of shape `plan.output()`
/// - [`Error::ShapeMismatch`] if `input` is not the shape the plan was built for
pub fn execute_plan(plan: &LayoutPlan, input: &Tensor<f32>) -> Result<Tensor<f32>> {
    if input.shape() != plan.input() {
        return Err(Error::ShapeMismatch {
            expected: plan.input().dims().to_vec(),
            found: input.shape().dims().to_vec(),
        });
    }

    let source = plan.source_view();
    let sample_in = plan.sample_input_len();
    let sample_out = plan.sample_output_len();
    let mut data = vec![0.0f32; plan.output().len()];

    data.par_chunks_mut(sample_out)
        .zip(input.data().par_chunks(sample_in))
        .for_each(|(out, sample)| gather_into(sample, &source, out));

    Tensor::from_shape(plan.output().clone(), data)
}

/// Generalized transpose: reads `src` through `view` in row-major order.
///
/// `view.max_offset()` must lie inside `src`.
pub fn gather_view<T>(src: &[T], view: &StridedView) -> Vec<T>
where
    T: Copy + Default + Send + Sync,
{
    let mut out = vec![T::default(); view.len()];
    gather_into(src, view, &mut out);
    out
}

fn gather_into<T>(src: &[T], view: &StridedView, out: &mut [T])
where
    T: Copy + Send + Sync,
{
    debug_assert_eq!(out.len(), view.len());
    let (row_len, step) = view.innermost();
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, dst)| {
            let mut at = view.offset_at(row * row_len);
            for value in dst.iter_mut() {
                *value = src[at];
                at += step;
            }
        });
}

/// Parametric ReLU with an `alpha` already tiled to the shape of `x`.
///
/// # Returns
/// - `max(x, 0) + alpha * min(x, 0)`, elementwise
/// - [`Error::ShapeMismatch`] if the shapes differ
pub fn prelu(x: &Tensor<f32>, alpha: &Tensor<f32>) -> Result<Tensor<f32>> {
    if x.shape() != alpha.shape() {
        return Err(Error::ShapeMismatch {
            expected: x.shape().dims().to_vec(),
            found: alpha.shape().dims().to_vec(),
        });
    }
    let data = x
        .data()
        .par_iter()
        .zip(alpha.data().par_iter())
        .map(|(&v, &a)| v.max(0.0) + a * v.min(0.0))
        .collect();
    Tensor::from_shape(x.shape().clone(), data)
}
