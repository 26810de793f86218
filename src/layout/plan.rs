//! Layout plans shared by the CPU and device executors.

use crate::error::{Error, Result};
use crate::layout::coords::{MAX_RANK, check_rank};
use crate::layout::index_map::Stage;
use crate::layout::permutation::Permutation;
use crate::layout::view::StridedView;
use crate::tensors::Shape;

/// Structural description of one reshape, permute, reshape pipeline for a
/// concrete input shape.
///
/// Built before any data moves. Both executors consume the same plan:
/// the CPU walks [`LayoutPlan::source_view`] directly, the GPU turns each
/// stage into an index map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    input: Shape,
    output: Shape,
    batch: Option<usize>,
    view: StridedView,
    permutation: Permutation,
    sample_output: Shape,
}

impl LayoutPlan {
    /// Assembles a plan.
    ///
    /// `view` reads one sample of `input` (the whole input when `batched`
    /// is false). The permuted view must hold exactly as many elements as
    /// `sample_output`.
    pub fn new(
        input: Shape,
        batched: bool,
        view: StridedView,
        permutation: Permutation,
        sample_output: Vec<usize>,
    ) -> Result<Self> {
        let (batch, sample_input) = if batched {
            match input.split_first() {
                Some((batch, sample)) => (Some(batch), sample),
                None => return Err(Error::InvalidRank { rank: 0, min: 1, max: MAX_RANK + 1 }),
            }
        } else {
            (None, input.clone())
        };

        check_rank(view.rank())?;
        if permutation.rank() != view.rank() {
            return Err(Error::InvalidPermutation {
                axes: permutation.axes().to_vec(),
                rank: view.rank(),
            });
        }
        if view.max_offset() >= sample_input.len() {
            return Err(Error::ElementCount {
                shape: view.shape().to_vec(),
                len: sample_input.len(),
            });
        }
        let sample_output = Shape::new(sample_output)?;
        if sample_output.len() != view.len() {
            return Err(Error::ElementCount {
                shape: sample_output.into_dims(),
                len: view.len(),
            });
        }
        let output = match batch {
            Some(batch) => sample_output.with_leading(batch)?,
            None => sample_output.clone(),
        };

        Ok(Self { input, output, batch, view, permutation, sample_output })
    }

    pub fn input(&self) -> &Shape {
        &self.input
    }

    pub fn output(&self) -> &Shape {
        &self.output
    }

    /// Leading batch extent, if the input carries one.
    pub fn batch(&self) -> Option<usize> {
        self.batch
    }

    /// Number of samples processed independently.
    pub fn samples(&self) -> usize {
        self.batch.unwrap_or(1)
    }

    /// Per-sample reshape-in view over the sample buffer.
    pub fn view(&self) -> &StridedView {
        &self.view
    }

    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    pub fn sample_input_len(&self) -> usize {
        self.input.len() / self.samples()
    }

    pub fn sample_output(&self) -> &Shape {
        &self.sample_output
    }

    pub fn sample_output_len(&self) -> usize {
        self.sample_output.len()
    }

    /// Per-sample shape after the permute stage.
    pub fn permuted_dims(&self) -> Vec<usize> {
        self.permutation.apply(self.view.shape())
    }

    /// Composition of the reshape-in view and the permutation.
    ///
    /// Walking it in row-major order yields, for every output position of
    /// one sample, the input offset to read.
    pub fn source_view(&self) -> StridedView {
        self.view.permuted(&self.permutation)
    }

    /// Full shape produced by `stage`, batch axis included.
    pub fn stage_output(&self, stage: Stage) -> Result<Shape> {
        let sample = match stage {
            Stage::ReshapeIn => Shape::new(self.view.shape())?,
            Stage::Permute => Shape::new(self.permuted_dims())?,
            Stage::ReshapeOut => self.sample_output.clone(),
        };
        match self.batch {
            Some(batch) => sample.with_leading(batch),
            None => Ok(sample),
        }
    }
}

/// Progress of one operator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ShapeValidated,
    MapsResolved,
    ReshapeIn,
    Permute,
    ReshapeOut,
    DeviceTransfer,
    Done,
}
