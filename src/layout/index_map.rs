//! Gather tables and their per-operator cache.
//!
//! An [`IndexMap`] says, for every flat output position, which flat input
//! position to read. Maps depend only on shapes, so they are built once per
//! distinct `(input shape, permutation)` and reused across calls.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::layout::permutation::Permutation;
use crate::layout::view::StridedView;
use crate::tensors::{Shape, Tensor};

/// `i32` gather table laid out in the output shape.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMap(Tensor<i32>);

impl IndexMap {
    pub fn shape(&self) -> &Shape {
        self.0.shape()
    }

    pub fn values(&self) -> &[i32] {
        self.0.data()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lifts a per-sample map over a leading batch axis.
    ///
    /// Entry `n * len + p` of the result reads `n * input_sample_len + map[p]`.
    pub fn batched(&self, batch: usize, input_sample_len: usize) -> Result<Self> {
        let shape = self.shape().with_leading(batch)?;
        check_offset_range(batch * input_sample_len)?;
        let mut values = Vec::with_capacity(shape.len());
        for n in 0..batch {
            let base = (n * input_sample_len) as i32;
            values.extend(self.values().iter().map(|&v| base + v));
        }
        Ok(Self(Tensor::from_shape(shape, values)?))
    }
}

fn check_offset_range(len: usize) -> Result<()> {
    if len > i32::MAX as usize {
        Err(Error::IndexOverflow { len })
    } else {
        Ok(())
    }
}

/// Reads `input` through `view`, laying the offsets out in the view's shape.
///
/// The view must stay inside the input buffer. For a contiguous view of the
/// same size this is the identity map.
pub fn build_view_map(input: &Shape, view: &StridedView) -> Result<IndexMap> {
    check_offset_range(input.len())?;
    if view.max_offset() >= input.len() {
        return Err(Error::ElementCount { shape: view.shape().to_vec(), len: input.len() });
    }
    let shape = Shape::new(view.shape())?;
    let mut values = Vec::with_capacity(shape.len());
    view.for_each_offset(|offset| values.push(offset as i32));
    Ok(IndexMap(Tensor::from_shape(shape, values)?))
}

/// Identity map from `input` to `target`; element counts must agree.
pub fn build_reshape_map(input: &Shape, target: &Shape) -> Result<IndexMap> {
    if input.len() != target.len() {
        return Err(Error::ElementCount { shape: target.dims().to_vec(), len: input.len() });
    }
    check_offset_range(input.len())?;
    let values = (0..target.len() as i32).collect();
    Ok(IndexMap(Tensor::from_shape(target.clone(), values)?))
}

/// Map realizing an axis permutation of `input`.
///
/// Output coordinate `oc` reads input coordinate `ic` with
/// `ic[permutation[k]] = oc[k]`.
pub fn build_permute_map(input: &Shape, permutation: &Permutation) -> Result<IndexMap> {
    if permutation.rank() != input.rank() {
        return Err(Error::InvalidPermutation {
            axes: permutation.axes().to_vec(),
            rank: input.rank(),
        });
    }
    build_view_map(input, &StridedView::contiguous(input.dims()).permuted(permutation))
}

/// The gather pass a map feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReshapeIn,
    Permute,
    ReshapeOut,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::ReshapeIn => "reshape_in",
            Stage::Permute => "permute",
            Stage::ReshapeOut => "reshape_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapKey {
    pub stage: Stage,
    pub input: Shape,
    pub permutation: Permutation,
}

/// Build-if-absent store of index maps owned by one operator.
#[derive(Debug, Default)]
pub struct IndexMapCache {
    entries: HashMap<MapKey, Arc<IndexMap>>,
    builds: usize,
}

impl IndexMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached map for `key`, running `build` only on a miss.
    pub fn get_or_build(
        &mut self,
        key: MapKey,
        build: impl FnOnce() -> Result<IndexMap>,
    ) -> Result<Arc<IndexMap>> {
        if let Some(map) = self.entries.get(&key) {
            tracing::debug!(stage = key.stage.label(), input = %key.input, "index map cache hit");
            return Ok(Arc::clone(map));
        }
        tracing::debug!(stage = key.stage.label(), input = %key.input, "building index map");
        let map = Arc::new(build()?);
        self.builds += 1;
        self.entries.insert(key, Arc::clone(&map));
        Ok(map)
    }

    /// Looks up a map without building it.
    pub fn get(&self, key: &MapKey) -> Option<Arc<IndexMap>> {
        self.entries.get(key).map(Arc::clone)
    }

    pub fn contains(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of maps built over the cache's lifetime.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every map not built for `(input, permutation)`.
    pub fn retain_only(&mut self, input: &Shape, permutation: &Permutation) {
        self.entries
            .retain(|key, _| key.input == *input && key.permutation == *permutation);
    }
}
