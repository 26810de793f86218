//! Texture-resident layout executor.
//!
//! Realizes a [`LayoutPlan`] as three gather passes, one per stage. The maps
//! for a plan are built once, uploaded once and kept on the device together
//! with the two intermediate textures until a plan with a different key
//! arrives, at which point all of them are released.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::layout::{
    IndexMap, IndexMapCache, LayoutPlan, MapKey, Permutation, Phase, Stage, build_permute_map,
    build_reshape_map, build_view_map,
};
use crate::ops::texture::{DeviceTensor, DeviceTexture, TextureDevice, Texels};
use crate::tensors::Shape;

/// Device textures held for one `(input shape, permutation)` key.
struct Staged<T> {
    input: Shape,
    permutation: Permutation,
    maps: [T; 3],
    after_reshape: T,
    after_permute: T,
}

/// Runs layout plans on a [`TextureDevice`].
pub struct GpuLayoutExecutor<D: TextureDevice> {
    device: Arc<D>,
    maps: IndexMapCache,
    staged: Option<Staged<D::Texture>>,
}

impl<D: TextureDevice> GpuLayoutExecutor<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device, maps: IndexMapCache::new(), staged: None }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Index maps built so far.
    pub fn map_builds(&self) -> usize {
        self.maps.builds()
    }

    /// The cached map for `stage` of `plan`, if one has been built.
    pub fn cached_map(&self, plan: &LayoutPlan, stage: Stage) -> Option<Arc<IndexMap>> {
        self.maps.get(&key_for(plan, stage))
    }

    /// Executes `plan` on a device-resident input.
    ///
    /// The output texture is freshly allocated and owned by the caller; the
    /// maps and intermediates stay with the executor.
    pub fn execute(
        &mut self,
        plan: &LayoutPlan,
        input: &DeviceTensor<D::Texture>,
    ) -> Result<DeviceTensor<D::Texture>> {
        if input.shape() != plan.input() {
            return Err(Error::ShapeMismatch {
                expected: plan.input().dims().to_vec(),
                found: input.shape().dims().to_vec(),
            });
        }

        let device = Arc::clone(&self.device);
        let output_layout = device.layout_for(plan.output().dims())?;
        let staged = self.resolve(plan)?;
        tracing::trace!(phase = ?Phase::MapsResolved);

        let [reshape_in, permute, reshape_out] = &staged.maps;
        let mut output = device.allocate(output_layout)?;

        tracing::trace!(phase = ?Phase::ReshapeIn);
        device.gather(input.texture(), reshape_in, &mut staged.after_reshape)?;
        tracing::trace!(phase = ?Phase::Permute);
        device.gather(&staged.after_reshape, permute, &mut staged.after_permute)?;
        tracing::trace!(phase = ?Phase::ReshapeOut);
        device.gather(&staged.after_permute, reshape_out, &mut output)?;
        tracing::debug!(input = %plan.input(), output = %plan.output(), "layout passes complete");

        DeviceTensor::new(output, plan.output().clone())
    }

    /// Returns the staged textures for `plan`, building and uploading them
    /// on a key change.
    fn resolve(&mut self, plan: &LayoutPlan) -> Result<&mut Staged<D::Texture>> {
        let staged = match self.staged.take() {
            Some(staged)
                if staged.input == *plan.input() && staged.permutation == *plan.permutation() =>
            {
                staged
            }
            previous => {
                // Release the previous key's textures before allocating new ones.
                drop(previous);
                self.maps.retain_only(plan.input(), plan.permutation());
                self.stage(plan)?
            }
        };
        Ok(self.staged.insert(staged))
    }

    fn stage(&mut self, plan: &LayoutPlan) -> Result<Staged<D::Texture>> {
        let maps = [
            self.upload_map(plan, Stage::ReshapeIn)?,
            self.upload_map(plan, Stage::Permute)?,
            self.upload_map(plan, Stage::ReshapeOut)?,
        ];
        Ok(Staged {
            input: plan.input().clone(),
            permutation: plan.permutation().clone(),
            after_reshape: self.device.allocate(maps[0].layout())?,
            after_permute: self.device.allocate(maps[1].layout())?,
            maps,
        })
    }

    /// Uploads the map for `stage`, laid out like the texture that stage writes.
    fn upload_map(&mut self, plan: &LayoutPlan, stage: Stage) -> Result<D::Texture> {
        let layout = self.device.layout_for(plan.stage_output(stage)?.dims())?;
        let map = self
            .maps
            .get_or_build(key_for(plan, stage), || build_stage_map(plan, stage))?;
        self.device.upload(layout, Texels::Int(map.values()))
    }
}

fn key_for(plan: &LayoutPlan, stage: Stage) -> MapKey {
    MapKey { stage, input: plan.input().clone(), permutation: plan.permutation().clone() }
}

/// Builds the full-tensor map feeding `stage`, lifted over the batch axis.
pub fn build_stage_map(plan: &LayoutPlan, stage: Stage) -> Result<IndexMap> {
    let view_shape = Shape::new(plan.view().shape())?;
    let permuted = Shape::new(plan.permuted_dims())?;
    let (map, input_sample_len) = match stage {
        Stage::ReshapeIn => {
            let sample = Shape::new([plan.sample_input_len()])?;
            (build_view_map(&sample, plan.view())?, plan.sample_input_len())
        }
        Stage::Permute => (build_permute_map(&view_shape, plan.permutation())?, view_shape.len()),
        Stage::ReshapeOut => (build_reshape_map(&permuted, plan.sample_output())?, permuted.len()),
    };
    match plan.batch() {
        Some(batch) => map.batched(batch, input_sample_len),
        None => Ok(map),
    }
}
