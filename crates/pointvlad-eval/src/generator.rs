use std::path::Path;
use std::time::Instant;

use pointvlad_model::{DescriptorModel, Descriptors};
use pointvlad_nn::{ExecutionContext, Mode};

use crate::{config::EvalConfig, error::EvalError, loader::PointCloudLoader, registry::Submap};

/// Runs a descriptor model over every point cloud of a submap in fixed-size batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDescriptorGenerator {
    batch_size: usize,
}

impl BatchDescriptorGenerator {
    /// Create a generator feeding `batch_size` clouds per model call.
    pub fn new(batch_size: usize) -> Result<Self, EvalError> {
        if batch_size == 0 {
            return Err(EvalError::InvalidConfig("batch size must be > 0".to_string()));
        }
        Ok(Self { batch_size })
    }

    /// Create a generator with the batch size of `config`.
    pub fn from_config(config: &EvalConfig) -> Result<Self, EvalError> {
        Self::new(config.batch_size())
    }

    /// Clouds per model call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// One descriptor per point cloud of `submap`, in submap order.
    ///
    /// Full batches come first, then one final partial batch for the
    /// remainder. The model always runs in [`Mode::Eval`].
    pub fn generate<M, L>(
        &self,
        ctx: &ExecutionContext,
        model: &mut M,
        loader: &L,
        submap: &Submap,
    ) -> Result<Descriptors, EvalError>
    where
        M: DescriptorModel + ?Sized,
        L: PointCloudLoader + ?Sized,
    {
        let files = submap.files().collect::<Vec<&Path>>();
        let start = Instant::now();
        ctx.release_cache();

        let mut descriptors = Descriptors::empty(model.descriptor_dim());
        let num_full = files.len() / self.batch_size;
        let edge = num_full * self.batch_size;

        for chunk in files[..edge].chunks_exact(self.batch_size) {
            let batch = loader.load(chunk)?;
            descriptors.append(&model.forward(ctx, Mode::Eval, &batch)?)?;
        }
        let remainder = &files[edge..];
        if !remainder.is_empty() {
            let batch = loader.load(remainder)?;
            descriptors.append(&model.forward(ctx, Mode::Eval, &batch)?)?;
        }

        ctx.release_cache();
        log::debug!(
            "{}: {} descriptors from {} full batches and {} remaining clouds in {:?}",
            submap.name,
            descriptors.len(),
            num_full,
            remainder.len(),
            start.elapsed()
        );

        if descriptors.len() != files.len() {
            return Err(EvalError::CountMismatch(files.len(), descriptors.len()));
        }
        Ok(descriptors)
    }
}
