use pointvlad_nn::{
    activation::relu,
    linear::matmul,
    state::{LoadReport, Parameterized, StateDict},
    BatchNorm, ExecutionContext, Linear, Mode,
};
use rand::Rng;

use crate::{
    config::{ExtractorKind, ModelConfig},
    error::ModelError,
    local_graph::LocalGraphFeatures,
    pointnet::PointNetFeatures,
    types::PointCloudBatch,
};

/// Point cloud in, per-point embedding sequence out.
pub trait PointFeatureExtractor: Parameterized {
    /// Width `D` of every per-point embedding.
    fn embedding_dim(&self) -> usize;

    /// Compute `[B, N, D]` embeddings, one row per input point, in input order.
    fn extract(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        batch: &PointCloudBatch,
    ) -> Result<Vec<f32>, ModelError>;
}

/// The extractor variants selectable from [`ModelConfig`].
#[derive(Debug, Clone)]
pub enum Extractor {
    /// Shared pointwise layers on aligned coordinates.
    PointNet(PointNetFeatures),
    /// Edge convolutions over a k-nearest-neighbor graph.
    LocalGraph(LocalGraphFeatures),
}

impl Extractor {
    /// Build the variant named by `config.extractor`.
    pub fn from_config<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(match config.extractor {
            ExtractorKind::PointNet => Self::PointNet(PointNetFeatures::new(
                config.emb_dims,
                config.input_transform,
                config.feature_transform,
                rng,
            )),
            ExtractorKind::LocalGraph { k } => Self::LocalGraph(LocalGraphFeatures::new(
                config.emb_dims,
                k,
                config.input_transform,
                config.feature_transform,
                rng,
            )?),
        })
    }
}

impl PointFeatureExtractor for Extractor {
    fn embedding_dim(&self) -> usize {
        match self {
            Self::PointNet(e) => e.embedding_dim(),
            Self::LocalGraph(e) => e.embedding_dim(),
        }
    }

    fn extract(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        batch: &PointCloudBatch,
    ) -> Result<Vec<f32>, ModelError> {
        match self {
            Self::PointNet(e) => e.extract(ctx, mode, batch),
            Self::LocalGraph(e) => e.extract(ctx, mode, batch),
        }
    }
}

impl Parameterized for Extractor {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        match self {
            Self::PointNet(e) => e.save_state(prefix, state),
            Self::LocalGraph(e) => e.save_state(prefix, state),
        }
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        match self {
            Self::PointNet(e) => e.load_state(prefix, state, report),
            Self::LocalGraph(e) => e.load_state(prefix, state, report),
        }
    }
}

/// Pointwise layer followed by batch norm and, optionally, ReLU.
pub(crate) fn pointwise_bn(
    layer: &Linear,
    bn: &mut BatchNorm,
    x: &[f32],
    rows: usize,
    mode: Mode,
    activate: bool,
) -> Result<Vec<f32>, ModelError> {
    let mut y = layer.forward(x, rows)?;
    bn.forward(&mut y, rows, mode)?;
    if activate {
        relu(&mut y);
    }
    Ok(y)
}

/// Right-multiply the `[n, k]` rows of every sample by its own `[k, k]` matrix.
pub(crate) fn apply_feature_transform(
    ctx: &ExecutionContext,
    x: &[f32],
    transforms: &[f32],
    batch: usize,
    n: usize,
    k: usize,
) -> Vec<f32> {
    ctx.map_indices(batch, |b| {
        let mut out = vec![0.0; n * k];
        matmul(
            &x[b * n * k..(b + 1) * n * k],
            &transforms[b * k * k..(b + 1) * k * k],
            &mut out,
            n,
            k,
            k,
        );
        out
    })
    .concat()
}
