use glam::{Mat3, Vec3};
use pointvlad_nn::{
    state::{join_key, LoadReport, Parameterized, StateDict},
    BatchNorm, ExecutionContext, Linear, Mode,
};
use rand::Rng;

use crate::{
    error::ModelError,
    extractor::{apply_feature_transform, pointwise_bn, PointFeatureExtractor},
    stn::SpatialTransformer,
    types::PointCloudBatch,
};

/// Width of the intermediate features the feature alignment acts on.
pub(crate) const FEATURE_ALIGN_DIM: usize = 64;

/// PointNet per-point features.
///
/// Coordinates are optionally aligned by a regressed 3x3 matrix, then go
/// through shared pointwise layers `3 -> 64 -> 64 -> 64 -> 128 -> D` with a
/// batch norm after each and ReLU after all but the last. The optional 64x64
/// feature alignment sits after the second layer. Embeddings are not pooled.
#[derive(Debug, Clone)]
pub struct PointNetFeatures {
    emb_dims: usize,
    stn: Option<SpatialTransformer>,
    feature_trans: Option<SpatialTransformer>,
    conv1: Linear,
    conv2: Linear,
    conv3: Linear,
    conv4: Linear,
    conv5: Linear,
    bn1: BatchNorm,
    bn2: BatchNorm,
    bn3: BatchNorm,
    bn4: BatchNorm,
    bn5: BatchNorm,
}

impl PointNetFeatures {
    /// Create the extractor with `emb_dims`-wide embeddings.
    pub fn new<R: Rng + ?Sized>(
        emb_dims: usize,
        input_transform: bool,
        feature_transform: bool,
        rng: &mut R,
    ) -> Self {
        let stn = input_transform.then(|| SpatialTransformer::new(3, false, rng));
        let feature_trans =
            feature_transform.then(|| SpatialTransformer::new(FEATURE_ALIGN_DIM, false, rng));
        Self {
            emb_dims,
            stn,
            feature_trans,
            conv1: Linear::new(3, 64, rng),
            conv2: Linear::new(64, FEATURE_ALIGN_DIM, rng),
            conv3: Linear::new(FEATURE_ALIGN_DIM, 64, rng),
            conv4: Linear::new(64, 128, rng),
            conv5: Linear::new(128, emb_dims, rng),
            bn1: BatchNorm::new(64),
            bn2: BatchNorm::new(FEATURE_ALIGN_DIM),
            bn3: BatchNorm::new(64),
            bn4: BatchNorm::new(128),
            bn5: BatchNorm::new(emb_dims),
        }
    }
}

/// Multiply every `[x, y, z]` row of a cloud by a row-major 3x3 matrix on the right.
pub(crate) fn align_points(cloud: &mut [f32], transform: &[f32]) {
    // p * T == T^T * p, and reading row-major T as columns yields T^T
    let m = Mat3::from_cols_slice(transform);
    for p in cloud.chunks_exact_mut(3) {
        let q = m * Vec3::from_slice(p);
        p.copy_from_slice(&q.to_array());
    }
}

/// Regress one 3x3 transform per cloud and apply it in place.
pub(crate) fn align_coordinates(
    stn: &mut SpatialTransformer,
    ctx: &ExecutionContext,
    mode: Mode,
    points: &mut [f32],
    batch: usize,
    n: usize,
) -> Result<(), ModelError> {
    let transforms = stn.forward(ctx, mode, points, batch, n)?;
    ctx.for_each_chunk_mut(points, n * 3, |b, cloud| {
        align_points(cloud, &transforms[b * 9..(b + 1) * 9])
    });
    Ok(())
}

impl PointFeatureExtractor for PointNetFeatures {
    fn embedding_dim(&self) -> usize {
        self.emb_dims
    }

    fn extract(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        batch: &PointCloudBatch,
    ) -> Result<Vec<f32>, ModelError> {
        let (b, n) = (batch.batch_size(), batch.num_points());
        let rows = b * n;

        let mut points = batch.as_slice().to_vec();
        if let Some(stn) = self.stn.as_mut() {
            align_coordinates(stn, ctx, mode, &mut points, b, n)?;
        }

        let x = pointwise_bn(&self.conv1, &mut self.bn1, &points, rows, mode, true)?;
        let mut x = pointwise_bn(&self.conv2, &mut self.bn2, &x, rows, mode, true)?;

        if let Some(feature_trans) = self.feature_trans.as_mut() {
            let transforms = feature_trans.forward(ctx, mode, &x, b, n)?;
            x = apply_feature_transform(ctx, &x, &transforms, b, n, FEATURE_ALIGN_DIM);
        }

        let x = pointwise_bn(&self.conv3, &mut self.bn3, &x, rows, mode, true)?;
        let x = pointwise_bn(&self.conv4, &mut self.bn4, &x, rows, mode, true)?;
        pointwise_bn(&self.conv5, &mut self.bn5, &x, rows, mode, false)
    }
}

impl Parameterized for PointNetFeatures {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        if let Some(stn) = &self.stn {
            stn.save_state(&join_key(prefix, "stn"), state);
        }
        if let Some(feature_trans) = &self.feature_trans {
            feature_trans.save_state(&join_key(prefix, "feature_trans"), state);
        }
        let layers = [&self.conv1, &self.conv2, &self.conv3, &self.conv4, &self.conv5];
        for (i, layer) in layers.into_iter().enumerate() {
            layer.save_state(&join_key(prefix, &format!("conv{}", i + 1)), state);
        }
        let norms = [&self.bn1, &self.bn2, &self.bn3, &self.bn4, &self.bn5];
        for (i, norm) in norms.into_iter().enumerate() {
            norm.save_state(&join_key(prefix, &format!("bn{}", i + 1)), state);
        }
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        if let Some(stn) = self.stn.as_mut() {
            stn.load_state(&join_key(prefix, "stn"), state, report);
        }
        if let Some(feature_trans) = self.feature_trans.as_mut() {
            feature_trans.load_state(&join_key(prefix, "feature_trans"), state, report);
        }
        let layers = [
            &mut self.conv1,
            &mut self.conv2,
            &mut self.conv3,
            &mut self.conv4,
            &mut self.conv5,
        ];
        for (i, layer) in layers.into_iter().enumerate() {
            layer.load_state(&join_key(prefix, &format!("conv{}", i + 1)), state, report);
        }
        let norms = [
            &mut self.bn1,
            &mut self.bn2,
            &mut self.bn3,
            &mut self.bn4,
            &mut self.bn5,
        ];
        for (i, norm) in norms.into_iter().enumerate() {
            norm.load_state(&join_key(prefix, &format!("bn{}", i + 1)), state, report);
        }
    }
}
