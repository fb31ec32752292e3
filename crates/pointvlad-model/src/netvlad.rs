use pointvlad_nn::{
    activation::softmax_rows,
    init::randn_scaled,
    linear::{matmul, matmul_transposed_lhs},
    norm::{l2_normalize, l2_normalize_columns},
    state::{join_key, load_param, save_param, LoadReport, Parameterized, StateDict},
    BatchNorm, ExecutionContext, Mode,
};
use rand::Rng;

use crate::{error::ModelError, gating::GatingContext};

/// Dimensions and switches of the aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetVladConfig {
    /// Width `D` of the per-point embeddings.
    pub feature_size: usize,
    /// Number of soft clusters `C`.
    pub cluster_size: usize,
    /// Width of the projected descriptor.
    pub output_dim: usize,
    /// Apply context gating after the projection.
    pub gating: bool,
    /// Normalize the assignment logits (and the gates) with batch norm
    /// instead of adding learned biases.
    pub add_batch_norm: bool,
}

impl NetVladConfig {
    fn validate(&self) -> Result<(), ModelError> {
        if self.feature_size == 0 || self.cluster_size == 0 || self.output_dim == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "aggregation dimensions must be > 0, got feature_size={}, cluster_size={}, output_dim={}",
                self.feature_size, self.cluster_size, self.output_dim
            )));
        }
        Ok(())
    }
}

/// Learned orderless aggregation of `[N, D]` embeddings into one descriptor.
///
/// Soft-assigns every embedding to `C` clusters, sums the assigned embeddings
/// per cluster and subtracts the assignment mass times a learned anchor
/// (residual VLAD). The `[D, C]` result is normalized per cluster, flattened,
/// normalized again, projected to `output_dim`, batch normalized and
/// optionally gated.
#[derive(Debug, Clone)]
pub struct NetVladLoupe {
    config: NetVladConfig,
    /// `[D, C]` assignment weights.
    cluster_weights: Vec<f32>,
    /// `[D, C]` per-cluster anchors.
    cluster_weights2: Vec<f32>,
    /// `[C * D, O]` projection.
    hidden1_weights: Vec<f32>,
    cluster_biases: Option<Vec<f32>>,
    bn1: Option<BatchNorm>,
    bn2: BatchNorm,
    context_gating: Option<GatingContext>,
}

impl NetVladLoupe {
    /// Create the aggregation with `randn / sqrt(D)` parameters.
    pub fn new<R: Rng + ?Sized>(config: NetVladConfig, rng: &mut R) -> Result<Self, ModelError> {
        config.validate()?;
        let NetVladConfig {
            feature_size: d,
            cluster_size: c,
            output_dim: o,
            ..
        } = config;
        let scale = 1.0 / (d as f32).sqrt();

        let cluster_weights = randn_scaled(d * c, scale, rng);
        let cluster_weights2 = randn_scaled(d * c, scale, rng);
        let hidden1_weights = randn_scaled(c * d * o, scale, rng);
        let (cluster_biases, bn1) = if config.add_batch_norm {
            (None, Some(BatchNorm::new(c)))
        } else {
            (Some(randn_scaled(c, scale, rng)), None)
        };
        let context_gating = config
            .gating
            .then(|| GatingContext::new(o, config.add_batch_norm, rng));

        Ok(Self {
            config,
            cluster_weights,
            cluster_weights2,
            hidden1_weights,
            cluster_biases,
            bn1,
            bn2: BatchNorm::new(o),
            context_gating,
        })
    }

    /// The configuration the aggregation was built with.
    pub fn config(&self) -> &NetVladConfig {
        &self.config
    }

    /// Width of the per-point embeddings it consumes.
    #[inline]
    pub fn feature_size(&self) -> usize {
        self.config.feature_size
    }

    /// Width of the descriptors it produces.
    #[inline]
    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }

    /// Aggregate `[batch, n, D]` embeddings into `[batch, output_dim]` descriptors.
    pub fn forward(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        x: &[f32],
        batch: usize,
        n: usize,
    ) -> Result<Vec<f32>, ModelError> {
        let (d, c, o) = (
            self.config.feature_size,
            self.config.cluster_size,
            self.config.output_dim,
        );
        if x.len() != batch * n * d {
            return Err(ModelError::ShapeMismatch(vec![batch, n, d], vec![x.len()]));
        }
        if n == 0 && batch > 0 {
            return Err(ModelError::ShapeMismatch(vec![batch, 1, d], vec![batch, 0, d]));
        }

        // soft assignment [B * N, C]
        let rows = batch * n;
        let mut activation = vec![0.0; rows * c];
        matmul(x, &self.cluster_weights, &mut activation, rows, d, c);
        if let Some(bn) = self.bn1.as_mut() {
            bn.forward(&mut activation, rows, mode)?;
        } else if let Some(biases) = &self.cluster_biases {
            for row in activation.chunks_exact_mut(c) {
                row.iter_mut().zip(biases.iter()).for_each(|(a, b)| *a += b);
            }
        }
        softmax_rows(&mut activation, c);

        // residual aggregation, one [D, C] matrix per sample
        let anchors = &self.cluster_weights2;
        let vlad = ctx
            .map_indices(batch, |b| {
                let act = &activation[b * n * c..(b + 1) * n * c];
                let feats = &x[b * n * d..(b + 1) * n * d];

                let mut a_sum = vec![0.0f32; c];
                for row in act.chunks_exact(c) {
                    a_sum.iter_mut().zip(row.iter()).for_each(|(s, v)| *s += v);
                }

                let mut aggregated = vec![0.0; c * d];
                matmul_transposed_lhs(act, feats, &mut aggregated, c, n, d);

                let mut residual = vec![0.0; d * c];
                for di in 0..d {
                    for ci in 0..c {
                        residual[di * c + ci] =
                            aggregated[ci * d + di] - a_sum[ci] * anchors[di * c + ci];
                    }
                }

                l2_normalize_columns(&mut residual, d, c);
                l2_normalize(&mut residual);
                residual
            })
            .concat();

        let mut descriptors = vec![0.0; batch * o];
        matmul(&vlad, &self.hidden1_weights, &mut descriptors, batch, c * d, o);
        self.bn2.forward(&mut descriptors, batch, mode)?;

        match self.context_gating.as_mut() {
            Some(gating) => gating.forward(mode, &descriptors, batch),
            None => Ok(descriptors),
        }
    }
}

impl Parameterized for NetVladLoupe {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        let (d, c, o) = (
            self.config.feature_size,
            self.config.cluster_size,
            self.config.output_dim,
        );
        save_param(state, prefix, "cluster_weights", &[d, c], &self.cluster_weights);
        save_param(state, prefix, "cluster_weights2", &[1, d, c], &self.cluster_weights2);
        save_param(state, prefix, "hidden1_weights", &[c * d, o], &self.hidden1_weights);
        if let Some(biases) = &self.cluster_biases {
            save_param(state, prefix, "cluster_biases", &[c], biases);
        }
        if let Some(bn) = &self.bn1 {
            bn.save_state(&join_key(prefix, "bn1"), state);
        }
        self.bn2.save_state(&join_key(prefix, "bn2"), state);
        if let Some(gating) = &self.context_gating {
            gating.save_state(&join_key(prefix, "context_gating"), state);
        }
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        let (d, c, o) = (
            self.config.feature_size,
            self.config.cluster_size,
            self.config.output_dim,
        );
        load_param(state, prefix, "cluster_weights", &[d, c], &mut self.cluster_weights, report);
        load_param(
            state,
            prefix,
            "cluster_weights2",
            &[1, d, c],
            &mut self.cluster_weights2,
            report,
        );
        load_param(
            state,
            prefix,
            "hidden1_weights",
            &[c * d, o],
            &mut self.hidden1_weights,
            report,
        );
        if let Some(biases) = self.cluster_biases.as_mut() {
            load_param(state, prefix, "cluster_biases", &[c], biases, report);
        }
        if let Some(bn) = self.bn1.as_mut() {
            bn.load_state(&join_key(prefix, "bn1"), state, report);
        }
        self.bn2.load_state(&join_key(prefix, "bn2"), state, report);
        if let Some(gating) = self.context_gating.as_mut() {
            gating.load_state(&join_key(prefix, "context_gating"), state, report);
        }
    }
}
