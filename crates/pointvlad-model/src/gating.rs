use pointvlad_nn::{
    activation::sigmoid,
    init::randn_scaled,
    linear::matmul,
    state::{join_key, load_param, save_param, LoadReport, Parameterized, StateDict},
    BatchNorm, Mode,
};
use rand::Rng;

use crate::error::ModelError;

/// Context gating: `x * sigmoid(norm(x W))`, element-wise.
///
/// `norm` is a batch norm when enabled, a learned bias otherwise.
#[derive(Debug, Clone)]
pub struct GatingContext {
    dim: usize,
    gating_weights: Vec<f32>,
    gating_biases: Option<Vec<f32>>,
    bn1: Option<BatchNorm>,
}

impl GatingContext {
    /// Create a gate over `dim`-wide vectors.
    pub fn new<R: Rng + ?Sized>(dim: usize, add_batch_norm: bool, rng: &mut R) -> Self {
        let scale = 1.0 / (dim.max(1) as f32).sqrt();
        let gating_weights = randn_scaled(dim * dim, scale, rng);
        let (gating_biases, bn1) = if add_batch_norm {
            (None, Some(BatchNorm::new(dim)))
        } else {
            (Some(randn_scaled(dim, scale, rng)), None)
        };
        Self {
            dim,
            gating_weights,
            gating_biases,
            bn1,
        }
    }

    /// Width of the gated vectors.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Gate `rows` vectors of width [`GatingContext::dim`].
    pub fn forward(&mut self, mode: Mode, x: &[f32], rows: usize) -> Result<Vec<f32>, ModelError> {
        let dim = self.dim;
        if x.len() != rows * dim {
            return Err(ModelError::ShapeMismatch(vec![rows, dim], vec![x.len()]));
        }

        let mut gates = vec![0.0; rows * dim];
        matmul(x, &self.gating_weights, &mut gates, rows, dim, dim);

        if let Some(bn) = self.bn1.as_mut() {
            bn.forward(&mut gates, rows, mode)?;
        } else if let Some(biases) = &self.gating_biases {
            for row in gates.chunks_exact_mut(dim) {
                row.iter_mut().zip(biases.iter()).for_each(|(g, b)| *g += b);
            }
        }
        sigmoid(&mut gates);

        gates.iter_mut().zip(x.iter()).for_each(|(g, v)| *g *= v);
        Ok(gates)
    }
}

impl Parameterized for GatingContext {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        save_param(
            state,
            prefix,
            "gating_weights",
            &[self.dim, self.dim],
            &self.gating_weights,
        );
        if let Some(biases) = &self.gating_biases {
            save_param(state, prefix, "gating_biases", &[self.dim], biases);
        }
        if let Some(bn) = &self.bn1 {
            bn.save_state(&join_key(prefix, "bn1"), state);
        }
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        let dim = self.dim;
        load_param(
            state,
            prefix,
            "gating_weights",
            &[dim, dim],
            &mut self.gating_weights,
            report,
        );
        if let Some(biases) = self.gating_biases.as_mut() {
            load_param(state, prefix, "gating_biases", &[dim], biases, report);
        }
        if let Some(bn) = self.bn1.as_mut() {
            bn.load_state(&join_key(prefix, "bn1"), state, report);
        }
    }
}
