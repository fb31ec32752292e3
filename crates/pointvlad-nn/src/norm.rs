use crate::{
    context::Mode,
    error::NnError,
    state::{load_param, save_param, LoadReport, Parameterized, StateDict},
};

/// Lower bound on the norm used by [`l2_normalize`].
pub const L2_NORM_EPS: f32 = 1e-12;

/// Per-channel batch normalization over the rows of a `[rows, channels]` matrix.
///
/// Covers both the 1d (`[B, C]`) and the 2d (`[B, C, N, 1]`) variants of the
/// reference framework: for per-point features the statistics are taken over
/// all `B * N` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    num_features: usize,
    eps: f32,
    momentum: f32,
    weight: Vec<f32>,
    bias: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
}

impl BatchNorm {
    /// Create a batch norm layer with unit scale, zero shift and identity running statistics.
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: 1e-5,
            momentum: 0.1,
            weight: vec![1.0; num_features],
            bias: vec![0.0; num_features],
            running_mean: vec![0.0; num_features],
            running_var: vec![1.0; num_features],
        }
    }

    /// Number of normalized channels.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Learned per-channel scale.
    pub fn weight_mut(&mut self) -> &mut [f32] {
        &mut self.weight
    }

    /// Learned per-channel shift.
    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Running mean used in evaluation mode.
    pub fn running_mean(&self) -> &[f32] {
        &self.running_mean
    }

    /// Running variance used in evaluation mode.
    pub fn running_var(&self) -> &[f32] {
        &self.running_var
    }

    /// Mutable access to the running mean.
    pub fn running_mean_mut(&mut self) -> &mut [f32] {
        &mut self.running_mean
    }

    /// Mutable access to the running variance.
    pub fn running_var_mut(&mut self) -> &mut [f32] {
        &mut self.running_var
    }

    /// Normalize `x` in place.
    ///
    /// In [`Mode::Train`] the biased batch statistics normalize the input and the
    /// running statistics are updated with the unbiased variance. In
    /// [`Mode::Eval`] the running statistics are used and left untouched.
    pub fn forward(&mut self, x: &mut [f32], rows: usize, mode: Mode) -> Result<(), NnError> {
        let channels = self.num_features;
        if x.len() != rows * channels {
            return Err(NnError::ShapeMismatch(vec![rows, channels], vec![x.len()]));
        }

        let (mean, var) = match mode {
            Mode::Eval => (
                self.running_mean.iter().map(|&v| v as f64).collect::<Vec<_>>(),
                self.running_var.iter().map(|&v| v as f64).collect::<Vec<_>>(),
            ),
            Mode::Train => {
                if rows <= 1 {
                    return Err(NnError::InsufficientBatch(rows));
                }
                let (mean, var) = column_moments(x, rows, channels);
                let unbias = rows as f64 / (rows - 1) as f64;
                let m = self.momentum as f64;
                for c in 0..channels {
                    self.running_mean[c] =
                        ((1.0 - m) * self.running_mean[c] as f64 + m * mean[c]) as f32;
                    self.running_var[c] =
                        ((1.0 - m) * self.running_var[c] as f64 + m * var[c] * unbias) as f32;
                }
                (mean, var)
            }
        };

        let (scale, shift): (Vec<f32>, Vec<f32>) = (0..channels)
            .map(|c| {
                let inv_std = 1.0 / (var[c] + self.eps as f64).sqrt();
                let scale = self.weight[c] as f64 * inv_std;
                (scale as f32, (self.bias[c] as f64 - mean[c] * scale) as f32)
            })
            .unzip();

        for row in x.chunks_exact_mut(channels) {
            for ((v, s), b) in row.iter_mut().zip(scale.iter()).zip(shift.iter()) {
                *v = *v * s + b;
            }
        }

        Ok(())
    }
}

impl Parameterized for BatchNorm {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        let shape = [self.num_features];
        save_param(state, prefix, "weight", &shape, &self.weight);
        save_param(state, prefix, "bias", &shape, &self.bias);
        save_param(state, prefix, "running_mean", &shape, &self.running_mean);
        save_param(state, prefix, "running_var", &shape, &self.running_var);
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        let shape = [self.num_features];
        load_param(state, prefix, "weight", &shape, &mut self.weight, report);
        load_param(state, prefix, "bias", &shape, &mut self.bias, report);
        load_param(state, prefix, "running_mean", &shape, &mut self.running_mean, report);
        load_param(state, prefix, "running_var", &shape, &mut self.running_var, report);
    }
}

/// Per-column mean and biased variance of a `[rows, channels]` matrix.
fn column_moments(x: &[f32], rows: usize, channels: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0f64; channels];
    for row in x.chunks_exact(channels) {
        for (m, &v) in mean.iter_mut().zip(row.iter()) {
            *m += v as f64;
        }
    }
    mean.iter_mut().for_each(|m| *m /= rows as f64);

    let mut var = vec![0.0f64; channels];
    for row in x.chunks_exact(channels) {
        for ((s, &v), m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
            let d = v as f64 - m;
            *s += d * d;
        }
    }
    var.iter_mut().for_each(|s| *s /= rows as f64);

    (mean, var)
}

/// Scale `x` to unit L2 norm, `x / max(||x||, eps)`.
pub fn l2_normalize(x: &mut [f32]) {
    let norm = x.iter().map(|v| v * v).sum::<f32>().sqrt().max(L2_NORM_EPS);
    x.iter_mut().for_each(|v| *v /= norm);
}

/// L2-normalize every column of a row-major `[rows, cols]` matrix.
pub fn l2_normalize_columns(x: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(x.len(), rows * cols);
    let mut norms = vec![0.0f32; cols];
    for row in x.chunks_exact(cols) {
        for (n, v) in norms.iter_mut().zip(row.iter()) {
            *n += v * v;
        }
    }
    norms
        .iter_mut()
        .for_each(|n| *n = n.sqrt().max(L2_NORM_EPS));
    for row in x.chunks_exact_mut(cols) {
        for (v, n) in row.iter_mut().zip(norms.iter()) {
            *v /= n;
        }
    }
}
