use rand::Rng;

use crate::{
    error::NnError,
    init,
    state::{load_param, save_param, LoadReport, Parameterized, StateDict},
};

/// Linear layer implemented using `matrixmultiply::sgemm`.
///
/// Computes `dst = src * weight^T + bias` for every row of `src`.
///
/// # Arguments
///
/// * `src` - Input matrix of shape `[M, D]`
/// * `weight` - Weight matrix of shape `[N, D]`
/// * `bias` - Bias vector of shape `[N]`
/// * `dst` - Output matrix of shape `[M, N]`
/// * `rows` - Number of rows `M`
/// * `input_dim` - Input dimension `D`
/// * `output_dim` - Output dimension `N`
///
/// # Example
///
/// ```
/// use pointvlad_nn::linear::linear_layer_gemm;
///
/// let src = [[1.0, 2.0, 3.0]];
/// let weight = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
/// let bias = [0.1, 0.2];
///
/// let mut dst = [[0.0, 0.0]];
///
/// linear_layer_gemm(
///     src.as_flattened(),
///     weight.as_flattened(),
///     &bias,
///     dst.as_flattened_mut(),
///     1,
///     3,
///     2,
/// );
///
/// assert!((dst[0][0] - 1.5).abs() < 1e-6);
/// assert!((dst[0][1] - 3.4).abs() < 1e-6);
/// ```
pub fn linear_layer_gemm(
    src: &[f32],     // Shape: [M, D] flattened
    weight: &[f32],  // Shape: [N, D] flattened (row-major format)
    bias: &[f32],    // Shape: [N]
    dst: &mut [f32], // Shape: [M, N] flattened
    rows: usize,
    input_dim: usize,
    output_dim: usize,
) {
    assert_eq!(src.len(), rows * input_dim, "Input size mismatch");
    assert_eq!(dst.len(), rows * output_dim, "Output size mismatch");
    assert_eq!(weight.len(), output_dim * input_dim, "Weight size mismatch");
    assert_eq!(bias.len(), output_dim, "Bias size mismatch");

    if rows == 0 || output_dim == 0 {
        return;
    }

    // 1. Set bias for each output row
    for output_row in dst.chunks_exact_mut(output_dim) {
        output_row.copy_from_slice(bias);
    }

    // 2. dst = src * weight^T + bias (beta = 1.0 keeps the bias)
    unsafe {
        matrixmultiply::sgemm(
            /* m */ rows,
            /* k */ input_dim,
            /* n */ output_dim,
            /* alpha */ 1.0,
            /* a */ src.as_ptr(),
            /* rsa */ input_dim as isize,
            /* csa */ 1,
            /* b */ weight.as_ptr(),
            /* rsb */ 1,
            /* csb */ input_dim as isize,
            /* beta */ 1.0,
            /* c */ dst.as_mut_ptr(),
            /* rsc */ output_dim as isize,
            /* csc */ 1,
        );
    }
}

/// Row-major matrix product `dst = a * b`.
///
/// * `a` - `[M, K]`
/// * `b` - `[K, N]`
/// * `dst` - `[M, N]`, overwritten
pub fn matmul(a: &[f32], b: &[f32], dst: &mut [f32], m: usize, k: usize, n: usize) {
    assert_eq!(a.len(), m * k, "Lhs size mismatch");
    assert_eq!(b.len(), k * n, "Rhs size mismatch");
    assert_eq!(dst.len(), m * n, "Output size mismatch");

    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        dst.fill(0.0);
        return;
    }

    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            k as isize,
            1,
            b.as_ptr(),
            n as isize,
            1,
            0.0,
            dst.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}

/// Row-major matrix product with a transposed left operand, `dst = a^T * b`.
///
/// * `a` - stored as `[K, M]`
/// * `b` - `[K, N]`
/// * `dst` - `[M, N]`, overwritten
pub fn matmul_transposed_lhs(a: &[f32], b: &[f32], dst: &mut [f32], m: usize, k: usize, n: usize) {
    assert_eq!(a.len(), k * m, "Lhs size mismatch");
    assert_eq!(b.len(), k * n, "Rhs size mismatch");
    assert_eq!(dst.len(), m * n, "Output size mismatch");

    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        dst.fill(0.0);
        return;
    }

    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            1,
            m as isize,
            b.as_ptr(),
            n as isize,
            1,
            0.0,
            dst.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}

/// A fully-connected layer with weight `[out, in]` and bias `[out]`.
///
/// Applied to a `[rows, in]` matrix of per-point features it acts as a
/// shared-weight pointwise transform (a 1x1 convolution).
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    in_features: usize,
    out_features: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Linear {
    /// Create a layer with weights and bias drawn from `U(-1/sqrt(in), 1/sqrt(in))`.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            in_features,
            out_features,
            weight: init::uniform(out_features * in_features, bound, rng),
            bias: init::uniform(out_features, bound, rng),
        }
    }

    /// Create a layer with all parameters set to zero.
    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            weight: vec![0.0; out_features * in_features],
            bias: vec![0.0; out_features],
        }
    }

    /// Create a layer from explicit parameters.
    pub fn from_parts(
        in_features: usize,
        out_features: usize,
        weight: Vec<f32>,
        bias: Vec<f32>,
    ) -> Result<Self, NnError> {
        if weight.len() != in_features * out_features {
            return Err(NnError::ShapeMismatch(
                vec![out_features, in_features],
                vec![weight.len()],
            ));
        }
        if bias.len() != out_features {
            return Err(NnError::ShapeMismatch(vec![out_features], vec![bias.len()]));
        }
        Ok(Self {
            in_features,
            out_features,
            weight,
            bias,
        })
    }

    /// Number of input features.
    #[inline]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Number of output features.
    #[inline]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// The weight matrix `[out, in]`.
    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    /// Mutable access to the weight matrix.
    pub fn weight_mut(&mut self) -> &mut [f32] {
        &mut self.weight
    }

    /// The bias vector `[out]`.
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Mutable access to the bias vector.
    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Apply the layer to `rows` rows of `in_features` values.
    pub fn forward(&self, src: &[f32], rows: usize) -> Result<Vec<f32>, NnError> {
        if src.len() != rows * self.in_features {
            return Err(NnError::ShapeMismatch(
                vec![rows, self.in_features],
                vec![src.len()],
            ));
        }
        let mut dst = vec![0.0; rows * self.out_features];
        linear_layer_gemm(
            src,
            &self.weight,
            &self.bias,
            &mut dst,
            rows,
            self.in_features,
            self.out_features,
        );
        Ok(dst)
    }
}

impl Parameterized for Linear {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        save_param(
            state,
            prefix,
            "weight",
            &[self.out_features, self.in_features],
            &self.weight,
        );
        save_param(state, prefix, "bias", &[self.out_features], &self.bias);
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        let shape = [self.out_features, self.in_features];
        load_param(state, prefix, "weight", &shape, &mut self.weight, report);
        load_param(state, prefix, "bias", &[self.out_features], &mut self.bias, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_linear_layer_gemm() {
        // [1, 3] - rows=1, input_dim=3
        let src = [[1.0, 2.0, 3.0]];
        // [2, 3] - 2 outputs, 3 inputs
        let weight = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
        let bias = [0.1, 0.2];

        let mut dst = [[0.0, 0.0]];

        linear_layer_gemm(
            src.as_flattened(),
            weight.as_flattened(),
            &bias,
            dst.as_flattened_mut(),
            1,
            3,
            2,
        );

        // from pytorch
        let expected = [1.5, 3.4];
        for (a, e) in dst[0].iter().zip(expected.iter()) {
            assert_relative_eq!(a, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_linear_layer_gemm_two_rows() {
        let src = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let weight = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
        let bias = [0.1, 0.2];

        let mut dst = [[0.0, 0.0], [0.0, 0.0]];
        linear_layer_gemm(
            src.as_flattened(),
            weight.as_flattened(),
            &bias,
            dst.as_flattened_mut(),
            2,
            3,
            2,
        );

        // from pytorch
        let expected = [1.5, 3.4, 3.3, 7.9];
        for (a, e) in dst.as_flattened().iter().zip(expected.iter()) {
            assert_relative_eq!(a, e, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_matmul() {
        #[rustfmt::skip]
        let a = [
            1.0, 2.0,
            3.0, 4.0,
            5.0, 6.0,
        ];
        #[rustfmt::skip]
        let b = [
            1.0, 0.0, 2.0,
            0.0, 1.0, 3.0,
        ];
        let mut dst = [0.0; 9];
        matmul(&a, &b, &mut dst, 3, 2, 3);
        assert_eq!(dst, [1.0, 2.0, 8.0, 3.0, 4.0, 18.0, 5.0, 6.0, 28.0]);
    }

    #[test]
    fn test_matmul_transposed_lhs() {
        // a stored as [K=3, M=2]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        // b [K=3, N=1]
        let b = [1.0, 1.0, 1.0];
        let mut dst = [0.0; 2];
        matmul_transposed_lhs(&a, &b, &mut dst, 2, 3, 1);
        assert_eq!(dst, [9.0, 12.0]);
    }

    #[test]
    fn test_linear_forward_shape_error() {
        let layer = Linear::zeros(3, 4);
        assert!(matches!(
            layer.forward(&[1.0, 2.0], 1),
            Err(NnError::ShapeMismatch(_, _))
        ));
        let out = layer.forward(&[], 0).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_linear_state_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Linear::new(4, 2, &mut rng);
        let mut state = StateDict::new();
        layer.save_state("fc", &mut state);
        assert_eq!(state["fc.weight"].shape, vec![2, 4]);

        let mut other = Linear::zeros(4, 2);
        let mut report = LoadReport::default();
        other.load_state("fc", &state, &mut report);
        assert_eq!(other, layer);
        assert_eq!(report.loaded.len(), 2);
    }
}
