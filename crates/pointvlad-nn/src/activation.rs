/// Rectified linear unit, in place.
#[inline]
pub fn relu(x: &mut [f32]) {
    x.iter_mut().for_each(|v| *v = v.max(0.0));
}

/// Logistic sigmoid, in place.
#[inline]
pub fn sigmoid(x: &mut [f32]) {
    x.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp()));
}

/// Softmax over every row of a row-major `[rows, cols]` matrix, in place.
///
/// The row maximum is subtracted before exponentiation.
pub fn softmax_rows(x: &mut [f32], cols: usize) {
    if cols == 0 {
        return;
    }
    for row in x.chunks_exact_mut(cols) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        row.iter_mut().for_each(|v| *v /= sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_relu() {
        let mut x = [-1.0, 0.0, 2.5];
        relu(&mut x);
        assert_eq!(x, [0.0, 0.0, 2.5]);
    }

    #[test]
    fn test_sigmoid() {
        let mut x = [0.0, 100.0, -100.0];
        sigmoid(&mut x);
        assert_relative_eq!(x[0], 0.5);
        assert_relative_eq!(x[1], 1.0);
        assert_relative_eq!(x[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_softmax_rows() {
        let mut x = [1.0, 1.0, 1000.0, 0.0, 0.0, 0.0];
        softmax_rows(&mut x, 3);
        for row in x.chunks_exact(3) {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        }
        assert_relative_eq!(x[2], 1.0, epsilon = 1e-6);
        assert_relative_eq!(x[3], 1.0 / 3.0, epsilon = 1e-6);
    }
}
