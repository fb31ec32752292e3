use rand::Rng;
use rand_distr::StandardNormal;

/// Draw `len` values from `U(-bound, bound)`.
pub fn uniform<R: Rng + ?Sized>(len: usize, bound: f32, rng: &mut R) -> Vec<f32> {
    if bound <= 0.0 {
        return vec![0.0; len];
    }
    (0..len).map(|_| rng.random_range(-bound..bound)).collect()
}

/// Draw `len` values from `N(0, 1)` scaled by `scale`.
pub fn randn_scaled<R: Rng + ?Sized>(len: usize, scale: f32, rng: &mut R) -> Vec<f32> {
    (0..len)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * scale)
        .collect()
}
