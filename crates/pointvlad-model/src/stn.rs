use pointvlad_nn::{
    activation::relu,
    state::{join_key, LoadReport, Parameterized, StateDict},
    BatchNorm, ExecutionContext, Linear, Mode,
};
use rand::Rng;

use crate::error::ModelError;

/// Optional batch norms of the alignment network, one after each hidden layer.
#[derive(Debug, Clone)]
struct StnNorms {
    bn1: BatchNorm,
    bn2: BatchNorm,
    bn3: BatchNorm,
    bn4: BatchNorm,
    bn5: BatchNorm,
}

/// Regresses a `k x k` alignment matrix from a set of `k`-dimensional elements.
///
/// Pointwise layers `k -> 64 -> 128 -> 1024`, a max over the elements, then
/// fully-connected layers `1024 -> 512 -> 256 -> k*k`. The last layer starts at
/// zero and the identity is added to its output, so an untrained module
/// returns exactly the identity.
#[derive(Debug, Clone)]
pub struct SpatialTransformer {
    k: usize,
    conv1: Linear,
    conv2: Linear,
    conv3: Linear,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    norms: Option<StnNorms>,
}

impl SpatialTransformer {
    /// Create an alignment module for `k`-dimensional elements.
    pub fn new<R: Rng + ?Sized>(k: usize, use_bn: bool, rng: &mut R) -> Self {
        let norms = use_bn.then(|| StnNorms {
            bn1: BatchNorm::new(64),
            bn2: BatchNorm::new(128),
            bn3: BatchNorm::new(1024),
            bn4: BatchNorm::new(512),
            bn5: BatchNorm::new(256),
        });
        Self {
            k,
            conv1: Linear::new(k, 64, rng),
            conv2: Linear::new(64, 128, rng),
            conv3: Linear::new(128, 1024, rng),
            fc1: Linear::new(1024, 512, rng),
            fc2: Linear::new(512, 256, rng),
            fc3: Linear::zeros(256, k * k),
            norms,
        }
    }

    /// Dimension of the aligned space.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Regress one matrix per set.
    ///
    /// * `x` - `[batch, n, k]` elements
    ///
    /// Returns `[batch, k, k]` row-major matrices, meant to right-multiply the
    /// `[n, k]` elements of the same set.
    pub fn forward(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        x: &[f32],
        batch: usize,
        n: usize,
    ) -> Result<Vec<f32>, ModelError> {
        let k = self.k;
        if x.len() != batch * n * k {
            return Err(ModelError::ShapeMismatch(vec![batch, n, k], vec![x.len()]));
        }
        if n == 0 && batch > 0 {
            return Err(ModelError::ShapeMismatch(vec![batch, 1, k], vec![batch, 0, k]));
        }

        let rows = batch * n;
        let mut h = self.conv1.forward(x, rows)?;
        if let Some(norms) = self.norms.as_mut() {
            norms.bn1.forward(&mut h, rows, mode)?;
        }
        relu(&mut h);

        let mut h = self.conv2.forward(&h, rows)?;
        if let Some(norms) = self.norms.as_mut() {
            norms.bn2.forward(&mut h, rows, mode)?;
        }
        relu(&mut h);

        let mut h = self.conv3.forward(&h, rows)?;
        if let Some(norms) = self.norms.as_mut() {
            norms.bn3.forward(&mut h, rows, mode)?;
        }
        relu(&mut h);

        // symmetric reduction over the elements of every set
        let channels = self.conv3.out_features();
        let pooled = ctx
            .map_indices(batch, |b| max_over_rows(&h[b * n * channels..(b + 1) * n * channels], channels))
            .concat();

        let mut g = self.fc1.forward(&pooled, batch)?;
        if let Some(norms) = self.norms.as_mut() {
            norms.bn4.forward(&mut g, batch, mode)?;
        }
        relu(&mut g);

        let mut g = self.fc2.forward(&g, batch)?;
        if let Some(norms) = self.norms.as_mut() {
            norms.bn5.forward(&mut g, batch, mode)?;
        }
        relu(&mut g);

        let mut transforms = self.fc3.forward(&g, batch)?;
        for matrix in transforms.chunks_exact_mut(k * k) {
            for i in 0..k {
                matrix[i * k + i] += 1.0;
            }
        }

        Ok(transforms)
    }
}

/// Column-wise maximum of a `[rows, channels]` matrix.
pub(crate) fn max_over_rows(x: &[f32], channels: usize) -> Vec<f32> {
    let mut out = vec![f32::NEG_INFINITY; channels];
    for row in x.chunks_exact(channels) {
        for (o, &v) in out.iter_mut().zip(row.iter()) {
            *o = o.max(v);
        }
    }
    out
}

impl Parameterized for SpatialTransformer {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        self.conv1.save_state(&join_key(prefix, "conv1"), state);
        self.conv2.save_state(&join_key(prefix, "conv2"), state);
        self.conv3.save_state(&join_key(prefix, "conv3"), state);
        self.fc1.save_state(&join_key(prefix, "fc1"), state);
        self.fc2.save_state(&join_key(prefix, "fc2"), state);
        self.fc3.save_state(&join_key(prefix, "fc3"), state);
        if let Some(norms) = &self.norms {
            norms.bn1.save_state(&join_key(prefix, "bn1"), state);
            norms.bn2.save_state(&join_key(prefix, "bn2"), state);
            norms.bn3.save_state(&join_key(prefix, "bn3"), state);
            norms.bn4.save_state(&join_key(prefix, "bn4"), state);
            norms.bn5.save_state(&join_key(prefix, "bn5"), state);
        }
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        self.conv1.load_state(&join_key(prefix, "conv1"), state, report);
        self.conv2.load_state(&join_key(prefix, "conv2"), state, report);
        self.conv3.load_state(&join_key(prefix, "conv3"), state, report);
        self.fc1.load_state(&join_key(prefix, "fc1"), state, report);
        self.fc2.load_state(&join_key(prefix, "fc2"), state, report);
        self.fc3.load_state(&join_key(prefix, "fc3"), state, report);
        if let Some(norms) = self.norms.as_mut() {
            norms.bn1.load_state(&join_key(prefix, "bn1"), state, report);
            norms.bn2.load_state(&join_key(prefix, "bn2"), state, report);
            norms.bn3.load_state(&join_key(prefix, "bn3"), state, report);
            norms.bn4.load_state(&join_key(prefix, "bn4"), state, report);
            norms.bn5.load_state(&join_key(prefix, "bn5"), state, report);
        }
    }
}
