use std::num::NonZeroUsize;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use pointvlad_nn::{
    state::{join_key, LoadReport, Parameterized, StateDict},
    BatchNorm, ExecutionContext, Linear, Mode,
};
use rand::Rng;

use crate::{
    error::ModelError,
    extractor::{apply_feature_transform, pointwise_bn, PointFeatureExtractor},
    pointnet::{align_coordinates, FEATURE_ALIGN_DIM},
    stn::SpatialTransformer,
    types::PointCloudBatch,
};

/// Local-neighborhood features from edge convolutions.
///
/// Every cloud is turned into a k-nearest-neighbor graph in coordinate
/// space. Two edge convolutions map `[f_i, f_j - f_i]` through a pointwise
/// layer, batch norm and ReLU, then take the maximum over the neighbors `j`
/// of each point `i`. Pointwise layers `64 -> 128 -> D` follow, as in
/// [`crate::pointnet::PointNetFeatures`].
#[derive(Debug, Clone)]
pub struct LocalGraphFeatures {
    emb_dims: usize,
    k: usize,
    stn: Option<SpatialTransformer>,
    feature_trans: Option<SpatialTransformer>,
    conv1: Linear,
    conv2: Linear,
    conv3: Linear,
    conv4: Linear,
    bn1: BatchNorm,
    bn2: BatchNorm,
    bn3: BatchNorm,
    bn4: BatchNorm,
}

impl LocalGraphFeatures {
    /// Create the extractor; `k` counts each point as its own first neighbor.
    pub fn new<R: Rng + ?Sized>(
        emb_dims: usize,
        k: usize,
        input_transform: bool,
        feature_transform: bool,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        if k == 0 {
            return Err(ModelError::InvalidConfig(
                "local graph needs at least one neighbor".to_string(),
            ));
        }
        let stn = input_transform.then(|| SpatialTransformer::new(3, false, rng));
        let feature_trans =
            feature_transform.then(|| SpatialTransformer::new(FEATURE_ALIGN_DIM, false, rng));
        Ok(Self {
            emb_dims,
            k,
            stn,
            feature_trans,
            conv1: Linear::new(2 * 3, 64, rng),
            conv2: Linear::new(2 * 64, FEATURE_ALIGN_DIM, rng),
            conv3: Linear::new(FEATURE_ALIGN_DIM, 128, rng),
            conv4: Linear::new(128, emb_dims, rng),
            bn1: BatchNorm::new(64),
            bn2: BatchNorm::new(FEATURE_ALIGN_DIM),
            bn3: BatchNorm::new(128),
            bn4: BatchNorm::new(emb_dims),
        })
    }

    /// Neighbors per point.
    pub fn k(&self) -> usize {
        self.k
    }
}

/// Indices of the `k` nearest points of every point, the point itself first.
///
/// Returns `[n, k]` indices local to the cloud. `k` is clamped to `n`.
pub fn knn_graph(cloud: &[f32], k: usize) -> Vec<usize> {
    let points = cloud
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect::<Vec<_>>();
    let n = points.len();
    let Some(k) = NonZeroUsize::new(k.min(n)) else {
        return Vec::new();
    };

    let tree: ImmutableKdTree<f32, u32, 3, 32> = ImmutableKdTree::new_from_slice(&points);
    let mut graph = Vec::with_capacity(n * k.get());
    for (i, p) in points.iter().enumerate() {
        let mut neighbors = tree
            .nearest_n::<kiddo::SquaredEuclidean>(p, k)
            .into_iter()
            .map(|nn| (nn.distance, nn.item as usize))
            .collect::<Vec<_>>();
        // the query point comes first even when duplicates tie with it
        neighbors.sort_by(|a, b| {
            (a.1 != i)
                .cmp(&(b.1 != i))
                .then(a.0.total_cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        graph.extend(neighbors.into_iter().map(|(_, j)| j));
    }
    graph
}

/// Build `[n * k, 2 * c]` edge features `[f_i, f_j - f_i]` for one cloud.
fn edge_features(features: &[f32], graph: &[usize], k: usize, c: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(graph.len() * 2 * c);
    for (edge, &j) in graph.iter().enumerate() {
        let i = edge / k;
        let fi = &features[i * c..(i + 1) * c];
        let fj = &features[j * c..(j + 1) * c];
        out.extend_from_slice(fi);
        out.extend(fj.iter().zip(fi.iter()).map(|(a, b)| a - b));
    }
    out
}

/// Maximum over the `k` consecutive rows belonging to each point.
fn max_over_neighbors(x: &[f32], k: usize, channels: usize) -> Vec<f32> {
    x.chunks_exact(k * channels)
        .flat_map(|group| crate::stn::max_over_rows(group, channels))
        .collect()
}

impl LocalGraphFeatures {
    #[allow(clippy::too_many_arguments)]
    fn edge_conv(
        layer: &Linear,
        bn: &mut BatchNorm,
        ctx: &ExecutionContext,
        mode: Mode,
        features: &[f32],
        graphs: &[Vec<usize>],
        n: usize,
        k: usize,
    ) -> Result<Vec<f32>, ModelError> {
        let c = layer.in_features() / 2;
        let edges = ctx
            .map_indices(graphs.len(), |b| {
                edge_features(&features[b * n * c..(b + 1) * n * c], &graphs[b], k, c)
            })
            .concat();
        let rows = graphs.len() * n * k;
        let y = pointwise_bn(layer, bn, &edges, rows, mode, true)?;
        Ok(max_over_neighbors(&y, k, layer.out_features()))
    }
}

impl PointFeatureExtractor for LocalGraphFeatures {
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
        if n == 0 {
            return Err(ModelError::ShapeMismatch(vec![b, self.k, 3], vec![b, 0, 3]));
        }
        let rows = b * n;
        let k = self.k.min(n);

        let mut points = batch.as_slice().to_vec();
        if let Some(stn) = self.stn.as_mut() {
            align_coordinates(stn, ctx, mode, &mut points, b, n)?;
        }

        let graphs = ctx.map_indices(b, |i| knn_graph(&points[i * n * 3..(i + 1) * n * 3], k));
        log::trace!("built {b} neighbor graphs with k = {k}");

        let x = Self::edge_conv(&self.conv1, &mut self.bn1, ctx, mode, &points, &graphs, n, k)?;
        let mut x = Self::edge_conv(&self.conv2, &mut self.bn2, ctx, mode, &x, &graphs, n, k)?;

        if let Some(feature_trans) = self.feature_trans.as_mut() {
            let transforms = feature_trans.forward(ctx, mode, &x, b, n)?;
            x = apply_feature_transform(ctx, &x, &transforms, b, n, FEATURE_ALIGN_DIM);
        }

        let x = pointwise_bn(&self.conv3, &mut self.bn3, &x, rows, mode, true)?;
        pointwise_bn(&self.conv4, &mut self.bn4, &x, rows, mode, false)
    }
}

impl Parameterized for LocalGraphFeatures {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        if let Some(stn) = &self.stn {
            stn.save_state(&join_key(prefix, "stn"), state);
        }
        if let Some(feature_trans) = &self.feature_trans {
            feature_trans.save_state(&join_key(prefix, "feature_trans"), state);
        }
        self.conv1.save_state(&join_key(prefix, "conv1"), state);
        self.conv2.save_state(&join_key(prefix, "conv2"), state);
        self.conv3.save_state(&join_key(prefix, "conv3"), state);
        self.conv4.save_state(&join_key(prefix, "conv4"), state);
        self.bn1.save_state(&join_key(prefix, "bn1"), state);
        self.bn2.save_state(&join_key(prefix, "bn2"), state);
        self.bn3.save_state(&join_key(prefix, "bn3"), state);
        self.bn4.save_state(&join_key(prefix, "bn4"), state);
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        if let Some(stn) = self.stn.as_mut() {
            stn.load_state(&join_key(prefix, "stn"), state, report);
        }
        if let Some(feature_trans) = self.feature_trans.as_mut() {
            feature_trans.load_state(&join_key(prefix, "feature_trans"), state, report);
        }
        self.conv1.load_state(&join_key(prefix, "conv1"), state, report);
        self.conv2.load_state(&join_key(prefix, "conv2"), state, report);
        self.conv3.load_state(&join_key(prefix, "conv3"), state, report);
        self.conv4.load_state(&join_key(prefix, "conv4"), state, report);
        self.bn1.load_state(&join_key(prefix, "bn1"), state, report);
        self.bn2.load_state(&join_key(prefix, "bn2"), state, report);
        self.bn3.load_state(&join_key(prefix, "bn3"), state, report);
        self.bn4.load_state(&join_key(prefix, "bn4"), state, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_knn_graph_line() {
        // points on a line at x = 0, 1, 3, 10
        let cloud = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 3.0, 0.0, 0.0, 10.0, 0.0, 0.0];
        let graph = knn_graph(&cloud, 2);
        assert_eq!(graph.len(), 4 * 2);
        assert_eq!(&graph[0..2], &[0, 1]);
        assert_eq!(&graph[2..4], &[1, 0]);
        assert_eq!(&graph[4..6], &[2, 1]);
        assert_eq!(&graph[6..8], &[3, 2]);
    }

    #[test]
    fn test_knn_graph_clamps_k() {
        let cloud = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let graph = knn_graph(&cloud, 5);
        assert_eq!(graph.len(), 2 * 2);
        assert!(knn_graph(&[], 3).is_empty());
    }

    #[test]
    fn test_edge_features() {
        let features = [1.0, 2.0, 4.0, 8.0];
        let graph = [0, 1, 1, 0];
        let edges = edge_features(&features, &graph, 2, 2);
        assert_eq!(
            edges,
            vec![1.0, 2.0, 0.0, 0.0, 1.0, 2.0, 3.0, 6.0, 4.0, 8.0, 0.0, 0.0, 4.0, 8.0, -3.0, -6.0]
        );
    }

    #[test]
    fn test_extract_shape() -> Result<(), ModelError> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut extractor = LocalGraphFeatures::new(24, 4, true, true, &mut rng)?;
        let data = (0..2 * 12 * 3)
            .map(|_| rng.random_range(-1.0..1.0))
            .collect::<Vec<f32>>();
        let batch = PointCloudBatch::new(data, 2, 12)?;

        let features = extractor.extract(&ExecutionContext::cpu_parallel(), Mode::Eval, &batch)?;
        assert_eq!(features.len(), 2 * 12 * 24);
        assert!(features.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn test_zero_neighbors_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            LocalGraphFeatures::new(8, 0, false, false, &mut rng),
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
