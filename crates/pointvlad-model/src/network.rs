use std::path::Path;

use pointvlad_nn::{
    state::{self, join_key, Checkpoint, LoadReport, Parameterized, StateDict},
    ExecutionContext, Mode,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::ModelConfig,
    error::ModelError,
    extractor::{Extractor, PointFeatureExtractor},
    netvlad::{NetVladConfig, NetVladLoupe},
    types::{Descriptors, PointCloudBatch},
};

/// A point cloud batch in, one descriptor per cloud out.
pub trait DescriptorModel {
    /// Width of every descriptor.
    fn descriptor_dim(&self) -> usize;

    /// Compute `[B, descriptor_dim]` descriptors.
    ///
    /// In [`Mode::Train`] every normalization layer uses and updates batch
    /// statistics; in [`Mode::Eval`] they are frozen.
    fn forward(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        batch: &PointCloudBatch,
    ) -> Result<Descriptors, ModelError>;
}

/// Per-point extractor followed by NetVLAD aggregation.
#[derive(Debug, Clone)]
pub struct DescriptorNetwork {
    config: ModelConfig,
    point_net: Extractor,
    net_vlad: NetVladLoupe,
}

impl DescriptorNetwork {
    /// Build the network described by `config`, seeding parameters from `config.seed`.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let point_net = Extractor::from_config(&config, &mut rng)?;
        let net_vlad = NetVladLoupe::new(
            NetVladConfig {
                feature_size: config.emb_dims,
                cluster_size: config.cluster_size,
                output_dim: config.output_dim,
                gating: config.gating,
                add_batch_norm: config.add_batch_norm,
            },
            &mut rng,
        )?;
        Self::from_parts(config, point_net, net_vlad)
    }

    /// Compose an existing extractor and aggregation.
    ///
    /// Fails when the embedding width of the extractor differs from the
    /// feature width of the aggregation, or when either part disagrees with
    /// the widths and cluster count of `config`.
    pub fn from_parts(
        config: ModelConfig,
        point_net: Extractor,
        net_vlad: NetVladLoupe,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        if point_net.embedding_dim() != net_vlad.feature_size() {
            return Err(ModelError::InvalidConfig(format!(
                "extractor produces {}-d embeddings but the aggregation expects {}-d features",
                point_net.embedding_dim(),
                net_vlad.feature_size()
            )));
        }
        for (name, configured, actual) in [
            ("emb_dims", config.emb_dims, point_net.embedding_dim()),
            ("output_dim", config.output_dim, net_vlad.output_dim()),
            ("cluster_size", config.cluster_size, net_vlad.config().cluster_size),
        ] {
            if configured != actual {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} is {configured} in the configuration but {actual} in the network"
                )));
            }
        }
        log::debug!(
            "descriptor network: {:?} extractor, {} points, {} -> {} over {} clusters",
            config.extractor,
            config.num_points,
            config.emb_dims,
            net_vlad.output_dim(),
            config.cluster_size
        );
        Ok(Self {
            config,
            point_net,
            net_vlad,
        })
    }

    /// The configuration the network was built with.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Export every parameter under its dotted name.
    pub fn state_dict(&self) -> StateDict {
        state::state_dict(self)
    }

    /// Restore parameters non-strictly; see [`LoadReport`].
    pub fn load_state_dict(&mut self, dict: &StateDict) -> LoadReport {
        state::load_state_dict(self, dict)
    }

    /// Restore parameters from a checkpoint file.
    ///
    /// A missing or unreadable file is an error; missing or mismatched keys
    /// inside a readable checkpoint are only reported.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<LoadReport, ModelError> {
        let path = path.as_ref();
        let checkpoint = Checkpoint::load(path)?;
        log::info!(
            "restoring {} (epoch {}, iteration {})",
            path.display(),
            checkpoint.epoch,
            checkpoint.iteration
        );
        Ok(self.load_state_dict(&checkpoint.state))
    }

    /// Snapshot the parameters with training counters.
    pub fn checkpoint(&self, epoch: u64, iteration: u64) -> Checkpoint {
        Checkpoint {
            epoch,
            iteration,
            state: self.state_dict(),
        }
    }
}

impl DescriptorModel for DescriptorNetwork {
    fn descriptor_dim(&self) -> usize {
        self.net_vlad.output_dim()
    }

    fn forward(
        &mut self,
        ctx: &ExecutionContext,
        mode: Mode,
        batch: &PointCloudBatch,
    ) -> Result<Descriptors, ModelError> {
        let dim = self.descriptor_dim();
        if batch.is_empty() {
            return Ok(Descriptors::empty(dim));
        }
        if batch.num_points() != self.config.num_points {
            return Err(ModelError::ShapeMismatch(
                vec![batch.batch_size(), self.config.num_points, 3],
                vec![batch.batch_size(), batch.num_points(), 3],
            ));
        }

        let (b, n) = (batch.batch_size(), batch.num_points());
        let embeddings = self.point_net.extract(ctx, mode, batch)?;
        let descriptors = self.net_vlad.forward(ctx, mode, &embeddings, b, n)?;
        Descriptors::new(descriptors, b, dim)
    }
}

impl Parameterized for DescriptorNetwork {
    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        self.point_net.save_state(&join_key(prefix, "point_net"), state);
        self.net_vlad.save_state(&join_key(prefix, "net_vlad"), state);
    }

    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport) {
        self.point_net
            .load_state(&join_key(prefix, "point_net"), state, report);
        self.net_vlad
            .load_state(&join_key(prefix, "net_vlad"), state, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorKind;
    use rand::Rng;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            num_points: 12,
            emb_dims: 16,
            output_dim: 8,
            cluster_size: 4,
            ..Default::default()
        }
    }

    fn random_batch(b: usize, n: usize, seed: u64) -> Result<PointCloudBatch, ModelError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..b * n * 3).map(|_| rng.random_range(-1.0..1.0)).collect();
        PointCloudBatch::new(data, b, n)
    }

    #[test]
    fn test_forward_shape() -> Result<(), ModelError> {
        let mut network = DescriptorNetwork::new(tiny_config())?;
        let batch = random_batch(3, 12, 0)?;
        let descriptors = network.forward(&ExecutionContext::cpu(), Mode::Eval, &batch)?;
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors.dim(), 8);
        Ok(())
    }

    #[test]
    fn test_empty_batch() -> Result<(), ModelError> {
        let mut network = DescriptorNetwork::new(tiny_config())?;
        let batch = PointCloudBatch::new(Vec::new(), 0, 12)?;
        let descriptors = network.forward(&ExecutionContext::cpu(), Mode::Eval, &batch)?;
        assert!(descriptors.is_empty());
        assert_eq!(descriptors.dim(), 8);
        Ok(())
    }

    #[test]
    fn test_wrong_point_count() -> Result<(), ModelError> {
        let mut network = DescriptorNetwork::new(tiny_config())?;
        let batch = random_batch(1, 10, 0)?;
        let result = network.forward(&ExecutionContext::cpu(), Mode::Eval, &batch);
        assert!(matches!(result, Err(ModelError::ShapeMismatch(_, _))));
        Ok(())
    }

    fn loupe(config: &ModelConfig, rng: &mut StdRng) -> Result<NetVladLoupe, ModelError> {
        NetVladLoupe::new(
            NetVladConfig {
                feature_size: config.emb_dims,
                cluster_size: config.cluster_size,
                output_dim: config.output_dim,
                gating: true,
                add_batch_norm: true,
            },
            rng,
        )
    }

    #[test]
    fn test_mismatched_parts() -> Result<(), ModelError> {
        let config = tiny_config();
        let mut rng = StdRng::seed_from_u64(0);

        // aggregation features wider than the extractor embeddings
        let point_net = Extractor::from_config(&config, &mut rng)?;
        let net_vlad = loupe(
            &ModelConfig {
                emb_dims: 32,
                ..tiny_config()
            },
            &mut rng,
        )?;
        let result = DescriptorNetwork::from_parts(config.clone(), point_net, net_vlad);
        assert!(matches!(result, Err(ModelError::InvalidConfig(_))));

        // parts agree with each other but not with the configured widths
        for parts_config in [
            ModelConfig {
                output_dim: 32,
                ..tiny_config()
            },
            ModelConfig {
                cluster_size: 6,
                ..tiny_config()
            },
            ModelConfig {
                emb_dims: 24,
                ..tiny_config()
            },
        ] {
            let point_net = Extractor::from_config(&parts_config, &mut rng)?;
            let net_vlad = loupe(&parts_config, &mut rng)?;
            let result = DescriptorNetwork::from_parts(config.clone(), point_net, net_vlad);
            assert!(matches!(result, Err(ModelError::InvalidConfig(_))));
        }

        let point_net = Extractor::from_config(&config, &mut rng)?;
        let net_vlad = loupe(&config, &mut rng)?;
        let network = DescriptorNetwork::from_parts(config, point_net, net_vlad)?;
        assert_eq!(network.descriptor_dim(), network.config().output_dim);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_parameters() -> Result<(), ModelError> {
        let a = DescriptorNetwork::new(tiny_config())?;
        let b = DescriptorNetwork::new(tiny_config())?;
        assert_eq!(a.state_dict(), b.state_dict());

        let c = DescriptorNetwork::new(ModelConfig {
            seed: 1,
            ..tiny_config()
        })?;
        assert_ne!(a.state_dict(), c.state_dict());
        Ok(())
    }

    #[test]
    fn test_state_dict_names() -> Result<(), ModelError> {
        let network = DescriptorNetwork::new(ModelConfig {
            feature_transform: true,
            ..tiny_config()
        })?;
        let state = network.state_dict();
        for key in [
            "point_net.stn.conv1.weight",
            "point_net.feature_trans.fc3.weight",
            "point_net.conv5.bias",
            "net_vlad.cluster_weights",
            "net_vlad.cluster_weights2",
            "net_vlad.hidden1_weights",
            "net_vlad.bn1.running_mean",
            "net_vlad.bn2.weight",
            "net_vlad.context_gating.gating_weights",
            "net_vlad.context_gating.bn1.running_var",
        ] {
            assert!(state.contains_key(key), "missing {key}");
        }
        assert!(!state.contains_key("net_vlad.cluster_biases"));
        assert_eq!(state["net_vlad.cluster_weights2"].shape, vec![1, 16, 4]);
        Ok(())
    }

    #[test]
    fn test_local_graph_network() -> Result<(), ModelError> {
        let mut network = DescriptorNetwork::new(ModelConfig {
            extractor: ExtractorKind::LocalGraph { k: 3 },
            ..tiny_config()
        })?;
        let batch = random_batch(2, 12, 9)?;
        let descriptors = network.forward(&ExecutionContext::cpu(), Mode::Eval, &batch)?;
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors.as_slice().iter().all(|v| v.is_finite()));
        Ok(())
    }
}
