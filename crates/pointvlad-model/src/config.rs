use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Which per-point feature extractor the network uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractorKind {
    /// Shared pointwise layers on aligned coordinates.
    #[default]
    PointNet,
    /// Edge convolutions over the k-nearest-neighbor graph of every cloud.
    LocalGraph {
        /// Neighbors per point, including the point itself.
        k: usize,
    },
}

/// Hyper-parameters of the descriptor network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Points per cloud.
    pub num_points: usize,
    /// Width of the per-point embedding.
    pub emb_dims: usize,
    /// Width of the final descriptor.
    pub output_dim: usize,
    /// Number of soft clusters in the aggregation.
    pub cluster_size: usize,
    /// Align the input coordinates with a regressed 3x3 transform.
    pub input_transform: bool,
    /// Align the intermediate 64-d features with a regressed 64x64 transform.
    pub feature_transform: bool,
    /// Apply context gating to the descriptor.
    pub gating: bool,
    /// Use batch normalization inside the aggregation instead of learned biases.
    pub add_batch_norm: bool,
    /// Per-point feature extractor variant.
    pub extractor: ExtractorKind,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_points: 4096,
            emb_dims: 1024,
            output_dim: 256,
            cluster_size: 64,
            input_transform: true,
            feature_transform: false,
            gating: true,
            add_batch_norm: true,
            extractor: ExtractorKind::PointNet,
            seed: 0,
        }
    }
}

impl ModelConfig {
    /// Read a configuration from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every dimension is usable.
    pub fn validate(&self) -> Result<(), ModelError> {
        let dims = [
            ("num_points", self.num_points),
            ("emb_dims", self.emb_dims),
            ("output_dim", self.output_dim),
            ("cluster_size", self.cluster_size),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ModelError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if let ExtractorKind::LocalGraph { k } = self.extractor {
            if k == 0 {
                return Err(ModelError::InvalidConfig(
                    "local graph needs at least one neighbor".to_string(),
                ));
            }
            if k > self.num_points {
                return Err(ModelError::InvalidConfig(format!(
                    "local graph k ({k}) exceeds num_points ({})",
                    self.num_points
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output_dim, 256);
        assert_eq!(config.cluster_size, 64);
    }

    #[test]
    fn test_invalid_dims() {
        let config = ModelConfig {
            cluster_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ModelError::InvalidConfig(_))));

        let config = ModelConfig {
            num_points: 8,
            extractor: ExtractorKind::LocalGraph { k: 20 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ModelError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_partial() -> Result<(), Box<dyn std::error::Error>> {
        let config: ModelConfig = serde_json::from_str(
            r#"{"output_dim": 128, "extractor": {"type": "local_graph", "k": 16}}"#,
        )?;
        assert_eq!(config.output_dim, 128);
        assert_eq!(config.emb_dims, 1024);
        assert_eq!(config.extractor, ExtractorKind::LocalGraph { k: 16 });

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&config)?)?;
        assert_eq!(ModelConfig::from_json_file(&path)?, config);
        Ok(())
    }
}
