use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Constants of the retrieval protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Length of the recall curve, i.e. the largest `N` of recall@N.
    pub recall_depth: usize,
    /// Queries per evaluation batch.
    pub eval_batch_size: usize,
    /// Positives per query; only scales the batch size.
    pub positives_per_query: usize,
    /// Negatives per query; only scales the batch size.
    pub negatives_per_query: usize,
    /// Build the index over each database submap once instead of once per pair.
    pub cache_database_index: bool,
    /// Where to write the plain-text report, if anywhere.
    pub report_path: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            recall_depth: 25,
            eval_batch_size: 2,
            positives_per_query: 4,
            negatives_per_query: 12,
            cache_database_index: true,
            report_path: None,
        }
    }
}

impl EvalConfig {
    /// Read a configuration from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let contents = std::fs::read_to_string(path)?;
        let config: EvalConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Point clouds per network call: `eval_batch_size * (1 + positives + negatives)`.
    pub fn batch_size(&self) -> usize {
        self.eval_batch_size * (1 + self.positives_per_query + self.negatives_per_query)
    }

    /// Check that the recall depth and batch size are positive.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.recall_depth == 0 {
            return Err(EvalError::InvalidConfig(
                "recall_depth must be > 0".to_string(),
            ));
        }
        if self.eval_batch_size == 0 {
            return Err(EvalError::InvalidConfig(
                "eval_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
