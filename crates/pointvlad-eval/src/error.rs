use std::path::PathBuf;

use pointvlad_model::ModelError;
use thiserror::Error;

/// An error type for the retrieval evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error raised while computing descriptors.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Failed to read a registry or point cloud, or to write the report.
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a registry or configuration file.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The evaluation configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A submap registry is malformed.
    #[error("Invalid registry {0}: {1}")]
    InvalidRegistry(String, String),

    /// A point cloud file does not hold the expected number of values.
    #[error("Point cloud {path:?} holds {found} values, expected {expected}")]
    PointCloudSize {
        /// The offending file.
        path: PathBuf,
        /// Number of `f64` values expected.
        expected: usize,
        /// Number of `f64` values found.
        found: usize,
    },

    /// A descriptor does not have the width of the index it is compared with.
    #[error("Descriptor width mismatch: expected {0}, got {1}")]
    DimensionMismatch(usize, usize),

    /// Descriptor and submap collections disagree in size.
    #[error("Count mismatch: expected {0} entries, got {1}")]
    CountMismatch(usize, usize),

    /// No submap pair had a single query with ground truth.
    #[error("No submap pair contained an evaluable query")]
    NoEvaluatedPairs,
}
