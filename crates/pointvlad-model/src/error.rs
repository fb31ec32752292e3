use pointvlad_nn::NnError;
use thiserror::Error;

/// An error type for the descriptor network.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Error raised by a layer primitive.
    #[error(transparent)]
    Nn(#[from] NnError),

    /// The model configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input does not have the expected shape.
    #[error("Shape mismatch: expected {0:?}, got {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Failed to read a configuration file.
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a configuration file.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}
