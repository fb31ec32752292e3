use thiserror::Error;

/// An error type for the layer primitives.
#[derive(Error, Debug)]
pub enum NnError {
    /// A buffer does not have the length implied by its declared shape.
    #[error("Shape mismatch: expected {0:?}, got {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// A layer was configured with inconsistent dimensions.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Training-mode normalization needs more than one value per channel.
    #[error("Expected more than 1 value per channel when training, got {0}")]
    InsufficientBatch(usize),

    /// Failed to read or write a checkpoint.
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a checkpoint.
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// The checkpoint was written with an unknown format version.
    #[error("Unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
}
