#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Layer primitives
//!
//! Every layer works on flat, row-major `f32` slices with explicit dimensions,
//! so a batch of point sets `[B, N, C]` is simply `B * N` rows of `C` values.
//!
//! - **Linear / pointwise layers**: `dst = src * weight^T + bias` through `matrixmultiply`.
//!   A pointwise (1x1) convolution is the same layer applied to every point row.
//! - **Batch normalization**: explicit [`Mode`] argument, running statistics are
//!   only touched in [`Mode::Train`].
//! - **State dictionaries**: dotted parameter names, non-strict loading and
//!   `bincode` checkpoints.
//!
//! ## Example: pointwise layer
//!
//! ```rust
//! use pointvlad_nn::linear::Linear;
//!
//! let layer = Linear::zeros(3, 2);
//! let points = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let out = layer.forward(&points, 2).unwrap();
//! assert_eq!(out, vec![0.0; 4]);
//! ```

/// Elementwise activations.
pub mod activation;

/// Execution context, device and train/eval mode.
pub mod context;

/// Error types for the layer primitives.
pub mod error;

/// Parameter initialization helpers.
pub mod init;

/// Linear (fully-connected and pointwise) layers and matrix products.
pub mod linear;

/// Batch normalization and L2 normalization.
pub mod norm;

/// Named parameter state and checkpoints.
pub mod state;

pub use context::{Device, ExecutionContext, ExecutionStrategy, Mode};
pub use error::NnError;
pub use linear::Linear;
pub use norm::BatchNorm;
pub use state::{Checkpoint, LoadReport, ParamTensor, Parameterized, StateDict};
