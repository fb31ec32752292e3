#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Descriptor network
//!
//! ```text
//! points [B, N, 3]
//!   -> spatial alignment (3x3)            stn
//!   -> pointwise layers (+ 64x64 align)   pointnet / local_graph
//!   -> per-point embeddings [B, N, D]
//!   -> soft-assignment VLAD + gating      netvlad / gating
//!   -> descriptors [B, output_dim]
//! ```
//!
//! Every forward call takes an explicit [`ExecutionContext`] and [`Mode`];
//! normalization layers only touch their running statistics in [`Mode::Train`].
//!
//! ```rust,no_run
//! use pointvlad_model::{DescriptorModel, DescriptorNetwork, ModelConfig, PointCloudBatch};
//! use pointvlad_nn::{ExecutionContext, Mode};
//!
//! let mut network = DescriptorNetwork::new(ModelConfig::default())?;
//! let clouds = vec![vec![[0.0f32; 3]; 4096]; 2];
//! let batch = PointCloudBatch::from_clouds(&clouds)?;
//! let descriptors = network.forward(&ExecutionContext::cpu(), Mode::Eval, &batch)?;
//! assert_eq!(descriptors.dim(), 256);
//! # Ok::<(), pointvlad_model::ModelError>(())
//! ```

/// Model configuration.
pub mod config;

/// Error types for the descriptor network.
pub mod error;

/// Per-point feature extractor capability and its variants.
pub mod extractor;

/// Context gating applied to the final descriptor.
pub mod gating;

/// Local-neighborhood graph feature extractor.
pub mod local_graph;

/// Composition of extractor and aggregation.
pub mod network;

/// Orderless VLAD aggregation of per-point embeddings.
pub mod netvlad;

/// PointNet feature extractor.
pub mod pointnet;

/// Spatial-alignment (transform regression) module.
pub mod stn;

/// Point cloud batches and descriptor matrices.
pub mod types;

pub use config::{ExtractorKind, ModelConfig};
pub use error::ModelError;
pub use extractor::{Extractor, PointFeatureExtractor};
pub use network::{DescriptorModel, DescriptorNetwork};
pub use netvlad::{NetVladConfig, NetVladLoupe};
pub use types::{Descriptors, PointCloudBatch};

pub use pointvlad_nn::{ExecutionContext, Mode};
