#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! A dataset is a list of submaps. Every point cloud of a query submap knows
//! its true matches in each other submap. For each ordered pair
//! `(database m, query n)` with `m != n`, queries retrieve their nearest
//! database descriptors and the ranks of the first true match are folded into
//! a recall curve, a top-1% recall, and a top-1 similarity.
//!
//! ```rust,no_run
//! use pointvlad_eval::{
//!     BinPointCloudLoader, EvalConfig, JsonSubmapRegistry, RetrievalEvaluator, SubmapRegistry,
//! };
//! use pointvlad_model::{DescriptorNetwork, ModelConfig};
//! use pointvlad_nn::ExecutionContext;
//!
//! let registry = JsonSubmapRegistry::new("benchmark");
//! let database = registry.submaps("oxford_evaluation_database")?;
//! let queries = registry.submaps("oxford_evaluation_query")?;
//!
//! let config = ModelConfig::default();
//! let loader = BinPointCloudLoader::new("benchmark", config.num_points);
//! let mut network = DescriptorNetwork::new(config)?;
//!
//! let evaluator = RetrievalEvaluator::new(EvalConfig::default())?;
//! let result = evaluator.evaluate(
//!     &ExecutionContext::cpu_parallel(),
//!     &mut network,
//!     &loader,
//!     &database,
//!     &queries,
//! )?;
//! println!("{result}");
//! # Ok::<(), pointvlad_eval::EvalError>(())
//! ```

/// Evaluation protocol constants.
pub mod config;

/// Error types for evaluation.
pub mod error;

/// Cross-submap retrieval evaluation and its report.
pub mod evaluator;

/// Batched descriptor computation over a submap.
pub mod generator;

/// Exact nearest-neighbor index over descriptors.
pub mod kdtree;

/// Point cloud file loading.
pub mod loader;

/// Per-pair recall statistics.
pub mod recall;

/// Submaps and their ground truth.
pub mod registry;

pub use config::EvalConfig;
pub use error::EvalError;
pub use evaluator::{EvaluationResult, RetrievalEvaluator};
pub use generator::BatchDescriptorGenerator;
pub use kdtree::{DescriptorTree, Neighbor};
pub use loader::{BinPointCloudLoader, PointCloudLoader};
pub use recall::{one_percent_threshold, pair_recall, PairRecall};
pub use registry::{JsonSubmapRegistry, Submap, SubmapEntry, SubmapRegistry};
