//! Tiered stochastic block model for directed placement networks.
//!
//! Nodes (e.g. institutions) are assigned to one of K latent tiers so as
//! to minimise a block log-likelihood of the destination × source count
//! matrix. Nodes that only ever receive edges are pinned to a reserved
//! sink tier K+1.
//!
//! Inference is parallel stochastic hill climbing: several workers propose
//! random single-node moves against private copies of the best assignment
//! and report strict improvements to a coordinator, which serializes them
//! into one shared state and asks every worker to resynchronize. The run
//! ends once every worker has found, by an exhaustive sweep, that no single
//! move improves its best objective.

#![deny(missing_docs)]

/// (K+1)×K block weight and cell-count statistics
pub mod block_stats;

/// Block log-likelihood with branch pruning
pub mod objective;

/// Node layout, sink pinning and worker partitions
pub mod layout;

/// Best state shared by coordinator and workers
pub mod shared;

/// Random-move search worker
pub mod worker;

/// Coordinator and the fit entry points
pub mod coordinator;

/// Fit errors
pub mod error;

/// Count-matrix and result-table files, gzipped or not
pub mod io;

/// Search options and budgets
pub mod options;

/// Tier relabelling and summaries for output
pub mod report;


pub use block_stats::{extract_block_matrix, BlockStats, CountMatrix};
pub use coordinator::{fit_block_model, AppliedImprovement, FitResult, TierFit};
pub use error::FitError;
pub use layout::TierLayout;
pub use objective::ObjectiveEvaluator;
pub use options::FitOptions;
pub use worker::{WorkerOutcome, WorkerState};
