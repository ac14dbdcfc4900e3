//! Retraining Pipeline Module
//!
//! The stages run on a drifted version, in order:
//!
//! 1. **Merge**: baseline plus candidate rows, exact duplicates dropped
//! 2. **Featurize**: merged raw table to a numeric training table with `label`
//! 3. **Train**: fit and evaluate a model, audit drift against the baseline
//! 4. **Promote**: register the model and make it the sole Production version
//!
//! The orchestrator sequences them and records the version in the ledger
//! only once promotion succeeded.

pub mod featurize;
pub mod merge;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod train;

// Re-export main types for convenient access
pub use orchestrator::{PipelineOrchestrator, RunReport};
