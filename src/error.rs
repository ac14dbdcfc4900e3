//! Error handling module
//!
//! Provides the unified error type for every stage of the retraining pipeline.
//! "Nothing new to process" is deliberately absent: it is a run outcome, not an error.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detect,
    Decide,
    Merge,
    Featurize,
    Train,
    Promote,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Decide => "decide",
            Stage::Merge => "merge",
            Stage::Featurize => "featurize",
            Stage::Train => "train",
            Stage::Promote => "promote",
            Stage::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ledger changed since it was read (expected revision {expected}, found {found})")]
    LedgerConflict { expected: String, found: String },

    #[error("Drift computation failed: {0}")]
    DriftComputation(String),

    #[error("Stage {stage} failed: {cause}")]
    StageFailure {
        stage: Stage,
        #[source]
        cause: Box<PipelineError>,
    },

    #[error("Promotion of model version {version} failed: {reason}")]
    PromotionFailure { version: u64, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl PipelineError {
    /// Wrap an error raised inside `stage`. Already-attributed errors keep their stage.
    pub fn in_stage(stage: Stage, cause: PipelineError) -> Self {
        match cause {
            already @ (PipelineError::StageFailure { .. } | PipelineError::PromotionFailure { .. }) => {
                already
            }
            other => PipelineError::StageFailure {
                stage,
                cause: Box::new(other),
            },
        }
    }

    /// The stage this error is attributed to, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::StageFailure { stage, .. } => Some(*stage),
            PipelineError::PromotionFailure { .. } => Some(Stage::Promote),
            PipelineError::LedgerConflict { .. } => Some(Stage::Commit),
            _ => None,
        }
    }

    /// Innermost cause, skipping stage wrappers
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::StageFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Result type alias used throughout the pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_wraps_plain_errors() {
        let err = PipelineError::in_stage(Stage::Merge, not_found_error("baseline.csv"));
        assert_eq!(err.stage(), Some(Stage::Merge));
        assert!(matches!(err.root_cause(), PipelineError::NotFound(_)));
        assert_eq!(err.to_string(), "Stage merge failed: Not found: baseline.csv");
    }

    #[test]
    fn test_in_stage_keeps_existing_attribution() {
        let inner = PipelineError::in_stage(Stage::Train, validation_error("no rows"));
        let outer = PipelineError::in_stage(Stage::Promote, inner);
        assert_eq!(outer.stage(), Some(Stage::Train));

        let promotion = PipelineError::PromotionFailure {
            version: 3,
            reason: "index locked".to_string(),
        };
        let wrapped = PipelineError::in_stage(Stage::Train, promotion);
        assert_eq!(wrapped.stage(), Some(Stage::Promote));
    }
}
