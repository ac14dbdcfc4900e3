//! Data Drift Detection
//!
//! Compares a candidate dataset against the baseline and reports whether the
//! candidate drifted far enough to warrant retraining. The pipeline only sees
//! the `DriftOracle` trait; `StatisticalDriftOracle` is the stock plug-in.
//!
//! Contract for every oracle:
//! - both tables are reduced to a seeded sample before comparison
//! - the same seed and the same two tables always yield the same verdict
//! - failures are reported, never replaced by a guessed verdict

pub mod oracle;
pub mod stats;

use crate::dataset::Table;
use crate::error::PipelineResult;
use serde::{Deserialize, Serialize};

/// How a column was compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Statistical test applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTest {
    /// Two-sample Kolmogorov-Smirnov; score is the p-value, drift below threshold
    KolmogorovSmirnov,
    /// Jensen-Shannon distance; drift at or above threshold
    JensenShannon,
}

/// Per-column drift result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDrift {
    pub column: String,
    pub kind: ColumnKind,
    pub test: DriftTest,
    pub score: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// Dataset-level verdict for one (baseline, candidate) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftVerdict {
    /// Share of drifted columns at which the dataset is flagged
    pub drift_share: f64,
    pub share_of_drifted_columns: f64,
    pub dataset_drift: bool,
    pub number_of_columns: usize,
    pub number_of_drifted_columns: usize,
    #[serde(default)]
    pub columns: Vec<ColumnDrift>,
}

impl DriftVerdict {
    /// Build a verdict from per-column results
    pub fn from_columns(drift_share: f64, columns: Vec<ColumnDrift>) -> Self {
        let number_of_columns = columns.len();
        let number_of_drifted_columns = columns.iter().filter(|c| c.drifted).count();
        let share_of_drifted_columns = if number_of_columns == 0 {
            0.0
        } else {
            number_of_drifted_columns as f64 / number_of_columns as f64
        };
        Self {
            drift_share,
            share_of_drifted_columns,
            dataset_drift: number_of_columns > 0 && share_of_drifted_columns >= drift_share,
            number_of_columns,
            number_of_drifted_columns,
            columns,
        }
    }
}

/// Pluggable drift scoring function
pub trait DriftOracle {
    fn detect(&self, reference: &Table, current: &Table) -> PipelineResult<DriftVerdict>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, drifted: bool) -> ColumnDrift {
        ColumnDrift {
            column: name.to_string(),
            kind: ColumnKind::Numeric,
            test: DriftTest::KolmogorovSmirnov,
            score: if drifted { 0.001 } else { 0.5 },
            threshold: 0.05,
            drifted,
        }
    }

    #[test]
    fn test_verdict_flags_dataset_at_share() {
        let verdict = DriftVerdict::from_columns(
            0.5,
            vec![column("amt", true), column("lat", false)],
        );
        assert_eq!(verdict.number_of_drifted_columns, 1);
        assert_eq!(verdict.share_of_drifted_columns, 0.5);
        assert!(verdict.dataset_drift);

        let verdict = DriftVerdict::from_columns(
            0.5,
            vec![column("amt", true), column("lat", false), column("long", false)],
        );
        assert!(!verdict.dataset_drift);
    }

    #[test]
    fn test_verdict_serializes_camel_case() {
        let verdict = DriftVerdict::from_columns(0.5, vec![]);
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["datasetDrift"], false);
        assert_eq!(json["shareOfDriftedColumns"], 0.0);
    }
}
