//! Retrain Decision
//!
//! Decides, for one newly observed version, whether the pipeline skips it or
//! retrains on it. The decision never touches the ledger, so it can be replayed
//! for the same inputs at any time.
//!
//! ```text
//! NewVersionUnknown ──(baseline)────────────────────────────► NoDrift
//!        │
//!        └──► DriftCheckPending ──(dataset_drift = false)───► NoDrift
//!                     │
//!                     └──────────(dataset_drift = true)─────► DriftDetected
//! ```

use crate::drift::{DriftOracle, DriftVerdict};
use crate::error::{PipelineError, PipelineResult};
use crate::versions::{DatasetVersion, TableSource};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// States a version passes through while being decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    NewVersionUnknown,
    DriftCheckPending,
    NoDrift,
    DriftDetected,
}

impl DecisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecisionState::NoDrift | DecisionState::DriftDetected)
    }

    /// Pipeline outcome of a terminal state
    pub fn outcome(&self) -> Option<RetrainOutcome> {
        match self {
            DecisionState::NoDrift => Some(RetrainOutcome::Skip),
            DecisionState::DriftDetected => Some(RetrainOutcome::Retrain),
            _ => None,
        }
    }
}

/// What the orchestrator should do with a decided version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainOutcome {
    Skip,
    Retrain,
}

/// Terminal decision for one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub version: DatasetVersion,
    pub state: DecisionState,
    /// Absent when the drift check was not run (baseline version)
    pub verdict: Option<DriftVerdict>,
}

impl Decision {
    pub fn outcome(&self) -> RetrainOutcome {
        self.state.outcome().unwrap_or(RetrainOutcome::Skip)
    }
}

/// Decision engine parameterized by the baseline version
pub struct RetrainDecision<'a> {
    baseline: &'a DatasetVersion,
    tables: &'a dyn TableSource,
    oracle: &'a dyn DriftOracle,
}

impl<'a> RetrainDecision<'a> {
    pub fn new(
        baseline: &'a DatasetVersion,
        tables: &'a dyn TableSource,
        oracle: &'a dyn DriftOracle,
    ) -> Self {
        Self {
            baseline,
            tables,
            oracle,
        }
    }

    /// Run the state machine for `candidate` to a terminal state
    pub fn decide(&self, candidate: &DatasetVersion) -> PipelineResult<Decision> {
        let mut state = DecisionState::NewVersionUnknown;
        let mut verdict = None;

        while !state.is_terminal() {
            state = match state {
                DecisionState::NewVersionUnknown if candidate.id == self.baseline.id => {
                    info!("Version {} is the baseline; skipping drift check", candidate.id);
                    DecisionState::NoDrift
                }
                DecisionState::NewVersionUnknown => DecisionState::DriftCheckPending,
                DecisionState::DriftCheckPending => {
                    let result = self.check_drift(candidate)?;
                    let next = if result.dataset_drift {
                        DecisionState::DriftDetected
                    } else {
                        DecisionState::NoDrift
                    };
                    verdict = Some(result);
                    next
                }
                terminal => terminal,
            };
            debug!("Version {} -> {:?}", candidate.id, state);
        }

        match state {
            DecisionState::DriftDetected => info!("Drift detected for {}; retraining", candidate.id),
            _ => info!("No drift for {}; skipping", candidate.id),
        }

        Ok(Decision {
            version: candidate.clone(),
            state,
            verdict,
        })
    }

    fn check_drift(&self, candidate: &DatasetVersion) -> PipelineResult<DriftVerdict> {
        info!("Starting drift check for version {}", candidate.id);
        info!("Baseline file: {}", self.baseline.path.display());
        info!("New file:      {}", candidate.path.display());

        let t0 = Instant::now();
        let reference = self.tables.load(self.baseline)?;
        info!(
            "Loaded baseline: {} rows x {} cols in {:.2}s",
            reference.len(),
            reference.width(),
            t0.elapsed().as_secs_f64()
        );

        let t1 = Instant::now();
        let current = self.tables.load(candidate)?;
        info!(
            "Loaded candidate: {} rows x {} cols in {:.2}s",
            current.len(),
            current.width(),
            t1.elapsed().as_secs_f64()
        );

        self.oracle.detect(&reference, &current).map_err(|e| match e {
            PipelineError::DriftComputation(_) => e,
            other => PipelineError::DriftComputation(other.to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::dataset::Table;
    use std::cell::Cell;

    /// Oracle returning a fixed verdict and counting invocations
    pub struct FixedOracle {
        pub drift: bool,
        pub fail: bool,
        pub calls: Cell<usize>,
    }

    impl FixedOracle {
        pub fn drifting(drift: bool) -> Self {
            Self {
                drift,
                fail: false,
                calls: Cell::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                drift: false,
                fail: true,
                calls: Cell::new(0),
            }
        }
    }

    impl DriftOracle for FixedOracle {
        fn detect(&self, _reference: &Table, _current: &Table) -> PipelineResult<DriftVerdict> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(PipelineError::DriftComputation("oracle unavailable".to_string()));
            }
            let share = if self.drift { 1.0 } else { 0.0 };
            Ok(DriftVerdict {
                drift_share: 0.5,
                share_of_drifted_columns: share,
                dataset_drift: self.drift,
                number_of_columns: 1,
                number_of_drifted_columns: share as usize,
                columns: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedOracle;
    use super::*;
    use crate::dataset::table::table_of;
    use crate::versions::testing::MemoryTables;

    fn tables() -> MemoryTables {
        MemoryTables::default()
            .with("v1", table_of(&["amt"], &[&["1.0"]]))
            .with("v2", table_of(&["amt"], &[&["2.0"]]))
    }

    fn v(id: &str) -> DatasetVersion {
        DatasetVersion::new(id, format!("{id}/table.csv"))
    }

    #[test]
    fn test_baseline_skips_without_oracle_or_tables() {
        let tables = tables();
        let oracle = FixedOracle::drifting(true);
        let baseline = v("v1");

        let decision = RetrainDecision::new(&baseline, &tables, &oracle)
            .decide(&v("v1"))
            .unwrap();

        assert_eq!(decision.state, DecisionState::NoDrift);
        assert_eq!(decision.outcome(), RetrainOutcome::Skip);
        assert!(decision.verdict.is_none());
        assert_eq!(oracle.calls.get(), 0);
        assert!(tables.loads.borrow().is_empty());
    }

    #[test]
    fn test_drift_maps_to_retrain() {
        let tables = tables();
        let oracle = FixedOracle::drifting(true);
        let baseline = v("v1");

        let decision = RetrainDecision::new(&baseline, &tables, &oracle)
            .decide(&v("v2"))
            .unwrap();

        assert_eq!(decision.state, DecisionState::DriftDetected);
        assert_eq!(decision.outcome(), RetrainOutcome::Retrain);
        assert!(decision.verdict.unwrap().dataset_drift);
        assert_eq!(oracle.calls.get(), 1);
        assert_eq!(*tables.loads.borrow(), vec!["v1".to_string(), "v2".to_string()]);
    }

    #[test]
    fn test_no_drift_maps_to_skip() {
        let tables = tables();
        let oracle = FixedOracle::drifting(false);
        let baseline = v("v1");

        let decision = RetrainDecision::new(&baseline, &tables, &oracle)
            .decide(&v("v2"))
            .unwrap();

        assert_eq!(decision.state, DecisionState::NoDrift);
        assert_eq!(decision.outcome(), RetrainOutcome::Skip);
        assert!(decision.verdict.is_some());
    }

    #[test]
    fn test_oracle_failure_propagates() {
        let tables = tables();
        let oracle = FixedOracle::failing();
        let baseline = v("v1");

        let result = RetrainDecision::new(&baseline, &tables, &oracle).decide(&v("v2"));
        assert!(matches!(result, Err(PipelineError::DriftComputation(_))));
    }

    #[test]
    fn test_missing_candidate_table_fails_before_oracle() {
        let tables = tables();
        let oracle = FixedOracle::drifting(true);
        let baseline = v("v1");

        let result = RetrainDecision::new(&baseline, &tables, &oracle).decide(&v("v3"));
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert_eq!(oracle.calls.get(), 0);
    }

    #[test]
    fn test_terminal_states_map_to_outcomes() {
        assert_eq!(DecisionState::NoDrift.outcome(), Some(RetrainOutcome::Skip));
        assert_eq!(DecisionState::DriftDetected.outcome(), Some(RetrainOutcome::Retrain));
        assert_eq!(DecisionState::DriftCheckPending.outcome(), None);
    }
}
