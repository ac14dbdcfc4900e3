//! Statistical drift oracle
//!
//! Per-column tests over seeded samples, aggregated into a dataset verdict
//! by the share of drifted columns.

use super::stats::{jensen_shannon_distance, ks_p_value, ks_statistic, proportions};
use super::{ColumnDrift, ColumnKind, DriftOracle, DriftTest, DriftVerdict};
use crate::config::DriftConfig;
use crate::dataset::{sample_rows, Table};
use crate::error::{PipelineError, PipelineResult};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Columns with this many distinct reference values or fewer are categorical
const MIN_NUMERIC_CARDINALITY: usize = 5;

/// Default drift oracle
#[derive(Debug, Clone)]
pub struct StatisticalDriftOracle {
    config: DriftConfig,
}

impl StatisticalDriftOracle {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    fn compared_columns(&self, reference: &Table, current: &Table) -> Vec<String> {
        reference
            .columns()
            .iter()
            .filter(|c| current.has_column(c))
            .filter(|c| !self.config.ignore_columns.contains(c))
            .cloned()
            .collect()
    }

    fn compare_column(&self, name: &str, reference: &[&str], current: &[&str]) -> ColumnDrift {
        match (parse_numeric(reference), parse_numeric(current)) {
            (Some(ref_values), Some(cur_values))
                if !ref_values.is_empty()
                    && !cur_values.is_empty()
                    && distinct(&ref_values) > MIN_NUMERIC_CARDINALITY =>
            {
                let statistic = ks_statistic(&ref_values, &cur_values);
                let p_value = ks_p_value(statistic, ref_values.len(), cur_values.len());
                ColumnDrift {
                    column: name.to_string(),
                    kind: ColumnKind::Numeric,
                    test: DriftTest::KolmogorovSmirnov,
                    score: p_value,
                    threshold: self.config.column_p_value,
                    drifted: p_value < self.config.column_p_value,
                }
            }
            _ => {
                let distance = jensen_shannon_distance(
                    &proportions(reference.iter().copied()),
                    &proportions(current.iter().copied()),
                );
                ColumnDrift {
                    column: name.to_string(),
                    kind: ColumnKind::Categorical,
                    test: DriftTest::JensenShannon,
                    score: distance,
                    threshold: self.config.categorical_threshold,
                    drifted: distance >= self.config.categorical_threshold,
                }
            }
        }
    }
}

/// Every non-empty cell as a float, or `None` if any cell is not numeric
fn parse_numeric(values: &[&str]) -> Option<Vec<f64>> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
        .collect()
}

fn distinct(values: &[f64]) -> usize {
    values.iter().map(|v| v.to_bits()).collect::<HashSet<_>>().len()
}

impl DriftOracle for StatisticalDriftOracle {
    fn detect(&self, reference: &Table, current: &Table) -> PipelineResult<DriftVerdict> {
        if reference.is_empty() || current.is_empty() {
            return Err(PipelineError::DriftComputation(format!(
                "cannot compare empty tables (reference {} rows, current {} rows)",
                reference.len(),
                current.len()
            )));
        }

        let columns = self.compared_columns(reference, current);
        if columns.is_empty() {
            return Err(PipelineError::DriftComputation(
                "reference and current tables share no comparable columns".to_string(),
            ));
        }

        let started = Instant::now();
        let reference = sample_rows(reference, self.config.sample_size, self.config.seed);
        let current = sample_rows(current, self.config.sample_size, self.config.seed);

        let mut results = Vec::with_capacity(columns.len());
        for name in &columns {
            let (Some(ref_values), Some(cur_values)) = (reference.column(name), current.column(name))
            else {
                continue;
            };
            let result = self.compare_column(name, &ref_values, &cur_values);
            debug!(
                column = %name,
                kind = ?result.kind,
                score = result.score,
                drifted = result.drifted,
                "Column drift"
            );
            results.push(result);
        }

        let verdict = DriftVerdict::from_columns(self.config.drift_share, results);
        info!(
            columns = verdict.number_of_columns,
            drifted = verdict.number_of_drifted_columns,
            share = verdict.share_of_drifted_columns,
            dataset_drift = verdict.dataset_drift,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Drift computation finished"
        );
        Ok(verdict)
    }
}
