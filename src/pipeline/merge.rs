//! Merge stage
//!
//! Stacks the baseline and the drifted candidate into one training table,
//! dropping rows that are identical across every column.

use crate::dataset::Table;
use crate::error::PipelineResult;
use crate::versions::{DatasetVersion, TableSource};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// What the merge produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub path: PathBuf,
    pub baseline_rows: usize,
    pub candidate_rows: usize,
    pub merged_rows: usize,
    pub duplicates_dropped: usize,
}

/// Baseline rows followed by candidate rows, exact duplicates removed
pub fn merge_tables(baseline: &Table, candidate: &Table) -> Table {
    baseline.concat(candidate).drop_duplicates()
}

/// Writes the merged table to a single well-known location
pub struct MergeStage {
    output: PathBuf,
}

impl MergeStage {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &std::path::Path {
        &self.output
    }

    /// Merge and overwrite the output; rerunning on the same inputs rewrites identical bytes
    pub fn run(
        &self,
        tables: &dyn TableSource,
        baseline: &DatasetVersion,
        candidate: &DatasetVersion,
    ) -> PipelineResult<MergeReport> {
        let started = Instant::now();
        let base = tables.load(baseline)?;
        let new = tables.load(candidate)?;

        let merged = merge_tables(&base, &new);
        merged.write_csv(&self.output)?;

        let report = MergeReport {
            path: self.output.clone(),
            baseline_rows: base.len(),
            candidate_rows: new.len(),
            merged_rows: merged.len(),
            duplicates_dropped: base.len() + new.len() - merged.len(),
        };
        info!(
            baseline = report.baseline_rows,
            candidate = report.candidate_rows,
            merged = report.merged_rows,
            dropped = report.duplicates_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Merged {} into {}",
            candidate.id,
            self.output.display()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::table::table_of;
    use crate::versions::testing::MemoryTables;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_merge_drops_exact_duplicates() {
        let baseline = table_of(&["id", "a"], &[&["1", "5"]]);
        let candidate = table_of(&["id", "a"], &[&["1", "5"], &["2", "7"]]);

        let merged = merge_tables(&baseline, &candidate);

        assert_eq!(merged, table_of(&["id", "a"], &[&["1", "5"], &["2", "7"]]));
    }

    #[test]
    fn test_merge_keeps_rows_differing_in_one_column() {
        let baseline = table_of(&["id", "a"], &[&["1", "5"]]);
        let candidate = table_of(&["id", "a"], &[&["1", "6"]]);
        assert_eq!(merge_tables(&baseline, &candidate).len(), 2);
    }

    #[test]
    fn test_stage_rerun_produces_identical_bytes() {
        let dir = TempDir::new().unwrap();
        let tables = MemoryTables::default()
            .with("v1", table_of(&["id", "a"], &[&["1", "5"], &["3", "9"]]))
            .with("v2", table_of(&["id", "a"], &[&["1", "5"], &["2", "7"]]));
        let stage = MergeStage::new(dir.path().join("merged/current.csv"));
        let v1 = DatasetVersion::new("v1", "v1/baseline.csv");
        let v2 = DatasetVersion::new("v2", "v2/latest.csv");

        let first = stage.run(&tables, &v1, &v2).unwrap();
        let first_bytes = std::fs::read(stage.output()).unwrap();
        let second = stage.run(&tables, &v1, &v2).unwrap();
        let second_bytes = std::fs::read(stage.output()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(first.merged_rows, 3);
        assert_eq!(first.duplicates_dropped, 1);
    }
}
