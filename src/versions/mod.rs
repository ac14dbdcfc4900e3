//! Dataset Version Tracking
//!
//! Raw data lands in one directory per version (`v1/`, `v2/`, ...). This module
//! provides:
//! - Version identifiers with a deterministic order
//! - The seen-versions ledger (idempotency source of truth)
//! - The version store tying directory scans to the ledger

pub mod ledger;
pub mod store;

pub use ledger::{FileLedger, LedgerSnapshot, LedgerStore};
#[cfg(test)]
pub use ledger::testing::MemoryLedger;
pub use store::{unseen, VersionStore};

use crate::dataset::Table;
use crate::error::PipelineResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// One immutable drop of raw data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetVersion {
    pub id: String,
    /// Raw table for this version
    pub path: PathBuf,
}

impl DatasetVersion {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

impl Ord for DatasetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_version_ids(&self.id, &other.id).then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for DatasetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_numeric_suffix(id: &str) -> (&str, Option<u64>) {
    let digits = id.len() - id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return (id, None);
    }
    let (prefix, number) = id.split_at(id.len() - digits);
    (prefix, number.parse().ok())
}

/// Natural order on version ids: `v2 < v10`, plain lexicographic otherwise
pub fn compare_version_ids(a: &str, b: &str) -> Ordering {
    match (split_numeric_suffix(a), split_numeric_suffix(b)) {
        ((pa, Some(na)), (pb, Some(nb))) if pa == pb => na.cmp(&nb).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Loads the raw table behind a version
pub trait TableSource {
    fn load(&self, version: &DatasetVersion) -> PipelineResult<Table>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::not_found_error;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Tables keyed by version id, counting loads
    #[derive(Default)]
    pub struct MemoryTables {
        tables: HashMap<String, Table>,
        pub loads: RefCell<Vec<String>>,
    }

    impl MemoryTables {
        pub fn with(mut self, id: &str, table: Table) -> Self {
            self.tables.insert(id.to_string(), table);
            self
        }
    }

    impl TableSource for MemoryTables {
        fn load(&self, version: &DatasetVersion) -> PipelineResult<Table> {
            self.loads.borrow_mut().push(version.id.clone());
            self.tables
                .get(&version.id)
                .cloned()
                .ok_or_else(|| not_found_error(format!("table for {}", version.id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_suffix_orders_naturally() {
        let mut ids = vec!["v10", "v2", "v1", "v9"];
        ids.sort_by(|a, b| compare_version_ids(a, b));
        assert_eq!(ids, vec!["v1", "v2", "v9", "v10"]);
    }

    #[test]
    fn test_mixed_ids_fall_back_to_lexicographic() {
        assert_eq!(compare_version_ids("alpha", "beta"), Ordering::Less);
        assert_eq!(compare_version_ids("v2", "w1"), Ordering::Less);
        assert_eq!(compare_version_ids("v01", "v1"), Ordering::Less);
    }
}
