//! Version Store
//!
//! Scans the raw directory for version folders and reconciles them with the
//! seen-versions ledger. Think of the ledger as the "applied migrations" table
//! for incoming data.

use super::{DatasetVersion, LedgerSnapshot, LedgerStore, TableSource};
use crate::config::BaselineConfig;
use crate::dataset::Table;
use crate::error::{not_found_error, PipelineResult};
use crate::ingest::validate_version_id;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Store for dataset versions and their processing ledger
pub struct VersionStore {
    raw_dir: PathBuf,
    baseline: BaselineConfig,
    ledger: Box<dyn LedgerStore>,
}

impl VersionStore {
    pub fn new(
        raw_dir: impl Into<PathBuf>,
        baseline: BaselineConfig,
        ledger: Box<dyn LedgerStore>,
    ) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            baseline,
            ledger,
        }
    }

    pub fn baseline_id(&self) -> &str {
        &self.baseline.version
    }

    /// Raw table location for a version id
    pub fn table_path(&self, id: &str) -> PathBuf {
        self.raw_dir.join(id).join(self.baseline.file_for(id))
    }

    pub fn version(&self, id: &str) -> DatasetVersion {
        DatasetVersion::new(id, self.table_path(id))
    }

    /// The designated baseline version
    pub fn baseline(&self) -> DatasetVersion {
        self.version(&self.baseline.version)
    }

    /// All version directories under the raw root, in version order
    pub fn list_available(&self) -> PipelineResult<Vec<DatasetVersion>> {
        if !self.raw_dir.is_dir() {
            return Err(not_found_error(format!(
                "raw data directory {}",
                self.raw_dir.display()
            )));
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.raw_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                debug!("Skipping non UTF-8 directory {:?}", entry.file_name());
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            // The ledger is comma-joined and trimmed, so such ids could never be recorded
            if let Err(e) = validate_version_id(&id) {
                warn!("Skipping directory {:?}: {}", id, e);
                continue;
            }
            versions.push(self.version(&id));
        }
        versions.sort();

        debug!("Found {} versions under {}", versions.len(), self.raw_dir.display());
        Ok(versions)
    }

    pub fn load_ledger(&self) -> PipelineResult<LedgerSnapshot> {
        self.ledger.load()
    }

    /// Record that a decision was reached for `version`
    pub fn mark_seen(
        &self,
        ledger: &LedgerSnapshot,
        version: &DatasetVersion,
    ) -> PipelineResult<LedgerSnapshot> {
        self.ledger.commit(ledger, &version.id)
    }
}

impl TableSource for VersionStore {
    fn load(&self, version: &DatasetVersion) -> PipelineResult<Table> {
        Table::read_csv(&version.path)
    }
}

/// Versions in `available` not yet present in `ledger`, in their original order
pub fn unseen(available: &[DatasetVersion], ledger: &LedgerSnapshot) -> Vec<DatasetVersion> {
    available
        .iter()
        .filter(|v| !ledger.contains(&v.id))
        .cloned()
        .collect()
}
