//! Seen-Versions Ledger
//!
//! The ledger is a comma-joined list of version ids that already reached a
//! retrain decision. It is read fully and written fully; writers must present
//! the revision they read, and a commit against a stale revision fails with
//! `LedgerConflict`.

use crate::error::{PipelineError, PipelineResult};
use crate::storage::{checksum, write_atomic};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Lock files older than this are assumed to belong to a crashed writer
const STALE_LOCK_AFTER: Duration = Duration::from_secs(300);

/// Point-in-time view of the ledger plus the revision it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    seen: Vec<String>,
    revision: String,
}

impl LedgerSnapshot {
    /// Parse the persisted form. Blank entries and repeats are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut seen: Vec<String> = Vec::new();
        for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !seen.iter().any(|s| s == id) {
                seen.push(id.to_string());
            }
        }
        Self {
            seen,
            revision: checksum(raw.as_bytes()),
        }
    }

    pub fn empty() -> Self {
        Self::parse("")
    }

    pub fn seen(&self) -> &[String] {
        &self.seen
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.iter().any(|s| s == id)
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Persisted form of this snapshot
    pub fn render(&self) -> String {
        self.seen.join(",")
    }

    /// The snapshot that results from appending `id`
    pub fn appended(&self, id: &str) -> Self {
        if self.contains(id) {
            return self.clone();
        }
        let mut seen = self.seen.clone();
        seen.push(id.to_string());
        Self::parse(&seen.join(","))
    }
}

/// Persistence backend for the ledger
pub trait LedgerStore {
    /// Read the whole ledger
    fn load(&self) -> PipelineResult<LedgerSnapshot>;

    /// Append `id` if the persisted ledger is still at `base.revision()`.
    /// Appending an id already present in `base` is a no-op.
    fn commit(&self, base: &LedgerSnapshot, id: &str) -> PipelineResult<LedgerSnapshot>;
}

fn conflict(base: &LedgerSnapshot, found: impl Into<String>) -> PipelineError {
    PipelineError::LedgerConflict {
        expected: base.revision().to_string(),
        found: found.into(),
    }
}

/// Ledger kept in a text file next to the raw data
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read_raw(&self) -> PipelineResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn acquire(&self) -> PipelineResult<Option<LockGuard>> {
        let lock_path = self.lock_path();
        crate::storage::ensure_parent(&lock_path)?;
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Some(LockGuard { path: lock_path }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !lock_is_stale(&lock_path) {
                        return Ok(None);
                    }
                    warn!("Removing stale ledger lock {}", lock_path.display());
                    let _ = fs::remove_file(&lock_path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_LOCK_AFTER)
        .unwrap_or(false)
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release ledger lock {}: {}", self.path.display(), e);
        }
    }
}

impl LedgerStore for FileLedger {
    fn load(&self) -> PipelineResult<LedgerSnapshot> {
        let snapshot = LedgerSnapshot::parse(&self.read_raw()?);
        debug!("Loaded ledger {} with {} versions", self.path.display(), snapshot.len());
        Ok(snapshot)
    }

    fn commit(&self, base: &LedgerSnapshot, id: &str) -> PipelineResult<LedgerSnapshot> {
        if base.contains(id) {
            return Ok(base.clone());
        }

        let Some(_guard) = self.acquire()? else {
            return Err(conflict(base, "locked by another writer"));
        };

        let current = LedgerSnapshot::parse(&self.read_raw()?);
        if current.revision() != base.revision() {
            return Err(conflict(base, current.revision()));
        }

        let next = base.appended(id);
        write_atomic(&self.path, next.render().as_bytes())?;
        info!("Marked version {} as seen in {}", id, self.path.display());
        Ok(next)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryLedger;
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ignores_blanks_and_repeats() {
        let snapshot = LedgerSnapshot::parse(",v1,, v2 ,v1,");
        assert_eq!(snapshot.seen(), &["v1", "v2"]);
        assert_eq!(snapshot.render(), "v1,v2");
    }

    #[test]
    fn test_missing_file_reads_as_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::new(dir.path().join("seen.txt"));
        let snapshot = ledger.load().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot, LedgerSnapshot::empty());
    }

    #[test]
    fn test_file_commit_appends_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/seen.txt");
        let ledger = FileLedger::new(&path);

        let first = ledger.commit(&ledger.load().unwrap(), "v1").unwrap();
        let second = ledger.commit(&first, "v2").unwrap();

        assert_eq!(second.seen(), &["v1", "v2"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1,v2");
        assert_eq!(ledger.load().unwrap(), second);
        assert!(!ledger.lock_path().exists());
    }

    #[test]
    fn test_file_commit_detects_concurrent_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.txt");
        let ledger = FileLedger::new(&path);
        let stale = ledger.load().unwrap();

        fs::write(&path, "v1").unwrap();

        let result = ledger.commit(&stale, "v2");
        assert!(matches!(result, Err(PipelineError::LedgerConflict { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
    }

    #[test]
    fn test_file_commit_refuses_while_locked() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::new(dir.path().join("seen.txt"));
        fs::write(ledger.lock_path(), "12345").unwrap();

        let result = ledger.commit(&LedgerSnapshot::empty(), "v1");
        assert!(matches!(result, Err(PipelineError::LedgerConflict { .. })));
    }

    #[test]
    fn test_commit_of_present_id_is_noop() {
        let ledger = MemoryLedger::with_seen(&["v1"]);
        let base = ledger.load().unwrap();
        ledger.append_unchecked("v2");

        let result = ledger.commit(&base, "v1").unwrap();
        assert_eq!(result, base);
    }

    #[test]
    fn test_memory_ledger_detects_concurrent_write() {
        let ledger = MemoryLedger::new();
        let base = ledger.load().unwrap();
        ledger.append_unchecked("v1");

        assert!(matches!(
            ledger.commit(&base, "v2"),
            Err(PipelineError::LedgerConflict { .. })
        ));

        let fresh = ledger.load().unwrap();
        let committed = ledger.commit(&fresh, "v2").unwrap();
        assert_eq!(committed.seen(), &["v1", "v2"]);
    }
}
