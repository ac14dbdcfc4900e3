//! Raw data ingestion
//!
//! Lands new dataset versions under the raw directory, either by downloading a
//! CSV or by splitting one large CSV into a sequence of versions. Versions are
//! immutable once written: ingesting into an existing version directory fails.

use crate::config::BaselineConfig;
use crate::dataset::Table;
use crate::error::{validation_error, PipelineResult};
use crate::storage::write_atomic;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use url::Url;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

static VERSION_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex"));

/// A version written to the raw directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedVersion {
    pub version: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Reject ids that could escape the raw directory or collide with hidden entries
pub fn validate_version_id(id: &str) -> PipelineResult<()> {
    if !VERSION_ID.is_match(id) || id.starts_with('.') {
        return Err(validation_error(format!("invalid version id {:?}", id)));
    }
    Ok(())
}

/// Target table path for `id`, failing if the version already exists
fn new_version_path(raw_dir: &Path, baseline: &BaselineConfig, id: &str) -> PipelineResult<PathBuf> {
    validate_version_id(id)?;
    let dir = raw_dir.join(id);
    if dir.exists() {
        return Err(validation_error(format!(
            "version {} already exists at {}",
            id,
            dir.display()
        )));
    }
    Ok(dir.join(baseline.file_for(id)))
}

/// Download the CSV at `url` as version `id`
pub fn download(url: &Url, raw_dir: &Path, baseline: &BaselineConfig, id: &str) -> PipelineResult<IngestedVersion> {
    let path = new_version_path(raw_dir, baseline, id)?;
    let started = Instant::now();
    info!("Downloading {} into version {}", url, id);

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;
    let bytes = client.get(url.clone()).send()?.error_for_status()?.bytes()?;

    // A body that does not parse as CSV never becomes a version
    let table = Table::from_reader(bytes.as_ref())?;
    if table.is_empty() {
        return Err(validation_error(format!("{} returned an empty table", url)));
    }
    write_atomic(&path, &bytes)?;

    info!(
        rows = table.len(),
        columns = table.width(),
        bytes = bytes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Saved {}",
        path.display()
    );
    Ok(IngestedVersion {
        version: id.to_string(),
        path,
        rows: table.len(),
    })
}

/// Split `input` into `parts` versions `v1..vN` of at most ceil(rows / parts) rows each
pub fn split(
    input: &Path,
    parts: usize,
    shuffle: Option<u64>,
    raw_dir: &Path,
    baseline: &BaselineConfig,
) -> PipelineResult<Vec<IngestedVersion>> {
    if parts < 1 {
        return Err(validation_error("number of parts must be at least 1"));
    }
    let table = Table::read_csv(input)?;
    if table.is_empty() {
        return Err(validation_error(format!("{} has no rows", input.display())));
    }

    let mut order: Vec<usize> = (0..table.len()).collect();
    if let Some(seed) = shuffle {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    let chunk = table.len().div_ceil(parts);
    let targets = order
        .chunks(chunk)
        .enumerate()
        .map(|(i, _)| {
            let id = format!("v{}", i + 1);
            new_version_path(raw_dir, baseline, &id).map(|path| (id, path))
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let mut written = Vec::with_capacity(targets.len());
    for ((id, path), indices) in targets.into_iter().zip(order.chunks(chunk)) {
        let part = table.select_rows(indices);
        part.write_csv(&path)?;
        info!(rows = part.len(), "Wrote {} to {}", id, path.display());
        written.push(IngestedVersion {
            version: id,
            path,
            rows: part.len(),
        });
    }
    Ok(written)
}
