//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use validator::Validate;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("Configuration failed validation: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Filesystem locations used by the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub ledger: PathBuf,
    pub merged: PathBuf,
    pub featurized: PathBuf,
    pub registry_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            ledger: PathBuf::from("data/seen_versions.txt"),
            merged: PathBuf::from("data/merged/current.csv"),
            featurized: PathBuf::from("data/processed/train.csv"),
            registry_dir: PathBuf::from("data/registry"),
        }
    }
}

/// Which version is the baseline and how raw tables are named
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineConfig {
    pub version: String,
    pub baseline_file: String,
    pub candidate_file: String,
}

impl BaselineConfig {
    /// Raw table file name inside the directory of version `id`
    pub fn file_for(&self, id: &str) -> &str {
        if id == self.version {
            &self.baseline_file
        } else {
            &self.candidate_file
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            baseline_file: "baseline.csv".to_string(),
            candidate_file: "latest.csv".to_string(),
        }
    }
}

/// Drift detection tuning
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DriftConfig {
    #[validate(range(min = 1, message = "sample size must be at least 1"))]
    pub sample_size: usize,
    pub seed: u64,
    /// Share of drifted columns at which the whole dataset counts as drifted
    #[validate(range(min = 0.0, max = 1.0))]
    pub drift_share: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub column_p_value: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub categorical_threshold: f64,
    pub ignore_columns: Vec<String>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            sample_size: 1000,
            seed: 42,
            drift_share: 0.5,
            column_p_value: 0.05,
            categorical_threshold: 0.1,
            ignore_columns: vec!["Unnamed: 0".to_string(), "trans_num".to_string()],
        }
    }
}

/// Metrics emission targets; both are optional
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub pushgateway_url: Option<url::Url>,
    pub job: String,
    pub textfile: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            job: "retrain_on_drift".to_string(),
            textfile: None,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Validate)]
pub struct Settings {
    pub paths: PathsConfig,
    pub baseline: BaselineConfig,
    #[validate(nested)]
    pub drift: DriftConfig,
    #[validate(range(min = 1, message = "at least one merchant must be kept"))]
    pub top_merchants: usize,
    pub train_params: Option<PathBuf>,
    pub metrics: MetricsConfig,
    #[validate(range(min = 1, message = "ledger retries must be at least 1"))]
    pub ledger_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            baseline: BaselineConfig::default(),
            drift: DriftConfig::default(),
            top_merchants: 5,
            train_params: None,
            metrics: MetricsConfig::default(),
            ledger_retries: 3,
        }
    }
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let path = |var: &str, default: PathBuf| lookup(var).map(PathBuf::from).unwrap_or(default);

        let paths = PathsConfig {
            raw_dir: path("FRAUDFLOW_RAW_DIR", defaults.paths.raw_dir),
            ledger: path("FRAUDFLOW_LEDGER", defaults.paths.ledger),
            merged: path("FRAUDFLOW_MERGED_PATH", defaults.paths.merged),
            featurized: path("FRAUDFLOW_FEATURIZED_PATH", defaults.paths.featurized),
            registry_dir: path("FRAUDFLOW_REGISTRY_DIR", defaults.paths.registry_dir),
        };

        let baseline = BaselineConfig {
            version: lookup("FRAUDFLOW_BASELINE_VERSION").unwrap_or(defaults.baseline.version),
            baseline_file: lookup("FRAUDFLOW_BASELINE_FILE")
                .unwrap_or(defaults.baseline.baseline_file),
            candidate_file: lookup("FRAUDFLOW_CANDIDATE_FILE")
                .unwrap_or(defaults.baseline.candidate_file),
        };

        let drift = DriftConfig {
            sample_size: parse_var(&lookup, "FRAUDFLOW_SAMPLE_SIZE", defaults.drift.sample_size)?,
            seed: parse_var(&lookup, "FRAUDFLOW_SEED", defaults.drift.seed)?,
            drift_share: parse_var(&lookup, "FRAUDFLOW_DRIFT_SHARE", defaults.drift.drift_share)?,
            column_p_value: parse_var(
                &lookup,
                "FRAUDFLOW_COLUMN_P_VALUE",
                defaults.drift.column_p_value,
            )?,
            categorical_threshold: parse_var(
                &lookup,
                "FRAUDFLOW_CATEGORICAL_THRESHOLD",
                defaults.drift.categorical_threshold,
            )?,
            ignore_columns: lookup("FRAUDFLOW_DRIFT_IGNORE")
                .map(|s| {
                    s.split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.drift.ignore_columns),
        };

        let pushgateway_url = match lookup("FRAUDFLOW_PUSHGATEWAY_URL") {
            Some(raw) => Some(url::Url::parse(&raw).map_err(|_| ConfigError::InvalidValue {
                var: "FRAUDFLOW_PUSHGATEWAY_URL".to_string(),
                value: raw.clone(),
            })?),
            None => None,
        };

        let metrics = MetricsConfig {
            pushgateway_url,
            job: lookup("FRAUDFLOW_METRICS_JOB").unwrap_or(defaults.metrics.job),
            textfile: lookup("FRAUDFLOW_METRICS_TEXTFILE").map(PathBuf::from),
        };

        let settings = Self {
            paths,
            baseline,
            drift,
            top_merchants: parse_var(&lookup, "FRAUDFLOW_TOP_MERCHANTS", defaults.top_merchants)?,
            train_params: lookup("FRAUDFLOW_TRAIN_PARAMS").map(PathBuf::from),
            metrics,
            ledger_retries: parse_var(&lookup, "FRAUDFLOW_LEDGER_RETRIES", defaults.ledger_retries)?,
        };

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
