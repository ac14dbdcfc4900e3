//! FraudFlow - Drift-Triggered Retraining
//!
//! Watches a directory of versioned raw transaction tables. Each run takes the
//! oldest version not yet in the seen-versions ledger, checks it for drift
//! against the baseline and, when it drifted, retrains and promotes the fraud
//! model before recording the version as seen.
//!
//! Commands:
//! - `run [--all]`: process the next unseen version (or all of them)
//! - `status`: show available, seen and unseen versions and the Production model
//! - `ingest --url <csv> --version <id>`: download a new raw version
//! - `split <input.csv> -n <parts>`: carve one CSV into versions `v1..vN`

mod config;
mod dataset;
mod decision;
mod drift;
mod error;
mod ingest;
mod pipeline;
mod storage;
mod versions;

use crate::config::Settings;
use crate::error::PipelineError;
use crate::pipeline::{PipelineOrchestrator, RunReport};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Drift-triggered retraining for the fraud detection model
#[derive(Parser, Debug)]
#[clap(name = "fraudflow", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the oldest unseen dataset version
    Run {
        /// Root directory holding one sub-directory per version
        #[clap(long, env = "FRAUDFLOW_RAW_DIR", value_name = "DIR")]
        raw_dir: Option<PathBuf>,

        /// Seen-versions ledger file
        #[clap(long, env = "FRAUDFLOW_LEDGER", value_name = "FILE")]
        ledger: Option<PathBuf>,

        /// Keep running until no unseen version is left
        #[clap(long)]
        all: bool,
    },

    /// Show versions, ledger and the Production model
    Status {
        #[clap(long, env = "FRAUDFLOW_RAW_DIR", value_name = "DIR")]
        raw_dir: Option<PathBuf>,

        #[clap(long, env = "FRAUDFLOW_LEDGER", value_name = "FILE")]
        ledger: Option<PathBuf>,
    },

    /// Download a CSV as a new dataset version
    Ingest {
        /// Location of the CSV to fetch
        #[clap(long)]
        url: Url,

        /// Version id to create, e.g. v7
        #[clap(long)]
        version: String,

        #[clap(long, env = "FRAUDFLOW_RAW_DIR", value_name = "DIR")]
        raw_dir: Option<PathBuf>,
    },

    /// Split one CSV into versions v1..vN
    Split {
        /// CSV to split
        input: PathBuf,

        /// Number of versions to produce
        #[clap(short = 'n', long, default_value = "5")]
        parts: usize,

        /// Shuffle rows (seeded by FRAUDFLOW_SEED) before splitting
        #[clap(long)]
        shuffle: bool,

        /// Directory receiving the version folders (defaults to the raw directory)
        #[clap(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load()?;
    info!("Configuration loaded");

    match cli.command {
        Command::Run {
            raw_dir,
            ledger,
            all,
        } => {
            override_paths(&mut settings, raw_dir, ledger);
            let orchestrator = PipelineOrchestrator::from_settings(&settings)?;
            if all {
                let reports = orchestrator.run_all()?;
                info!("Processed {} versions", reports.len());
                print_json(&reports)?;
            } else {
                let report = orchestrator.run()?;
                log_outcome(&report);
                print_json(&report)?;
            }
        }
        Command::Status { raw_dir, ledger } => {
            override_paths(&mut settings, raw_dir, ledger);
            let orchestrator = PipelineOrchestrator::from_settings(&settings)?;
            print_json(&orchestrator.status()?)?;
        }
        Command::Ingest {
            url,
            version,
            raw_dir,
        } => {
            override_paths(&mut settings, raw_dir, None);
            let ingested = ingest::download(&url, &settings.paths.raw_dir, &settings.baseline, &version)?;
            print_json(&ingested)?;
        }
        Command::Split {
            input,
            parts,
            shuffle,
            out_dir,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| settings.paths.raw_dir.clone());
            let seed = shuffle.then_some(settings.drift.seed);
            let written = ingest::split(&input, parts, seed, &out_dir, &settings.baseline)?;
            print_json(&written)?;
        }
    }
    Ok(())
}

fn override_paths(settings: &mut Settings, raw_dir: Option<PathBuf>, ledger: Option<PathBuf>) {
    if let Some(raw_dir) = raw_dir {
        settings.paths.raw_dir = raw_dir;
    }
    if let Some(ledger) = ledger {
        settings.paths.ledger = ledger;
    }
}

fn log_outcome(report: &RunReport) {
    info!(
        outcome = report.outcome.label(),
        rows = report.rows_processed,
        elapsed_ms = (report.duration_secs * 1000.0) as u64,
        "Run {} complete",
        report.run_id
    );
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Failing stage and cause on stderr
fn report_failure(e: &anyhow::Error) {
    match e.downcast_ref::<PipelineError>() {
        Some(err) => match err.stage() {
            Some(stage) => eprintln!("stage failed: {}: {}", stage, err.root_cause()),
            None => eprintln!("error: {}", err),
        },
        None => eprintln!("error: {:#}", e),
    }
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fraudflow=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "fraudflow",
            "run",
            "--raw-dir",
            "data/raw",
            "--ledger",
            "seen.txt",
            "--all",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                raw_dir,
                ledger,
                all,
            } => {
                assert_eq!(raw_dir, Some(PathBuf::from("data/raw")));
                assert_eq!(ledger, Some(PathBuf::from("seen.txt")));
                assert!(all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_split_defaults() {
        let cli = Cli::try_parse_from(["fraudflow", "split", "all.csv"]).unwrap();
        match cli.command {
            Command::Split { parts, shuffle, .. } => {
                assert_eq!(parts, 5);
                assert!(!shuffle);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
