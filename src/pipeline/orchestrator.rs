//! Pipeline Orchestrator
//!
//! Drives one version through detect, decide and (on drift) merge, featurize,
//! train and promote, then records it in the ledger. The ledger is written
//! last: any failure before that leaves the version unseen so the next run
//! starts again from merge.

use super::featurize::{Featurizer, TransactionFeaturizer};
use super::merge::MergeStage;
use super::metrics::{MetricsSink, PushgatewaySink, RunMetrics, TextfileSink};
use super::registry::{FileRegistry, ModelArtifact, ModelRegistry, RegisteredModel};
use super::train::{EvaluationMetrics, LogisticTrainer, Trainer, TrainingParams};
use crate::config::Settings;
use crate::dataset::Table;
use crate::decision::{Decision, RetrainDecision, RetrainOutcome};
use crate::drift::oracle::StatisticalDriftOracle;
use crate::drift::{DriftOracle, DriftVerdict};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::versions::{unseen, DatasetVersion, FileLedger, LedgerSnapshot, TableSource, VersionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Name models are registered under
pub const MODEL_NAME: &str = "fraud_model";

const CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every available version is already in the ledger
    NoOp,
    Skipped { version: String },
    Retrained { version: String, model_version: u64 },
    /// A concurrent run recorded the version first
    AlreadyClosed { version: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::NoOp => "no-op",
            RunOutcome::Skipped { .. } => "skip",
            RunOutcome::Retrained { .. } => "retrain",
            RunOutcome::AlreadyClosed { .. } => "already-closed",
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub decision: Option<Decision>,
    pub duration_secs: f64,
    pub rows_processed: usize,
    pub evaluation: Option<EvaluationMetrics>,
}

/// Versions and models as currently recorded
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub baseline: String,
    pub available: Vec<String>,
    pub seen: Vec<String>,
    pub unseen: Vec<String>,
    pub production: Option<RegisteredModel>,
    /// Every registered model version, oldest first
    pub models: Vec<RegisteredModel>,
}

/// Fixed artifact locations, overwritten on every retrain
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub merged: PathBuf,
    pub featurized: PathBuf,
}

/// Facts gathered while a run progresses, reported even when it fails
#[derive(Debug, Default)]
struct RunProgress {
    version: Option<String>,
    decision: Option<Decision>,
    rows_processed: usize,
    evaluation: Option<EvaluationMetrics>,
}

impl RunProgress {
    fn drift(&self) -> Option<DriftVerdict> {
        self.decision.as_ref().and_then(|d| d.verdict.clone())
    }
}

enum CommitResult {
    Recorded,
    AlreadyClosed,
}

pub struct PipelineOrchestrator {
    store: VersionStore,
    oracle: Box<dyn DriftOracle>,
    featurizer: Box<dyn Featurizer>,
    trainer: Box<dyn Trainer>,
    registry: Box<dyn ModelRegistry>,
    sinks: Vec<Box<dyn MetricsSink>>,
    merge: MergeStage,
    featurized: PathBuf,
    ledger_retries: u32,
}

impl PipelineOrchestrator {
    pub fn new(
        store: VersionStore,
        oracle: Box<dyn DriftOracle>,
        featurizer: Box<dyn Featurizer>,
        trainer: Box<dyn Trainer>,
        registry: Box<dyn ModelRegistry>,
        paths: ArtifactPaths,
    ) -> Self {
        Self {
            store,
            oracle,
            featurizer,
            trainer,
            registry,
            sinks: Vec::new(),
            merge: MergeStage::new(paths.merged),
            featurized: paths.featurized,
            ledger_retries: 3,
        }
    }

    /// Production wiring from settings
    pub fn from_settings(settings: &Settings) -> PipelineResult<Self> {
        let store = VersionStore::new(
            &settings.paths.raw_dir,
            settings.baseline.clone(),
            Box::new(FileLedger::new(&settings.paths.ledger)),
        );
        let params = TrainingParams::load(settings.train_params.as_deref())?;

        let mut orchestrator = Self::new(
            store,
            Box::new(StatisticalDriftOracle::new(settings.drift.clone())),
            Box::new(TransactionFeaturizer::new(settings.top_merchants)),
            Box::new(LogisticTrainer::new(params)),
            Box::new(FileRegistry::new(&settings.paths.registry_dir, MODEL_NAME)),
            ArtifactPaths {
                merged: settings.paths.merged.clone(),
                featurized: settings.paths.featurized.clone(),
            },
        )
        .with_ledger_retries(settings.ledger_retries);

        if let Some(url) = &settings.metrics.pushgateway_url {
            orchestrator = orchestrator.with_sink(Box::new(PushgatewaySink::new(url, &settings.metrics.job)?));
        }
        if let Some(path) = &settings.metrics.textfile {
            orchestrator = orchestrator.with_sink(Box::new(TextfileSink::new(path)));
        }
        Ok(orchestrator)
    }

    pub fn with_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_ledger_retries(mut self, retries: u32) -> Self {
        self.ledger_retries = retries.max(1);
        self
    }

    /// Process the oldest unseen version, if any
    pub fn run(&self) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        let _entered = span.enter();

        let started_at = Utc::now();
        let started = Instant::now();
        let mut progress = RunProgress::default();

        let result = self.execute(&mut progress);
        let duration_secs = started.elapsed().as_secs_f64();

        match &result {
            Ok(RunOutcome::NoOp) => {}
            Ok(outcome) => {
                info!(
                    outcome = outcome.label(),
                    elapsed_ms = (duration_secs * 1000.0) as u64,
                    "Run finished"
                );
                self.emit(run_id, started_at, duration_secs, outcome.label(), true, &progress);
            }
            Err(e) => {
                error!(
                    stage = e.stage().map(|s| s.as_str()).unwrap_or("unknown"),
                    "Run failed: {}",
                    e
                );
                self.emit(run_id, started_at, duration_secs, "failed", false, &progress);
            }
        }

        let outcome = result?;
        Ok(RunReport {
            run_id,
            started_at,
            outcome,
            decision: progress.decision,
            duration_secs,
            rows_processed: progress.rows_processed,
            evaluation: progress.evaluation,
        })
    }

    /// Run until nothing is left to process; stops at the first failure
    pub fn run_all(&self) -> PipelineResult<Vec<RunReport>> {
        let mut reports = Vec::new();
        loop {
            let report = self.run()?;
            if report.outcome == RunOutcome::NoOp {
                return Ok(reports);
            }
            reports.push(report);
        }
    }

    pub fn status(&self) -> PipelineResult<PipelineStatus> {
        let available = self.store.list_available()?;
        let ledger = self.store.load_ledger()?;
        let production = self.registry.production()?.map(|p| p.entry);
        let models = self.registry.list()?;

        Ok(PipelineStatus {
            baseline: self.store.baseline_id().to_string(),
            unseen: unseen(&available, &ledger).into_iter().map(|v| v.id).collect(),
            available: available.into_iter().map(|v| v.id).collect(),
            seen: ledger.seen().to_vec(),
            production,
            models,
        })
    }

    fn execute(&self, progress: &mut RunProgress) -> PipelineResult<RunOutcome> {
        let available = self
            .store
            .list_available()
            .map_err(|e| PipelineError::in_stage(Stage::Detect, e))?;
        let ledger = self
            .store
            .load_ledger()
            .map_err(|e| PipelineError::in_stage(Stage::Detect, e))?;

        let pending = unseen(&available, &ledger);
        let Some(candidate) = pending.first() else {
            info!(available = available.len(), "No new versions to process");
            return Ok(RunOutcome::NoOp);
        };
        info!(pending = pending.len(), "Processing version {}", candidate.id);
        progress.version = Some(candidate.id.clone());

        let baseline = self.store.baseline();
        let decision = RetrainDecision::new(&baseline, &self.store, self.oracle.as_ref())
            .decide(candidate)
            .map_err(|e| PipelineError::in_stage(Stage::Decide, e))?;
        progress.decision = Some(decision.clone());

        let model_version = match decision.outcome() {
            RetrainOutcome::Skip => None,
            RetrainOutcome::Retrain => Some(self.retrain(&baseline, &decision, progress)?),
        };

        let version = candidate.id.clone();
        match self.commit(ledger, candidate)? {
            CommitResult::AlreadyClosed => Ok(RunOutcome::AlreadyClosed { version }),
            CommitResult::Recorded => Ok(match model_version {
                Some(model_version) => RunOutcome::Retrained {
                    version,
                    model_version,
                },
                None => RunOutcome::Skipped { version },
            }),
        }
    }

    fn retrain(
        &self,
        baseline: &DatasetVersion,
        decision: &Decision,
        progress: &mut RunProgress,
    ) -> PipelineResult<u64> {
        let merged = self
            .merge
            .run(&self.store, baseline, &decision.version)
            .map_err(|e| PipelineError::in_stage(Stage::Merge, e))?;

        let featurized = self
            .featurizer
            .featurize(&merged.path, &self.featurized)
            .map_err(|e| PipelineError::in_stage(Stage::Featurize, e))?;
        progress.rows_processed = featurized.rows;

        let artifact = self
            .train(baseline, decision)
            .map_err(|e| PipelineError::in_stage(Stage::Train, e))?;
        progress.evaluation = Some(artifact.metrics);
        let model_version = self
            .registry
            .register(&artifact)
            .map_err(|e| PipelineError::in_stage(Stage::Train, e))?;

        self.registry
            .promote(model_version)
            .map_err(|e| match e {
                PipelineError::PromotionFailure { .. } => e,
                other => PipelineError::PromotionFailure {
                    version: model_version,
                    reason: other.to_string(),
                },
            })?;
        Ok(model_version)
    }

    fn train(&self, baseline: &DatasetVersion, decision: &Decision) -> PipelineResult<ModelArtifact> {
        let started = Instant::now();
        let table = Table::read_csv(&self.featurized)?;
        let trained = self.trainer.train(&table)?;
        let drift_audit = self.audit_drift(baseline, decision)?;

        info!(
            version = %decision.version.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training stage complete"
        );
        Ok(ModelArtifact {
            id: Uuid::new_v4(),
            name: MODEL_NAME.to_string(),
            source_version: decision.version.id.clone(),
            trained_at: Utc::now(),
            model: trained.model,
            params: trained.params,
            metrics: trained.metrics,
            split: trained.split,
            drift_audit,
        })
    }

    /// Recompute drift against the baseline; it must agree with the branch verdict
    fn audit_drift(&self, baseline: &DatasetVersion, decision: &Decision) -> PipelineResult<Option<DriftVerdict>> {
        if decision.version.id == baseline.id {
            return Ok(None);
        }
        let reference = self.store.load(baseline)?;
        let current = self.store.load(&decision.version)?;
        let audit = self.oracle.detect(&reference, &current).map_err(|e| match e {
            PipelineError::DriftComputation(_) => e,
            other => PipelineError::DriftComputation(other.to_string()),
        })?;

        let branch = decision.verdict.as_ref().map(|v| v.dataset_drift);
        if branch != Some(audit.dataset_drift) {
            return Err(PipelineError::DriftComputation(format!(
                "audit verdict for {} (dataset_drift={}) disagrees with the branch verdict ({:?})",
                decision.version.id, audit.dataset_drift, branch
            )));
        }
        info!(
            share = audit.share_of_drifted_columns,
            dataset_drift = audit.dataset_drift,
            "Drift audit for {} matches the branch verdict",
            decision.version.id
        );
        Ok(Some(audit))
    }

    fn commit(&self, mut base: LedgerSnapshot, version: &DatasetVersion) -> PipelineResult<CommitResult> {
        let mut attempt = 1;
        loop {
            match self.store.mark_seen(&base, version) {
                Ok(_) => return Ok(CommitResult::Recorded),
                Err(PipelineError::LedgerConflict { expected, found }) if attempt < self.ledger_retries => {
                    warn!(
                        attempt,
                        expected = %expected,
                        found = %found,
                        "Ledger changed during the run; re-reading"
                    );
                    std::thread::sleep(CONFLICT_BACKOFF * attempt);
                    attempt += 1;

                    base = self
                        .store
                        .load_ledger()
                        .map_err(|e| PipelineError::in_stage(Stage::Commit, e))?;
                    if base.contains(&version.id) {
                        warn!("Version {} was recorded by a concurrent run", version.id);
                        return Ok(CommitResult::AlreadyClosed);
                    }
                }
                Err(e @ PipelineError::LedgerConflict { .. }) => return Err(e),
                Err(e) => return Err(PipelineError::in_stage(Stage::Commit, e)),
            }
        }
    }

    fn emit(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        outcome: &str,
        success: bool,
        progress: &RunProgress,
    ) {
        if self.sinks.is_empty() {
            return;
        }
        let metrics = RunMetrics {
            run_id,
            version: progress.version.clone(),
            outcome: outcome.to_string(),
            success,
            started_at,
            duration_secs,
            rows_processed: progress.rows_processed,
            evaluation: progress.evaluation,
            drift: progress.drift(),
        };
        for sink in &self.sinks {
            sink.emit(&metrics);
        }
    }
}
