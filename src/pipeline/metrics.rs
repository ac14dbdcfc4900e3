//! Run metrics
//!
//! Gauges describing one pipeline run, rendered in the Prometheus text
//! exposition format. Sinks are best-effort: an unreachable Pushgateway or an
//! unwritable textfile is logged and never fails the run.

use super::train::EvaluationMetrics;
use crate::drift::DriftVerdict;
use crate::error::PipelineResult;
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of one finished (or failed) run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub version: Option<String>,
    pub outcome: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub rows_processed: usize,
    pub evaluation: Option<EvaluationMetrics>,
    pub drift: Option<DriftVerdict>,
}

impl RunMetrics {
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.rows_processed as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Prometheus text exposition of every gauge in this snapshot
    pub fn render_prometheus(&self) -> String {
        let version = self.version.as_deref().unwrap_or("none");
        let labels = format!("run_id=\"{}\",version=\"{}\"", self.run_id, escape_label(version));
        let mut out = String::new();

        let mut gauge = |name: &str, help: &str, value: f64| {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
        };

        gauge(
            "pipeline_run_duration_seconds",
            "Wall-clock duration of the pipeline run",
            self.duration_secs,
        );
        gauge(
            "pipeline_processed_rows_total",
            "Rows in the training table produced by the run",
            self.rows_processed as f64,
        );
        gauge(
            "pipeline_throughput_rows_per_second",
            "Processed rows per second",
            self.throughput(),
        );
        gauge(
            "pipeline_run_success",
            "1 if the run finished without error",
            if self.success { 1.0 } else { 0.0 },
        );

        if let Some(eval) = &self.evaluation {
            gauge("fraud_auc", "Test-set ROC AUC", eval.auc);
            gauge("fraud_log_loss", "Test-set log loss", eval.log_loss);
            gauge("fraud_accuracy", "Test-set accuracy", eval.accuracy);
            gauge("fraud_f1", "Test-set F1 score", eval.f1);
        }

        if let Some(drift) = &self.drift {
            gauge("drift_share", "Configured dataset drift share", drift.drift_share);
            gauge(
                "share_of_drifted_columns",
                "Share of compared columns that drifted",
                drift.share_of_drifted_columns,
            );
            gauge(
                "dataset_drift",
                "1 if the dataset drifted",
                if drift.dataset_drift { 1.0 } else { 0.0 },
            );
        }

        let _ = writeln!(out, "# HELP pipeline_run_info Identity of the last run");
        let _ = writeln!(out, "# TYPE pipeline_run_info gauge");
        let _ = writeln!(
            out,
            "pipeline_run_info{{{},outcome=\"{}\"}} 1",
            labels,
            escape_label(&self.outcome)
        );
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Destination for run metrics
pub trait MetricsSink {
    fn name(&self) -> &str;

    fn send(&self, metrics: &RunMetrics) -> PipelineResult<()>;

    /// Send and swallow the failure
    fn emit(&self, metrics: &RunMetrics) {
        if let Err(e) = self.send(metrics) {
            warn!(sink = self.name(), "Failed to emit run metrics: {}", e);
        }
    }
}

/// Pushes to a Prometheus Pushgateway under `job`
pub struct PushgatewaySink {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl PushgatewaySink {
    pub fn new(base: &Url, job: &str) -> PipelineResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/metrics/job/{}", base.as_str().trim_end_matches('/'), job),
        })
    }

    #[cfg(test)]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MetricsSink for PushgatewaySink {
    fn name(&self) -> &str {
        "pushgateway"
    }

    fn send(&self, metrics: &RunMetrics) -> PipelineResult<()> {
        self.client
            .post(&self.endpoint)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(metrics.render_prometheus())
            .send()?
            .error_for_status()?;
        info!("Pushed run metrics to {}", self.endpoint);
        Ok(())
    }
}

/// Writes a `.prom` file for the node-exporter textfile collector
pub struct TextfileSink {
    path: PathBuf,
}

impl TextfileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetricsSink for TextfileSink {
    fn name(&self) -> &str {
        "textfile"
    }

    fn send(&self, metrics: &RunMetrics) -> PipelineResult<()> {
        write_atomic(&self.path, metrics.render_prometheus().as_bytes())?;
        info!("Wrote run metrics to {}", self.path.display());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics() -> RunMetrics {
        RunMetrics {
            run_id: Uuid::nil(),
            version: Some("v2".to_string()),
            outcome: "retrained".to_string(),
            success: true,
            started_at: Utc::now(),
            duration_secs: 2.0,
            rows_processed: 500,
            evaluation: Some(EvaluationMetrics {
                auc: 0.97,
                log_loss: 0.1,
                accuracy: 0.99,
                f1: 0.8,
            }),
            drift: None,
        }
    }

    #[test]
    fn test_render_includes_labeled_gauges() {
        let text = metrics().render_prometheus();
        let labels = "run_id=\"00000000-0000-0000-0000-000000000000\",version=\"v2\"";
        assert!(text.contains(&format!("pipeline_processed_rows_total{{{}}} 500", labels)));
        assert!(text.contains(&format!("pipeline_throughput_rows_per_second{{{}}} 250", labels)));
        assert!(text.contains(&format!("fraud_auc{{{}}} 0.97", labels)));
        assert!(text.contains(&format!("pipeline_run_info{{{},outcome=\"retrained\"}} 1", labels)));
        assert!(text.contains("# TYPE pipeline_run_success gauge"));
        assert!(!text.contains("dataset_drift"));
    }

    #[test]
    fn test_throughput_with_zero_duration() {
        let mut m = metrics();
        m.duration_secs = 0.0;
        assert_eq!(m.throughput(), 0.0);
    }

    #[test]
    fn test_textfile_sink_writes_exposition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("textfile/fraudflow.prom");
        TextfileSink::new(&path).emit(&metrics());
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, metrics().render_prometheus());
    }

    #[test]
    fn test_unreachable_pushgateway_is_not_fatal() {
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        let sink = PushgatewaySink::new(&url, "retrain_on_drift").unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:9/metrics/job/retrain_on_drift");
        assert!(sink.send(&metrics()).is_err());
        sink.emit(&metrics());
    }
}
