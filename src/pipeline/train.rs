//! Train stage
//!
//! Fits a fraud classifier on the featurized table. The default trainer is an
//! L2-regularized logistic regression fitted by full-batch gradient descent on
//! standardized features, evaluated on a stratified holdout.

use super::featurize::LABEL_COLUMN;
use crate::dataset::Table;
use crate::error::{validation_error, PipelineResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};
use validator::Validate;

const LOG_EVERY_EPOCHS: usize = 50;
const PROBABILITY_CLIP: f64 = 1e-15;

/// Hyper-parameters for `LogisticTrainer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingParams {
    #[validate(range(min = 0.000001, max = 10.0))]
    pub learning_rate: f64,

    #[validate(range(min = 1, max = 100000))]
    pub epochs: usize,

    #[validate(range(min = 0.0))]
    pub l2: f64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f64,

    /// Share of rows held out, split evenly between validation and test
    #[validate(range(min = 0.05, max = 0.9))]
    pub holdout: f64,

    /// Reweight the positive class by the negative/positive ratio
    pub balance_classes: bool,

    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 300,
            l2: 0.001,
            threshold: 0.5,
            holdout: 0.3,
            balance_classes: true,
            seed: 42,
        }
    }
}

impl TrainingParams {
    /// Defaults, or the JSON file at `path` when given
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let params: Self = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        params
            .validate()
            .map_err(|e| validation_error(format!("training params: {}", e)))?;
        Ok(params)
    }
}

/// Holdout evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub auc: f64,
    pub log_loss: f64,
    pub accuracy: f64,
    pub f1: f64,
}

/// Row counts of each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

/// Fitted logistic model, self-contained for scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticModel {
    pub features: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub threshold: f64,
}

impl LogisticModel {
    fn standardize(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(x, (mean, scale))| if x.is_nan() { 0.0 } else { (x - mean) / scale })
            .collect()
    }

    fn score(&self, standardized: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, standardized) + self.bias)
    }

    /// Fraud probability for one row of raw feature values; NaN means missing
    pub fn predict_proba(&self, raw: &[f64]) -> f64 {
        self.score(&self.standardize(raw))
    }

    pub fn predict(&self, raw: &[f64]) -> bool {
        self.predict_proba(raw) >= self.threshold
    }
}

/// Output of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub model: LogisticModel,
    pub metrics: EvaluationMetrics,
    pub split: SplitSizes,
    pub params: TrainingParams,
}

/// Model fitting collaborator
pub trait Trainer {
    fn train(&self, table: &Table) -> PipelineResult<TrainedModel>;
}

/// Default trainer
#[derive(Debug, Clone, Default)]
pub struct LogisticTrainer {
    params: TrainingParams,
}

impl LogisticTrainer {
    pub fn new(params: TrainingParams) -> Self {
        Self { params }
    }
}

struct Dataset {
    features: Vec<String>,
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
}

fn parse_label(raw: &str) -> Option<f64> {
    match raw.trim() {
        "1" | "1.0" | "true" | "True" => Some(1.0),
        "0" | "0.0" | "false" | "False" => Some(0.0),
        _ => None,
    }
}

fn parse_feature(raw: &str) -> Option<f64> {
    match raw.trim() {
        "" => Some(f64::NAN),
        "true" | "True" => Some(1.0),
        "false" | "False" => Some(0.0),
        other => other.parse::<f64>().ok(),
    }
}

fn extract(table: &Table) -> PipelineResult<Dataset> {
    let label_idx = table
        .column_index(LABEL_COLUMN)
        .ok_or_else(|| validation_error(format!("featurized table has no {} column", LABEL_COLUMN)))?;
    let feature_idx: Vec<usize> = (0..table.width()).filter(|&i| i != label_idx).collect();
    if feature_idx.is_empty() {
        return Err(validation_error("featurized table has no feature columns"));
    }

    let mut x = Vec::with_capacity(table.len());
    let mut y = Vec::with_capacity(table.len());
    for (row_no, row) in table.rows().iter().enumerate() {
        let label = parse_label(&row[label_idx]).ok_or_else(|| {
            validation_error(format!("row {}: invalid label {:?}", row_no + 1, row[label_idx]))
        })?;
        let values = feature_idx
            .iter()
            .map(|&i| {
                parse_feature(&row[i]).ok_or_else(|| {
                    validation_error(format!(
                        "row {}: column {} is not numeric ({:?})",
                        row_no + 1,
                        table.columns()[i],
                        row[i]
                    ))
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        x.push(values);
        y.push(label);
    }

    Ok(Dataset {
        features: feature_idx.iter().map(|&i| table.columns()[i].clone()).collect(),
        x,
        y,
    })
}

/// Per-class shuffle, then `holdout` of each class split evenly into validation and test
fn stratified_split(labels: &[f64], holdout: f64, seed: u64) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut train, mut validation, mut test) = (Vec::new(), Vec::new(), Vec::new());

    for class in [0.0, 1.0] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(&mut rng);
        let held = (members.len() as f64 * holdout).round() as usize;
        let val_count = held / 2;
        let train_count = members.len() - held;

        train.extend_from_slice(&members[..train_count]);
        validation.extend_from_slice(&members[train_count..train_count + val_count]);
        test.extend_from_slice(&members[train_count + val_count..]);
    }

    train.sort_unstable();
    validation.sort_unstable();
    test.sort_unstable();
    (train, validation, test)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> f64 {
    let positives = labels.iter().filter(|&&y| y == 1.0).count() as f64;
    let negatives = labels.len() as f64 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] == 1.0 {
                rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    (rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives)
}

fn log_loss(labels: &[f64], probabilities: &[f64]) -> f64 {
    let total: f64 = labels
        .iter()
        .zip(probabilities)
        .map(|(y, p)| {
            let p = p.clamp(PROBABILITY_CLIP, 1.0 - PROBABILITY_CLIP);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f64
}

fn evaluate(labels: &[f64], probabilities: &[f64], threshold: f64) -> EvaluationMetrics {
    let (mut tp, mut fp, mut fn_, mut correct) = (0.0, 0.0, 0.0, 0.0);
    for (y, p) in labels.iter().zip(probabilities) {
        let predicted = *p >= threshold;
        let actual = *y == 1.0;
        match (predicted, actual) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, true) => fn_ += 1.0,
            (false, false) => {}
        }
        if predicted == actual {
            correct += 1.0;
        }
    }
    let f1 = if tp == 0.0 { 0.0 } else { 2.0 * tp / (2.0 * tp + fp + fn_) };

    EvaluationMetrics {
        auc: roc_auc(labels, probabilities),
        log_loss: log_loss(labels, probabilities),
        accuracy: correct / labels.len() as f64,
        f1,
    }
}

impl Trainer for LogisticTrainer {
    fn train(&self, table: &Table) -> PipelineResult<TrainedModel> {
        let started = Instant::now();
        let params = &self.params;
        let data = extract(table)?;

        let (train_idx, val_idx, test_idx) = stratified_split(&data.y, params.holdout, params.seed);
        let test_positives = test_idx.iter().filter(|&&i| data.y[i] == 1.0).count();
        if test_positives == 0 || test_positives == test_idx.len() {
            return Err(validation_error(format!(
                "test split needs both classes; got {} rows with {} fraud",
                test_idx.len(),
                test_positives
            )));
        }
        info!(
            train = train_idx.len(),
            validation = val_idx.len(),
            test = test_idx.len(),
            features = data.features.len(),
            "Training logistic model"
        );

        let dims = data.features.len();
        let mut means = vec![0.0; dims];
        let mut scales = vec![1.0; dims];
        for j in 0..dims {
            let present: Vec<f64> = train_idx
                .iter()
                .map(|&i| data.x[i][j])
                .filter(|v| !v.is_nan())
                .collect();
            if present.is_empty() {
                continue;
            }
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / present.len() as f64;
            means[j] = mean;
            if variance > 0.0 {
                scales[j] = variance.sqrt();
            }
        }

        let mut model = LogisticModel {
            features: data.features.clone(),
            means,
            scales,
            weights: vec![0.0; dims],
            bias: 0.0,
            threshold: params.threshold,
        };

        let standardized: Vec<Vec<f64>> = data.x.iter().map(|row| model.standardize(row)).collect();
        let positives = train_idx.iter().filter(|&&i| data.y[i] == 1.0).count() as f64;
        let positive_weight = if params.balance_classes && positives > 0.0 {
            (train_idx.len() as f64 - positives) / positives
        } else {
            1.0
        };
        let total_weight: f64 = train_idx
            .iter()
            .map(|&i| if data.y[i] == 1.0 { positive_weight } else { 1.0 })
            .sum();

        for epoch in 1..=params.epochs {
            let mut grad_w = vec![0.0; dims];
            let mut grad_b = 0.0;
            for &i in &train_idx {
                let weight = if data.y[i] == 1.0 { positive_weight } else { 1.0 };
                let error = weight * (model.score(&standardized[i]) - data.y[i]);
                for (g, x) in grad_w.iter_mut().zip(&standardized[i]) {
                    *g += error * x;
                }
                grad_b += error;
            }
            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * (g / total_weight + params.l2 * *w);
            }
            model.bias -= params.learning_rate * grad_b / total_weight;

            if epoch % LOG_EVERY_EPOCHS == 0 && !val_idx.is_empty() {
                let labels: Vec<f64> = val_idx.iter().map(|&i| data.y[i]).collect();
                let scores: Vec<f64> = val_idx.iter().map(|&i| model.score(&standardized[i])).collect();
                debug!(
                    epoch,
                    val_auc = roc_auc(&labels, &scores),
                    val_log_loss = log_loss(&labels, &scores),
                    "Training progress"
                );
            }
        }

        let labels: Vec<f64> = test_idx.iter().map(|&i| data.y[i]).collect();
        let scores: Vec<f64> = test_idx.iter().map(|&i| model.score(&standardized[i])).collect();
        let metrics = evaluate(&labels, &scores, params.threshold);

        info!(
            auc = metrics.auc,
            log_loss = metrics.log_loss,
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Test set evaluation"
        );

        Ok(TrainedModel {
            model,
            metrics,
            split: SplitSizes {
                train: train_idx.len(),
                validation: val_idx.len(),
                test: test_idx.len(),
            },
            params: params.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Featurized table where `signal` separates fraud from legitimate rows
    pub fn separable_table(rows: usize) -> Table {
        let data = (0..rows)
            .map(|i| {
                let fraud = i % 5 == 0;
                vec![
                    format!("{:.1}", if fraud { 5.0 } else { -5.0 } + (i % 7) as f64 * 0.1),
                    format!("{}", i % 3),
                    if fraud { "1" } else { "0" }.to_string(),
                ]
            })
            .collect();
        Table::from_rows(
            vec!["signal".to_string(), "noise".to_string(), LABEL_COLUMN.to_string()],
            data,
        )
        .unwrap()
    }
}
