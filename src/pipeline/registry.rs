//! Model Registry
//!
//! Numbered model versions with lifecycle stages. At most one version is in
//! `Production`; promoting a version archives whichever one held the stage.
//!
//! On disk the registry is a directory holding `index.json` plus one
//! `model-v{n}.json` artifact per registered version. Every write goes through
//! a temp file and a rename, so readers never observe a half-promoted index.

use super::train::{EvaluationMetrics, LogisticModel, SplitSizes, TrainingParams};
use crate::drift::DriftVerdict;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";

/// Lifecycle stage of a registered model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStage {
    None,
    Production,
    Archived,
}

/// Everything produced by a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub id: Uuid,
    pub name: String,
    /// Dataset version whose drift triggered the retrain
    pub source_version: String,
    pub trained_at: DateTime<Utc>,
    pub model: LogisticModel,
    pub params: TrainingParams,
    pub metrics: EvaluationMetrics,
    pub split: SplitSizes,
    /// Drift of the training trigger against the baseline, absent for the baseline itself
    pub drift_audit: Option<DriftVerdict>,
}

/// Index entry for one registered version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredModel {
    pub version: u64,
    pub stage: ModelStage,
    pub artifact_id: Uuid,
    pub source_version: String,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A production entry together with its artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionModel {
    pub entry: RegisteredModel,
    pub artifact: ModelArtifact,
}

/// Versioned model store with a single Production slot
pub trait ModelRegistry {
    /// Store the artifact under the next version number, stage `None`
    fn register(&self, artifact: &ModelArtifact) -> PipelineResult<u64>;

    /// Move `version` to Production and archive the previous holder
    fn promote(&self, version: u64) -> PipelineResult<()>;

    fn production(&self) -> PipelineResult<Option<ProductionModel>>;

    fn list(&self) -> PipelineResult<Vec<RegisteredModel>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryIndex {
    name: String,
    models: Vec<RegisteredModel>,
}

/// Filesystem-backed registry
pub struct FileRegistry {
    dir: PathBuf,
    name: String,
}

impl FileRegistry {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn artifact_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("model-v{}.json", version))
    }

    fn read_index(&self) -> PipelineResult<RegistryIndex> {
        match std::fs::read_to_string(self.index_path()) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryIndex {
                name: self.name.clone(),
                models: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &RegistryIndex) -> PipelineResult<()> {
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(index)?)
    }

    fn read_artifact(&self, version: u64) -> PipelineResult<ModelArtifact> {
        let raw = std::fs::read_to_string(self.artifact_path(version))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn try_promote(&self, version: u64) -> PipelineResult<Option<u64>> {
        let mut index = self.read_index()?;
        if !index.models.iter().any(|m| m.version == version) {
            return Err(PipelineError::NotFound(format!("model version {}", version)));
        }

        let now = Utc::now();
        let mut archived = None;
        for model in &mut index.models {
            if model.version == version {
                model.stage = ModelStage::Production;
                model.updated_at = now;
            } else if model.stage == ModelStage::Production {
                model.stage = ModelStage::Archived;
                model.updated_at = now;
                archived = Some(model.version);
            }
        }
        self.write_index(&index)?;
        Ok(archived)
    }
}

impl ModelRegistry for FileRegistry {
    fn register(&self, artifact: &ModelArtifact) -> PipelineResult<u64> {
        let mut index = self.read_index()?;
        let version = index.models.iter().map(|m| m.version).max().unwrap_or(0) + 1;

        write_atomic(&self.artifact_path(version), &serde_json::to_vec_pretty(artifact)?)?;

        let now = Utc::now();
        index.models.push(RegisteredModel {
            version,
            stage: ModelStage::None,
            artifact_id: artifact.id,
            source_version: artifact.source_version.clone(),
            registered_at: now,
            updated_at: now,
        });
        self.write_index(&index)?;

        info!("Registered {} version {} from {}", self.name, version, artifact.source_version);
        Ok(version)
    }

    fn promote(&self, version: u64) -> PipelineResult<()> {
        let archived = self
            .try_promote(version)
            .map_err(|e| PipelineError::PromotionFailure {
                version,
                reason: e.to_string(),
            })?;
        match archived {
            Some(previous) => info!(
                "Promoted {} version {} to Production, archived version {}",
                self.name, version, previous
            ),
            None => info!("Promoted {} version {} to Production", self.name, version),
        }
        Ok(())
    }

    fn production(&self) -> PipelineResult<Option<ProductionModel>> {
        let index = self.read_index()?;
        match index.models.into_iter().find(|m| m.stage == ModelStage::Production) {
            Some(entry) => {
                let artifact = self.read_artifact(entry.version)?;
                Ok(Some(ProductionModel { entry, artifact }))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> PipelineResult<Vec<RegisteredModel>> {
        Ok(self.read_index()?.models)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn artifact(source_version: &str) -> ModelArtifact {
        ModelArtifact {
            id: Uuid::new_v4(),
            name: "fraud_detector".to_string(),
            source_version: source_version.to_string(),
            trained_at: Utc::now(),
            model: LogisticModel {
                features: vec!["amt".to_string()],
                means: vec![0.0],
                scales: vec![1.0],
                weights: vec![1.0],
                bias: 0.0,
                threshold: 0.5,
            },
            params: TrainingParams::default(),
            metrics: EvaluationMetrics {
                auc: 0.9,
                log_loss: 0.2,
                accuracy: 0.95,
                f1: 0.6,
            },
            split: SplitSizes {
                train: 70,
                validation: 15,
                test: 15,
            },
            drift_audit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::artifact;
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn stages(registry: &FileRegistry) -> Vec<(u64, ModelStage)> {
        registry
            .list()
            .unwrap()
            .into_iter()
            .map(|m| (m.version, m.stage))
            .collect()
    }

    #[test]
    fn test_register_assigns_increasing_versions() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::new(dir.path(), "fraud_detector");

        assert_eq!(registry.register(&artifact("v2")).unwrap(), 1);
        assert_eq!(registry.register(&artifact("v3")).unwrap(), 2);
        assert_eq!(stages(&registry), vec![(1, ModelStage::None), (2, ModelStage::None)]);
        assert!(registry.production().unwrap().is_none());
    }

    #[test]
    fn test_promote_archives_previous_production() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::new(dir.path(), "fraud_detector");
        let first = artifact("v2");
        let second = artifact("v3");
        registry.register(&first).unwrap();
        registry.register(&second).unwrap();

        registry.promote(1).unwrap();
        assert_eq!(registry.production().unwrap().unwrap().artifact, first);

        registry.promote(2).unwrap();
        assert_eq!(
            stages(&registry),
            vec![(1, ModelStage::Archived), (2, ModelStage::Production)]
        );
        let production = registry.production().unwrap().unwrap();
        assert_eq!(production.entry.version, 2);
        assert_eq!(production.artifact, second);
    }

    #[test]
    fn test_promote_unknown_version_fails() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::new(dir.path(), "fraud_detector");
        registry.register(&artifact("v2")).unwrap();
        registry.promote(1).unwrap();

        let err = registry.promote(7).unwrap_err();
        assert!(matches!(err, PipelineError::PromotionFailure { version: 7, .. }));
        assert_eq!(registry.production().unwrap().unwrap().entry.version, 1);
    }
}
