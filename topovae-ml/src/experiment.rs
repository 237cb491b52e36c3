//! Run registry: one record per training run, with status and final metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::MlError;
use crate::training::metrics::TrainingMetrics;

/// Run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A single training run inside a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRun {
    pub id: String,
    pub run_name: String,
    pub sweep_name: String,
    pub dataset_name: String,
    /// The full merged run config, kept as JSON for registry portability.
    pub hyperparams: serde_json::Value,
    pub status: TrainingStatus,
    pub metrics: Option<TrainingMetrics>,
    pub seed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SweepRun {
    pub fn new(config: &RunConfig) -> Result<Self, MlError> {
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_name: config.run_name.clone(),
            sweep_name: config.sweep_name.clone(),
            dataset_name: config.dataset_name.clone(),
            hyperparams: serde_json::to_value(config)?,
            status: TrainingStatus::Pending,
            metrics: None,
            seed: config.seed,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn set_status(&mut self, status: TrainingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Registry of runs, persisted as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRegistry {
    pub runs: Vec<SweepRun>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn add(&mut self, run: SweepRun) {
        self.runs.push(run);
    }

    pub fn find(&self, run_name: &str) -> Option<&SweepRun> {
        self.runs.iter().find(|r| r.run_name == run_name)
    }

    pub fn list_by_status(&self, status: &TrainingStatus) -> Vec<&SweepRun> {
        self.runs.iter().filter(|r| &r.status == status).collect()
    }

    pub fn load(path: &std::path::Path) -> Result<Self, MlError> {
        Ok(topovae_core::persistence::load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), MlError> {
        topovae_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_run_config;

    #[test]
    fn registry_roundtrip_and_status_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = RunRegistry::new();
        let mut run = SweepRun::new(&minimal_run_config()).unwrap();
        run.set_status(TrainingStatus::Completed);
        registry.add(run);
        registry.save(&path).unwrap();

        let loaded = RunRegistry::load(&path).unwrap();
        assert_eq!(loaded.runs.len(), 1);
        assert_eq!(loaded.list_by_status(&TrainingStatus::Completed).len(), 1);
        assert!(loaded.find("run_test_s1").is_some());
        assert!(loaded.find("missing").is_none());
    }

    #[test]
    fn missing_registry_loads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = RunRegistry::load(&dir.path().join("absent.json")).unwrap();
        assert!(registry.runs.is_empty());
    }
}
