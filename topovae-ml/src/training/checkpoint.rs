//! Checkpoint management for training runs.
//!
//! Periodic checkpoints are safetensors weight files tracked by a per-run JSON
//! manifest with bounded retention. The final model is persisted twice: a
//! checkpoint directory (config.json + model.safetensors) and a bare state-dict
//! file next to it.

use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::MlError;

/// A training checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_name: String,
    pub epoch: usize,
    pub loss: f64,
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint manager rooted at the trained-models directory.
pub struct CheckpointManager {
    base_dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: PathBuf, max_checkpoints: usize) -> Self {
        Self {
            base_dir,
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    fn manifest_path(&self, run_name: &str) -> PathBuf {
        self.base_dir.join(run_name).join("checkpoints.json")
    }

    /// List checkpoints recorded for a run.
    pub fn list(&self, run_name: &str) -> Result<Vec<Checkpoint>, MlError> {
        Ok(
            topovae_core::persistence::load_json(&self.manifest_path(run_name))?
                .unwrap_or_default(),
        )
    }

    /// The checkpoint with the lowest loss.
    pub fn best(&self, run_name: &str) -> Result<Option<Checkpoint>, MlError> {
        let checkpoints = self.list(run_name)?;
        Ok(checkpoints.into_iter().min_by(|a, b| {
            a.loss
                .partial_cmp(&b.loss)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }

    /// Save an epoch checkpoint and append it to the manifest, evicting the
    /// oldest entries past the retention bound.
    pub fn save_epoch(
        &self,
        run_name: &str,
        epoch: usize,
        loss: f64,
        varmap: &VarMap,
    ) -> Result<Checkpoint, MlError> {
        let dir = self.base_dir.join(run_name);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("epoch_{epoch}.safetensors"));
        varmap.save(&path)?;

        let mut hasher = Sha256::new();
        hasher.update(run_name.as_bytes());
        hasher.update(epoch.to_le_bytes());
        hasher.update(loss.to_le_bytes());
        let hash = format!("{:x}", hasher.finalize());

        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            run_name: run_name.to_string(),
            epoch,
            loss,
            path,
            hash,
            size_bytes,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list(run_name)?;
        checkpoints.push(checkpoint.clone());
        while checkpoints.len() > self.max_checkpoints {
            let evicted = checkpoints.remove(0);
            let _ = std::fs::remove_file(&evicted.path);
        }
        topovae_core::persistence::atomic_write_json(&self.manifest_path(run_name), &checkpoints)?;

        Ok(checkpoint)
    }

    /// Persist the final model twice: the checkpoint directory and the bare
    /// state-dict file. Returns both paths.
    pub fn save_final(
        &self,
        config: &RunConfig,
        varmap: &VarMap,
    ) -> Result<(PathBuf, PathBuf), MlError> {
        let dir = self.base_dir.join(&config.run_name);
        std::fs::create_dir_all(&dir)?;

        topovae_core::persistence::atomic_write_json(&dir.join("config.json"), config)?;
        let model_path = dir.join("model.safetensors");
        varmap.save(&model_path)?;

        let state_path = self
            .base_dir
            .join(format!("{}_state.safetensors", config.results_prefix));
        varmap.save(&state_path)?;

        Ok((model_path, state_path))
    }

    /// Restore weights from a checkpoint file into an existing var map.
    pub fn load_into(&self, path: &Path, varmap: &mut VarMap) -> Result<(), MlError> {
        varmap.load(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    fn small_varmap() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = candle_nn::linear(2, 3, vb.pp("layer")).unwrap();
        varmap
    }

    #[test]
    fn manifest_tracks_saved_checkpoints() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().to_path_buf(), 10);
        let varmap = small_varmap();

        manager.save_epoch("run_a", 1, 0.9, &varmap).unwrap();
        manager.save_epoch("run_a", 2, 0.5, &varmap).unwrap();
        manager.save_epoch("run_a", 3, 0.7, &varmap).unwrap();

        let listed = manager.list("run_a").unwrap();
        assert_eq!(listed.len(), 3);
        let best = manager.best("run_a").unwrap().unwrap();
        assert_eq!(best.epoch, 2);
        assert!(best.path.exists());
    }

    #[test]
    fn retention_evicts_oldest_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().to_path_buf(), 2);
        let varmap = small_varmap();

        let first = manager.save_epoch("run_b", 1, 0.9, &varmap).unwrap();
        manager.save_epoch("run_b", 2, 0.8, &varmap).unwrap();
        manager.save_epoch("run_b", 3, 0.7, &varmap).unwrap();

        let listed = manager.list("run_b").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].epoch, 2);
        assert!(!first.path.exists());
    }

    #[test]
    fn load_into_restores_saved_weights() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().to_path_buf(), 4);
        let varmap = small_varmap();

        let before: Vec<Vec<f32>> = {
            let vars = varmap.data().lock().unwrap();
            vars["layer.weight"].as_tensor().to_vec2().unwrap()
        };
        let saved = manager.save_epoch("run_c", 1, 0.5, &varmap).unwrap();

        // Perturb the weights, then restore from the checkpoint file.
        {
            let vars = varmap.data().lock().unwrap();
            let weight = &vars["layer.weight"];
            weight.set(&(weight.as_tensor() * 2.0).unwrap()).unwrap();
        }
        let mut varmap = varmap;
        manager.load_into(&saved.path, &mut varmap).unwrap();

        let after: Vec<Vec<f32>> = {
            let vars = varmap.data().lock().unwrap();
            vars["layer.weight"].as_tensor().to_vec2().unwrap()
        };
        assert_eq!(before, after);
    }

    #[test]
    fn final_model_is_persisted_twice() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().to_path_buf(), 2);
        let varmap = small_varmap();
        let config = crate::config::tests::minimal_run_config();

        let (model_path, state_path) = manager.save_final(&config, &varmap).unwrap();
        assert!(model_path.exists());
        assert!(state_path.exists());
        assert!(model_path.parent().unwrap().join("config.json").exists());
    }
}
