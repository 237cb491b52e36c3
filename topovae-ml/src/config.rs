//! Per-run configuration.
//!
//! A [`RunConfig`] is the flat merge of everything a single training run needs:
//! the sweep-chosen hyperparameters, the dataset-level variable parameters of
//! the sweep it belongs to, the dataset's geometry profile, and the training
//! values fixed across all runs. The merged mapping is serialized to JSON next
//! to the run's artifacts, and it alone determines run naming and output paths.

use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MlError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    // Identity.
    pub run_name: String,
    /// Prefix for every artifact this run writes.
    pub results_prefix: String,
    pub sweep_name: String,
    pub dataset_name: String,

    // Sweep-chosen hyperparameters.
    pub lr: f64,
    pub batch_size: usize,
    pub encoder_width: usize,
    pub encoder_depth: usize,
    pub decoder_width: usize,
    pub decoder_depth: usize,
    pub drop_out_p: f64,

    // Dataset-level variable parameters (synthetic manifolds).
    pub n_times: Option<usize>,
    pub embedding_dim: Option<usize>,
    pub geodesic_distortion_amp: Option<f64>,
    pub noise_var: Option<f64>,

    // Dataset-level variable parameters (recorded datasets).
    pub expt_id: Option<String>,
    pub timestep_microsec: Option<u64>,
    pub smooth: Option<bool>,
    pub select_gain_1: Option<bool>,
    pub data_dir: Option<PathBuf>,

    // Dataset-level variable parameters (grid cells).
    pub grid_scale: Option<f64>,
    pub arena_dims: Option<f64>,
    pub n_cells: Option<usize>,
    pub grid_orientation_mean: Option<f64>,
    pub grid_orientation_std: Option<f64>,
    pub field_width: Option<f64>,
    pub resolution: Option<usize>,

    // Geometry profile of the dataset.
    pub manifold_dim: usize,
    pub latent_dim: usize,
    pub posterior_type: String,
    pub n_wiggles: usize,
    pub radius: f64,
    pub major_radius: f64,
    pub minor_radius: f64,
    pub geodesic_distortion_func: String,
    pub synthetic_rotation: bool,

    // Fixed across runs and sweeps.
    pub device: String,
    pub log_interval: usize,
    pub checkpt_interval: usize,
    pub batch_shuffle: bool,
    pub scheduler: bool,
    pub n_epochs: usize,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub sftbeta: f64,
    pub gen_likelihood_type: String,
    pub n_grid_points: usize,
    pub early_stop_patience: Option<usize>,
    pub seed: u64,

    // Filled in once the dataset is loaded.
    pub data_n_times: Option<usize>,
    pub data_dim: Option<usize>,
}

impl RunConfig {
    /// Resolve the candle device for this run.
    pub fn candle_device(&self) -> Result<Device, MlError> {
        match self.device.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::cuda_if_available(0)?),
            other => Err(MlError::Config(format!("unknown device tag: {other}"))),
        }
    }

    /// Persist the merged config as JSON under `configs_dir`.
    pub fn save(&self, configs_dir: &Path) -> Result<PathBuf, MlError> {
        let path = configs_dir.join(format!("{}.json", self.run_name));
        topovae_core::persistence::atomic_write_json(&path, self)?;
        Ok(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn minimal_run_config() -> RunConfig {
        RunConfig {
            run_name: "run_test_s1".to_string(),
            results_prefix: "run_test_s1".to_string(),
            sweep_name: "s1_synthetic_noise_var_0.001_embedding_dim_3".to_string(),
            dataset_name: "s1_synthetic".to_string(),
            lr: 1e-3,
            batch_size: 32,
            encoder_width: 16,
            encoder_depth: 2,
            decoder_width: 16,
            decoder_depth: 2,
            drop_out_p: 0.0,
            n_times: Some(128),
            embedding_dim: Some(3),
            geodesic_distortion_amp: Some(0.4),
            noise_var: Some(1e-3),
            expt_id: None,
            timestep_microsec: None,
            smooth: None,
            select_gain_1: None,
            data_dir: None,
            grid_scale: None,
            arena_dims: None,
            n_cells: None,
            grid_orientation_mean: None,
            grid_orientation_std: None,
            field_width: None,
            resolution: None,
            manifold_dim: 1,
            latent_dim: 1,
            posterior_type: "hyperspherical".to_string(),
            n_wiggles: 3,
            radius: 1.0,
            major_radius: 0.0,
            minor_radius: 0.0,
            geodesic_distortion_func: "wiggles".to_string(),
            synthetic_rotation: true,
            device: "cpu".to_string(),
            log_interval: 1,
            checkpt_interval: 2,
            batch_shuffle: true,
            scheduler: false,
            n_epochs: 2,
            alpha: 1.0,
            beta: 0.03,
            gamma: 1.0,
            sftbeta: 4.5,
            gen_likelihood_type: "gaussian".to_string(),
            n_grid_points: 16,
            early_stop_patience: None,
            seed: 0,
            data_n_times: None,
            data_dim: None,
        }
    }

    #[test]
    fn save_writes_run_named_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = minimal_run_config();
        let path = config.save(dir.path()).unwrap();
        assert!(path.ends_with("run_test_s1.json"));
        let loaded: RunConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.sweep_name, config.sweep_name);
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut config = minimal_run_config();
        config.device = "tpu".to_string();
        assert!(config.candle_device().is_err());
    }
}
