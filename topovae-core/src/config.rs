//! Configuration system for topovae experiments.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from `topovae.toml` in the workspace directory (or an
//! explicit path), then overridden by `TOPOVAE_`-prefixed environment variables.
//!
//! The file carries everything a sweep needs: the hyperparameter grid, the fixed
//! training values shared by every run, and one profile per named dataset with the
//! geometry that dataset implies (manifold dimension, latent topology, radii).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Top-level configuration for an experiment campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Tracker project name runs are grouped under.
    #[serde(default = "default_project")]
    pub project: String,
    /// Device tag: "cpu" or "cuda".
    #[serde(default = "default_device")]
    pub device: String,
    /// Datasets to sweep over, by name.
    #[serde(default = "default_datasets")]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub sweep: SweepGridConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub grid_cells: GridCellsConfig,
    #[serde(default)]
    pub experimental: ExperimentalConfig,
    /// Per-dataset geometry profiles, keyed by dataset name.
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, DatasetProfile>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            device: default_device(),
            datasets: default_datasets(),
            outputs: OutputsConfig::default(),
            sweep: SweepGridConfig::default(),
            training: TrainingConfig::default(),
            synthetic: SyntheticConfig::default(),
            grid_cells: GridCellsConfig::default(),
            experimental: ExperimentalConfig::default(),
            profiles: default_profiles(),
        }
    }
}

fn default_project() -> String {
    "topo-vae".to_string()
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_datasets() -> Vec<String> {
    vec!["s1_synthetic".to_string()]
}

/// Output directories, all created on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsConfig {
    pub configs_dir: PathBuf,
    pub trained_models_dir: PathBuf,
    pub curvature_profiles_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            configs_dir: PathBuf::from("results/configs"),
            trained_models_dir: PathBuf::from("results/trained_models"),
            curvature_profiles_dir: PathBuf::from("results/curvature_profiles"),
            runs_dir: PathBuf::from("results/runs"),
        }
    }
}

/// Hyperparameter grid the sweep enumerates. Each field lists the candidate
/// values; the grid is the cartesian product of all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepGridConfig {
    pub lr: Vec<f64>,
    pub batch_size: Vec<usize>,
    pub encoder_width: Vec<usize>,
    pub encoder_depth: Vec<usize>,
    pub decoder_width: Vec<usize>,
    pub decoder_depth: Vec<usize>,
    pub drop_out_p: Vec<f64>,
    /// Metric minimized when picking the best trial.
    #[serde(default = "default_sweep_metric")]
    pub metric: String,
}

impl Default for SweepGridConfig {
    fn default() -> Self {
        Self {
            lr: vec![1e-3],
            batch_size: vec![128],
            encoder_width: vec![400],
            encoder_depth: vec![4],
            decoder_width: vec![400],
            decoder_depth: vec![4],
            drop_out_p: vec![0.0],
            metric: default_sweep_metric(),
        }
    }
}

fn default_sweep_metric() -> String {
    "test_loss".to_string()
}

/// Training values fixed across every run of every sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub n_epochs: usize,
    /// Epochs between scalar log events.
    pub log_interval: usize,
    /// Epochs between checkpoints.
    pub checkpt_interval: usize,
    pub batch_shuffle: bool,
    /// Enable the reduce-on-plateau learning rate scheduler.
    pub scheduler: bool,
    /// Reconstruction weight.
    pub alpha: f64,
    /// KL weight.
    pub beta: f64,
    /// Latent regularization weight.
    pub gamma: f64,
    /// Softplus beta applied to decoder outputs (firing rates are nonnegative).
    pub sftbeta: f64,
    /// Generative likelihood: "gaussian" or "poisson".
    pub gen_likelihood_type: String,
    /// Latent grid resolution for curvature profiles.
    pub n_grid_points: usize,
    /// Stop a run whose test loss has not improved for this many epochs.
    #[serde(default)]
    pub early_stop_patience: Option<usize>,
    /// Seed for model init, batching, and synthetic data.
    #[serde(default)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_epochs: 200,
            log_interval: 20,
            checkpt_interval: 40,
            batch_shuffle: true,
            scheduler: true,
            alpha: 1.0,
            beta: 0.03,
            gamma: 10.0,
            sftbeta: 4.5,
            gen_likelihood_type: "gaussian".to_string(),
            n_grid_points: 100,
            early_stop_patience: None,
            seed: 0,
        }
    }
}

/// Variable parameters for the synthetic manifold datasets. Sweeps enumerate the
/// cartesian product of these lists, one sweep per combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub n_times: Vec<usize>,
    pub embedding_dim: Vec<usize>,
    pub geodesic_distortion_amp: Vec<f64>,
    pub noise_var: Vec<f64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_times: vec![1500],
            embedding_dim: vec![3],
            geodesic_distortion_amp: vec![0.4],
            noise_var: vec![1e-3],
        }
    }
}

/// Variable parameters for the synthetic grid-cell dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCellsConfig {
    pub grid_scale: Vec<f64>,
    /// Square arena side length (cm).
    pub arena_dims: Vec<f64>,
    pub n_cells: Vec<usize>,
    pub grid_orientation_mean: Vec<f64>,
    pub grid_orientation_std: Vec<f64>,
    pub field_width: Vec<f64>,
    /// Rate-map resolution per arena side.
    pub resolution: Vec<usize>,
}

impl Default for GridCellsConfig {
    fn default() -> Self {
        Self {
            grid_scale: vec![40.0],
            arena_dims: vec![100.0],
            n_cells: vec![64],
            grid_orientation_mean: vec![0.0],
            grid_orientation_std: vec![3.0],
            field_width: vec![10.0],
            resolution: vec![50],
        }
    }
}

/// Variable parameters for recorded datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentalConfig {
    pub expt_id: Vec<String>,
    pub timestep_microsec: Vec<u64>,
    pub smooth: Vec<bool>,
    pub select_gain_1: Vec<bool>,
    /// Directory holding `<expt_id>.csv` recordings.
    pub data_dir: PathBuf,
}

impl Default for ExperimentalConfig {
    fn default() -> Self {
        Self {
            expt_id: vec!["expt34".to_string()],
            timestep_microsec: vec![1_000_000],
            smooth: vec![true],
            select_gain_1: vec![true],
            data_dir: PathBuf::from("data/expt"),
        }
    }
}

/// Geometry a dataset implies: manifold dimension, latent topology, radii.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub manifold_dim: usize,
    pub latent_dim: usize,
    /// Latent topology tag: "gaussian", "hyperspherical", "toroidal", "klein_bottle".
    pub posterior_type: String,
    pub n_wiggles: usize,
    pub radius: f64,
    pub major_radius: f64,
    pub minor_radius: f64,
    /// Distortion applied to the immersion: "wiggles" or "bump".
    pub geodesic_distortion_func: String,
    /// Apply a random (seeded) rotation in the embedding space.
    pub synthetic_rotation: bool,
}

fn default_profiles() -> HashMap<String, DatasetProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "s1_synthetic".to_string(),
        DatasetProfile {
            manifold_dim: 1,
            latent_dim: 1,
            posterior_type: "hyperspherical".to_string(),
            n_wiggles: 3,
            radius: 1.0,
            major_radius: 0.0,
            minor_radius: 0.0,
            geodesic_distortion_func: "wiggles".to_string(),
            synthetic_rotation: true,
        },
    );
    profiles.insert(
        "s2_synthetic".to_string(),
        DatasetProfile {
            manifold_dim: 2,
            latent_dim: 2,
            posterior_type: "hyperspherical".to_string(),
            n_wiggles: 0,
            radius: 1.0,
            major_radius: 0.0,
            minor_radius: 0.0,
            geodesic_distortion_func: "none".to_string(),
            synthetic_rotation: true,
        },
    );
    profiles.insert(
        "t2_synthetic".to_string(),
        DatasetProfile {
            manifold_dim: 2,
            latent_dim: 2,
            posterior_type: "toroidal".to_string(),
            n_wiggles: 0,
            radius: 0.0,
            major_radius: 2.0,
            minor_radius: 1.0,
            geodesic_distortion_func: "none".to_string(),
            synthetic_rotation: true,
        },
    );
    profiles.insert(
        "grid_cells".to_string(),
        DatasetProfile {
            manifold_dim: 2,
            latent_dim: 2,
            posterior_type: "toroidal".to_string(),
            n_wiggles: 0,
            radius: 0.0,
            major_radius: 2.0,
            minor_radius: 1.0,
            geodesic_distortion_func: "none".to_string(),
            synthetic_rotation: false,
        },
    );
    profiles.insert(
        "three_place_cells_synthetic".to_string(),
        DatasetProfile {
            manifold_dim: 1,
            latent_dim: 1,
            posterior_type: "hyperspherical".to_string(),
            n_wiggles: 0,
            radius: 1.0,
            major_radius: 0.0,
            minor_radius: 0.0,
            geodesic_distortion_func: "none".to_string(),
            synthetic_rotation: false,
        },
    );
    profiles.insert(
        "experimental".to_string(),
        DatasetProfile {
            manifold_dim: 1,
            latent_dim: 1,
            posterior_type: "hyperspherical".to_string(),
            n_wiggles: 0,
            radius: 1.0,
            major_radius: 0.0,
            minor_radius: 0.0,
            geodesic_distortion_func: "none".to_string(),
            synthetic_rotation: false,
        },
    );
    profiles
}

impl ExperimentConfig {
    /// Load layered configuration: defaults -> TOML file -> environment.
    ///
    /// `config_path` overrides the default `<workspace>/topovae.toml` location.
    /// A missing file is fine; defaults and environment still apply.
    pub fn load(workspace: &Path, config_path: Option<&Path>) -> Result<Self, CoreError> {
        let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

        let file = config_path
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace.join("topovae.toml"));
        if file.exists() {
            figment = figment.merge(Toml::file(&file));
        }

        figment = figment.merge(Env::prefixed("TOPOVAE_").split("__"));

        figment
            .extract()
            .map_err(|e| CoreError::config(e.to_string()))
    }

    /// Geometry profile for a named dataset.
    pub fn profile(&self, dataset_name: &str) -> Result<&DatasetProfile, CoreError> {
        self.profiles
            .get(dataset_name)
            .ok_or_else(|| CoreError::config(format!("no profile for dataset {dataset_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_cover_all_named_datasets() {
        let config = ExperimentConfig::default();
        for name in [
            "s1_synthetic",
            "s2_synthetic",
            "t2_synthetic",
            "grid_cells",
            "three_place_cells_synthetic",
            "experimental",
        ] {
            assert!(config.profile(name).is_ok(), "missing profile: {name}");
        }
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ExperimentConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.project, "topo-vae");
        assert_eq!(config.datasets, vec!["s1_synthetic".to_string()]);
        assert_eq!(config.sweep.metric, "test_loss");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("topovae.toml");
        std::fs::write(
            &path,
            r#"
            datasets = ["t2_synthetic"]

            [training]
            n_epochs = 5

            [sweep]
            lr = [0.01, 0.001]
            "#,
        )
        .unwrap();
        let config = ExperimentConfig::load(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.datasets, vec!["t2_synthetic".to_string()]);
        assert_eq!(config.training.n_epochs, 5);
        assert_eq!(config.sweep.lr, vec![0.01, 0.001]);
        // Untouched sections keep their defaults.
        assert_eq!(config.training.sftbeta, 4.5);
    }

    #[test]
    fn unknown_dataset_profile_is_a_config_error() {
        let config = ExperimentConfig::default();
        assert!(config.profile("mobius_synthetic").is_err());
    }
}
