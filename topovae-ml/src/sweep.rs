//! Sweep enumeration and execution.
//!
//! Dataset-level variable parameters are enumerated as a cartesian product,
//! one sweep per combination, each with a name derived from the parameter
//! tuple. Within a sweep, the hyperparameter grid is enumerated the same way
//! and each combination becomes one trial; the best trial is the one with the
//! lowest test loss.

use serde::{Deserialize, Serialize};
use topovae_core::config::{ExperimentConfig, SweepGridConfig};

use crate::config::RunConfig;
use crate::error::MlError;
use crate::experiment::{RunRegistry, SweepRun, TrainingStatus};
use crate::training::runner::run_trial;

/// One planned sweep: a name plus the run-config template shared by its
/// trials.
#[derive(Debug, Clone)]
pub struct SweepSpec {
    pub sweep_name: String,
    pub dataset_name: String,
    pub base: RunConfig,
}

/// Hyperparameters chosen for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialParams {
    pub lr: f64,
    pub batch_size: usize,
    pub encoder_width: usize,
    pub encoder_depth: usize,
    pub decoder_width: usize,
    pub decoder_depth: usize,
    pub drop_out_p: f64,
}

/// A single sweep trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepTrial {
    pub trial_number: usize,
    pub run_name: String,
    pub params: TrialParams,
    pub metric: Option<f64>,
    pub status: TrainingStatus,
}

/// Record of a completed sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSweep {
    pub id: String,
    pub sweep_name: String,
    pub dataset_name: String,
    pub metric_name: String,
    pub trials: Vec<SweepTrial>,
    pub best_trial: Option<usize>,
}

/// Enumerate every sweep the experiment config asks for.
///
/// This is where the one hard validation lives: a 2-D manifold cannot be
/// embedded in 2 or fewer dimensions, so `s2_synthetic` / `t2_synthetic`
/// combined with `embedding_dim <= 2` is rejected immediately.
pub fn enumerate_sweeps(config: &ExperimentConfig) -> Result<Vec<SweepSpec>, MlError> {
    let mut sweeps = Vec::new();
    for dataset_name in &config.datasets {
        match dataset_name.as_str() {
            "s1_synthetic" | "s2_synthetic" | "t2_synthetic" => {
                let synthetic = &config.synthetic;
                for &n_times in &synthetic.n_times {
                    for &embedding_dim in &synthetic.embedding_dim {
                        for &distortion_amp in &synthetic.geodesic_distortion_amp {
                            for &noise_var in &synthetic.noise_var {
                                if dataset_name != "s1_synthetic" && embedding_dim <= 2 {
                                    return Err(MlError::invalid_input(format!(
                                        "manifold {dataset_name} cannot be embedded in \
                                         {embedding_dim} dimensions"
                                    )));
                                }
                                let mut sweep_name = format!(
                                    "{dataset_name}_noise_var_{noise_var}_embedding_dim_{embedding_dim}"
                                );
                                if synthetic.n_times.len() > 1 {
                                    sweep_name.push_str(&format!("_n_times_{n_times}"));
                                }
                                if synthetic.geodesic_distortion_amp.len() > 1 {
                                    sweep_name
                                        .push_str(&format!("_distortion_{distortion_amp}"));
                                }
                                let mut base = base_run_config(config, dataset_name)?;
                                base.sweep_name = sweep_name.clone();
                                base.n_times = Some(n_times);
                                base.embedding_dim = Some(embedding_dim);
                                base.geodesic_distortion_amp = Some(distortion_amp);
                                base.noise_var = Some(noise_var);
                                sweeps.push(SweepSpec {
                                    sweep_name,
                                    dataset_name: dataset_name.clone(),
                                    base,
                                });
                            }
                        }
                    }
                }
            }
            "experimental" => {
                let experimental = &config.experimental;
                for expt_id in &experimental.expt_id {
                    for &timestep in &experimental.timestep_microsec {
                        for &smooth in &experimental.smooth {
                            for &select_gain_1 in &experimental.select_gain_1 {
                                let mut sweep_name = format!("{dataset_name}_{expt_id}");
                                sweep_name.push_str(if select_gain_1 {
                                    "_gain_1"
                                } else {
                                    "_other_gain"
                                });
                                if experimental.timestep_microsec.len() > 1 {
                                    sweep_name.push_str(&format!("_timestep_{timestep}"));
                                }
                                if experimental.smooth.len() > 1 {
                                    sweep_name.push_str(&format!("_smooth_{smooth}"));
                                }
                                let mut base = base_run_config(config, dataset_name)?;
                                base.sweep_name = sweep_name.clone();
                                base.expt_id = Some(expt_id.clone());
                                base.timestep_microsec = Some(timestep);
                                base.smooth = Some(smooth);
                                base.select_gain_1 = Some(select_gain_1);
                                base.data_dir = Some(experimental.data_dir.clone());
                                sweeps.push(SweepSpec {
                                    sweep_name,
                                    dataset_name: dataset_name.clone(),
                                    base,
                                });
                            }
                        }
                    }
                }
            }
            "grid_cells" => {
                let grid = &config.grid_cells;
                for &grid_scale in &grid.grid_scale {
                    for &arena_dims in &grid.arena_dims {
                        for &n_cells in &grid.n_cells {
                            for &orientation_mean in &grid.grid_orientation_mean {
                                for &orientation_std in &grid.grid_orientation_std {
                                    for &field_width in &grid.field_width {
                                        for &resolution in &grid.resolution {
                                            let mut sweep_name = format!(
                                                "{dataset_name}_orientation_std_{orientation_std}_ncells_{n_cells}"
                                            );
                                            if grid.grid_scale.len() > 1 {
                                                sweep_name.push_str(&format!(
                                                    "_scale_{grid_scale}"
                                                ));
                                            }
                                            if grid.field_width.len() > 1 {
                                                sweep_name.push_str(&format!(
                                                    "_field_width_{field_width}"
                                                ));
                                            }
                                            let mut base =
                                                base_run_config(config, dataset_name)?;
                                            base.sweep_name = sweep_name.clone();
                                            base.grid_scale = Some(grid_scale);
                                            base.arena_dims = Some(arena_dims);
                                            base.n_cells = Some(n_cells);
                                            base.grid_orientation_mean =
                                                Some(orientation_mean);
                                            base.grid_orientation_std = Some(orientation_std);
                                            base.field_width = Some(field_width);
                                            base.resolution = Some(resolution);
                                            sweeps.push(SweepSpec {
                                                sweep_name,
                                                dataset_name: dataset_name.clone(),
                                                base,
                                            });
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
            "three_place_cells_synthetic" => {
                let sweep_name = dataset_name.clone();
                let mut base = base_run_config(config, dataset_name)?;
                base.sweep_name = sweep_name.clone();
                sweeps.push(SweepSpec {
                    sweep_name,
                    dataset_name: dataset_name.clone(),
                    base,
                });
            }
            other => {
                return Err(MlError::Config(format!("unknown dataset {other}")));
            }
        }
    }
    Ok(sweeps)
}

/// Run-config template with the dataset profile and fixed training values
/// merged in; sweep-chosen fields start from the first grid value.
fn base_run_config(
    config: &ExperimentConfig,
    dataset_name: &str,
) -> Result<RunConfig, MlError> {
    let profile = config.profile(dataset_name)?;
    let grid = &config.sweep;
    let first = |values: &Vec<f64>| values.first().copied().unwrap_or_default();
    let first_usize = |values: &Vec<usize>| values.first().copied().unwrap_or(1);
    Ok(RunConfig {
        run_name: String::new(),
        results_prefix: String::new(),
        sweep_name: String::new(),
        dataset_name: dataset_name.to_string(),
        lr: first(&grid.lr),
        batch_size: first_usize(&grid.batch_size),
        encoder_width: first_usize(&grid.encoder_width),
        encoder_depth: first_usize(&grid.encoder_depth),
        decoder_width: first_usize(&grid.decoder_width),
        decoder_depth: first_usize(&grid.decoder_depth),
        drop_out_p: first(&grid.drop_out_p),
        n_times: None,
        embedding_dim: None,
        geodesic_distortion_amp: None,
        noise_var: None,
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
        manifold_dim: profile.manifold_dim,
        latent_dim: profile.latent_dim,
        posterior_type: profile.posterior_type.clone(),
        n_wiggles: profile.n_wiggles,
        radius: profile.radius,
        major_radius: profile.major_radius,
        minor_radius: profile.minor_radius,
        geodesic_distortion_func: profile.geodesic_distortion_func.clone(),
        synthetic_rotation: profile.synthetic_rotation,
        device: config.device.clone(),
        log_interval: config.training.log_interval,
        checkpt_interval: config.training.checkpt_interval,
        batch_shuffle: config.training.batch_shuffle,
        scheduler: config.training.scheduler,
        n_epochs: config.training.n_epochs,
        alpha: config.training.alpha,
        beta: config.training.beta,
        gamma: config.training.gamma,
        sftbeta: config.training.sftbeta,
        gen_likelihood_type: config.training.gen_likelihood_type.clone(),
        n_grid_points: config.training.n_grid_points,
        early_stop_patience: config.training.early_stop_patience,
        seed: config.training.seed,
        data_n_times: None,
        data_dim: None,
    })
}

/// Cartesian product of the hyperparameter grid, in declaration order.
pub fn generate_trials(grid: &SweepGridConfig) -> Vec<TrialParams> {
    let mut trials = Vec::new();
    for &lr in &grid.lr {
        for &batch_size in &grid.batch_size {
            for &encoder_width in &grid.encoder_width {
                for &encoder_depth in &grid.encoder_depth {
                    for &decoder_width in &grid.decoder_width {
                        for &decoder_depth in &grid.decoder_depth {
                            for &drop_out_p in &grid.drop_out_p {
                                trials.push(TrialParams {
                                    lr,
                                    batch_size,
                                    encoder_width,
                                    encoder_depth,
                                    decoder_width,
                                    decoder_depth,
                                    drop_out_p,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    trials
}

/// Run every trial of a sweep sequentially; failed trials are recorded and
/// the sweep continues. The sweep record is persisted under the runs root.
pub fn run_sweep(
    spec: &SweepSpec,
    experiment: &ExperimentConfig,
    registry: &mut RunRegistry,
) -> Result<GridSweep, MlError> {
    tracing::info!(sweep = %spec.sweep_name, "starting sweep");
    let params_list = generate_trials(&experiment.sweep);
    let mut trials = Vec::with_capacity(params_list.len());

    for (trial_number, params) in params_list.into_iter().enumerate() {
        let mut run_config = spec.base.clone();
        run_config.lr = params.lr;
        run_config.batch_size = params.batch_size;
        run_config.encoder_width = params.encoder_width;
        run_config.encoder_depth = params.encoder_depth;
        run_config.decoder_width = params.decoder_width;
        run_config.decoder_depth = params.decoder_depth;
        run_config.drop_out_p = params.drop_out_p;

        let short_id: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        run_config.run_name = format!("run_{short_id}_{}", spec.sweep_name);
        run_config.results_prefix = run_config.run_name.clone();

        let mut record = SweepRun::new(&run_config)?;
        record.set_status(TrainingStatus::Running);

        let (metric, status) = match run_trial(&mut run_config, experiment) {
            Ok(outcome) => {
                record.metrics = Some(outcome.metrics.clone());
                (Some(outcome.test_loss), TrainingStatus::Completed)
            }
            Err(e) => {
                tracing::warn!(
                    run = %run_config.run_name,
                    error = %e,
                    "trial failed, continuing sweep"
                );
                (None, TrainingStatus::Failed)
            }
        };
        record.set_status(status.clone());
        registry.add(record);

        trials.push(SweepTrial {
            trial_number,
            run_name: run_config.run_name,
            params,
            metric,
            status,
        });
    }

    let best_trial = trials
        .iter()
        .filter_map(|t| t.metric.map(|m| (t.trial_number, m)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i);

    let sweep = GridSweep {
        id: uuid::Uuid::new_v4().to_string(),
        sweep_name: spec.sweep_name.clone(),
        dataset_name: spec.dataset_name.clone(),
        metric_name: experiment.sweep.metric.clone(),
        trials,
        best_trial,
    };

    let record_path = experiment
        .outputs
        .runs_dir
        .join(format!("{}_sweep.json", spec.sweep_name));
    topovae_core::persistence::atomic_write_json(&record_path, &sweep)?;
    tracing::info!(sweep = %spec.sweep_name, best_trial = ?sweep.best_trial, "sweep complete");

    Ok(sweep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn grid_size_is_the_product_of_value_counts() {
        let mut grid = SweepGridConfig::default();
        grid.lr = vec![1e-3, 1e-4];
        grid.batch_size = vec![32, 64];
        grid.drop_out_p = vec![0.0, 0.1, 0.2];
        let trials = generate_trials(&grid);
        assert_eq!(trials.len(), 12);
        let distinct: HashSet<String> = trials
            .iter()
            .map(|t| format!("{:?}", t))
            .collect();
        assert_eq!(distinct.len(), 12);
    }

    #[test]
    fn sweep_names_are_unique_across_enumeration() {
        let mut config = ExperimentConfig::default();
        config.datasets = vec!["s1_synthetic".to_string(), "t2_synthetic".to_string()];
        config.synthetic.noise_var = vec![1e-3, 1e-2];
        config.synthetic.embedding_dim = vec![3, 5];
        config.synthetic.n_times = vec![100, 200];
        let sweeps = enumerate_sweeps(&config).unwrap();
        assert_eq!(sweeps.len(), 16);
        let names: HashSet<&str> = sweeps.iter().map(|s| s.sweep_name.as_str()).collect();
        assert_eq!(names.len(), sweeps.len());
    }

    #[test]
    fn low_embedding_dim_is_rejected_for_2d_manifolds() {
        let mut config = ExperimentConfig::default();
        config.datasets = vec!["t2_synthetic".to_string()];
        config.synthetic.embedding_dim = vec![2];
        let err = enumerate_sweeps(&config).unwrap_err();
        assert!(matches!(err, MlError::InvalidInput(_)));

        // s1 is fine in the plane.
        let mut config = ExperimentConfig::default();
        config.datasets = vec!["s1_synthetic".to_string()];
        config.synthetic.embedding_dim = vec![2];
        assert!(enumerate_sweeps(&config).is_ok());
    }

    #[test]
    fn experimental_sweep_names_encode_gain_selection() {
        let mut config = ExperimentConfig::default();
        config.datasets = vec!["experimental".to_string()];
        config.experimental.select_gain_1 = vec![true, false];
        let sweeps = enumerate_sweeps(&config).unwrap();
        assert_eq!(sweeps.len(), 2);
        assert!(sweeps[0].sweep_name.ends_with("_gain_1"));
        assert!(sweeps[1].sweep_name.ends_with("_other_gain"));
    }

    #[test]
    fn base_config_inherits_profile_geometry() {
        let config = ExperimentConfig::default();
        let base = base_run_config(&config, "t2_synthetic").unwrap();
        assert_eq!(base.posterior_type, "toroidal");
        assert_eq!(base.latent_dim, 2);
        assert_eq!(base.major_radius, 2.0);
    }
}
