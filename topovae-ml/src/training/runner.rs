//! Per-run pipeline: load data, build the model, train, plot, persist, and
//! evaluate curvature, logging everything to the run tracker.

use std::time::Instant;

use serde_json::json;
use topovae_core::config::ExperimentConfig;
use topovae_core::persistence::atomic_write_csv;

use crate::config::RunConfig;
use crate::datasets;
use crate::error::MlError;
use crate::eval::curvature::{
    self, compute_curvature_error, compute_curvature_learned, compute_curvature_true,
    CurvatureProfile,
};
use crate::models;
use crate::tracker::RunTracker;
use crate::training::checkpoint::CheckpointManager;
use crate::training::metrics::TrainingMetrics;
use crate::training::train::{batch_tensor, train_test};
use crate::viz;

/// How close (in latent angle) a recorded sample must be to a grid point to
/// contribute to that point's velocity statistics.
const VELOCITY_WINDOW: f64 = 0.2;

/// Result of one completed trial.
pub struct TrialOutcome {
    pub run_name: String,
    /// Sweep metric: minimum test loss.
    pub test_loss: f64,
    pub metrics: TrainingMetrics,
}

/// Run the full pipeline for one merged run config.
pub fn run_trial(
    config: &mut RunConfig,
    experiment: &ExperimentConfig,
) -> Result<TrialOutcome, MlError> {
    let mut tracker = RunTracker::init(
        &experiment.outputs.runs_dir,
        &experiment.project,
        &config.run_name,
    )?;

    // Load data and labels; derived shape fields land in the config before it
    // is persisted.
    let (dataset, split) = datasets::load(config)?;
    config.save(&experiment.outputs.configs_dir)?;

    let device = config.candle_device()?;
    let (model, mut varmap) = models::create_model(config, &device)?;
    let checkpoints = CheckpointManager::new(experiment.outputs.trained_models_dir.clone(), 5);

    let outcome = train_test(
        model.as_ref(),
        &mut varmap,
        &dataset,
        &split,
        config,
        Some(&checkpoints),
        Some(&mut tracker),
    )?;
    tracing::info!(run = %config.run_name, "training complete");

    // Plots and model persistence.
    let run_dir = tracker.run_dir().to_path_buf();
    let fig_loss = run_dir.join("fig_loss.svg");
    viz::plot_loss(&outcome.train_losses, &outcome.test_losses, &fig_loss)?;
    tracker.log_artifact("fig_loss", &fig_loss);

    let x_all = batch_tensor(&dataset, &(0..dataset.n_times()).collect::<Vec<_>>(), &device)?;
    let latent_coords = model.encode_latent(&x_all)?;
    let fig_latent = run_dir.join("fig_latent.svg");
    viz::plot_latent_space(&latent_coords, &dataset.labels.angles, &fig_latent)?;
    tracker.log_artifact("fig_latent", &fig_latent);

    let recon: Vec<Vec<f64>> = model
        .forward(&x_all, false)?
        .recon
        .to_vec2::<f32>()?
        .into_iter()
        .map(|row| row.into_iter().map(f64::from).collect())
        .collect();
    let fig_recon = run_dir.join("fig_recon.svg");
    viz::plot_recon_per_angle(&dataset.labels.angles, &dataset.points, &recon, &fig_recon)?;
    tracker.log_artifact("fig_recon", &fig_recon);

    let (model_path, state_path) = checkpoints.save_final(config, &varmap)?;
    tracker.log_artifact("model", &model_path);
    tracker.log_artifact("model_state_dict", &state_path);
    tracing::info!(run = %config.run_name, "plots and model artifacts written");

    // Curvature: learned profile always, true profile for the synthetic
    // manifolds.
    let started = Instant::now();
    let learned = compute_curvature_learned(model.as_ref(), config)?;
    let comp_time_learned = started.elapsed().as_secs_f64();

    write_profile_csv(config, experiment, &learned, "learned", &dataset.labels)?;
    tracker.log_scalar("comp_time_curv_learned", None, comp_time_learned)?;
    tracker.log_scalar("average_curv_norms_learned", None, learned.mean_curv_norm())?;
    tracker.log_scalar("std_curv_norms_learned", None, learned.std_curv_norm())?;

    let mut curvature_error = None;
    let mut norm_val = None;
    let is_synthetic_manifold = matches!(
        config.dataset_name.as_str(),
        "s1_synthetic" | "s2_synthetic" | "t2_synthetic"
    );
    if is_synthetic_manifold {
        let started = Instant::now();
        let truth = compute_curvature_true(config)?;
        let comp_time_true = started.elapsed().as_secs_f64();
        let error =
            compute_curvature_error(&truth.z_grid, &learned.curv_norms, &truth.curv_norms)?;
        norm_val = truth
            .curv_norms
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            });
        curvature_error = Some(error);

        write_profile_csv(config, experiment, &truth, "true", &dataset.labels)?;
        tracker.log_scalar("comp_time_curv_true", None, comp_time_true)?;
        tracker.log_scalar("average_curv_norms_true", None, truth.mean_curv_norm())?;
        tracker.log_scalar("std_curv_norms_true", None, truth.std_curv_norm())?;
        tracker.log_scalar("curvature_error", None, error)?;

        let fig_true = run_dir.join("fig_curv_norms_true.svg");
        viz::plot_curvature_norms(&truth, None, "true", &fig_true)?;
        tracker.log_artifact("fig_curv_norms_true", &fig_true);
    }

    let fig_learned = run_dir.join("fig_curv_norms_learned.svg");
    viz::plot_curvature_norms(&learned, norm_val, "learned", &fig_learned)?;
    tracker.log_artifact("fig_curv_norms_learned", &fig_learned);
    tracing::info!(run = %config.run_name, "curvature profiles written");

    let test_loss = outcome
        .metrics
        .min_test_loss()
        .ok_or_else(|| MlError::training("no test loss recorded"))?;
    tracker.finish(
        "completed",
        json!({
            "best_test_loss": test_loss,
            "best_epoch": outcome.metrics.best_epoch,
            "epochs_completed": outcome.metrics.epochs_completed,
            "curvature_error": curvature_error,
            "training_time_secs": outcome.metrics.total_training_time_secs,
        }),
    )?;

    Ok(TrialOutcome {
        run_name: config.run_name.clone(),
        test_loss,
        metrics: outcome.metrics,
    })
}

/// Persist a curvature profile as CSV, with grid columns matching the latent
/// dimensionality and velocity statistics joined for recorded datasets.
fn write_profile_csv(
    config: &RunConfig,
    experiment: &ExperimentConfig,
    profile: &CurvatureProfile,
    profile_type: &str,
    labels: &datasets::Labels,
) -> Result<(), MlError> {
    let path = experiment.outputs.curvature_profiles_dir.join(format!(
        "{}_curv_norm_{profile_type}_profile.csv",
        config.results_prefix
    ));

    let norm_header = format!("curv_norm_{profile_type}");
    let mut columns: Vec<(String, Vec<f64>)> = vec![
        ("geodesic_dist".to_string(), profile.geodesic_dist.clone()),
        (norm_header, profile.curv_norms.clone()),
    ];
    if profile.z_grid.first().map(|z| z.len()) == Some(1) {
        columns.push((
            "z_grid".to_string(),
            profile.z_grid.iter().map(|z| z[0]).collect(),
        ));
    } else {
        columns.push((
            "z_grid_theta".to_string(),
            profile.z_grid.iter().map(|z| z[0]).collect(),
        ));
        columns.push((
            "z_grid_phi".to_string(),
            profile.z_grid.iter().map(|z| z[1]).collect(),
        ));
    }

    if profile_type == "learned" && config.dataset_name == "experimental" {
        if let Some(velocities) = &labels.velocities {
            let stats = curvature::velocity_stats(
                &profile.z_grid,
                &labels.angles,
                velocities,
                VELOCITY_WINDOW,
            );
            columns.push(("mean_velocities".to_string(), stats.mean));
            columns.push(("median_velocities".to_string(), stats.median));
            columns.push(("std_velocities".to_string(), stats.std));
            columns.push(("min_velocities".to_string(), stats.min));
            columns.push(("max_velocities".to_string(), stats.max));
        }
    }

    let borrowed: Vec<(&str, &[f64])> = columns
        .iter()
        .map(|(name, values)| (name.as_str(), values.as_slice()))
        .collect();
    atomic_write_csv(&path, &borrowed)?;
    Ok(())
}
