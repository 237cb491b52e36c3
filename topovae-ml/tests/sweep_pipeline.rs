//! End-to-end sweep: enumerate, train a tiny VAE, and check every artifact
//! the pipeline is supposed to leave behind.

use topovae_core::config::ExperimentConfig;
use topovae_ml::experiment::TrainingStatus;
use topovae_ml::{enumerate_sweeps, run_sweep, RunRegistry};

fn tiny_config(root: &std::path::Path) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.datasets = vec!["s1_synthetic".to_string()];
    config.outputs.configs_dir = root.join("configs");
    config.outputs.trained_models_dir = root.join("trained_models");
    config.outputs.curvature_profiles_dir = root.join("curvature_profiles");
    config.outputs.runs_dir = root.join("runs");
    config.sweep.lr = vec![1e-3];
    config.sweep.batch_size = vec![32];
    config.sweep.encoder_width = vec![8];
    config.sweep.encoder_depth = vec![1];
    config.sweep.decoder_width = vec![8];
    config.sweep.decoder_depth = vec![1];
    config.sweep.drop_out_p = vec![0.0];
    config.training.n_epochs = 2;
    config.training.log_interval = 1;
    config.training.checkpt_interval = 1;
    config.training.n_grid_points = 8;
    config.synthetic.n_times = vec![60];
    config.synthetic.embedding_dim = vec![3];
    config
}

#[test]
fn s1_sweep_writes_every_artifact() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = tiny_config(dir.path());

    let sweeps = enumerate_sweeps(&config).unwrap();
    assert_eq!(sweeps.len(), 1);
    assert_eq!(
        sweeps[0].sweep_name,
        "s1_synthetic_noise_var_0.001_embedding_dim_3"
    );

    let mut registry = RunRegistry::new();
    let sweep = run_sweep(&sweeps[0], &config, &mut registry).unwrap();

    assert_eq!(sweep.trials.len(), 1);
    assert_eq!(sweep.best_trial, Some(0));
    let trial = &sweep.trials[0];
    assert_eq!(trial.status, TrainingStatus::Completed);
    let metric = trial.metric.expect("completed trial has a metric");
    assert!(metric.is_finite());

    let run_name = &trial.run_name;
    assert!(run_name.starts_with("run_"));
    assert!(run_name.ends_with(&sweep.sweep_name));

    // Per-run JSON config with derived shape fields filled in.
    let config_path = config.outputs.configs_dir.join(format!("{run_name}.json"));
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    assert_eq!(saved["data_n_times"], 60);
    assert_eq!(saved["data_dim"], 3);
    assert_eq!(saved["sweep_name"], sweep.sweep_name.as_str());

    // Model persisted twice.
    let model_dir = config.outputs.trained_models_dir.join(run_name);
    assert!(model_dir.join("model.safetensors").exists());
    assert!(model_dir.join("config.json").exists());
    assert!(config
        .outputs
        .trained_models_dir
        .join(format!("{run_name}_state.safetensors"))
        .exists());
    // Epoch checkpoints tracked in the manifest.
    assert!(model_dir.join("checkpoints.json").exists());

    // Curvature profiles: learned and, for synthetic data, true.
    let learned_csv = config
        .outputs
        .curvature_profiles_dir
        .join(format!("{run_name}_curv_norm_learned_profile.csv"));
    let true_csv = config
        .outputs
        .curvature_profiles_dir
        .join(format!("{run_name}_curv_norm_true_profile.csv"));
    let learned_text = std::fs::read_to_string(&learned_csv).unwrap();
    assert!(learned_text.starts_with("geodesic_dist,curv_norm_learned,z_grid"));
    assert_eq!(learned_text.lines().count(), 1 + 8);
    assert!(true_csv.exists());

    // Tracker artifacts.
    let run_dir = config.outputs.runs_dir.join(run_name);
    assert!(run_dir.join("events.jsonl").exists());
    assert!(run_dir.join("fig_loss.svg").exists());
    assert!(run_dir.join("fig_latent.svg").exists());
    assert!(run_dir.join("fig_recon.svg").exists());
    assert!(run_dir.join("fig_curv_norms_learned.svg").exists());
    assert!(run_dir.join("fig_curv_norms_true.svg").exists());
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["status"], "completed");
    assert!(summary["summary"]["curvature_error"].is_number());

    // Sweep record and registry.
    assert!(config
        .outputs
        .runs_dir
        .join(format!("{}_sweep.json", sweep.sweep_name))
        .exists());
    assert_eq!(registry.runs.len(), 1);
    assert_eq!(registry.runs[0].status, TrainingStatus::Completed);
}

#[test]
fn failed_trials_are_recorded_and_the_sweep_continues() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = tiny_config(dir.path());
    config.datasets = vec!["experimental".to_string()];
    // Point at a directory with no recording; the trial must fail cleanly.
    config.experimental.data_dir = dir.path().join("no_such_data");
    config.experimental.select_gain_1 = vec![true];

    let sweeps = enumerate_sweeps(&config).unwrap();
    assert_eq!(sweeps.len(), 1);

    let mut registry = RunRegistry::new();
    let sweep = run_sweep(&sweeps[0], &config, &mut registry).unwrap();
    assert_eq!(sweep.trials.len(), 1);
    assert_eq!(sweep.trials[0].status, TrainingStatus::Failed);
    assert_eq!(sweep.trials[0].metric, None);
    assert_eq!(sweep.best_trial, None);
    assert_eq!(registry.runs[0].status, TrainingStatus::Failed);
}
