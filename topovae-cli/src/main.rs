//! topovae — run every configured sweep from a static configuration file.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use topovae_core::ExperimentConfig;
use topovae_ml::{enumerate_sweeps, run_sweep, RunRegistry};

/// Topological VAE experiment sweeps.
#[derive(Parser, Debug)]
#[command(name = "topovae", version, about, long_about = None)]
struct Cli {
    /// Workspace directory.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (defaults to <workspace>/topovae.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "topovae=info,topovae_core=info,topovae_ml=info",
        1 => "topovae=debug,topovae_core=debug,topovae_ml=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = ExperimentConfig::load(&cli.workspace, cli.config.as_deref())
        .context("loading experiment configuration")?;
    tracing::info!(datasets = ?config.datasets, project = %config.project, "configuration loaded");

    let sweeps = enumerate_sweeps(&config).context("enumerating sweeps")?;
    if sweeps.is_empty() {
        tracing::warn!("nothing to do: no sweeps enumerated");
        return Ok(());
    }

    let registry_path = config.outputs.runs_dir.join("registry.json");
    let mut registry = RunRegistry::load(&registry_path).context("loading run registry")?;

    let mut completed = Vec::new();
    for spec in &sweeps {
        tracing::info!(sweep = %spec.sweep_name, "---> START training for sweep");
        let sweep = run_sweep(spec, &config, &mut registry)
            .with_context(|| format!("running sweep {}", spec.sweep_name))?;
        registry.save(&registry_path).context("saving run registry")?;
        completed.push(sweep);
    }

    println!("{:<60} {:>8} {:>12}", "sweep", "trials", "best loss");
    for sweep in &completed {
        let best = sweep
            .best_trial
            .and_then(|i| sweep.trials.get(i))
            .and_then(|t| t.metric);
        match best {
            Some(metric) => println!(
                "{:<60} {:>8} {:>12.6}",
                sweep.sweep_name,
                sweep.trials.len(),
                metric
            ),
            None => println!(
                "{:<60} {:>8} {:>12}",
                sweep.sweep_name,
                sweep.trials.len(),
                "failed"
            ),
        }
    }

    Ok(())
}
