//! # topovae-ml — training, evaluation, and sweep infrastructure
//!
//! The experiment pipeline lives here: synthetic/recorded dataset loading, the
//! three VAE classes selected by posterior tag, the train/test loop, grid
//! sweeps, curvature and intrinsic-dimension evaluation, figure rendering, and
//! the run tracker that collects each run's scalars and artifacts.

pub mod config;
pub mod datasets;
pub mod error;
pub mod eval;
pub mod experiment;
pub mod models;
pub mod sweep;
pub mod tracker;
pub mod training;
pub mod viz;

pub use config::RunConfig;
pub use error::MlError;
pub use experiment::{RunRegistry, SweepRun, TrainingStatus};
pub use sweep::{enumerate_sweeps, run_sweep, GridSweep, SweepSpec};
pub use training::checkpoint::CheckpointManager;
pub use training::metrics::TrainingMetrics;
