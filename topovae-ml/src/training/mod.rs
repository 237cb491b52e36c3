//! Training infrastructure — the train/test loop, metrics, checkpoints,
//! callbacks, and the per-run pipeline runner.

pub mod callbacks;
pub mod checkpoint;
pub mod metrics;
pub mod runner;
pub mod train;

pub use checkpoint::CheckpointManager;
pub use metrics::TrainingMetrics;
pub use runner::run_trial;
pub use train::train_test;
