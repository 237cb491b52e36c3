//! Dataset loading: synthetic manifold generators and recorded recordings.

pub mod loader;
pub mod synthetic;

pub use loader::{load, Dataset, Labels, TrainTestSplit};
