//! Evaluation: latent curvature profiles, intrinsic dimension estimation, and
//! component-count regression baselines.

pub mod curvature;
pub mod dimension;
pub mod regression;
