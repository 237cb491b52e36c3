//! Intrinsic dimension estimation of point clouds.
//!
//! The estimator set is the one the experiments exercise: TwoNN,
//! Levina-Bickel maximum likelihood, and local PCA. The aggregation loop
//! sweeps estimators over ground-truth manifold dimensions and noisy trials,
//! collecting an estimates matrix per method.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::datasets::synthetic;
use crate::error::MlError;

/// Intrinsic dimension estimators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdEstimator {
    TwoNn,
    Mle { k: usize },
    LocalPca { k: usize, threshold: f64 },
}

impl IdEstimator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TwoNn => "two_nn",
            Self::Mle { .. } => "mle",
            Self::LocalPca { .. } => "local_pca",
        }
    }

    /// The full estimator set, used when a sweep asks for "all" methods.
    pub fn all() -> Vec<IdEstimator> {
        vec![
            Self::TwoNn,
            Self::Mle { k: 10 },
            Self::LocalPca {
                k: 20,
                threshold: 0.05,
            },
        ]
    }

    /// Estimate the intrinsic dimension of a point cloud.
    pub fn fit(&self, points: &[Vec<f64>]) -> Result<f64, MlError> {
        match self {
            Self::TwoNn => two_nn(points),
            Self::Mle { k } => levina_bickel(points, *k),
            Self::LocalPca { k, threshold } => local_pca(points, *k, *threshold),
        }
    }
}

/// Sorted distances to the k nearest neighbors of each point (self excluded).
fn knn_distances(points: &[Vec<f64>], k: usize) -> Result<Vec<Vec<f64>>, MlError> {
    let n = points.len();
    if n <= k {
        return Err(MlError::evaluation(format!(
            "need more than {k} points for k={k} neighbors, got {n}"
        )));
    }
    let mut all = Vec::with_capacity(n);
    for (i, a) in points.iter().enumerate() {
        let mut distances: Vec<f64> = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, b)| {
                a.iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        distances.truncate(k);
        all.push(distances);
    }
    Ok(all)
}

/// TwoNN (Facco et al.): d = n / sum ln(r2 / r1).
fn two_nn(points: &[Vec<f64>]) -> Result<f64, MlError> {
    let neighbors = knn_distances(points, 2)?;
    let mut log_ratio_sum = 0.0;
    let mut count = 0usize;
    for pair in &neighbors {
        let (r1, r2) = (pair[0], pair[1]);
        if r1 > 1e-12 && r2 > r1 {
            log_ratio_sum += (r2 / r1).ln();
            count += 1;
        }
    }
    if count == 0 || log_ratio_sum <= 0.0 {
        return Err(MlError::evaluation("degenerate point cloud for TwoNN"));
    }
    Ok(count as f64 / log_ratio_sum)
}

/// Levina-Bickel maximum-likelihood estimator with k neighbors.
fn levina_bickel(points: &[Vec<f64>], k: usize) -> Result<f64, MlError> {
    if k < 3 {
        return Err(MlError::evaluation("mle estimator requires k >= 3"));
    }
    let neighbors = knn_distances(points, k)?;
    let mut estimates = Vec::with_capacity(points.len());
    for distances in &neighbors {
        let t_k = distances[k - 1];
        if t_k <= 1e-12 {
            continue;
        }
        let mut inv = 0.0;
        for t_j in distances.iter().take(k - 1) {
            if *t_j > 1e-12 {
                inv += (t_k / t_j).ln();
            }
        }
        inv /= (k - 1) as f64;
        if inv > 1e-12 {
            estimates.push(1.0 / inv);
        }
    }
    if estimates.is_empty() {
        return Err(MlError::evaluation("degenerate point cloud for MLE"));
    }
    Ok(estimates.iter().sum::<f64>() / estimates.len() as f64)
}

/// Local PCA: eigenvalues of the neighborhood covariance, counting components
/// above `threshold * lambda_max`.
fn local_pca(points: &[Vec<f64>], k: usize, threshold: f64) -> Result<f64, MlError> {
    let n = points.len();
    if n <= k {
        return Err(MlError::evaluation(format!(
            "need more than {k} points for local PCA, got {n}"
        )));
    }
    let ambient = points[0].len();

    let mut counts = Vec::with_capacity(n);
    for (i, a) in points.iter().enumerate() {
        // Indices of the k nearest neighbors.
        let mut order: Vec<(f64, usize)> = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, b)| {
                let d = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f64>();
                (d, j)
            })
            .collect();
        order.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));
        let neighborhood: Vec<&Vec<f64>> =
            order.iter().take(k).map(|(_, j)| &points[*j]).collect();

        let mut mean = vec![0.0; ambient];
        for p in &neighborhood {
            for (m, v) in mean.iter_mut().zip(p.iter()) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= k as f64;
        }

        let mut cov = DMatrix::<f64>::zeros(ambient, ambient);
        for p in &neighborhood {
            let centered: Vec<f64> = p.iter().zip(&mean).map(|(v, m)| v - m).collect();
            for r in 0..ambient {
                for c in 0..ambient {
                    cov[(r, c)] += centered[r] * centered[c];
                }
            }
        }
        cov /= k as f64;

        let eigen = SymmetricEigen::new(cov);
        let lambda_max = eigen.eigenvalues.iter().cloned().fold(0.0, f64::max);
        if lambda_max <= 1e-15 {
            continue;
        }
        let significant = eigen
            .eigenvalues
            .iter()
            .filter(|&&l| l >= threshold * lambda_max)
            .count();
        counts.push(significant as f64);
    }
    if counts.is_empty() {
        return Err(MlError::evaluation("degenerate point cloud for local PCA"));
    }
    Ok(counts.iter().sum::<f64>() / counts.len() as f64)
}

/// Estimates matrix per method: rows indexed by ground-truth dimension,
/// columns by trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdEstimates {
    pub estimates: Vec<(String, Vec<Vec<f64>>)>,
    /// Expected relative Poisson noise level of the synthesized manifolds.
    pub noise_level: f64,
}

/// Sweep estimators over ground-truth dimensions and noisy trials.
///
/// For each dimension, manifold points are drawn once; each trial resamples
/// the Poisson spiking so the estimate spread reflects observation noise.
#[allow(clippy::too_many_arguments)]
pub fn dimension_estimation(
    methods: &[IdEstimator],
    dimensions: &[usize],
    manifold_kind: &str,
    num_trials: usize,
    num_points: usize,
    num_neurons: usize,
    poisson_multiplier: f64,
    ref_frequency: f64,
    seed: u64,
) -> Result<IdEstimates, MlError> {
    let mut estimates = Vec::with_capacity(methods.len());
    let noise_level = (1.0 / (ref_frequency * poisson_multiplier)).sqrt();

    for method in methods {
        let mut per_dim = Vec::with_capacity(dimensions.len());
        for (dim_idx, &dim) in dimensions.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(
                seed.wrapping_add(dim_idx as u64).wrapping_mul(0x9e3779b9),
            );
            let points = match manifold_kind {
                "hypersphere" => synthetic::hypersphere(dim, num_points, &mut rng),
                "hypertorus" => synthetic::hypertorus(dim, num_points, &mut rng),
                other => {
                    return Err(MlError::evaluation(format!(
                        "unknown manifold kind {other}"
                    )))
                }
            };
            let mut per_trial = Vec::with_capacity(num_trials);
            for _ in 0..num_trials {
                let (manifold, _) = synthetic::synthetic_neural_manifold(
                    &points,
                    num_neurons,
                    "sigmoid",
                    poisson_multiplier,
                    ref_frequency,
                    &mut rng,
                )?;
                per_trial.push(method.fit(&manifold)?);
            }
            per_dim.push(per_trial);
        }
        estimates.push((method.name().to_string(), per_dim));
    }

    Ok(IdEstimates {
        estimates,
        noise_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn uniform_cube(dim: usize, ambient: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut p = vec![0.0; ambient];
                for slot in p.iter_mut().take(dim) {
                    *slot = rng.gen_range(0.0..1.0);
                }
                p
            })
            .collect()
    }

    #[test]
    fn two_nn_recovers_cube_dimension() {
        let points = uniform_cube(3, 3, 600, 5);
        let estimate = IdEstimator::TwoNn.fit(&points).unwrap();
        assert!((2.2..=3.8).contains(&estimate), "got {estimate}");
    }

    #[test]
    fn mle_recovers_plane_dimension() {
        let points = uniform_cube(2, 5, 500, 9);
        let estimate = IdEstimator::Mle { k: 10 }.fit(&points).unwrap();
        assert!((1.4..=2.8).contains(&estimate), "got {estimate}");
    }

    #[test]
    fn local_pca_is_exact_on_a_flat_plane() {
        let points = uniform_cube(2, 6, 300, 13);
        let estimate = IdEstimator::LocalPca {
            k: 20,
            threshold: 0.05,
        }
        .fit(&points)
        .unwrap();
        assert!((estimate - 2.0).abs() < 0.5, "got {estimate}");
    }

    #[test]
    fn aggregation_shapes_and_noise_level() {
        let result = dimension_estimation(
            &[IdEstimator::TwoNn],
            &[1, 2],
            "hypersphere",
            2,
            120,
            12,
            1.0,
            200.0,
            0,
        )
        .unwrap();
        assert_eq!(result.estimates.len(), 1);
        let (name, matrix) = &result.estimates[0];
        assert_eq!(name, "two_nn");
        assert_eq!(matrix.len(), 2);
        assert!(matrix.iter().all(|row| row.len() == 2));
        assert!((result.noise_level - (1.0f64 / 200.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn unknown_manifold_kind_errors() {
        let result = dimension_estimation(
            &IdEstimator::all(),
            &[1],
            "mobius",
            1,
            50,
            8,
            1.0,
            200.0,
            0,
        );
        assert!(result.is_err());
    }
}
