//! Synthetic manifold generators.
//!
//! Each generator samples points on a known manifold, pushes them through the
//! dataset's immersion into the embedding space, optionally applies a seeded
//! random rotation, and adds Gaussian observation noise. The clean immersion is
//! exposed on its own so the curvature evaluation can differentiate it.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson, StandardNormal};
use std::f64::consts::PI;

use crate::config::RunConfig;
use crate::error::MlError;

/// Points on a manifold plus the generative latent angles.
#[derive(Debug, Clone)]
pub struct SyntheticSample {
    /// (n_times, data_dim) observations.
    pub points: Vec<Vec<f64>>,
    /// First latent angle per observation.
    pub angles: Vec<f64>,
    /// Second latent angle, for 2-D manifolds.
    pub angles2: Option<Vec<f64>>,
}

/// Evaluate the clean (noise-free, unrotated) immersion at latent point `z`.
///
/// `z` carries `manifold_dim` chart coordinates. The result has
/// `embedding_dim` components, zero-padded past the geometric ones.
pub fn immersion_point(config: &RunConfig, z: &[f64]) -> Result<Vec<f64>, MlError> {
    let embedding_dim = config
        .embedding_dim
        .ok_or_else(|| MlError::dataset("synthetic immersion requires embedding_dim"))?;
    let mut point = vec![0.0; embedding_dim];
    match config.dataset_name.as_str() {
        "s1_synthetic" => {
            let theta = z[0];
            let rho = distorted_radius(config, theta);
            point[0] = rho * theta.cos();
            point[1] = rho * theta.sin();
        }
        "s2_synthetic" => {
            let (theta, phi) = (z[0], z[1]);
            let r = config.radius;
            point[0] = r * theta.sin() * phi.cos();
            point[1] = r * theta.sin() * phi.sin();
            point[2] = r * theta.cos();
        }
        "t2_synthetic" => {
            let (theta, phi) = (z[0], z[1]);
            let (major, minor) = (config.major_radius, config.minor_radius);
            let ring = major + minor * phi.cos();
            point[0] = ring * theta.cos();
            point[1] = ring * theta.sin();
            point[2] = minor * phi.sin();
        }
        other => {
            return Err(MlError::dataset(format!(
                "no analytic immersion for dataset {other}"
            )))
        }
    }
    Ok(point)
}

fn distorted_radius(config: &RunConfig, theta: f64) -> f64 {
    let amp = config.geodesic_distortion_amp.unwrap_or(0.0);
    match config.geodesic_distortion_func.as_str() {
        "wiggles" => config.radius * (1.0 + amp * (config.n_wiggles as f64 * theta).cos()),
        "bump" => {
            let d = theta - PI;
            config.radius * (1.0 + amp * (-d * d / (2.0 * 0.3 * 0.3)).exp())
        }
        _ => config.radius,
    }
}

/// Sample a synthetic manifold dataset (`s1_synthetic`, `s2_synthetic`,
/// `t2_synthetic`) according to the run config.
pub fn generate(config: &RunConfig) -> Result<SyntheticSample, MlError> {
    let n_times = config
        .n_times
        .ok_or_else(|| MlError::dataset("synthetic dataset requires n_times"))?;
    let embedding_dim = config
        .embedding_dim
        .ok_or_else(|| MlError::dataset("synthetic dataset requires embedding_dim"))?;
    let min_dim = if config.manifold_dim == 1 { 2 } else { 3 };
    if embedding_dim < min_dim {
        return Err(MlError::dataset(format!(
            "{} needs embedding_dim >= {min_dim}, got {embedding_dim}",
            config.dataset_name
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut angles = Vec::with_capacity(n_times);
    let mut angles2 = if config.manifold_dim == 2 {
        Some(Vec::with_capacity(n_times))
    } else {
        None
    };

    let mut points = Vec::with_capacity(n_times);
    for _ in 0..n_times {
        let z = match config.dataset_name.as_str() {
            "s1_synthetic" => vec![rng.gen_range(0.0..2.0 * PI)],
            // Area-uniform on the sphere: cos(theta) uniform in [-1, 1].
            "s2_synthetic" => {
                let cos_theta: f64 = rng.gen_range(-1.0..1.0);
                vec![cos_theta.acos(), rng.gen_range(0.0..2.0 * PI)]
            }
            "t2_synthetic" => vec![rng.gen_range(0.0..2.0 * PI), rng.gen_range(0.0..2.0 * PI)],
            other => return Err(MlError::dataset(format!("unknown synthetic dataset {other}"))),
        };
        angles.push(z[0]);
        if let Some(seconds) = angles2.as_mut() {
            seconds.push(z[1]);
        }
        points.push(immersion_point(config, &z)?);
    }

    if config.synthetic_rotation {
        let rotation = random_rotation(embedding_dim, &mut rng);
        for point in &mut points {
            let rotated = &rotation * nalgebra::DVector::from_column_slice(point);
            point.copy_from_slice(rotated.as_slice());
        }
    }

    if let Some(noise_var) = config.noise_var {
        let sigma = noise_var.sqrt();
        for point in &mut points {
            for value in point.iter_mut() {
                let eps: f64 = rng.sample(StandardNormal);
                *value += sigma * eps;
            }
        }
    }

    Ok(SyntheticSample {
        points,
        angles,
        angles2,
    })
}

/// Synthetic grid-cell population: rate maps over a square arena, each cell a
/// sum of three cosine gratings at 60-degree offsets with a per-cell
/// orientation jitter and random spatial phase.
pub fn grid_cells(config: &RunConfig) -> Result<SyntheticSample, MlError> {
    let spacing = config
        .grid_scale
        .ok_or_else(|| MlError::dataset("grid_cells requires grid_scale"))?;
    let arena = config
        .arena_dims
        .ok_or_else(|| MlError::dataset("grid_cells requires arena_dims"))?;
    let n_cells = config
        .n_cells
        .ok_or_else(|| MlError::dataset("grid_cells requires n_cells"))?;
    let resolution = config
        .resolution
        .ok_or_else(|| MlError::dataset("grid_cells requires resolution"))?;
    let orientation_mean = config.grid_orientation_mean.unwrap_or(0.0).to_radians();
    let orientation_std = config.grid_orientation_std.unwrap_or(0.0).to_radians();
    let field_width = config.field_width.unwrap_or(spacing / 4.0);

    let mut rng = StdRng::seed_from_u64(config.seed);
    // Sharper fields when the spacing/width ratio grows.
    let sharpness = (spacing / field_width).max(1.0);
    let k_mag = 4.0 * PI / (3.0_f64.sqrt() * spacing);

    struct Cell {
        orientation: f64,
        phase: (f64, f64),
    }
    let cells: Vec<Cell> = (0..n_cells)
        .map(|_| {
            let jitter: f64 = rng.sample(StandardNormal);
            Cell {
                orientation: orientation_mean + orientation_std * jitter,
                phase: (rng.gen_range(0.0..spacing), rng.gen_range(0.0..spacing)),
            }
        })
        .collect();

    let n_positions = resolution * resolution;
    let mut points = Vec::with_capacity(n_positions);
    let mut angles = Vec::with_capacity(n_positions);
    let mut angles2 = Vec::with_capacity(n_positions);
    for iy in 0..resolution {
        for ix in 0..resolution {
            let x = arena * (ix as f64 + 0.5) / resolution as f64;
            let y = arena * (iy as f64 + 0.5) / resolution as f64;
            let mut row = Vec::with_capacity(n_cells);
            for cell in &cells {
                let mut g = 0.0;
                for axis in 0..3 {
                    let angle = cell.orientation + axis as f64 * PI / 3.0;
                    let kx = k_mag * angle.cos();
                    let ky = k_mag * angle.sin();
                    g += (kx * (x - cell.phase.0) + ky * (y - cell.phase.1)).cos();
                }
                let base = (g + 3.0) / 6.0;
                row.push(base.powf(sharpness));
            }
            points.push(row);
            angles.push((2.0 * PI * x / spacing).rem_euclid(2.0 * PI));
            angles2.push((2.0 * PI * y / spacing).rem_euclid(2.0 * PI));
        }
    }

    Ok(SyntheticSample {
        points,
        angles,
        angles2: Some(angles2),
    })
}

/// Three Gaussian place fields on the circle.
pub fn three_place_cells(config: &RunConfig) -> Result<SyntheticSample, MlError> {
    let n_times = config.n_times.unwrap_or(1000);
    let sigma = 0.4;
    let centers = [0.0, 2.0 * PI / 3.0, 4.0 * PI / 3.0];

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut points = Vec::with_capacity(n_times);
    let mut angles = Vec::with_capacity(n_times);
    for t in 0..n_times {
        let theta = 2.0 * PI * t as f64 / n_times as f64;
        let mut row = Vec::with_capacity(3);
        for center in centers {
            let d = wrapped_distance(theta, center);
            row.push((-d * d / (2.0 * sigma * sigma)).exp());
        }
        if let Some(noise_var) = config.noise_var {
            let s = noise_var.sqrt();
            for value in row.iter_mut() {
                let eps: f64 = rng.sample(StandardNormal);
                *value += s * eps;
            }
        }
        points.push(row);
        angles.push(theta);
    }

    Ok(SyntheticSample {
        points,
        angles,
        angles2: None,
    })
}

/// Shortest angular distance on the circle.
pub fn wrapped_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(2.0 * PI);
    diff.min(2.0 * PI - diff)
}

/// Uniform points on the unit d-sphere, embedded in R^{d+1}.
pub fn hypersphere(dim: usize, n_points: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    (0..n_points)
        .map(|_| {
            let mut v: Vec<f64> = (0..dim + 1).map(|_| rng.sample(StandardNormal)).collect();
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-12);
            for x in v.iter_mut() {
                *x /= norm;
            }
            v
        })
        .collect()
}

/// Uniform points on the flat d-torus, embedded in R^{2d} as per-angle
/// (cos, sin) pairs.
pub fn hypertorus(dim: usize, n_points: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    (0..n_points)
        .map(|_| {
            let mut v = Vec::with_capacity(2 * dim);
            for _ in 0..dim {
                let theta = rng.gen_range(0.0..2.0 * PI);
                v.push(theta.cos());
                v.push(theta.sin());
            }
            v
        })
        .collect()
}

/// Push manifold points through a random tuning-curve nonlinearity and Poisson
/// spiking, producing a synthetic neural manifold.
///
/// Returns the rate estimates and the expected relative noise level
/// `sqrt(1 / (ref_frequency * poisson_multiplier))`.
pub fn synthetic_neural_manifold(
    points: &[Vec<f64>],
    num_neurons: usize,
    nonlinearity: &str,
    poisson_multiplier: f64,
    ref_frequency: f64,
    rng: &mut StdRng,
) -> Result<(Vec<Vec<f64>>, f64), MlError> {
    let ambient = points
        .first()
        .map(|p| p.len())
        .ok_or_else(|| MlError::dataset("synthetic_neural_manifold needs points"))?;
    let scale = 1.0 / (ambient as f64).sqrt();
    let weights: Vec<Vec<f64>> = (0..num_neurons)
        .map(|_| {
            (0..ambient)
                .map(|_| {
                    let w: f64 = rng.sample(StandardNormal);
                    w * scale
                })
                .collect()
        })
        .collect();

    let mut rates = Vec::with_capacity(points.len());
    for point in points {
        let mut row = Vec::with_capacity(num_neurons);
        for w in &weights {
            let drive: f64 = w.iter().zip(point).map(|(wi, xi)| wi * xi).sum();
            let rate = match nonlinearity {
                "sigmoid" => ref_frequency / (1.0 + (-drive * 4.0).exp()),
                "relu" => ref_frequency * drive.max(0.0),
                "linear" => ref_frequency * drive,
                other => {
                    return Err(MlError::dataset(format!("unknown nonlinearity {other}")))
                }
            };
            let lambda = (rate * poisson_multiplier).max(1e-9);
            let spikes = Poisson::new(lambda)
                .map_err(|e| MlError::dataset(format!("poisson rate {lambda}: {e}")))?
                .sample(rng);
            row.push(spikes / poisson_multiplier);
        }
        rates.push(row);
    }

    let noise_level = (1.0 / (ref_frequency * poisson_multiplier)).sqrt();
    Ok((rates, noise_level))
}

/// Seeded random rotation: QR of a Gaussian matrix with the sign convention
/// fixed so the result is a proper orthogonal matrix.
pub fn random_rotation(dim: usize, rng: &mut StdRng) -> DMatrix<f64> {
    let gaussian = DMatrix::from_fn(dim, dim, |_, _| rng.sample::<f64, _>(StandardNormal));
    let qr = gaussian.qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..dim {
        if r[(j, j)] < 0.0 {
            for i in 0..dim {
                q[(i, j)] = -q[(i, j)];
            }
        }
    }
    q
}
