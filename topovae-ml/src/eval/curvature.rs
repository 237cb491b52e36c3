//! Curvature profiles of latent immersions.
//!
//! The learned profile differentiates the decoder immersion over a regular
//! latent grid with second-order central finite differences; the true profile
//! runs the exact same stencil on the generative immersion, so the error
//! metric compares like with like.

use std::f64::consts::PI;

use crate::config::RunConfig;
use crate::datasets::synthetic;
use crate::error::MlError;
use crate::models::ManifoldVae;

/// Finite-difference step in chart coordinates. Large enough to stay above
/// f32 decoder noise in the second difference, small enough for O(h^2)
/// truncation to be negligible against it.
const FD_STEP: f64 = 0.05;

/// Curvature norms over a latent grid.
#[derive(Debug, Clone)]
pub struct CurvatureProfile {
    /// Chart angles per grid point: one column for curves, two for surfaces.
    pub z_grid: Vec<Vec<f64>>,
    /// Distance from the grid origin in the chart metric.
    pub geodesic_dist: Vec<f64>,
    pub curv_norms: Vec<f64>,
}

impl CurvatureProfile {
    pub fn mean_curv_norm(&self) -> f64 {
        if self.curv_norms.is_empty() {
            return 0.0;
        }
        self.curv_norms.iter().sum::<f64>() / self.curv_norms.len() as f64
    }

    pub fn std_curv_norm(&self) -> f64 {
        let n = self.curv_norms.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.mean_curv_norm();
        (self
            .curv_norms
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / n as f64)
            .sqrt()
    }
}

/// Regular grid over the latent chart implied by the posterior type.
pub fn latent_grid(config: &RunConfig) -> Result<Vec<Vec<f64>>, MlError> {
    let n = config.n_grid_points.max(4);
    match (config.posterior_type.as_str(), config.latent_dim) {
        // Circle chart.
        (_, 1) => Ok((0..n)
            .map(|j| vec![2.0 * PI * j as f64 / n as f64])
            .collect()),
        // Sphere chart: polar angle kept interior to the coordinate box.
        ("hyperspherical", 2) => Ok(product_grid(n, |i, j, m| {
            vec![PI * (i as f64 + 0.5) / m as f64, 2.0 * PI * j as f64 / m as f64]
        })),
        // Flat-torus chart.
        ("toroidal", 2) => Ok(product_grid(n, |i, j, m| {
            vec![
                2.0 * PI * i as f64 / m as f64,
                2.0 * PI * j as f64 / m as f64,
            ]
        })),
        // Klein chart: half period in the double-cover angle.
        ("klein_bottle", 2) => Ok(product_grid(n, |i, j, m| {
            vec![PI * i as f64 / m as f64, 2.0 * PI * j as f64 / m as f64]
        })),
        (posterior, dim) => Err(MlError::evaluation(format!(
            "no latent grid for posterior {posterior} with latent_dim {dim}"
        ))),
    }
}

fn product_grid(per_axis: usize, point: impl Fn(usize, usize, usize) -> Vec<f64>) -> Vec<Vec<f64>> {
    let mut grid = Vec::with_capacity(per_axis * per_axis);
    for i in 0..per_axis {
        for j in 0..per_axis {
            grid.push(point(i, j, per_axis));
        }
    }
    grid
}

/// Curvature of the decoder immersion over the latent grid.
pub fn compute_curvature_learned(
    model: &dyn ManifoldVae,
    config: &RunConfig,
) -> Result<CurvatureProfile, MlError> {
    let grid = latent_grid(config)?;
    let eval = |queries: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, MlError> {
        let z = model.latent_embedding(queries)?;
        let decoded: Vec<Vec<f32>> = model.decode(&z)?.to_vec2()?;
        Ok(decoded
            .into_iter()
            .map(|row| row.into_iter().map(f64::from).collect())
            .collect())
    };
    profile_from_immersion(&grid, config, eval)
}

/// Curvature of the generative immersion, for the synthetic datasets.
pub fn compute_curvature_true(config: &RunConfig) -> Result<CurvatureProfile, MlError> {
    match config.dataset_name.as_str() {
        "s1_synthetic" | "s2_synthetic" | "t2_synthetic" => {}
        other => {
            return Err(MlError::evaluation(format!(
                "no ground-truth curvature for dataset {other}"
            )))
        }
    }
    let grid = latent_grid(config)?;
    let eval = |queries: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, MlError> {
        queries
            .iter()
            .map(|z| synthetic::immersion_point(config, z))
            .collect()
    };
    profile_from_immersion(&grid, config, eval)
}

/// Normalized mean absolute deviation between learned and true norms.
pub fn compute_curvature_error(
    z_grid: &[Vec<f64>],
    curv_norms_learned: &[f64],
    curv_norms_true: &[f64],
) -> Result<f64, MlError> {
    if z_grid.len() != curv_norms_learned.len() || z_grid.len() != curv_norms_true.len() {
        return Err(MlError::evaluation(
            "curvature profiles must share the latent grid",
        ));
    }
    let n = z_grid.len() as f64;
    let abs_dev: f64 = curv_norms_learned
        .iter()
        .zip(curv_norms_true)
        .map(|(l, t)| (l - t).abs())
        .sum::<f64>()
        / n;
    let scale = curv_norms_true.iter().map(|t| t.abs()).sum::<f64>() / n;
    Ok(abs_dev / (scale + 1e-12))
}

fn profile_from_immersion<F>(
    grid: &[Vec<f64>],
    config: &RunConfig,
    eval: F,
) -> Result<CurvatureProfile, MlError>
where
    F: Fn(&[Vec<f64>]) -> Result<Vec<Vec<f64>>, MlError>,
{
    let curv_norms = match config.latent_dim {
        1 => curve_curvature_norms(grid, &eval)?,
        2 => surface_curvature_norms(grid, &eval)?,
        d => {
            return Err(MlError::evaluation(format!(
                "curvature profiles support 1- or 2-dimensional latents, got {d}"
            )))
        }
    };
    let geodesic_dist = chart_geodesic_distances(config, grid);
    Ok(CurvatureProfile {
        z_grid: grid.to_vec(),
        geodesic_dist,
        curv_norms,
    })
}

/// Curvature norms of a curve immersion theta -> R^D.
fn curve_curvature_norms<F>(grid: &[Vec<f64>], eval: &F) -> Result<Vec<f64>, MlError>
where
    F: Fn(&[Vec<f64>]) -> Result<Vec<Vec<f64>>, MlError>,
{
    let h = FD_STEP;
    let mut queries = Vec::with_capacity(grid.len() * 3);
    for point in grid {
        let theta = point[0];
        queries.push(vec![theta - h]);
        queries.push(vec![theta]);
        queries.push(vec![theta + h]);
    }
    let values = eval(&queries)?;

    let mut norms = Vec::with_capacity(grid.len());
    for chunk in values.chunks(3) {
        let (f_m, f_0, f_p) = (&chunk[0], &chunk[1], &chunk[2]);
        let d1 = combine(&[(0.5 / h, f_p), (-0.5 / h, f_m)]);
        let d2 = combine(&[(1.0 / (h * h), f_p), (-2.0 / (h * h), f_0), (1.0 / (h * h), f_m)]);
        let speed_sq = dot(&d1, &d1).max(1e-12);
        let tangent: Vec<f64> = d1.iter().map(|v| v / speed_sq.sqrt()).collect();
        let radial = dot(&d2, &tangent);
        let perp: Vec<f64> = d2
            .iter()
            .zip(&tangent)
            .map(|(a, t)| a - radial * t)
            .collect();
        norms.push((dot(&perp, &perp)).sqrt() / speed_sq);
    }
    Ok(norms)
}

/// Mean curvature norms of a surface immersion (u, v) -> R^D.
fn surface_curvature_norms<F>(grid: &[Vec<f64>], eval: &F) -> Result<Vec<f64>, MlError>
where
    F: Fn(&[Vec<f64>]) -> Result<Vec<Vec<f64>>, MlError>,
{
    let h = FD_STEP;
    let offsets: [(f64, f64); 9] = [
        (-h, -h),
        (-h, 0.0),
        (-h, h),
        (0.0, -h),
        (0.0, 0.0),
        (0.0, h),
        (h, -h),
        (h, 0.0),
        (h, h),
    ];
    let mut queries = Vec::with_capacity(grid.len() * 9);
    for point in grid {
        for (du, dv) in offsets {
            queries.push(vec![point[0] + du, point[1] + dv]);
        }
    }
    let values = eval(&queries)?;

    let mut norms = Vec::with_capacity(grid.len());
    for chunk in values.chunks(9) {
        // Index layout follows `offsets`: chunk[3 * (du_idx) + dv_idx].
        let f = |i: usize, j: usize| &chunk[3 * i + j];
        let f_u = combine(&[(0.5 / h, f(2, 1)), (-0.5 / h, f(0, 1))]);
        let f_v = combine(&[(0.5 / h, f(1, 2)), (-0.5 / h, f(1, 0))]);
        let h2 = h * h;
        let f_uu = combine(&[(1.0 / h2, f(2, 1)), (-2.0 / h2, f(1, 1)), (1.0 / h2, f(0, 1))]);
        let f_vv = combine(&[(1.0 / h2, f(1, 2)), (-2.0 / h2, f(1, 1)), (1.0 / h2, f(1, 0))]);
        let f_uv = combine(&[
            (0.25 / h2, f(2, 2)),
            (-0.25 / h2, f(2, 0)),
            (-0.25 / h2, f(0, 2)),
            (0.25 / h2, f(0, 0)),
        ]);

        // First fundamental form and its inverse.
        let e = dot(&f_u, &f_u);
        let ff = dot(&f_u, &f_v);
        let g = dot(&f_v, &f_v);
        let det = (e * g - ff * ff).max(1e-12);
        let (g_uu, g_uv, g_vv) = (g / det, -ff / det, e / det);

        // Orthonormal tangent frame for the normal projection.
        let e1: Vec<f64> = f_u.iter().map(|v| v / e.max(1e-12).sqrt()).collect();
        let f_v_on_e1 = dot(&f_v, &e1);
        let w: Vec<f64> = f_v
            .iter()
            .zip(&e1)
            .map(|(a, b)| a - f_v_on_e1 * b)
            .collect();
        let w_norm = dot(&w, &w).sqrt().max(1e-12);
        let e2: Vec<f64> = w.iter().map(|v| v / w_norm).collect();

        let perp = |x: &[f64]| -> Vec<f64> {
            let a = dot(x, &e1);
            let b = dot(x, &e2);
            x.iter()
                .zip(e1.iter().zip(&e2))
                .map(|(v, (u1, u2))| v - a * u1 - b * u2)
                .collect()
        };

        let h_vec: Vec<f64> = {
            let p_uu = perp(&f_uu);
            let p_uv = perp(&f_uv);
            let p_vv = perp(&f_vv);
            (0..p_uu.len())
                .map(|k| 0.5 * (g_uu * p_uu[k] + 2.0 * g_uv * p_uv[k] + g_vv * p_vv[k]))
                .collect()
        };
        norms.push(dot(&h_vec, &h_vec).sqrt());
    }
    Ok(norms)
}

/// Distances from the first grid point in the chart metric of the dataset.
fn chart_geodesic_distances(config: &RunConfig, grid: &[Vec<f64>]) -> Vec<f64> {
    let radius = if config.radius > 0.0 { config.radius } else { 1.0 };
    let major = if config.major_radius > 0.0 {
        config.major_radius
    } else {
        1.0
    };
    let minor = if config.minor_radius > 0.0 {
        config.minor_radius
    } else {
        1.0
    };
    let origin = match grid.first() {
        Some(o) => o.clone(),
        None => return Vec::new(),
    };

    grid.iter()
        .map(|z| match (config.posterior_type.as_str(), config.latent_dim) {
            (_, 1) => radius * synthetic::wrapped_distance(z[0], origin[0]),
            ("hyperspherical", _) => {
                let (t0, p0) = (origin[0], origin[1]);
                let (t1, p1) = (z[0], z[1]);
                let cos_angle =
                    t0.cos() * t1.cos() + t0.sin() * t1.sin() * (p1 - p0).cos();
                radius * cos_angle.clamp(-1.0, 1.0).acos()
            }
            _ => {
                let du = synthetic::wrapped_distance(z[0], origin[0]);
                let dv = synthetic::wrapped_distance(z[1], origin[1]);
                (major * major * du * du + minor * minor * dv * dv).sqrt()
            }
        })
        .collect()
}

fn combine(terms: &[(f64, &Vec<f64>)]) -> Vec<f64> {
    let dim = terms[0].1.len();
    let mut out = vec![0.0; dim];
    for (weight, vector) in terms {
        for (acc, v) in out.iter_mut().zip(vector.iter()) {
            *acc += weight * v;
        }
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Velocity statistics per grid point, joined by angular proximity of the
/// grid to the recorded angles. Empty bins get the -1 sentinel for min/max.
pub struct VelocityStats {
    pub mean: Vec<f64>,
    pub median: Vec<f64>,
    pub std: Vec<f64>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

pub fn velocity_stats(
    z_grid: &[Vec<f64>],
    angles: &[f64],
    velocities: &[f64],
    window: f64,
) -> VelocityStats {
    let mut stats = VelocityStats {
        mean: Vec::with_capacity(z_grid.len()),
        median: Vec::with_capacity(z_grid.len()),
        std: Vec::with_capacity(z_grid.len()),
        min: Vec::with_capacity(z_grid.len()),
        max: Vec::with_capacity(z_grid.len()),
    };
    for z in z_grid {
        let mut selected: Vec<f64> = angles
            .iter()
            .zip(velocities)
            .filter(|(a, v)| {
                synthetic::wrapped_distance(z[0], **a) < window && v.is_finite()
            })
            .map(|(_, v)| *v)
            .collect();
        if selected.is_empty() {
            stats.mean.push(f64::NAN);
            stats.median.push(f64::NAN);
            stats.std.push(f64::NAN);
            stats.min.push(-1.0);
            stats.max.push(-1.0);
            continue;
        }
        selected.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = selected.len() as f64;
        let mean = selected.iter().sum::<f64>() / n;
        let var = selected.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let median = if selected.len() % 2 == 1 {
            selected[selected.len() / 2]
        } else {
            0.5 * (selected[selected.len() / 2 - 1] + selected[selected.len() / 2])
        };
        stats.mean.push(mean);
        stats.median.push(median);
        stats.std.push(var.sqrt());
        stats.min.push(selected[0]);
        stats.max.push(*selected.last().unwrap());
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_run_config;

    #[test]
    fn circle_curvature_is_inverse_radius() {
        let grid: Vec<Vec<f64>> = (0..16).map(|j| vec![2.0 * PI * j as f64 / 16.0]).collect();
        let eval = |queries: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, MlError> {
            Ok(queries
                .iter()
                .map(|z| vec![2.0 * z[0].cos(), 2.0 * z[0].sin()])
                .collect())
        };
        let norms = curve_curvature_norms(&grid, &eval).unwrap();
        for norm in norms {
            assert!((norm - 0.5).abs() < 1e-3, "got {norm}");
        }
    }

    #[test]
    fn sphere_mean_curvature_is_inverse_radius() {
        let grid = product_grid(8, |i, j, m| {
            vec![PI * (i as f64 + 0.5) / m as f64, 2.0 * PI * j as f64 / m as f64]
        });
        let r = 2.0;
        let eval = |queries: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, MlError> {
            Ok(queries
                .iter()
                .map(|z| {
                    vec![
                        r * z[0].sin() * z[1].cos(),
                        r * z[0].sin() * z[1].sin(),
                        r * z[0].cos(),
                    ]
                })
                .collect())
        };
        let norms = surface_curvature_norms(&grid, &eval).unwrap();
        for norm in norms {
            assert!((norm - 0.5).abs() < 5e-3, "got {norm}");
        }
    }

    #[test]
    fn torus_mean_curvature_matches_analytic_form() {
        let (big_r, small_r) = (2.0, 1.0);
        let grid = product_grid(8, |i, j, m| {
            vec![
                2.0 * PI * i as f64 / m as f64,
                2.0 * PI * j as f64 / m as f64,
            ]
        });
        let eval = |queries: &[Vec<f64>]| -> Result<Vec<Vec<f64>>, MlError> {
            Ok(queries
                .iter()
                .map(|z| {
                    let ring = big_r + small_r * z[1].cos();
                    vec![ring * z[0].cos(), ring * z[0].sin(), small_r * z[1].sin()]
                })
                .collect())
        };
        let norms = surface_curvature_norms(&grid, &eval).unwrap();
        for (z, norm) in grid.iter().zip(&norms) {
            let v = z[1];
            let expected = ((big_r + 2.0 * small_r * v.cos())
                / (2.0 * small_r * (big_r + small_r * v.cos())))
            .abs();
            assert!((norm - expected).abs() < 2e-2, "v={v}: {norm} vs {expected}");
        }
    }

    #[test]
    fn true_profile_of_undistorted_s1_is_flat() {
        let mut config = minimal_run_config();
        config.geodesic_distortion_amp = Some(0.0);
        config.n_grid_points = 12;
        let profile = compute_curvature_true(&config).unwrap();
        assert_eq!(profile.z_grid.len(), 12);
        for norm in &profile.curv_norms {
            assert!((norm - 1.0).abs() < 1e-3, "got {norm}");
        }
        // Grid origin at distance zero, monotone up to the antipode.
        assert!(profile.geodesic_dist[0].abs() < 1e-12);
    }

    #[test]
    fn curvature_error_is_zero_for_identical_profiles() {
        let grid = vec![vec![0.0], vec![1.0]];
        let norms = vec![0.5, 0.7];
        let err = compute_curvature_error(&grid, &norms, &norms).unwrap();
        assert!(err.abs() < 1e-12);
    }

    #[test]
    fn velocity_stats_use_sentinel_for_empty_bins() {
        let z_grid = vec![vec![0.0], vec![PI]];
        let angles = vec![0.05, 0.1];
        let velocities = vec![2.0, 4.0];
        let stats = velocity_stats(&z_grid, &angles, &velocities, 0.2);
        assert!((stats.mean[0] - 3.0).abs() < 1e-12);
        assert_eq!(stats.min[1], -1.0);
        assert_eq!(stats.max[1], -1.0);
        assert!(stats.mean[1].is_nan());
    }
}
