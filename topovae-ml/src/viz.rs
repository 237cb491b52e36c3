//! Figure rendering for run artifacts.
//!
//! Every plot is an SVG written next to the run's other artifacts and
//! registered with the tracker by path.

use plotters::prelude::*;
use std::path::Path;

use crate::error::MlError;
use crate::eval::curvature::CurvatureProfile;

const FIGURE_SIZE: (u32, u32) = (800, 600);

fn plot_err<E: std::fmt::Display>(e: E) -> MlError {
    MlError::Plot(e.to_string())
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in values {
        if v.is_finite() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo).abs()).max(1e-6) * 0.05;
    (lo - pad, hi + pad)
}

/// Train/test loss curves.
pub fn plot_loss(
    train_losses: &[f64],
    test_losses: &[f64],
    path: &Path,
) -> Result<(), MlError> {
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let n = train_losses.len().max(test_losses.len()).max(1);
    let (y_lo, y_hi) = padded_range(train_losses.iter().chain(test_losses).copied());

    let mut chart = ChartBuilder::on(&root)
        .caption("Training and test loss", ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n as f64, y_lo..y_hi)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc("Loss")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            train_losses
                .iter()
                .enumerate()
                .map(|(i, &l)| (i as f64 + 1.0, l)),
            &BLUE,
        ))
        .map_err(plot_err)?
        .label("train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(
            test_losses
                .iter()
                .enumerate()
                .map(|(i, &l)| (i as f64 + 1.0, l)),
            &RED,
        ))
        .map_err(plot_err)?
        .label("test")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Latent coordinates colored by the generative label angle.
///
/// 1-D latents are plotted against the label angle; 2-D latents as a scatter
/// in the latent chart.
pub fn plot_latent_space(
    latent_coords: &[Vec<f64>],
    label_angles: &[f64],
    path: &Path,
) -> Result<(), MlError> {
    if latent_coords.is_empty() {
        return Err(MlError::Plot("no latent coordinates to plot".to_string()));
    }
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let two_d = latent_coords[0].len() >= 2;
    let xs: Vec<f64> = if two_d {
        latent_coords.iter().map(|c| c[0]).collect()
    } else {
        label_angles.to_vec()
    };
    let ys: Vec<f64> = if two_d {
        latent_coords.iter().map(|c| c[1]).collect()
    } else {
        latent_coords.iter().map(|c| c[0]).collect()
    };
    let (x_lo, x_hi) = padded_range(xs.iter().copied());
    let (y_lo, y_hi) = padded_range(ys.iter().copied());

    let mut chart = ChartBuilder::on(&root)
        .caption("Latent space", ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(if two_d { "latent theta" } else { "label angle" })
        .y_desc(if two_d { "latent phi" } else { "latent angle" })
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(xs.iter().zip(&ys).zip(label_angles).map(|((&x, &y), &a)| {
            let hue = (a.rem_euclid(2.0 * std::f64::consts::PI))
                / (2.0 * std::f64::consts::PI);
            Circle::new((x, y), 3, HSLColor(hue, 0.8, 0.45).filled())
        }))
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// First-cell activity against the positional angle: data vs reconstruction.
pub fn plot_recon_per_angle(
    label_angles: &[f64],
    data: &[Vec<f64>],
    recon: &[Vec<f64>],
    path: &Path,
) -> Result<(), MlError> {
    if data.is_empty() || recon.is_empty() {
        return Err(MlError::Plot("nothing to plot".to_string()));
    }
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let (y_lo, y_hi) = padded_range(
        data.iter()
            .map(|r| r[0])
            .chain(recon.iter().map(|r| r[0])),
    );
    let mut chart = ChartBuilder::on(&root)
        .caption("Reconstruction per positional angle", ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..2.0 * std::f64::consts::PI, y_lo..y_hi)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Positional angle")
        .y_desc("Activity (cell 0)")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            label_angles
                .iter()
                .zip(data)
                .map(|(&a, row)| Circle::new((a.rem_euclid(2.0 * std::f64::consts::PI), row[0]), 2, BLUE.filled())),
        )
        .map_err(plot_err)?
        .label("data")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, BLUE.filled()));
    chart
        .draw_series(
            label_angles
                .iter()
                .zip(recon)
                .map(|(&a, row)| Circle::new((a.rem_euclid(2.0 * std::f64::consts::PI), row[0]), 2, RED.filled())),
        )
        .map_err(plot_err)?
        .label("reconstruction")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, RED.filled()));
    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Curvature norm profile. Curves plot norm against the chart angle; surfaces
/// scatter norm against the geodesic distance from the grid origin.
pub fn plot_curvature_norms(
    profile: &CurvatureProfile,
    norm_val: Option<f64>,
    profile_type: &str,
    path: &Path,
) -> Result<(), MlError> {
    if profile.z_grid.is_empty() {
        return Err(MlError::Plot("empty curvature profile".to_string()));
    }
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let one_d = profile.z_grid[0].len() == 1;
    let xs: Vec<f64> = if one_d {
        profile.z_grid.iter().map(|z| z[0]).collect()
    } else {
        profile.geodesic_dist.clone()
    };
    let (x_lo, x_hi) = padded_range(xs.iter().copied());
    let y_hi = match norm_val {
        Some(v) => v * 1.2,
        None => padded_range(profile.curv_norms.iter().copied()).1,
    };

    let caption = format!("Curvature norms ({profile_type})");
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, 0f64..y_hi.max(1e-6))
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(if one_d { "Latent angle" } else { "Geodesic distance" })
        .y_desc("Curvature norm")
        .draw()
        .map_err(plot_err)?;

    if one_d {
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(profile.curv_norms.iter().copied()),
                &MAGENTA,
            ))
            .map_err(plot_err)?;
    } else {
        chart
            .draw_series(
                xs.iter()
                    .zip(&profile.curv_norms)
                    .map(|(&x, &y)| Circle::new((x, y), 2, MAGENTA.filled())),
            )
            .map_err(plot_err)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}
