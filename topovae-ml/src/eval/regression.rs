//! Component-count regression baselines: PLS and PCA projections followed by
//! multi-output linear regression, scored by held-out R^2 per component count.

use nalgebra::{DMatrix, DVector, SVD};

use crate::datasets::TrainTestSplit;
use crate::error::MlError;

/// Fitted PLS transformer (NIPALS, two-block).
pub struct PlsModel {
    x_mean: DVector<f64>,
    /// Rotation taking centered data to component scores.
    rotation: DMatrix<f64>,
}

impl PlsModel {
    /// Fit `k` components on training predictors and targets.
    pub fn fit(x: &DMatrix<f64>, y: &DMatrix<f64>, k: usize) -> Result<Self, MlError> {
        let (n, p) = x.shape();
        if y.nrows() != n {
            return Err(MlError::evaluation("X and Y row counts differ"));
        }
        if k == 0 || k > p.min(n.saturating_sub(1)) {
            return Err(MlError::evaluation(format!(
                "PLS component count {k} out of range for {n}x{p} data"
            )));
        }

        let x_mean = column_means(x);
        let y_mean = column_means(y);
        let mut xr = center_columns(x, &x_mean);
        let mut yr = center_columns(y, &y_mean);

        let mut weights = DMatrix::<f64>::zeros(p, k);
        let mut loadings = DMatrix::<f64>::zeros(p, k);

        for a in 0..k {
            let mut u = yr.column(0).clone_owned();
            let mut w = DVector::<f64>::zeros(p);
            for _ in 0..500 {
                let mut w_new = xr.transpose() * &u;
                let w_norm = w_new.norm().max(1e-12);
                w_new /= w_norm;
                let t = &xr * &w_new;
                let t_dot = t.dot(&t).max(1e-12);
                let c = yr.transpose() * &t / t_dot;
                let c_dot = c.dot(&c).max(1e-12);
                let u_new = &yr * &c / c_dot;
                let delta = (&w_new - &w).norm();
                w = w_new;
                u = u_new;
                if delta < 1e-10 {
                    break;
                }
            }
            let t = &xr * &w;
            let t_dot = t.dot(&t).max(1e-12);
            let p_load = xr.transpose() * &t / t_dot;
            let c = yr.transpose() * &t / t_dot;
            xr -= &t * p_load.transpose();
            yr -= &t * c.transpose();
            weights.set_column(a, &w);
            loadings.set_column(a, &p_load);
        }

        let ptw = loadings.transpose() * &weights;
        let rotation = &weights
            * ptw
                .try_inverse()
                .ok_or_else(|| MlError::evaluation("singular PLS loadings"))?;
        Ok(Self { x_mean, rotation })
    }

    /// Project data into component scores.
    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        center_columns(x, &self.x_mean) * &self.rotation
    }
}

/// Fitted PCA transformer.
pub struct PcaModel {
    x_mean: DVector<f64>,
    /// Principal axes as columns, ordered by singular value.
    components: DMatrix<f64>,
}

impl PcaModel {
    pub fn fit(x: &DMatrix<f64>, k: usize) -> Result<Self, MlError> {
        let (n, p) = x.shape();
        if k == 0 || k > p.min(n) {
            return Err(MlError::evaluation(format!(
                "PCA component count {k} out of range for {n}x{p} data"
            )));
        }
        let x_mean = column_means(x);
        let centered = center_columns(x, &x_mean);
        let svd = SVD::new(centered, false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| MlError::evaluation("SVD failed to produce right vectors"))?;
        let components = v_t.rows(0, k).transpose();
        Ok(Self { x_mean, components })
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        center_columns(x, &self.x_mean) * &self.components
    }
}

/// Least-squares multi-output linear regression with intercept.
pub struct MultiOutputRegression {
    /// (features + 1) x outputs, intercept in row 0.
    coefficients: DMatrix<f64>,
}

impl MultiOutputRegression {
    pub fn fit(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<Self, MlError> {
        let design = with_intercept(x);
        let gram = design.transpose() * &design
            + DMatrix::<f64>::identity(design.ncols(), design.ncols()) * 1e-10;
        let rhs = design.transpose() * y;
        let coefficients = gram
            .lu()
            .solve(&rhs)
            .ok_or_else(|| MlError::evaluation("singular design matrix"))?;
        Ok(Self { coefficients })
    }

    pub fn predict(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        with_intercept(x) * &self.coefficients
    }
}

/// Uniform-average R^2 across output columns.
pub fn r2_score(y_true: &DMatrix<f64>, y_pred: &DMatrix<f64>) -> f64 {
    let (n, q) = y_true.shape();
    let mut total = 0.0;
    for j in 0..q {
        let column = y_true.column(j);
        let mean = column.sum() / n as f64;
        let ss_tot: f64 = column.iter().map(|v| (v - mean) * (v - mean)).sum();
        let ss_res: f64 = column
            .iter()
            .zip(y_pred.column(j).iter())
            .map(|(t, p)| (t - p) * (t - p))
            .sum();
        total += 1.0 - ss_res / ss_tot.max(1e-12);
    }
    total / q as f64
}

/// PLS projection quality per component count: fit on the train split,
/// regress components onto targets, score held-out R^2. Returns the scores
/// and the full-data projections per K.
pub fn evaluate_pls_components(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    k_values: &[usize],
) -> Result<(Vec<f64>, Vec<DMatrix<f64>>), MlError> {
    evaluate_components(x, y, k_values, |x_train, y_train, k| {
        let model = PlsModel::fit(x_train, y_train, k)?;
        Ok(Box::new(move |data: &DMatrix<f64>| model.transform(data)))
    })
}

/// PCA analog of [`evaluate_pls_components`].
pub fn evaluate_pca_components(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    k_values: &[usize],
) -> Result<(Vec<f64>, Vec<DMatrix<f64>>), MlError> {
    evaluate_components(x, y, k_values, |x_train, _y_train, k| {
        let model = PcaModel::fit(x_train, k)?;
        Ok(Box::new(move |data: &DMatrix<f64>| model.transform(data)))
    })
}

type Projector = Box<dyn Fn(&DMatrix<f64>) -> DMatrix<f64>>;

fn evaluate_components(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    k_values: &[usize],
    fit: impl Fn(&DMatrix<f64>, &DMatrix<f64>, usize) -> Result<Projector, MlError>,
) -> Result<(Vec<f64>, Vec<DMatrix<f64>>), MlError> {
    if x.nrows() != y.nrows() {
        return Err(MlError::evaluation("X and Y row counts differ"));
    }
    let split = TrainTestSplit::new(x.nrows(), 42);
    let x_train = select_rows(x, &split.train);
    let y_train = select_rows(y, &split.train);
    let x_test = select_rows(x, &split.test);
    let y_test = select_rows(y, &split.test);

    let mut scores = Vec::with_capacity(k_values.len());
    let mut projections = Vec::with_capacity(k_values.len());
    for &k in k_values {
        let project = fit(&x_train, &y_train, k)?;
        let regression = MultiOutputRegression::fit(&project(&x_train), &y_train)?;
        let y_pred = regression.predict(&project(&x_test));
        scores.push(r2_score(&y_test, &y_pred));
        projections.push(project(x));
    }
    Ok((scores, projections))
}

fn column_means(m: &DMatrix<f64>) -> DVector<f64> {
    let n = m.nrows() as f64;
    DVector::from_iterator(m.ncols(), m.column_iter().map(|c| c.sum() / n))
}

fn center_columns(m: &DMatrix<f64>, means: &DVector<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for (j, mean) in means.iter().enumerate() {
        for i in 0..out.nrows() {
            out[(i, j)] -= mean;
        }
    }
    out
}

fn with_intercept(x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut design = DMatrix::<f64>::zeros(x.nrows(), x.ncols() + 1);
    for i in 0..x.nrows() {
        design[(i, 0)] = 1.0;
        for j in 0..x.ncols() {
            design[(i, j + 1)] = x[(i, j)];
        }
    }
    design
}

fn select_rows(m: &DMatrix<f64>, indices: &[usize]) -> DMatrix<f64> {
    let mut out = DMatrix::<f64>::zeros(indices.len(), m.ncols());
    for (row, &i) in indices.iter().enumerate() {
        out.set_row(row, &m.row(i));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn linear_data(n: usize, p: usize, q: usize, seed: u64) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = DMatrix::from_fn(n, p, |_, _| rng.gen_range(-1.0..1.0));
        let b = DMatrix::from_fn(p, q, |i, j| ((i + 1) as f64) * 0.3 - (j as f64) * 0.1);
        let y = &x * &b;
        (x, y)
    }

    #[test]
    fn pca_with_full_rank_explains_linear_targets() {
        let (x, y) = linear_data(200, 5, 2, 1);
        let (scores, projections) = evaluate_pca_components(&x, &y, &[5]).unwrap();
        assert!(scores[0] > 0.99, "got {}", scores[0]);
        assert_eq!(projections[0].shape(), (200, 5));
    }

    #[test]
    fn pls_needs_few_components_for_low_rank_targets() {
        let (x, y) = linear_data(200, 6, 2, 2);
        let (scores, _) = evaluate_pls_components(&x, &y, &[1, 2, 3]).unwrap();
        // Two output dimensions: two PLS components should carry the signal.
        assert!(scores[2] > 0.95, "got {:?}", scores);
        assert!(scores[0] <= scores[2] + 1e-9);
    }

    #[test]
    fn r2_is_one_for_perfect_predictions() {
        let (_, y) = linear_data(50, 3, 2, 3);
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn scores_align_with_requested_component_counts() {
        let (x, y) = linear_data(120, 4, 2, 4);
        let k_values = [1, 2, 4];
        let (scores, projections) = evaluate_pca_components(&x, &y, &k_values).unwrap();
        assert_eq!(scores.len(), 3);
        for (k, proj) in k_values.iter().zip(&projections) {
            assert_eq!(proj.ncols(), *k);
        }
    }

    #[test]
    fn out_of_range_component_count_errors() {
        let (x, y) = linear_data(30, 3, 1, 5);
        assert!(PlsModel::fit(&x, &y, 10).is_err());
        assert!(PcaModel::fit(&x, 0).is_err());
    }
}
