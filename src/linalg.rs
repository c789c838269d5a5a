//! Small dense numerics for the local surrogate fits.
//!
//! The systems solved here are at most as wide as the feature list; the ridge
//! normal equations are factorized with faer's Cholesky.

use faer::linalg::solvers::Solve;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Cholesky factorization of the normal equations failed: {0}")]
    Factorization(String),
    #[error("Design matrix has {rows} rows but {found} targets or weights were supplied.")]
    DimensionMismatch { rows: usize, found: usize },
    #[error("Sample weights sum to zero.")]
    ZeroWeight,
}

/// Rounds `value` to `decimals` decimal places, half away from zero.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Percentile with linear interpolation between closest ranks.
/// `sorted` must be ascending and non-empty; `q` is in `[0, 100]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Solves `A x = b` for symmetric positive definite `A` through a Cholesky
/// factorization.
fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    let n = a.nrows();
    let lhs = Mat::from_fn(n, n, |i, j| a[(i, j)]);
    let rhs = Mat::from_fn(n, 1, |i, _| b[i]);
    let factor = lhs
        .as_ref()
        .llt(Side::Lower)
        .map_err(|e| LinalgError::Factorization(format!("{e:?}")))?;
    let solution = factor.solve(rhs.as_ref());
    Ok(Array1::from_shape_fn(n, |i| solution[(i, 0)]))
}

/// A fitted weighted ridge regression with an unpenalized intercept.
#[derive(Debug, Clone)]
pub struct RidgeFit {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl RidgeFit {
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }

    /// Weighted coefficient of determination on `(x, y)`.
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, weights: ArrayView1<f64>) -> f64 {
        let predicted = self.predict(x);
        let total_weight = weights.sum();
        let y_mean = (&y * &weights).sum() / total_weight;

        let residual: f64 = (&y - &predicted).mapv(|r| r * r).dot(&weights);
        let total: f64 = y.mapv(|v| (v - y_mean) * (v - y_mean)).dot(&weights);
        if total == 0.0 {
            // A constant target is perfectly explained by the intercept.
            return if residual == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - residual / total
    }
}

/// Fits `y ~ intercept + x b` minimizing `sum w (y - yhat)^2 + alpha |b|^2`.
///
/// The intercept is handled by centring on the weighted means, which leaves it
/// out of the penalty.
pub fn weighted_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    alpha: f64,
) -> Result<RidgeFit, LinalgError> {
    let rows = x.nrows();
    if y.len() != rows || weights.len() != rows {
        return Err(LinalgError::DimensionMismatch {
            rows,
            found: y.len().min(weights.len()),
        });
    }
    let total_weight = weights.sum();
    if total_weight <= 0.0 {
        return Err(LinalgError::ZeroWeight);
    }

    let w_col = weights.insert_axis(Axis(1));
    let x_mean = (&x * &w_col).sum_axis(Axis(0)) / total_weight;
    let y_mean = (&y * &weights).sum() / total_weight;

    let x_centered = &x - &x_mean;
    let y_centered = &y - y_mean;

    let weighted_x = &x_centered * &w_col;
    let mut gram = weighted_x.t().dot(&x_centered);
    for j in 0..gram.nrows() {
        gram[[j, j]] += alpha;
    }
    let rhs = weighted_x.t().dot(&y_centered);

    let coefficients = solve_spd(&gram, &rhs)?;
    let intercept = y_mean - x_mean.dot(&coefficients);

    Ok(RidgeFit {
        intercept,
        coefficients,
    })
}
