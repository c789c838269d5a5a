use crate::features::FeatureVector;
use ndarray::{Array1, ArrayView1, Zip};
use serde::Deserialize;
use thiserror::Error;

/// A feature vector after the fitted normalization transform.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledVector(pub Array1<f64>);

impl ScaledVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalingError {
    #[error("Scaler was fit on {expected} features but received {found}.")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Scaling produced a non-finite value for feature index {0}.")]
    NonFinite(usize),
}

/// The scaling capability. Implementations must be safe to call concurrently.
pub trait Scale: Send + Sync {
    fn transform(&self, input: &FeatureVector) -> Result<ScaledVector, ScalingError>;

    /// Number of features the transform was fit on.
    fn n_features(&self) -> usize;
}

/// A fitted scaler, as exported from the training environment.
///
/// Stored with a `kind` tag so the TOML file reads naturally:
///
/// ```toml
/// kind = "standard"
/// mean = [29.1, 59.6]
/// scale = [5.4, 11.0]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// `z = (x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `z = x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl Scaler {
    /// Checks internal consistency of the fitted parameters.
    pub fn validate(&self) -> Result<(), ScalingError> {
        let (a, b) = self.parameters();
        if a.len() != b.len() {
            return Err(ScalingError::ShapeMismatch {
                expected: a.len(),
                found: b.len(),
            });
        }
        if let Some(idx) = a.iter().chain(b.iter()).position(|v| !v.is_finite()) {
            return Err(ScalingError::NonFinite(idx % a.len().max(1)));
        }
        Ok(())
    }

    fn parameters(&self) -> (&[f64], &[f64]) {
        match self {
            Scaler::Standard { mean, scale } => (mean, scale),
            Scaler::MinMax { min, scale } => (min, scale),
        }
    }
}

impl Scale for Scaler {
    fn transform(&self, input: &FeatureVector) -> Result<ScaledVector, ScalingError> {
        self.validate()?;
        let expected = self.n_features();
        if input.len() != expected {
            return Err(ScalingError::ShapeMismatch {
                expected,
                found: input.len(),
            });
        }

        let mut out = Array1::zeros(expected);
        match self {
            Scaler::Standard { mean, scale } => {
                Zip::from(&mut out)
                    .and(&input.0)
                    .and(ArrayView1::from(mean.as_slice()))
                    .and(ArrayView1::from(scale.as_slice()))
                    .for_each(|o, &x, &m, &s| {
                        // A zero-variance column is left centred but unscaled.
                        let s = if s == 0.0 { 1.0 } else { s };
                        *o = (x - m) / s;
                    });
            }
            Scaler::MinMax { min, scale } => {
                Zip::from(&mut out)
                    .and(&input.0)
                    .and(ArrayView1::from(min.as_slice()))
                    .and(ArrayView1::from(scale.as_slice()))
                    .for_each(|o, &x, &m, &s| *o = x * s + m);
            }
        }

        if let Some(idx) = out.iter().position(|v| !v.is_finite()) {
            return Err(ScalingError::NonFinite(idx));
        }
        Ok(ScaledVector(out))
    }

    fn n_features(&self) -> usize {
        self.parameters().0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standard_scaler_centres_and_scales() {
        let scaler = Scaler::Standard {
            mean: vec![10.0, 0.0, 5.0],
            scale: vec![2.0, 1.0, 0.0],
        };
        let out = scaler
            .transform(&FeatureVector(array![14.0, -1.5, 7.0]))
            .unwrap();
        assert_abs_diff_eq!(out.0[0], 2.0);
        assert_abs_diff_eq!(out.0[1], -1.5);
        assert_abs_diff_eq!(out.0[2], 2.0);
    }

    #[test]
    fn min_max_scaler_maps_into_range() {
        let scaler = Scaler::MinMax {
            min: vec![-0.5],
            scale: vec![0.05],
        };
        let out = scaler.transform(&FeatureVector(array![20.0])).unwrap();
        assert_abs_diff_eq!(out.0[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let scaler = Scaler::Standard {
            mean: vec![0.0, 0.0],
            scale: vec![1.0, 1.0],
        };
        assert_eq!(
            scaler.transform(&FeatureVector(array![1.0])).unwrap_err(),
            ScalingError::ShapeMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn parses_tagged_toml() {
        let scaler: Scaler = toml::from_str(
            r#"
            kind = "standard"
            mean = [1.0, 2.0]
            scale = [3.0, 4.0]
            "#,
        )
        .unwrap();
        assert_eq!(scaler.n_features(), 2);
        assert!(scaler.validate().is_ok());

        let broken = Scaler::MinMax {
            min: vec![0.0, 0.0],
            scale: vec![1.0],
        };
        assert!(broken.validate().is_err());
    }
}
