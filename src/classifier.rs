use crate::linalg::round_to;
use crate::scaler::ScaledVector;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// The binary outcome of a screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    Negative,
    Positive,
}

impl Diagnosis {
    /// The numeric label the model was trained on.
    pub fn code(self) -> u8 {
        match self {
            Diagnosis::Negative => 0,
            Diagnosis::Positive => 1,
        }
    }

    /// The externally visible result string.
    pub fn result_text(self) -> &'static str {
        match self {
            Diagnosis::Negative => "No PCOS",
            Diagnosis::Positive => "PCOS Detected",
        }
    }

    fn from_positive(positive: bool) -> Self {
        if positive {
            Diagnosis::Positive
        } else {
            Diagnosis::Negative
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.result_text())
    }
}

/// The output of a single classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: Diagnosis,
    /// `[P(negative), P(positive)]`, when the model produces probabilities.
    pub probabilities: Option<[f64; 2]>,
}

impl Classification {
    /// Probability of the predicted class as a percentage, rounded to two decimals.
    pub fn confidence_percent(&self) -> Option<f64> {
        self.probabilities.map(|probs| {
            let p = probs[usize::from(self.label.code())];
            round_to(p * 100.0, 2)
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Classifier expects {expected} features but received {found}.")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Classifier produced a non-finite decision value.")]
    NonFinite,
}

/// The classification capability.
///
/// `positive_probabilities` is the batch probability function local explainers
/// need. Models that cannot produce probabilities return `Ok(None)`.
pub trait Classify: Send + Sync {
    fn classify(&self, input: &ScaledVector) -> Result<Classification, ClassificationError>;

    fn positive_probabilities(
        &self,
        rows: ArrayView2<f64>,
    ) -> Result<Option<Array1<f64>>, ClassificationError>;

    fn n_features(&self) -> usize;
}

/// A fitted linear classifier, as exported from the training environment.
///
/// ```toml
/// kind = "logistic"
/// intercept = -0.42
/// coefficients = [0.1, -0.3]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    /// Logistic regression: `p = sigmoid(intercept + x . coefficients)`.
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    /// Linear support vector machine without probability calibration.
    LinearSvm {
        intercept: f64,
        coefficients: Vec<f64>,
    },
}

fn default_threshold() -> f64 {
    0.5
}

impl Classifier {
    fn weights(&self) -> (f64, &[f64]) {
        match self {
            Classifier::Logistic {
                intercept,
                coefficients,
                ..
            }
            | Classifier::LinearSvm {
                intercept,
                coefficients,
            } => (*intercept, coefficients.as_slice()),
        }
    }

    fn decision(&self, row: ArrayView1<f64>) -> Result<f64, ClassificationError> {
        let (intercept, coefficients) = self.weights();
        if row.len() != coefficients.len() {
            return Err(ClassificationError::ShapeMismatch {
                expected: coefficients.len(),
                found: row.len(),
            });
        }
        let eta = intercept + row.dot(&ArrayView1::from(coefficients));
        if eta.is_finite() {
            Ok(eta)
        } else {
            Err(ClassificationError::NonFinite)
        }
    }
}

/// Inverse logit, with the linear predictor and the result clamped away from the
/// extremes so downstream log-odds and ratios stay finite.
fn sigmoid(eta: f64) -> f64 {
    let eta = eta.clamp(-700.0, 700.0);
    let p = 1.0 / (1.0 + f64::exp(-eta));
    p.clamp(1e-8, 1.0 - 1e-8)
}

impl Classify for Classifier {
    fn classify(&self, input: &ScaledVector) -> Result<Classification, ClassificationError> {
        let eta = self.decision(input.0.view())?;
        let classification = match self {
            Classifier::Logistic { threshold, .. } => {
                let p = sigmoid(eta);
                Classification {
                    label: Diagnosis::from_positive(p > *threshold),
                    probabilities: Some([1.0 - p, p]),
                }
            }
            Classifier::LinearSvm { .. } => Classification {
                label: Diagnosis::from_positive(eta > 0.0),
                probabilities: None,
            },
        };
        Ok(classification)
    }

    fn positive_probabilities(
        &self,
        rows: ArrayView2<f64>,
    ) -> Result<Option<Array1<f64>>, ClassificationError> {
        match self {
            Classifier::Logistic { .. } => {
                let probs = rows
                    .rows()
                    .into_iter()
                    .map(|row| self.decision(row).map(sigmoid))
                    .collect::<Result<Vec<f64>, _>>()?;
                Ok(Some(Array1::from_vec(probs)))
            }
            Classifier::LinearSvm { .. } => Ok(None),
        }
    }

    fn n_features(&self) -> usize {
        self.weights().1.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn logistic() -> Classifier {
        Classifier::Logistic {
            intercept: -1.0,
            coefficients: vec![2.0, -0.5],
            threshold: 0.5,
        }
    }

    #[test]
    fn logistic_labels_and_confidence() {
        let model = logistic();

        let positive = model.classify(&ScaledVector(array![1.5, 0.0])).unwrap();
        assert_eq!(positive.label, Diagnosis::Positive);
        let probs = positive.probabilities.unwrap();
        assert_abs_diff_eq!(probs[0] + probs[1], 1.0, epsilon = 1e-12);
        // eta = 2.0, p = 0.880797...
        assert_eq!(positive.confidence_percent(), Some(88.08));

        let negative = model.classify(&ScaledVector(array![0.0, 2.0])).unwrap();
        assert_eq!(negative.label, Diagnosis::Negative);
        // eta = -2.0, so the negative class carries the same mass.
        assert_eq!(negative.confidence_percent(), Some(88.08));
    }

    #[test]
    fn boundary_goes_to_negative_class() {
        let model = Classifier::Logistic {
            intercept: 0.0,
            coefficients: vec![1.0],
            threshold: 0.5,
        };
        let out = model.classify(&ScaledVector(array![0.0])).unwrap();
        assert_eq!(out.label, Diagnosis::Negative);
        assert_eq!(out.confidence_percent(), Some(50.0));
    }

    #[test]
    fn svm_has_no_probabilities() {
        let model = Classifier::LinearSvm {
            intercept: 0.25,
            coefficients: vec![1.0],
        };
        let out = model.classify(&ScaledVector(array![0.0])).unwrap();
        assert_eq!(out.label, Diagnosis::Positive);
        assert_eq!(out.confidence_percent(), None);
        assert_eq!(model.positive_probabilities(array![[0.0]].view()).unwrap(), None);
    }

    #[test]
    fn batch_probabilities_match_single_calls() {
        let model = logistic();
        let rows = array![[1.5, 0.0], [0.0, 2.0], [0.3, 0.3]];
        let batch = model.positive_probabilities(rows.view()).unwrap().unwrap();
        for (row, p) in rows.rows().into_iter().zip(batch.iter()) {
            let single = model.classify(&ScaledVector(row.to_owned())).unwrap();
            assert_abs_diff_eq!(single.probabilities.unwrap()[1], *p, epsilon = 1e-15);
        }
    }

    #[test]
    fn rejects_wrong_width() {
        let err = logistic().classify(&ScaledVector(array![1.0])).unwrap_err();
        assert_eq!(
            err,
            ClassificationError::ShapeMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn threshold_defaults_when_absent() {
        let model: Classifier = toml::from_str(
            r#"
            kind = "logistic"
            intercept = 0.0
            coefficients = [1.0, 1.0]
            "#,
        )
        .unwrap();
        assert!(matches!(model, Classifier::Logistic { threshold, .. } if threshold == 0.5));
        assert_eq!(model.n_features(), 2);
    }

    #[test]
    fn result_vocabulary() {
        assert_eq!(Diagnosis::Positive.result_text(), "PCOS Detected");
        assert_eq!(Diagnosis::Negative.result_text(), "No PCOS");
        assert_eq!(Diagnosis::Positive.code(), 1);
        assert_eq!(Diagnosis::Negative.code(), 0);
    }
}
