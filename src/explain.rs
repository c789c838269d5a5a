//! # Local Explanations
//!
//! Per-instance feature attributions using a LIME-style local surrogate on
//! quartile-discretized features:
//!
//! 1. At startup, each feature of the reference sample (the training distribution,
//!    already in scaled space) is split at its quartiles. For every resulting bin
//!    the mean, standard deviation, bounds and relative frequency are recorded.
//! 2. Per request, a neighbourhood is sampled. Each feature independently draws a
//!    bin by reference frequency and a value from a normal truncated to that bin.
//!    The interpretable representation is binary: 1 where the drawn bin equals the
//!    instance's own bin. Row 0 is always the instance itself.
//! 3. The classifier scores every neighbour. Neighbours are weighted by an
//!    exponential kernel on their distance to the instance in the binary space,
//!    each feature standardised by the spread of its reference bin indices.
//! 4. Features are selected (forward selection for small `top_k`, otherwise the
//!    largest weights of a full fit) and a weighted ridge surrogate is fit on them.
//!    Its coefficients are the contributions, labelled with the instance's bin
//!    description, e.g. `AMH(ng/mL) > 0.61`.
//!
//! The random generator is re-seeded on every call, so an explanation is a
//! deterministic function of the instance.

use crate::classifier::{ClassificationError, Classify};
use crate::linalg::{LinalgError, percentile, round_to, weighted_ridge};
use crate::scaler::{ScaledVector, ScalingError};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::Serialize;
use thiserror::Error;

/// Feature selection switches from greedy forward selection to highest weights
/// above this many requested features.
const FORWARD_SELECTION_LIMIT: usize = 6;

/// Ridge penalty used while choosing features.
const SELECTION_ALPHA: f64 = 0.01;

/// Ridge penalty of the final surrogate.
const SURROGATE_ALPHA: f64 = 1.0;

/// Added to every bin's standard deviation so single-valued bins stay samplable.
const STD_FLOOR: f64 = 1e-11;

/// Rejection draws before a truncated normal falls back to a uniform draw.
const MAX_REJECTION_DRAWS: usize = 64;

/// One ranked entry of an explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub feature: String,
    pub contribution: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExplanationError {
    #[error("The classifier does not provide class probabilities.")]
    NoProbabilities,
    #[error("The reference sample is empty.")]
    EmptyReference,
    #[error("Expected {expected} features but received {found}.")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("The reference sample contains a non-finite value in column '{0}'.")]
    NonFiniteReference(String),
    #[error("Scaling the instance failed: {0}")]
    Scaling(#[from] ScalingError),
    #[error("Scoring the neighbourhood failed: {0}")]
    Classifier(#[from] ClassificationError),
    #[error("Fitting the local surrogate failed: {0}")]
    Surrogate(#[from] LinalgError),
    #[error("The surrogate produced a non-finite weight for '{0}'.")]
    NonFinite(String),
}

/// The local explanation capability.
pub trait Explain: Send + Sync {
    fn explain(
        &self,
        instance: &ScaledVector,
        classifier: &dyn Classify,
        top_k: usize,
    ) -> Result<Vec<Contribution>, ExplanationError>;
}

/// Sampling parameters for [`LimeExplainer`].
#[derive(Debug, Clone, PartialEq)]
pub struct LimeSettings {
    /// Neighbourhood size, including the instance itself.
    pub num_samples: usize,
    /// Kernel width as a multiple of `sqrt(n_features)`.
    pub kernel_width_factor: f64,
    pub seed: u64,
}

impl Default for LimeSettings {
    fn default() -> Self {
        Self {
            num_samples: 5000,
            kernel_width_factor: 0.75,
            seed: 42,
        }
    }
}

/// Quartile bins of a single feature, learned from the reference sample.
#[derive(Debug, Clone)]
struct FeatureBins {
    /// Ascending, de-duplicated quartile boundaries.
    thresholds: Vec<f64>,
    /// Human-readable description of each bin.
    labels: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    lows: Vec<f64>,
    highs: Vec<f64>,
    frequencies: WeightedIndex<f64>,
    /// Standard deviation of the reference sample's bin indices, used to
    /// standardise distances. A constant column has spread 1.
    spread: f64,
}

impl FeatureBins {
    fn fit(name: &str, column: ArrayView1<f64>) -> Result<Self, ExplanationError> {
        if column.is_empty() {
            return Err(ExplanationError::EmptyReference);
        }
        let sorted: Vec<f64> = column.iter().copied().sorted_by(f64::total_cmp).collect();
        let mut thresholds: Vec<f64> = [25.0, 50.0, 75.0]
            .iter()
            .map(|&q| percentile(&sorted, q))
            .collect();
        thresholds.dedup();

        let n_bins = thresholds.len() + 1;
        let mut labels = Vec::with_capacity(n_bins);
        labels.push(format!("{name} <= {:.2}", thresholds[0]));
        for (lo, hi) in thresholds.iter().tuple_windows() {
            labels.push(format!("{lo:.2} < {name} <= {hi:.2}"));
        }
        labels.push(format!("{name} > {:.2}", thresholds[thresholds.len() - 1]));

        let mut members: Vec<Vec<f64>> = vec![Vec::new(); n_bins];
        for &value in column {
            members[bin_of(&thresholds, value)].push(value);
        }

        let n = column.len() as f64;
        let index_mean = members
            .iter()
            .enumerate()
            .map(|(bin, m)| bin as f64 * m.len() as f64)
            .sum::<f64>()
            / n;
        let index_var = members
            .iter()
            .enumerate()
            .map(|(bin, m)| (bin as f64 - index_mean).powi(2) * m.len() as f64)
            .sum::<f64>()
            / n;
        let spread = if index_var > 0.0 { index_var.sqrt() } else { 1.0 };

        let means: Vec<f64> = members
            .iter()
            .map(|m| if m.is_empty() { 0.0 } else { m.iter().sum::<f64>() / m.len() as f64 })
            .collect();
        let stds: Vec<f64> = members
            .iter()
            .zip(&means)
            .map(|(m, &mean)| {
                let var = if m.is_empty() {
                    0.0
                } else {
                    m.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / m.len() as f64
                };
                var.sqrt() + STD_FLOOR
            })
            .collect();

        let mut lows = vec![sorted[0]];
        lows.extend_from_slice(&thresholds);
        let mut highs = thresholds.clone();
        highs.push(sorted[sorted.len() - 1]);

        let counts: Vec<f64> = members.iter().map(|m| m.len() as f64).collect();
        let frequencies =
            WeightedIndex::new(&counts).map_err(|_| ExplanationError::EmptyReference)?;

        Ok(Self {
            thresholds,
            labels,
            means,
            stds,
            lows,
            highs,
            frequencies,
            spread,
        })
    }

    fn bin(&self, value: f64) -> usize {
        bin_of(&self.thresholds, value)
    }

    /// Draws a value inside `bin` from the bin's truncated normal.
    fn sample_value<R: Rng>(&self, bin: usize, rng: &mut R) -> f64 {
        let (lo, hi) = (self.lows[bin], self.highs[bin]);
        if hi <= lo {
            return lo;
        }
        if let Ok(normal) = Normal::new(self.means[bin], self.stds[bin]) {
            for _ in 0..MAX_REJECTION_DRAWS {
                let candidate = normal.sample(rng);
                if (lo..=hi).contains(&candidate) {
                    return candidate;
                }
            }
        }
        rng.gen_range(lo..=hi)
    }
}

/// Index of the bin containing `value`: the number of thresholds strictly below it.
fn bin_of(thresholds: &[f64], value: f64) -> usize {
    thresholds.partition_point(|&t| t < value)
}

/// A LIME-style tabular explainer over a fixed reference sample.
#[derive(Debug, Clone)]
pub struct LimeExplainer {
    feature_names: Vec<String>,
    bins: Vec<FeatureBins>,
    settings: LimeSettings,
}

impl LimeExplainer {
    /// Learns the per-feature bins from `reference` (rows are samples, columns
    /// follow `feature_names`).
    pub fn new(
        reference: &Array2<f64>,
        feature_names: Vec<String>,
        settings: LimeSettings,
    ) -> Result<Self, ExplanationError> {
        if reference.nrows() == 0 {
            return Err(ExplanationError::EmptyReference);
        }
        if reference.ncols() != feature_names.len() {
            return Err(ExplanationError::ShapeMismatch {
                expected: feature_names.len(),
                found: reference.ncols(),
            });
        }

        let mut bins = Vec::with_capacity(feature_names.len());
        for (name, column) in feature_names.iter().zip(reference.axis_iter(Axis(1))) {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(ExplanationError::NonFiniteReference(name.clone()));
            }
            bins.push(FeatureBins::fit(name, column)?);
        }

        log::debug!(
            "Explainer ready: {} reference rows, {} features, {} neighbours per explanation",
            reference.nrows(),
            feature_names.len(),
            settings.num_samples
        );

        Ok(Self {
            feature_names,
            bins,
            settings,
        })
    }

    /// Samples the neighbourhood around `instance`.
    ///
    /// Returns the binary interpretable rows and the matching rows in model space.
    fn neighbourhood(&self, instance: &ScaledVector) -> (Array2<f64>, Array2<f64>) {
        let n = self.settings.num_samples.max(1);
        let d = self.bins.len();
        let mut rng = StdRng::seed_from_u64(self.settings.seed);

        let mut binary = Array2::<f64>::ones((n, d));
        let mut inverse = Array2::<f64>::zeros((n, d));
        inverse.row_mut(0).assign(&instance.0);

        for (j, feature) in self.bins.iter().enumerate() {
            let own_bin = feature.bin(instance.0[j]);
            for i in 1..n {
                let drawn = feature.frequencies.sample(&mut rng);
                binary[[i, j]] = if drawn == own_bin { 1.0 } else { 0.0 };
                inverse[[i, j]] = feature.sample_value(drawn, &mut rng);
            }
        }

        (binary, inverse)
    }

    /// Exponential kernel on the distance to row 0, with every feature's
    /// difference standardised by the spread of its reference bin indices.
    fn kernel_weights(&self, binary: &Array2<f64>) -> Array1<f64> {
        let width = self.settings.kernel_width_factor * (self.bins.len() as f64).sqrt();
        let spreads: Array1<f64> = self.bins.iter().map(|b| b.spread).collect();
        let origin = binary.row(0);
        binary
            .rows()
            .into_iter()
            .map(|row| {
                let squared: f64 = ((&row - &origin) / &spreads).mapv(|v| v * v).sum();
                (-squared / (width * width)).exp().sqrt()
            })
            .collect()
    }

    /// Greedy forward selection by weighted R^2.
    fn forward_selection(
        data: &Array2<f64>,
        target: &Array1<f64>,
        weights: &Array1<f64>,
        k: usize,
    ) -> Result<Vec<usize>, ExplanationError> {
        let mut used: Vec<usize> = Vec::with_capacity(k);
        for _ in 0..k {
            let mut best: Option<(usize, f64)> = None;
            for candidate in (0..data.ncols()).filter(|c| !used.contains(c)) {
                let mut columns = used.clone();
                columns.push(candidate);
                let subset = data.select(Axis(1), &columns);
                let fit = weighted_ridge(subset.view(), target.view(), weights.view(), SELECTION_ALPHA)?;
                let score = fit.score(subset.view(), target.view(), weights.view());
                if best.is_none_or(|(_, top)| score > top) {
                    best = Some((candidate, score));
                }
            }
            match best {
                Some((feature, _)) => used.push(feature),
                None => break,
            }
        }
        Ok(used)
    }

    /// The `k` features with the largest absolute weight in a full fit.
    fn highest_weights(
        data: &Array2<f64>,
        target: &Array1<f64>,
        weights: &Array1<f64>,
        k: usize,
    ) -> Result<Vec<usize>, ExplanationError> {
        let fit = weighted_ridge(data.view(), target.view(), weights.view(), SELECTION_ALPHA)?;
        Ok(fit
            .coefficients
            .iter()
            .enumerate()
            .sorted_by(|a, b| b.1.abs().total_cmp(&a.1.abs()))
            .take(k)
            .map(|(idx, _)| idx)
            .collect())
    }
}

impl Explain for LimeExplainer {
    fn explain(
        &self,
        instance: &ScaledVector,
        classifier: &dyn Classify,
        top_k: usize,
    ) -> Result<Vec<Contribution>, ExplanationError> {
        let d = self.bins.len();
        if instance.len() != d {
            return Err(ExplanationError::ShapeMismatch {
                expected: d,
                found: instance.len(),
            });
        }
        let k = top_k.min(d);
        if k == 0 {
            return Ok(Vec::new());
        }

        let (binary, inverse) = self.neighbourhood(instance);
        let target = classifier
            .positive_probabilities(inverse.view())?
            .ok_or(ExplanationError::NoProbabilities)?;
        let weights = self.kernel_weights(&binary);

        let selected = if k <= FORWARD_SELECTION_LIMIT {
            Self::forward_selection(&binary, &target, &weights, k)?
        } else {
            Self::highest_weights(&binary, &target, &weights, k)?
        };

        let subset = binary.select(Axis(1), &selected);
        let surrogate = weighted_ridge(subset.view(), target.view(), weights.view(), SURROGATE_ALPHA)?;
        log::debug!(
            "Local surrogate intercept {:.4}, weighted R^2 {:.4}",
            surrogate.intercept,
            surrogate.score(subset.view(), target.view(), weights.view())
        );

        let mut ranked = Vec::with_capacity(k);
        for (&feature, &weight) in selected.iter().zip(surrogate.coefficients.iter()) {
            let bins = &self.bins[feature];
            let label = &bins.labels[bins.bin(instance.0[feature])];
            if !weight.is_finite() {
                return Err(ExplanationError::NonFinite(self.feature_names[feature].clone()));
            }
            ranked.push((label.clone(), weight));
        }
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

        Ok(ranked
            .into_iter()
            .map(|(feature, weight)| Contribution {
                feature,
                contribution: round_to(weight, 4),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand_distr::StandardNormal;

    fn reference(rows: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, d), |_| rng.sample(StandardNormal))
    }

    fn names(d: usize) -> Vec<String> {
        (0..d).map(|i| format!("f{i}")).collect()
    }

    fn settings() -> LimeSettings {
        LimeSettings {
            num_samples: 800,
            ..LimeSettings::default()
        }
    }

    #[test]
    fn bin_labels_follow_quartiles() {
        let column = array![1.0, 2.0, 3.0, 4.0];
        let bins = FeatureBins::fit("AMH(ng/mL)", column.view()).unwrap();
        assert_eq!(bins.thresholds, vec![1.75, 2.5, 3.25]);
        assert_eq!(
            bins.labels,
            vec![
                "AMH(ng/mL) <= 1.75",
                "1.75 < AMH(ng/mL) <= 2.50",
                "2.50 < AMH(ng/mL) <= 3.25",
                "AMH(ng/mL) > 3.25",
            ]
        );
        assert_eq!(bins.bin(1.75), 0);
        assert_eq!(bins.bin(1.76), 1);
        assert_eq!(bins.bin(10.0), 3);
    }

    #[test]
    fn kernel_distance_is_standardised_by_bin_spread() {
        let reference = array![[1.0], [2.0], [3.0], [4.0]];
        let explainer = LimeExplainer::new(&reference, names(1), settings()).unwrap();
        // Bin indices 0..=3 have population variance 1.25.
        assert_abs_diff_eq!(explainer.bins[0].spread, 1.25f64.sqrt(), epsilon = 1e-12);

        let weights = explainer.kernel_weights(&array![[1.0], [0.0]]);
        let width: f64 = 0.75;
        let expected = (-(1.0 / 1.25) / (width * width)).exp().sqrt();
        assert_abs_diff_eq!(weights[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(weights[1], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(weights[1], 0.491098, epsilon = 1e-6);
    }

    #[test]
    fn constant_reference_column_has_unit_spread() {
        let column = array![2.0, 2.0, 2.0];
        let bins = FeatureBins::fit("x", column.view()).unwrap();
        assert_eq!(bins.spread, 1.0);
    }

    #[test]
    fn binary_features_collapse_duplicate_quartiles() {
        let column = array![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let bins = FeatureBins::fit("Pimples(Y/N)", column.view()).unwrap();
        assert_eq!(bins.thresholds, vec![0.0, 1.0]);
        assert_eq!(bins.labels.len(), 3);
        assert_eq!(bins.bin(0.0), 0);
        assert_eq!(bins.bin(1.0), 1);
    }

    #[test]
    fn sampled_values_stay_inside_their_bin() {
        let column = Array1::linspace(-3.0, 3.0, 101);
        let bins = FeatureBins::fit("x", column.view()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for bin in 0..bins.labels.len() {
            for _ in 0..200 {
                let v = bins.sample_value(bin, &mut rng);
                assert!(v >= bins.lows[bin] && v <= bins.highs[bin]);
            }
        }
    }

    #[test]
    fn dominant_feature_ranks_first() {
        let d = 4;
        let explainer = LimeExplainer::new(&reference(400, d, 1), names(d), settings()).unwrap();
        let model = Classifier::Logistic {
            intercept: 0.0,
            coefficients: vec![4.0, 0.1, 0.0, -0.2],
            threshold: 0.5,
        };
        let instance = ScaledVector(array![1.5, 0.0, 0.0, 0.0]);
        let explanation = explainer.explain(&instance, &model, 3).unwrap();

        assert_eq!(explanation.len(), 3);
        assert!(explanation[0].feature.starts_with("f0 >"), "{explanation:?}");
        assert!(explanation[0].contribution > 0.0);
        for pair in explanation.windows(2) {
            assert!(pair[0].contribution.abs() >= pair[1].contribution.abs());
        }
    }

    #[test]
    fn explanation_is_deterministic_and_bounded() {
        let d = 8;
        let explainer = LimeExplainer::new(&reference(300, d, 2), names(d), settings()).unwrap();
        let model = Classifier::Logistic {
            intercept: -0.3,
            coefficients: vec![0.5, -1.0, 0.25, 0.0, 2.0, -0.7, 0.1, 0.3],
            threshold: 0.5,
        };
        let instance = ScaledVector(array![0.2, -0.4, 1.1, 0.0, -1.3, 0.8, 0.05, -0.2]);

        // Above the forward-selection limit, highest weights are used.
        let first = explainer.explain(&instance, &model, 7).unwrap();
        let second = explainer.explain(&instance, &model, 7).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
        assert!(first.iter().all(|c| c.contribution.is_finite()));

        let everything = explainer.explain(&instance, &model, 50).unwrap();
        assert_eq!(everything.len(), d);
        assert!(explainer.explain(&instance, &model, 0).unwrap().is_empty());
    }

    #[test]
    fn requires_probabilities() {
        let d = 2;
        let explainer = LimeExplainer::new(&reference(50, d, 3), names(d), settings()).unwrap();
        let model = Classifier::LinearSvm {
            intercept: 0.0,
            coefficients: vec![1.0, 1.0],
        };
        let err = explainer
            .explain(&ScaledVector(array![0.0, 0.0]), &model, 2)
            .unwrap_err();
        assert_eq!(err, ExplanationError::NoProbabilities);
    }

    #[test]
    fn rejects_inconsistent_reference() {
        let err = LimeExplainer::new(&reference(10, 3, 4), names(2), settings()).unwrap_err();
        assert_eq!(err, ExplanationError::ShapeMismatch { expected: 2, found: 3 });

        let empty = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            LimeExplainer::new(&empty, names(2), settings()).unwrap_err(),
            ExplanationError::EmptyReference
        );

        let mut bad = reference(10, 2, 5);
        bad[[3, 1]] = f64::NAN;
        assert_eq!(
            LimeExplainer::new(&bad, names(2), settings()).unwrap_err(),
            ExplanationError::NonFiniteReference("f1".to_string())
        );
    }
}
