//! # Startup Artifacts
//!
//! Loading of the externally produced artifacts: the fitted classifier, the fitted
//! scaler, the ordered feature list and the reference sample used by the
//! explainer. Every failure here is fatal for the process; nothing in this module
//! runs once the service has started answering requests.
//!
//! Formats:
//! - classifier and scaler: TOML with a `kind` tag (see `classifier` and `scaler`).
//! - feature list: TOML, `selected_features = ["Age (yrs)", ...]`.
//! - reference sample: CSV with a header naming the features, rows already in
//!   the scaled space the classifier consumes.

use crate::classifier::{Classifier, Classify};
use crate::explain::ExplanationError;
use crate::features::FeatureMappingError;
use crate::scaler::{Scale, Scaler, ScalingError};
use ndarray::Array2;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read artifact '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML artifact '{}': {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to read CSV artifact '{}': {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error(
        "Reference sample '{}' has header {found:?}, but the selected features are {expected:?}.",
        path.display()
    )]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Reference sample '{}' row {row}, column '{column}' is not a finite number.", path.display())]
    NonNumeric {
        path: PathBuf,
        row: usize,
        column: String,
    },
    #[error("The {artifact} expects {found} features, but the feature list has {expected}.")]
    WidthMismatch {
        artifact: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The fitted scaler is inconsistent: {0}")]
    Scaler(#[from] ScalingError),
    #[error("The feature list does not match the clinical schema: {0}")]
    FeatureMapping(#[from] FeatureMappingError),
    #[error("The explainer could not be built from the reference sample: {0}")]
    Explainer(#[from] ExplanationError),
}

/// The ordered list of feature names the model was fit on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeatureList {
    pub selected_features: Vec<String>,
}

fn read(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ArtifactError> {
    let text = read(path)?;
    toml::from_str(&text).map_err(|source| ArtifactError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_feature_list(path: &Path) -> Result<FeatureList, ArtifactError> {
    let list: FeatureList = parse_toml(path)?;
    log::info!(
        "Loaded {} selected features from {}",
        list.selected_features.len(),
        path.display()
    );
    Ok(list)
}

pub fn load_scaler(path: &Path, n_features: usize) -> Result<Scaler, ArtifactError> {
    let scaler: Scaler = parse_toml(path)?;
    scaler.validate()?;
    if scaler.n_features() != n_features {
        return Err(ArtifactError::WidthMismatch {
            artifact: "scaler",
            expected: n_features,
            found: scaler.n_features(),
        });
    }
    log::info!("Loaded scaler from {}", path.display());
    Ok(scaler)
}

pub fn load_classifier(path: &Path, n_features: usize) -> Result<Classifier, ArtifactError> {
    let classifier: Classifier = parse_toml(path)?;
    if classifier.n_features() != n_features {
        return Err(ArtifactError::WidthMismatch {
            artifact: "classifier",
            expected: n_features,
            found: classifier.n_features(),
        });
    }
    log::info!("Loaded classifier from {}", path.display());
    Ok(classifier)
}

/// Reads the reference sample. The header must list exactly `feature_names`,
/// in the same order.
pub fn load_reference(path: &Path, feature_names: &[String]) -> Result<Array2<f64>, ArtifactError> {
    let csv_error = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::None)
        .from_path(path)
        .map_err(csv_error)?;

    let header: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if header != feature_names {
        return Err(ArtifactError::HeaderMismatch {
            path: path.to_path_buf(),
            expected: feature_names.to_vec(),
            found: header,
        });
    }

    let width = feature_names.len();
    let mut values = Vec::new();
    let mut rows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        for (col, cell) in record.iter().enumerate() {
            let parsed = cell.trim().parse::<f64>().ok().filter(|v| v.is_finite());
            match parsed {
                Some(v) => values.push(v),
                None => {
                    return Err(ArtifactError::NonNumeric {
                        path: path.to_path_buf(),
                        row: row + 1,
                        column: feature_names[col].clone(),
                    });
                }
            }
        }
        rows += 1;
    }

    let matrix = Array2::from_shape_vec((rows, width), values).map_err(|_| {
        ArtifactError::WidthMismatch {
            artifact: "reference sample",
            expected: width,
            found: 0,
        }
    })?;
    log::info!(
        "Loaded reference sample with {} rows from {}",
        matrix.nrows(),
        path.display()
    );
    Ok(matrix)
}
