//! Maps a validated [`ClinicalRecord`] onto the ordered feature vector the
//! trained artifacts expect.
//!
//! The order is dictated by the externally supplied `selected_features` list and
//! is the implicit contract between this service and the scaler, the classifier
//! and the explainer's reference sample. Nothing downstream can detect a wrong
//! order, so the list is resolved against the static field table once, at startup.

use crate::record::{ClinicalField, ClinicalRecord};
use ndarray::Array1;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureMappingError {
    #[error("Missing feature: '{0}'")]
    Unmapped(String),
    #[error("Feature '{0}' appears more than once in the selected feature list")]
    Duplicate(String),
    #[error("The selected feature list is empty")]
    Empty,
}

/// A slot in the model's input layout.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Field(ClinicalField),
    /// A name the artifact expects but no clinical field provides. Only kept
    /// when the mapper was built in lenient mode.
    Unmapped(String),
}

/// The ordered numeric input for the scaler, still in clinical units.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(pub Array1<f64>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Resolves the selected feature list against [`ClinicalField`] and reorders
/// records accordingly.
#[derive(Debug, Clone)]
pub struct FeatureMapper {
    slots: Vec<Slot>,
    names: Vec<String>,
}

impl FeatureMapper {
    /// Builds a mapper for `selected_features`.
    ///
    /// With `strict` set, every name must resolve to a clinical field and the
    /// first unknown name is returned as an error. Without it, unknown names are
    /// retained and reported per request by [`FeatureMapper::map`].
    pub fn new(selected_features: &[String], strict: bool) -> Result<Self, FeatureMappingError> {
        if selected_features.is_empty() {
            return Err(FeatureMappingError::Empty);
        }

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(selected_features.len());
        for name in selected_features {
            if !seen.insert(name.as_str()) {
                return Err(FeatureMappingError::Duplicate(name.clone()));
            }
            match ClinicalField::from_feature_name(name) {
                Some(field) => slots.push(Slot::Field(field)),
                None if strict => return Err(FeatureMappingError::Unmapped(name.clone())),
                None => {
                    log::warn!(
                        "Selected feature '{name}' has no clinical field; requests will fail until the artifacts agree."
                    );
                    slots.push(Slot::Unmapped(name.clone()));
                }
            }
        }

        Ok(Self {
            slots,
            names: selected_features.to_vec(),
        })
    }

    /// Produces the feature vector for `record`, ordered by the selected feature list.
    pub fn map(&self, record: &ClinicalRecord) -> Result<FeatureVector, FeatureMappingError> {
        let values = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Field(field) => Ok(record.value(*field)),
                Slot::Unmapped(name) => Err(FeatureMappingError::Unmapped(name.clone())),
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(FeatureVector(Array1::from_vec(values)))
    }

    /// Feature names in model order.
    pub fn feature_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
