//! The request-boundary error taxonomy.
//!
//! Each adapter owns its own error type; this module groups them into the
//! categories the HTTP boundary distinguishes. Nothing is retried and nothing is
//! swallowed: every variant ends up in a response.

use crate::classifier::ClassificationError;
use crate::explain::ExplanationError;
use crate::features::FeatureMappingError;
use crate::record::ValidationError;
use crate::scaler::ScalingError;
use thiserror::Error;

pub use crate::artifacts::ArtifactError;
pub use crate::config::ConfigError;

/// A failure inside the scaling or classification path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error("scaling failed: {0}")]
    Scaling(#[from] ScalingError),
    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),
}

/// Everything a single request can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    FeatureMapping(#[from] FeatureMappingError),
    #[error("Prediction failed: {0}")]
    Prediction(#[from] PredictionError),
    #[error("LIME explainability failed: {0}")]
    Explanation(#[from] ExplanationError),
    /// The worker running an explanation went away before producing a result.
    #[error("LIME explainability failed: worker did not complete ({0})")]
    Worker(String),
}

impl ApiError {
    /// The HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) | ApiError::FeatureMapping(_) => 422,
            ApiError::Prediction(_) | ApiError::Explanation(_) | ApiError::Worker(_) => 500,
        }
    }

    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let missing: ApiError = ValidationError::MissingField("Age_yrs").into();
        assert_eq!(missing.status_code(), 422);
        assert_eq!(missing.to_string(), "Missing feature: 'Age_yrs'");
        assert!(missing.is_client_error());

        let unmapped: ApiError = FeatureMappingError::Unmapped("BMI".into()).into();
        assert_eq!(unmapped.status_code(), 422);

        let scaling: ApiError =
            PredictionError::from(ScalingError::ShapeMismatch { expected: 2, found: 1 }).into();
        assert_eq!(scaling.status_code(), 500);
        assert!(scaling.to_string().starts_with("Prediction failed: scaling failed"));

        let explain: ApiError = ExplanationError::NoProbabilities.into();
        assert_eq!(explain.status_code(), 500);
        assert!(explain.to_string().starts_with("LIME explainability failed"));
    }
}
