//! # The Predictor
//!
//! The immutable, startup-initialized bundle of everything a request needs: the
//! feature mapper, the fitted scaler, the classifier and the explainer. It is
//! built exactly once, before the listener opens, and then shared read-only by
//! every handler behind an `Arc`. Dropping the last `Arc` is the only teardown.
//!
//! A request runs the same short pipeline regardless of endpoint:
//! validated record -> feature vector -> scaled vector -> classifier or explainer.

use crate::artifacts::{self, ArtifactError};
use crate::classifier::Classify;
use crate::config::ServiceConfig;
use crate::error::{ApiError, PredictionError};
use crate::explain::{Contribution, Explain, ExplanationError, LimeExplainer};
use crate::features::FeatureMapper;
use crate::record::ClinicalRecord;
use crate::scaler::{Scale, ScaledVector};
use serde::Serialize;

/// Response body of `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub prediction: u8,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Response body of `POST /explain`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationResult {
    pub explanation: Vec<Contribution>,
}

pub struct Predictor {
    mapper: FeatureMapper,
    scaler: Box<dyn Scale>,
    classifier: Box<dyn Classify>,
    explainer: Box<dyn Explain>,
    top_k: usize,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("features", &self.mapper.feature_names())
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl Predictor {
    pub fn new(
        mapper: FeatureMapper,
        scaler: Box<dyn Scale>,
        classifier: Box<dyn Classify>,
        explainer: Box<dyn Explain>,
        top_k: usize,
    ) -> Self {
        Self {
            mapper,
            scaler,
            classifier,
            explainer,
            top_k,
        }
    }

    /// Loads and cross-checks every artifact named in `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ArtifactError> {
        let paths = &config.artifacts;

        let features = artifacts::load_feature_list(&paths.features)?;
        let mapper = FeatureMapper::new(&features.selected_features, paths.strict_features)
            .map_err(ArtifactError::from)?;
        let width = mapper.len();

        let scaler = artifacts::load_scaler(&paths.scaler, width)?;
        let classifier = artifacts::load_classifier(&paths.classifier, width)?;
        let reference = artifacts::load_reference(&paths.reference, mapper.feature_names())?;
        let explainer = LimeExplainer::new(
            &reference,
            mapper.feature_names().to_vec(),
            config.explain.lime_settings(),
        )?;

        log::info!(
            "Predictor ready: {} features in model order [{}]",
            width,
            mapper.feature_names().join(", ")
        );

        Ok(Self::new(
            mapper,
            Box::new(scaler),
            Box::new(classifier),
            Box::new(explainer),
            config.explain.top_k,
        ))
    }

    pub fn feature_names(&self) -> &[String] {
        self.mapper.feature_names()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn prepare(&self, record: &ClinicalRecord) -> Result<ScaledVector, ApiError> {
        let features = self.mapper.map(record)?;
        let scaled = self
            .scaler
            .transform(&features)
            .map_err(PredictionError::from)?;
        Ok(scaled)
    }

    pub fn predict(&self, record: &ClinicalRecord) -> Result<PredictionResult, ApiError> {
        let scaled = self.prepare(record)?;
        let classification = self
            .classifier
            .classify(&scaled)
            .map_err(PredictionError::from)?;

        log::debug!(
            "Classified as {} (p = {:?})",
            classification.label,
            classification.probabilities
        );

        Ok(PredictionResult {
            prediction: classification.label.code(),
            result: classification.label.result_text(),
            confidence: classification.confidence_percent(),
        })
    }

    pub fn explain(&self, record: &ClinicalRecord) -> Result<ExplanationResult, ApiError> {
        let features = self.mapper.map(record)?;
        let scaled = self
            .scaler
            .transform(&features)
            .map_err(ExplanationError::from)?;
        let explanation = self
            .explainer
            .explain(&scaled, self.classifier.as_ref(), self.top_k)?;
        Ok(ExplanationResult { explanation })
    }
}
