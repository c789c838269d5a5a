//! HTTP boundary.
//!
//! Bodies are taken as raw bytes and validated by `record`, so a malformed or
//! incomplete payload is always a 422 naming the field and never a framework
//! rejection with a different shape. Error bodies are `{"detail": "..."}`.

use crate::error::ApiError;
use crate::record::ClinicalRecord;
use crate::service::{ExplanationResult, PredictionResult, Predictor};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub const LIVENESS_MESSAGE: &str = "PCOS Prediction API is live!";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.is_client_error() {
            log::warn!("Rejected request: {self}");
        } else {
            log::error!("Request failed: {self}");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Builds the application router around a loaded predictor.
///
/// Cross-origin requests are accepted from any origin with any method and
/// header.
pub fn router(predictor: Arc<Predictor>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .layer(CorsLayer::permissive())
        .with_state(predictor)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": LIVENESS_MESSAGE }))
}

async fn health(State(predictor): State<Arc<Predictor>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "features": predictor.feature_names().len(),
        "top_k": predictor.top_k(),
    }))
}

async fn predict(
    State(predictor): State<Arc<Predictor>>,
    body: Bytes,
) -> Result<Json<PredictionResult>, ApiError> {
    let record = ClinicalRecord::from_slice(&body)?;
    let result = predictor.predict(&record)?;
    log::info!(
        "POST /predict -> {} ({})",
        result.prediction,
        result
            .confidence
            .map(|c| format!("{c:.2}%"))
            .unwrap_or_else(|| "no confidence".to_string())
    );
    Ok(Json(result))
}

async fn explain(
    State(predictor): State<Arc<Predictor>>,
    body: Bytes,
) -> Result<Json<ExplanationResult>, ApiError> {
    let record = ClinicalRecord::from_slice(&body)?;
    // Sampling and surrogate fitting are CPU bound; keep them off the reactor.
    let result = tokio::task::spawn_blocking(move || predictor.explain(&record))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))??;
    log::info!(
        "POST /explain -> {} contributions",
        result.explanation.len()
    );
    Ok(Json(result))
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve<F>(
    predictor: Arc<Predictor>,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(predictor))
        .with_graceful_shutdown(shutdown)
        .await
}
