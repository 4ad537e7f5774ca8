//! HTTP route handlers
//!
//! The pipeline is synchronous and mutable, so every handler that touches it
//! takes the shared lock on a blocking worker.

use axum::{extract::State, http::StatusCode, response::Json};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use super::types::{
    AnalyzeRequest, AnalyzeResponse, ConnectionResponse, CoreStatus, ErrorResponse, HealthResponse,
};
use crate::metrics::{MetricsCollector, SystemHealth};
use crate::pipeline::{PipelineInfo, PipelineManager};

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Mutex<PipelineManager>>,
    pub metrics: Arc<MetricsCollector>,
    started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: PipelineManager) -> Self {
        let metrics = pipeline.metrics();
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            metrics,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn worker_failed(context: &str, error: tokio::task::JoinError) -> HandlerError {
    tracing::error!("{} worker failed: {}", context, error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(format!("{} failed: {}", context, error))),
    )
}

/// `GET /ai/test`
pub async fn test_connection(
    State(state): State<AppState>,
) -> Result<Json<ConnectionResponse>, HandlerError> {
    let pipeline = state.pipeline.clone();
    let uptime_seconds = state.uptime_seconds();
    let status = tokio::task::spawn_blocking(move || {
        let pipeline = pipeline.lock();
        let info = pipeline.get_pipeline_info();
        CoreStatus {
            initialized: info.model_loaded,
            active_model: info.model_name,
            backend: info.backend,
            device: info.device,
            registered_models: info.fallback_models.len(),
            uptime_seconds,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    })
    .await
    .map_err(|e| worker_failed("status", e))?;

    Ok(Json(ConnectionResponse {
        status: "AI Core connected".to_string(),
        ai_core_status: status,
    }))
}

/// `POST /ai/analyze`
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, HandlerError> {
    let pipeline = state.pipeline.clone();
    let postprocess = request.options.postprocess.unwrap_or(true);
    let text = request.text;

    let result = tokio::task::spawn_blocking(move || pipeline.lock().infer(&text, postprocess))
        .await
        .map_err(|e| worker_failed("analysis", e))?;

    tracing::info!(
        request_id = %result.request_id,
        status = ?result.status,
        model = ?result.model_used,
        "Analyzed request"
    );

    Ok(Json(AnalyzeResponse {
        success: true,
        result,
    }))
}

/// `GET /ai/status`
pub async fn pipeline_status(
    State(state): State<AppState>,
) -> Result<Json<PipelineInfo>, HandlerError> {
    let pipeline = state.pipeline.clone();
    tokio::task::spawn_blocking(move || pipeline.lock().get_pipeline_info())
        .await
        .map(Json)
        .map_err(|e| worker_failed("status", e))
}

/// `GET /ai/metrics`
pub async fn system_metrics(
    State(state): State<AppState>,
) -> Result<Json<SystemHealth>, HandlerError> {
    let metrics = state.metrics.clone();
    tokio::task::spawn_blocking(move || metrics.system_health())
        .await
        .map(Json)
        .map_err(|e| worker_failed("metrics", e))
}

/// `GET /health`
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "geko-backend".to_string(),
        timestamp: chrono::Utc::now(),
    })
}
