//! HTTP request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::InferenceResponse;

/// Body of `POST /ai/analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
    #[serde(default)]
    pub options: AnalyzeOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    /// Defaults to `true`
    pub postprocess: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub result: InferenceResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Body of `GET /ai/test`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub status: String,
    pub ai_core_status: CoreStatus,
}

/// Short summary of the serving pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStatus {
    pub initialized: bool,
    pub active_model: String,
    pub backend: String,
    pub device: String,
    pub registered_models: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}
