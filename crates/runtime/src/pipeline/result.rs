//! Values returned by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ModelRegistryEntry;
use crate::validation::{IssueCode, ValidationReport};

/// At most this many tokens are echoed back in a result.
pub const MAX_RETURNED_TOKENS: usize = 20;

/// Timing and provenance of one successful forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetadata {
    pub model_name: String,
    pub model_type: String,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub inference_time_seconds: f64,
    pub total_processing_time_seconds: f64,
}

/// Output of one attempt against the active model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub normalized_text: String,
    pub tokens: Vec<String>,
    pub token_count: usize,
    pub categories: Vec<String>,
    pub predicted_category: String,
    pub relevance_score: f64,
    pub raw_scores: Vec<f64>,
    /// Relevance score until validation overwrites it with its own figure.
    pub confidence: f64,
    pub metadata: InferenceMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    ValidationFailed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// What `infer` hands back. Never an error type: failures are reported in
/// `status`, `error` and `action`.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResponse {
    pub request_id: Uuid,
    pub input_text: String,
    pub status: ResponseStatus,
    pub validated: bool,
    pub fallback_used: bool,
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_threshold: Option<f64>,
    pub issues: Vec<IssueCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_report: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub formatted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_at: Option<DateTime<Utc>>,
    /// The last attempt's result. Absent when no attempt produced one.
    #[serde(flatten)]
    pub output: Option<InferenceResult>,
}

impl InferenceResponse {
    fn bare(request_id: Uuid, input_text: &str, status: ResponseStatus) -> Self {
        Self {
            request_id,
            input_text: input_text.to_string(),
            status,
            validated: false,
            fallback_used: false,
            model_used: None,
            error: None,
            action: None,
            validation_threshold: None,
            issues: Vec::new(),
            validation_report: None,
            confidence_level: None,
            formatted: false,
            formatted_at: None,
            output: None,
        }
    }

    /// Terminal error with no result attached.
    pub fn failed(request_id: Uuid, input_text: &str, error: impl Into<String>) -> Self {
        let mut response = Self::bare(request_id, input_text, ResponseStatus::Error);
        response.error = Some(error.into());
        response
    }

    /// Response carrying an attempt's result.
    pub fn with_output(
        request_id: Uuid,
        input_text: &str,
        status: ResponseStatus,
        output: InferenceResult,
    ) -> Self {
        let mut response = Self::bare(request_id, input_text, status);
        response.output = Some(output);
        response
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Validation confidence of the attached result, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.output.as_ref().map(|o| o.confidence)
    }

    /// Stamp formatting fields. Responses carrying an error are left alone.
    pub fn apply_postprocessing(&mut self) {
        if self.error.is_some() {
            return;
        }
        self.formatted = true;
        self.formatted_at = Some(Utc::now());
        self.confidence_level = self
            .output
            .as_ref()
            .map(|o| ConfidenceLevel::from_score(o.relevance_score));
    }
}

/// Snapshot of the pipeline's configuration and active model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub model_name: String,
    pub model_type: String,
    pub model_source: String,
    pub backend: String,
    pub device: String,
    pub max_length: usize,
    pub model_loaded: bool,
    pub tokenizer_available: bool,
    pub validation_threshold: f64,
    pub max_validation_retries: u32,
    pub categories: Vec<String>,
    pub fallback_models: Vec<ModelRegistryEntry>,
    pub supported_pipelines: Vec<String>,
}
