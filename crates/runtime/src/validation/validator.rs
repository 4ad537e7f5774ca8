//! Confidence and structural validation of inference outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::DEFAULT_VALIDATION_THRESHOLD;
use crate::telemetry::{emit, EventSink, Severity, TelemetryEvent};

/// Structural defect found in an inference output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    OutputEmpty,
    MissingRelevanceScore,
    NegativeRelevanceScore,
    ZeroTokens,
    EmptyNormalizedText,
    InvalidRawScores,
    NegativeRawScore,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::OutputEmpty => "output_empty",
            IssueCode::MissingRelevanceScore => "missing_relevance_score",
            IssueCode::NegativeRelevanceScore => "negative_relevance_score",
            IssueCode::ZeroTokens => "zero_tokens",
            IssueCode::EmptyNormalizedText => "empty_normalized_text",
            IssueCode::InvalidRawScores => "invalid_raw_scores",
            IssueCode::NegativeRawScore => "negative_raw_score",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one inference attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub confidence: f64,
    pub threshold: f64,
    pub issues: Vec<IssueCode>,
    pub timestamp: DateTime<Utc>,
}

/// Context attached to a validation report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub model_name: Option<String>,
    pub latency_ms: Option<f64>,
    pub device: Option<String>,
    /// Overrides the validator's default threshold when set.
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Validated,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub model: Option<String>,
    pub status: ReportStatus,
    pub confidence: f64,
    pub latency_ms: Option<f64>,
    pub device: Option<String>,
    pub valid: bool,
    pub issues: Vec<IssueCode>,
    pub timestamp: DateTime<Utc>,
}

/// Scores inference outputs against a confidence threshold.
///
/// Outputs are inspected as JSON so that any result shape, including a
/// malformed one, can be diagnosed rather than rejected at the type level.
pub struct OutputValidator {
    default_threshold: f64,
    sink: Arc<dyn EventSink>,
}

impl OutputValidator {
    pub fn new(default_threshold: f64, sink: Arc<dyn EventSink>) -> Self {
        Self {
            default_threshold,
            sink,
        }
    }

    /// Validator using [`DEFAULT_VALIDATION_THRESHOLD`].
    pub fn with_default_threshold(sink: Arc<dyn EventSink>) -> Self {
        Self::new(DEFAULT_VALIDATION_THRESHOLD, sink)
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// Highest score after clamping into `[0, 1]`. NaN entries are dropped;
    /// absent, empty or all-NaN input yields `0.0`.
    pub fn compute_confidence(scores: Option<&[f64]>) -> f64 {
        scores
            .unwrap_or_default()
            .iter()
            .filter(|s| !s.is_nan())
            .map(|s| s.clamp(0.0, 1.0))
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
            .unwrap_or(0.0)
    }

    /// Every structural check that applies, in a fixed order.
    pub fn detect_anomalies(output: &Value) -> Vec<IssueCode> {
        let fields = match output {
            Value::Object(map) if !map.is_empty() => map,
            _ => return vec![IssueCode::OutputEmpty],
        };

        let mut issues = Vec::new();

        match fields.get("relevance_score").and_then(Value::as_f64) {
            None => issues.push(IssueCode::MissingRelevanceScore),
            Some(score) if score < 0.0 => issues.push(IssueCode::NegativeRelevanceScore),
            Some(_) => {}
        }

        if let Some(Value::Array(tokens)) = fields.get("tokens") {
            if tokens.is_empty() {
                issues.push(IssueCode::ZeroTokens);
            }
        }

        if let Some(Value::String(text)) = fields.get("normalized_text") {
            if text.trim().is_empty() {
                issues.push(IssueCode::EmptyNormalizedText);
            }
        }

        if let Some(Value::Array(raw_scores)) = fields.get("raw_scores") {
            if raw_scores.iter().any(|s| !s.is_number()) {
                issues.push(IssueCode::InvalidRawScores);
            }
            if raw_scores
                .iter()
                .filter_map(Value::as_f64)
                .any(|s| s < 0.0)
            {
                issues.push(IssueCode::NegativeRawScore);
            }
        }

        issues
    }

    /// Validate against `threshold`, or the default when `None`.
    pub fn validate_output(&self, output: &Value, threshold: Option<f64>) -> ValidationResult {
        let threshold = threshold.unwrap_or(self.default_threshold);
        let scores = extract_scores(output);
        let confidence = Self::compute_confidence(scores.as_deref());
        let issues = Self::detect_anomalies(output);
        let valid = confidence >= threshold && issues.is_empty();

        let result = ValidationResult {
            valid,
            confidence: round4(confidence),
            threshold,
            issues,
            timestamp: Utc::now(),
        };

        emit(
            self.sink.as_ref(),
            TelemetryEvent::new("validation")
                .with_severity(if valid { Severity::Info } else { Severity::Warning })
                .merge(serde_json::to_value(&result).unwrap_or_default()),
        );

        result
    }

    pub fn generate_validation_report(
        &self,
        output: &Value,
        metadata: &ReportMetadata,
    ) -> ValidationReport {
        let validation = self.validate_output(output, metadata.threshold);
        self.report(validation, metadata)
    }

    /// Package an existing verdict as a report without validating again.
    pub fn report(
        &self,
        validation: ValidationResult,
        metadata: &ReportMetadata,
    ) -> ValidationReport {
        let report = ValidationReport {
            model: metadata.model_name.clone(),
            status: if validation.valid {
                ReportStatus::Validated
            } else {
                ReportStatus::Rejected
            },
            confidence: validation.confidence,
            latency_ms: metadata.latency_ms,
            device: metadata.device.clone(),
            valid: validation.valid,
            issues: validation.issues,
            timestamp: validation.timestamp,
        };

        emit(
            self.sink.as_ref(),
            TelemetryEvent::new("validation_report")
                .merge(serde_json::to_value(&report).unwrap_or_default()),
        );

        report
    }
}

/// Numeric `raw_scores` when that list is non-empty, else a numeric
/// `confidence`, else nothing.
fn extract_scores(output: &Value) -> Option<Vec<f64>> {
    if let Some(Value::Array(raw_scores)) = output.get("raw_scores") {
        if !raw_scores.is_empty() {
            return Some(raw_scores.iter().filter_map(Value::as_f64).collect());
        }
    }
    output
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| vec![c])
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use serde_json::json;

    fn validator() -> (OutputValidator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (OutputValidator::with_default_threshold(sink.clone()), sink)
    }

    fn clean(score: f64) -> Value {
        json!({
            "normalized_text": "server deploy",
            "tokens": ["server", "deploy"],
            "relevance_score": score,
            "raw_scores": [score, 0.0],
        })
    }

    #[test]
    fn test_compute_confidence() {
        assert_eq!(OutputValidator::compute_confidence(None), 0.0);
        assert_eq!(OutputValidator::compute_confidence(Some(&[])), 0.0);
        assert_eq!(
            OutputValidator::compute_confidence(Some(&[0.3, 0.9, f64::NAN])),
            0.9
        );
        assert_eq!(OutputValidator::compute_confidence(Some(&[-0.2, 1.5])), 1.0);
        assert_eq!(OutputValidator::compute_confidence(Some(&[f64::NAN])), 0.0);
        assert_eq!(OutputValidator::compute_confidence(Some(&[-3.0])), 0.0);
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(
            OutputValidator::detect_anomalies(&json!({})),
            vec![IssueCode::OutputEmpty]
        );
        assert_eq!(
            OutputValidator::detect_anomalies(&Value::Null),
            vec![IssueCode::OutputEmpty]
        );
    }

    #[test]
    fn test_anomalies_accumulate() {
        let output = json!({
            "normalized_text": "   ",
            "tokens": [],
            "relevance_score": -1,
            "raw_scores": [0.1, -0.2],
        });
        assert_eq!(
            OutputValidator::detect_anomalies(&output),
            vec![
                IssueCode::NegativeRelevanceScore,
                IssueCode::ZeroTokens,
                IssueCode::EmptyNormalizedText,
                IssueCode::NegativeRawScore,
            ]
        );
    }

    #[test]
    fn test_missing_and_invalid_scores() {
        let output = json!({
            "relevance_score": "high",
            "raw_scores": [0.4, "x", null, -1.0],
        });
        assert_eq!(
            OutputValidator::detect_anomalies(&output),
            vec![
                IssueCode::MissingRelevanceScore,
                IssueCode::InvalidRawScores,
                IssueCode::NegativeRawScore,
            ]
        );
    }

    #[test]
    fn test_valid_iff_confidence_meets_threshold() {
        let (validator, _) = validator();
        for (confidence, threshold) in [
            (0.59, 0.6),
            (0.59996, 0.6),
            (0.6, 0.6),
            (0.95, 0.6),
            (0.0, 0.0),
            (1.0, 1.0),
        ] {
            let result = validator.validate_output(&clean(confidence), Some(threshold));
            assert!(result.issues.is_empty());
            assert_eq!(result.valid, confidence >= threshold, "c={} t={}", confidence, threshold);
        }
    }

    #[test]
    fn test_rounding_does_not_lift_confidence_over_threshold() {
        let (validator, _) = validator();
        let output = json!({
            "normalized_text": "x",
            "tokens": ["x"],
            "relevance_score": 0.59996,
            "raw_scores": [0.59996],
        });
        let result = validator.validate_output(&output, Some(0.6));
        assert!(!result.valid);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn test_default_threshold_applies() {
        let (validator, sink) = validator();
        let result = validator.validate_output(&clean(0.55), None);
        assert_eq!(result.threshold, 0.6);
        assert!(!result.valid);
        assert_eq!(sink.events_of("validation").len(), 1);
    }

    #[test]
    fn test_confidence_field_used_without_raw_scores() {
        let (validator, _) = validator();
        let output = json!({"relevance_score": 0.7, "confidence": 0.71234, "raw_scores": []});
        let result = validator.validate_output(&output, None);
        assert_eq!(result.confidence, 0.7123);
        assert!(result.valid);
    }

    #[test]
    fn test_anomalies_reject_confident_output() {
        let (validator, _) = validator();
        let mut output = clean(0.99);
        output["tokens"] = json!([]);
        let result = validator.validate_output(&output, None);
        assert_eq!(result.confidence, 0.99);
        assert!(!result.valid);
        assert_eq!(result.issues, vec![IssueCode::ZeroTokens]);
    }

    #[test]
    fn test_report() {
        let (validator, sink) = validator();
        let metadata = ReportMetadata {
            model_name: Some("backup".to_string()),
            latency_ms: Some(12.5),
            device: Some("cpu".to_string()),
            threshold: Some(0.95),
        };
        let report = validator.generate_validation_report(&clean(0.9), &metadata);
        assert_eq!(report.status, ReportStatus::Rejected);
        assert_eq!(report.model.as_deref(), Some("backup"));
        assert!(!report.valid);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "rejected");

        let logged = sink.events_of("validation_report");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].payload["latency_ms"], 12.5);
    }

    #[test]
    fn test_report_from_existing_verdict() {
        let (validator, sink) = validator();
        let validation = validator.validate_output(&clean(0.9), None);
        let report = validator.report(validation, &ReportMetadata::default());
        assert_eq!(report.status, ReportStatus::Validated);
        assert_eq!(report.confidence, 0.9);
        assert_eq!(sink.events_of("validation").len(), 1);
        assert_eq!(sink.events_of("validation_report").len(), 1);
    }
}
