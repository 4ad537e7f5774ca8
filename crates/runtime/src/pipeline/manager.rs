//! The inference pipeline: one active model, a registry of alternatives, and
//! the retry, validate and fallback loop that ties them together.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::output::{self, DEFAULT_CATEGORIES};
use super::preprocess::{self, Preprocessed};
use super::result::{
    InferenceMetadata, InferenceResponse, InferenceResult, PipelineInfo, ResponseStatus,
    MAX_RETURNED_TOKENS,
};
use super::state::{ActiveModel, AttemptBudget, Failure, Judged, Step};
use crate::config::PipelineConfig;
use crate::metrics::MetricsCollector;
use crate::models::{
    FallbackDecision, ModelBackend, ModelLoader, ModelRegistry, SharedRegistry,
};
use crate::telemetry::{emit, EventSink, Severity, TelemetryEvent, TracingSink};
use crate::types::{InferenceError, PipelineError};
use crate::validation::{OutputValidator, ReportMetadata};

/// Reported on a request whose text is empty after trimming.
pub const EMPTY_INPUT_ERROR: &str = "empty input";

/// Reported when the loop stops after a failure without switching.
const FALLBACK_EXHAUSTED: &str = "no_fallback_available";

/// Priority given to the configured model when it is not yet registered.
const PRIMARY_PRIORITY: i32 = 0;

/// Runs inference against the active model and recovers from failures by
/// switching to registered fallbacks.
///
/// Only construction can fail. Every problem inside [`PipelineManager::infer`]
/// is reported on the returned [`InferenceResponse`].
pub struct PipelineManager {
    config: PipelineConfig,
    loader: ModelLoader,
    registry: SharedRegistry,
    validator: OutputValidator,
    metrics: Arc<MetricsCollector>,
    sink: Arc<dyn EventSink>,
    active: ActiveModel,
}

impl PipelineManager {
    /// Pipeline with a fresh registry, host sampler and tracing-backed events.
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self, PipelineError> {
        let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
        let registry = ModelRegistry::new(sink.clone()).into_shared();
        Self::with_components(
            config,
            backend,
            registry,
            Arc::new(MetricsCollector::new()),
            sink,
        )
    }

    /// Pipeline over caller-owned components.
    ///
    /// The configured model is registered at priority 0 unless `registry`
    /// already knows it, then every configured fallback is registered. The
    /// configured model is loaded before this returns.
    pub fn with_components(
        config: PipelineConfig,
        backend: Arc<dyn ModelBackend>,
        registry: SharedRegistry,
        metrics: Arc<MetricsCollector>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        {
            let mut registry = registry.write();
            if !registry.contains(&config.model_name) {
                registry.register(config.model_name.as_str(), None, PRIMARY_PRIORITY);
            }
            for fallback in &config.fallback_models {
                registry.register(fallback.name.as_str(), fallback.path.as_deref(), fallback.priority);
            }
        }

        let loader = ModelLoader::new(backend, &config, metrics.clone(), sink.clone());
        let identifier = registry
            .read()
            .get(&config.model_name)
            .map(|entry| entry.path.clone())
            .unwrap_or_else(|| config.model_name.clone());
        let bundle = loader.load(&identifier)?;

        tracing::info!(
            "Pipeline ready with {} ({} backend, {} registered models)",
            config.model_name,
            loader.backend_name(),
            registry.read().len()
        );

        Ok(Self {
            validator: OutputValidator::new(config.validation_threshold, sink.clone()),
            active: ActiveModel::new(config.model_name.clone(), bundle),
            config,
            loader,
            registry,
            metrics,
            sink,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Registry name of the model currently serving requests.
    pub fn active_model(&self) -> &str {
        &self.active.name
    }

    /// Output taxonomy of the active model.
    pub fn categories(&self) -> Vec<String> {
        match &self.active.bundle.info.labels {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Single attempt
    // -----------------------------------------------------------------------

    /// Normalize and tokenize `text` with the active model's tokenizer.
    pub fn preprocess_text(&self, text: &str) -> Result<Preprocessed, InferenceError> {
        let preprocessed = preprocess::preprocess_text(
            text,
            self.active.bundle.tokenizer.as_ref(),
            self.config.max_length,
        )?;
        emit(
            self.sink.as_ref(),
            self.metrics.preprocessing_event(
                text.chars().count(),
                preprocessed.token_count,
                preprocessed.processing_time * 1000.0,
                Some(&self.active.name),
            ),
        );
        Ok(preprocessed)
    }

    /// One forward pass on the active model, without validation or fallback.
    pub fn infer_text(&self, text: &str) -> Result<InferenceResult, InferenceError> {
        let started = Instant::now();
        let preprocessed = self.preprocess_text(text)?;

        let forward_started = Instant::now();
        let probabilities = self
            .active
            .bundle
            .model
            .forward(&preprocessed.inputs)
            .and_then(|raw| output::probabilities(&raw));
        let inference_time = forward_started.elapsed().as_secs_f64();

        let error = probabilities.as_ref().err().map(ToString::to_string);
        emit(
            self.sink.as_ref(),
            self.metrics
                .inference_event(&self.active.name, inference_time * 1000.0, error.as_deref()),
        );
        let probabilities = probabilities?;

        let categories = self.categories();
        let scored = output::score(&probabilities, &categories);
        let mut tokens = preprocessed.tokens;
        tokens.truncate(MAX_RETURNED_TOKENS);

        Ok(InferenceResult {
            normalized_text: preprocessed.normalized_text,
            tokens,
            token_count: preprocessed.token_count,
            categories,
            predicted_category: scored.predicted_category,
            confidence: scored.relevance_score,
            relevance_score: scored.relevance_score,
            raw_scores: scored.raw_scores,
            metadata: InferenceMetadata {
                model_name: self.active.name.clone(),
                model_type: self.active.bundle.model_type.clone(),
                timestamp: Utc::now(),
                device: self.config.device.clone(),
                inference_time_seconds: inference_time,
                total_processing_time_seconds: started.elapsed().as_secs_f64(),
            },
        })
    }

    // -----------------------------------------------------------------------
    // Orchestration
    // -----------------------------------------------------------------------

    /// Run `text` through the active model, validating and falling back until
    /// a result is accepted or no attempts remain.
    pub fn infer(&mut self, text: &str, postprocess: bool) -> InferenceResponse {
        let request_id = Uuid::new_v4();
        if text.trim().is_empty() {
            tracing::warn!("Rejecting request {}: {}", request_id, EMPTY_INPUT_ERROR);
            return InferenceResponse::failed(request_id, text, EMPTY_INPUT_ERROR);
        }

        let mut budget = AttemptBudget::new(
            self.registry.read().len(),
            self.config.max_validation_retries,
        );
        let mut fallback_used = false;
        let mut step = Step::Attempt;

        let mut response = loop {
            step = match step {
                Step::Attempt => {
                    budget.consume();
                    self.registry.write().mark_used(&self.active.name);
                    tracing::debug!(
                        "Request {} attempt {}/{} on {}",
                        request_id,
                        budget.used(),
                        budget.max(),
                        self.active.name
                    );
                    match self.infer_text(text) {
                        Ok(result) => Step::Validate(result),
                        Err(e) => {
                            tracing::warn!("Inference failed on {}: {}", self.active.name, e);
                            Step::Fallback(Failure::Error(e.to_string()))
                        }
                    }
                }
                Step::Validate(result) => {
                    let judged = self.judge(result);
                    if judged.validation.valid {
                        Step::Done(self.respond(request_id, text, judged, fallback_used))
                    } else {
                        tracing::warn!(
                            "Output of {} rejected: confidence {} below {} or issues {:?}",
                            self.active.name,
                            judged.validation.confidence,
                            judged.validation.threshold,
                            judged.validation.issues
                        );
                        Step::Fallback(Failure::Rejected(Box::new(judged)))
                    }
                }
                Step::Fallback(failure) => {
                    let decision = self
                        .registry
                        .read()
                        .handle_failure(&self.active.name, failure.reason());
                    let switched = budget.has_remaining()
                        && match &decision {
                            FallbackDecision::SwitchModel {
                                target,
                                target_path,
                                ..
                            } => self.switch_to(target, target_path, &failure),
                            FallbackDecision::NoFallbackAvailable { .. } => false,
                        };
                    if switched {
                        fallback_used = true;
                        Step::Attempt
                    } else {
                        Step::Done(self.give_up(request_id, text, failure, fallback_used))
                    }
                }
                Step::Done(response) => break response,
            };
        };

        if postprocess {
            response.apply_postprocessing();
        }
        response
    }

    /// Validate an attempt's result and attach a report.
    fn judge(&self, mut result: InferenceResult) -> Judged {
        let threshold = self.config.validation_threshold;
        let value = serde_json::to_value(&result).unwrap_or(Value::Null);
        let validation = self.validator.validate_output(&value, Some(threshold));
        let report = self.validator.report(
            validation.clone(),
            &ReportMetadata {
                model_name: Some(self.active.name.clone()),
                latency_ms: Some(result.metadata.inference_time_seconds * 1000.0),
                device: Some(self.config.device.clone()),
                threshold: Some(threshold),
            },
        );
        result.confidence = validation.confidence;
        Judged {
            result,
            validation,
            report,
        }
    }

    /// Load `target_path` and make it active. The active model is untouched
    /// when the load fails.
    fn switch_to(&mut self, target: &str, target_path: &str, failure: &Failure) -> bool {
        let loaded = {
            let registry = self.registry.read();
            registry.load_model(&self.loader, target_path)
        };

        match loaded {
            Ok(bundle) => {
                let previous = std::mem::replace(&mut self.active, ActiveModel::new(target, bundle));
                tracing::info!("Switched from {} to {}", previous.name, target);
                emit(
                    self.sink.as_ref(),
                    TelemetryEvent::new("model_switch")
                        .with_severity(Severity::Warning)
                        .with("from", previous.name)
                        .with("to", target)
                        .with("reason", failure.reason().to_string()),
                );
                true
            }
            Err(e) => {
                tracing::error!("Could not switch to {}: {}", target, e);
                emit(
                    self.sink.as_ref(),
                    TelemetryEvent::new("model_switch_failed")
                        .with_severity(Severity::Error)
                        .with("from", self.active.name.as_str())
                        .with("to", target)
                        .with("error", e.to_string()),
                );
                false
            }
        }
    }

    fn respond(
        &self,
        request_id: Uuid,
        text: &str,
        judged: Judged,
        fallback_used: bool,
    ) -> InferenceResponse {
        let status = if judged.validation.valid {
            ResponseStatus::Ok
        } else {
            ResponseStatus::ValidationFailed
        };
        let mut response = InferenceResponse::with_output(request_id, text, status, judged.result);
        response.validated = judged.validation.valid;
        response.fallback_used = fallback_used;
        response.model_used = Some(self.active.name.clone());
        response.validation_threshold = Some(judged.validation.threshold);
        response.issues = judged.validation.issues;
        response.validation_report = Some(judged.report);
        response
    }

    fn give_up(
        &self,
        request_id: Uuid,
        text: &str,
        failure: Failure,
        fallback_used: bool,
    ) -> InferenceResponse {
        let mut response = match failure {
            Failure::Error(message) => {
                let mut response = InferenceResponse::failed(request_id, text, message);
                response.fallback_used = fallback_used;
                response.model_used = Some(self.active.name.clone());
                response.validation_threshold = Some(self.config.validation_threshold);
                response
            }
            Failure::Rejected(judged) => self.respond(request_id, text, *judged, fallback_used),
        };
        response.action = Some(FALLBACK_EXHAUSTED.to_string());
        response
    }

    /// Snapshot of configuration, active model and registry.
    pub fn get_pipeline_info(&self) -> PipelineInfo {
        PipelineInfo {
            model_name: self.active.name.clone(),
            model_type: self.active.bundle.model_type.clone(),
            model_source: self.active.bundle.source.to_string(),
            backend: self.loader.backend_name().to_string(),
            device: self.config.device.clone(),
            max_length: self.config.max_length,
            model_loaded: true,
            tokenizer_available: true,
            validation_threshold: self.config.validation_threshold,
            max_validation_retries: self.config.max_validation_retries,
            categories: self.categories(),
            fallback_models: self.registry.read().list(),
            supported_pipelines: vec!["text".to_string()],
        }
    }
}
