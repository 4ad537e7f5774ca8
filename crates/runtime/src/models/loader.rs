//! Resolves a model identifier to a loaded [`ModelBundle`].
//!
//! Resolution order, first applicable rule wins:
//! 1. an existing filesystem path
//! 2. an `http://` or `https://` location
//! 3. a cache hit under `cache_dir` (a failed cache load falls through)
//! 4. the backend's hub

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::backend::{LoadOptions, LoadedParts, ModelBackend, ModelBundle, ModelSource};
use crate::config::PipelineConfig;
use crate::metrics::MetricsCollector;
use crate::telemetry::{emit, EventSink};
use crate::types::LoadError;

pub struct ModelLoader {
    backend: Arc<dyn ModelBackend>,
    options: LoadOptions,
    use_cache: bool,
    metrics: Arc<MetricsCollector>,
    sink: Arc<dyn EventSink>,
}

impl ModelLoader {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        config: &PipelineConfig,
        metrics: Arc<MetricsCollector>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            options: LoadOptions::from(config),
            use_cache: config.use_cache,
            metrics,
            sink,
        }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Load `identifier`, recording a `model_loading` event either way.
    pub fn load(&self, identifier: &str) -> Result<ModelBundle, LoadError> {
        let start = Instant::now();
        let resolved = self.resolve(identifier);
        let load_time = start.elapsed();
        let load_ms = load_time.as_secs_f64() * 1000.0;

        match resolved {
            Ok((parts, source)) => {
                tracing::info!(
                    "Loaded {} from {} in {:.2}s",
                    identifier,
                    source,
                    load_time.as_secs_f64()
                );
                emit(
                    self.sink.as_ref(),
                    self.metrics
                        .model_loading_event(identifier, load_ms, Some(source.as_str()), None),
                );
                Ok(ModelBundle {
                    model: parts.model,
                    tokenizer: parts.tokenizer,
                    info: parts.info,
                    model_type: detect_model_type(identifier).to_string(),
                    source,
                    identifier: identifier.to_string(),
                    load_time,
                })
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", identifier, e);
                emit(
                    self.sink.as_ref(),
                    self.metrics
                        .model_loading_event(identifier, load_ms, None, Some(&e.to_string())),
                );
                Err(e)
            }
        }
    }

    fn resolve(&self, identifier: &str) -> Result<(LoadedParts, ModelSource), LoadError> {
        let path = Path::new(identifier);
        if path.exists() {
            tracing::info!("Loading {} from local path", path.display());
            return self
                .backend
                .load_local(path, &self.options)
                .map(|parts| (parts, ModelSource::LocalPath));
        }

        if is_remote_url(identifier) {
            if !self.options.trust_remote_code {
                return Err(LoadError::Unsupported {
                    identifier: identifier.to_string(),
                    reason: "remote models load only with trust_remote_code enabled".to_string(),
                });
            }
            tracing::info!("Loading {} from remote URL", identifier);
            return self
                .backend
                .load_remote(identifier, &self.options)
                .map(|parts| (parts, ModelSource::RemoteUrl));
        }

        if self.use_cache {
            if let Some(cached) = self.cached_path(identifier) {
                tracing::info!("Found {} in cache at {}", identifier, cached.display());
                match self.backend.load_local(&cached, &self.options) {
                    Ok(parts) => return Ok((parts, ModelSource::Cache)),
                    Err(e) if e.is_retryable() => {
                        tracing::warn!("Cache load failed for {}, trying hub: {}", identifier, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!("Loading {} from {} hub", identifier, self.backend.name());
        self.backend
            .load_hub(identifier, &self.options)
            .map(|parts| (parts, ModelSource::Hub))
    }

    /// First existing cache directory for `identifier`, if any.
    pub fn cached_path(&self, identifier: &str) -> Option<PathBuf> {
        cache_candidates(&self.options.cache_dir, identifier)
            .into_iter()
            .find(|candidate| candidate.exists())
    }
}

/// Cache layouts checked for `identifier`: the flat `org_name` form and the
/// hub's `models--org--name` form.
pub fn cache_candidates(cache_dir: &Path, identifier: &str) -> Vec<PathBuf> {
    vec![
        cache_dir.join(identifier.replace('/', "_")),
        cache_dir.join(format!("models--{}", identifier.replace('/', "--"))),
    ]
}

pub fn is_remote_url(identifier: &str) -> bool {
    identifier.contains("https://") || identifier.contains("http://")
}

/// Coarse model family from the identifier.
pub fn detect_model_type(identifier: &str) -> &'static str {
    let lower = identifier.to_lowercase();
    if lower.contains("bert") {
        "bert"
    } else if lower.contains("gpt") {
        "gpt"
    } else if lower.contains("t5") {
        "t5"
    } else {
        "custom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backend::{EncodedInput, LoadedModel, ModelInfo, RawModelOutput, TextTokenizer};
    use crate::telemetry::MemorySink;
    use crate::types::InferenceError;
    use parking_lot::Mutex;

    struct Inert;

    impl LoadedModel for Inert {
        fn forward(&self, _input: &EncodedInput) -> Result<RawModelOutput, InferenceError> {
            Ok(RawModelOutput::Raw(Vec::new()))
        }
    }

    impl TextTokenizer for Inert {
        fn tokenize(&self, text: &str) -> Result<Vec<String>, InferenceError> {
            Ok(text.split_whitespace().map(str::to_string).collect())
        }

        fn encode(&self, _text: &str, max_length: usize) -> Result<EncodedInput, InferenceError> {
            Ok(EncodedInput::from_ids(Vec::new(), max_length, 0))
        }
    }

    /// Accepts local directories containing `weights.bin`; records every call.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn parts() -> LoadedParts {
            LoadedParts {
                model: Box::new(Inert),
                tokenizer: Box::new(Inert),
                info: ModelInfo::default(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl ModelBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn load_local(&self, path: &Path, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
            self.calls.lock().push(format!("local:{}", path.display()));
            if path.join("weights.bin").exists() {
                Ok(Self::parts())
            } else {
                Err(LoadError::InvalidModel {
                    identifier: path.display().to_string(),
                    reason: "missing weights.bin".to_string(),
                })
            }
        }

        fn load_remote(&self, url: &str, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
            self.calls.lock().push(format!("remote:{}", url));
            Ok(Self::parts())
        }

        fn load_hub(&self, identifier: &str, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
            self.calls.lock().push(format!("hub:{}", identifier));
            if identifier == "missing" {
                Err(LoadError::NotFound {
                    identifier: identifier.to_string(),
                })
            } else {
                Ok(Self::parts())
            }
        }
    }

    fn loader(cache_dir: &Path, use_cache: bool) -> (ModelLoader, Arc<RecordingBackend>, Arc<MemorySink>) {
        loader_with(PipelineConfig {
            cache_dir: cache_dir.to_path_buf(),
            use_cache,
            ..PipelineConfig::default()
        })
    }

    fn loader_with(config: PipelineConfig) -> (ModelLoader, Arc<RecordingBackend>, Arc<MemorySink>) {
        let backend = Arc::new(RecordingBackend::default());
        let sink = Arc::new(MemorySink::new());
        let loader = ModelLoader::new(
            backend.clone(),
            &config,
            Arc::new(MetricsCollector::new()),
            sink.clone(),
        );
        (loader, backend, sink)
    }

    #[test]
    fn test_local_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weights.bin"), b"").unwrap();
        let (loader, backend, sink) = loader(dir.path(), true);

        let identifier = dir.path().to_string_lossy().to_string();
        let bundle = loader.load(&identifier).unwrap();
        assert_eq!(bundle.source, ModelSource::LocalPath);
        assert_eq!(backend.calls().len(), 1);

        let events = sink.events_of("model_loading");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["source"], "local_path");
    }

    #[test]
    fn test_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let (loader, backend, _) = loader_with(PipelineConfig {
            cache_dir: dir.path().to_path_buf(),
            trust_remote_code: true,
            ..PipelineConfig::default()
        });
        let bundle = loader.load("https://models.example.com/classifier").unwrap();
        assert_eq!(bundle.source, ModelSource::RemoteUrl);
        assert_eq!(backend.calls(), vec!["remote:https://models.example.com/classifier"]);
    }

    #[test]
    fn test_remote_url_needs_trust() {
        let dir = tempfile::tempdir().unwrap();
        let (loader, backend, _) = loader(dir.path(), true);
        let err = loader.load("https://models.example.com/classifier").unwrap_err();
        assert!(matches!(err, LoadError::Unsupported { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_cache_hit_uses_flattened_name() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("org_classifier");
        std::fs::create_dir_all(&cached).unwrap();
        std::fs::write(cached.join("weights.bin"), b"").unwrap();
        let (loader, _, _) = loader(dir.path(), true);

        let bundle = loader.load("org/classifier").unwrap();
        assert_eq!(bundle.source, ModelSource::Cache);
        assert_eq!(bundle.identifier, "org/classifier");
    }

    #[test]
    fn test_hub_style_cache_dir_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("models--org--classifier");
        std::fs::create_dir_all(&cached).unwrap();
        let (loader, _, _) = loader(dir.path(), true);
        assert_eq!(loader.cached_path("org/classifier"), Some(cached));
    }

    #[test]
    fn test_corrupt_cache_falls_through_to_hub() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bert-base-uncased")).unwrap();
        let (loader, backend, _) = loader(dir.path(), true);

        let bundle = loader.load("bert-base-uncased").unwrap();
        assert_eq!(bundle.source, ModelSource::Hub);
        assert_eq!(bundle.model_type, "bert");
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("local:"));
        assert_eq!(calls[1], "hub:bert-base-uncased");
    }

    #[test]
    fn test_cache_disabled_skips_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("gpt2");
        std::fs::create_dir_all(&cached).unwrap();
        std::fs::write(cached.join("weights.bin"), b"").unwrap();
        let (loader, backend, _) = loader(dir.path(), false);

        let bundle = loader.load("gpt2").unwrap();
        assert_eq!(bundle.source, ModelSource::Hub);
        assert_eq!(backend.calls(), vec!["hub:gpt2"]);
    }

    #[test]
    fn test_total_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (loader, _, sink) = loader(dir.path(), true);

        let err = loader.load("missing").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        let events = sink.events_of("model_loading");
        assert_eq!(events[0].payload["success"], false);
    }

    #[test]
    fn test_detect_model_type() {
        assert_eq!(detect_model_type("distilbert-base-uncased"), "bert");
        assert_eq!(detect_model_type("gpt2-medium"), "gpt");
        assert_eq!(detect_model_type("T5-small"), "t5");
        assert_eq!(detect_model_type("geko-lexicon-base"), "custom");
    }
}
