pub mod analyze;
pub mod serve;
pub mod status;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use std::sync::Arc;

use geko_runtime::config::{GekoConfig, DEFAULT_MODEL_NAME};
use geko_runtime::metrics::MetricsCollector;
use geko_runtime::models::{LexiconBackend, ModelBackend, ModelRegistry};
use geko_runtime::telemetry::{create_sink, init_tracing};
use geko_runtime::PipelineManager;

/// Built-in lexicon used when the default BERT id is requested from the
/// lexicon backend.
const LEXICON_DEFAULT_MODEL: &str = "geko-lexicon-base";

/// File config (when given) overlaid with the environment and `--model`.
pub fn load_config(matches: &ArgMatches) -> Result<GekoConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => GekoConfig::from_file(path)
            .with_context(|| format!("failed to read configuration from {}", path))?,
        None => GekoConfig::default(),
    };
    config.apply_env().context("invalid environment override")?;

    if let Some(model) = matches.get_one::<String>("model") {
        config.pipeline.model_name = model.clone();
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub fn build_backend(name: &str) -> Result<Arc<dyn ModelBackend>> {
    match name {
        "lexicon" => Ok(Arc::new(LexiconBackend::new())),
        #[cfg(feature = "candle")]
        "candle" => Ok(Arc::new(geko_runtime::models::CandleBertBackend::new())),
        #[cfg(not(feature = "candle"))]
        "candle" => bail!("the candle backend needs a build with `--features candle`"),
        other => bail!("unknown backend '{}' (expected lexicon or candle)", other),
    }
}

/// Install logging, then build the pipeline described by `matches`.
pub fn build_pipeline(matches: &ArgMatches) -> Result<(GekoConfig, PipelineManager)> {
    let mut config = load_config(matches)?;
    init_tracing(&config.logging);

    let backend_name = matches
        .get_one::<String>("backend")
        .map(String::as_str)
        .unwrap_or("lexicon");
    let backend = build_backend(backend_name)?;

    if backend_name == "lexicon" && config.pipeline.model_name == DEFAULT_MODEL_NAME {
        tracing::warn!(
            "{} needs the candle backend; using {} instead",
            DEFAULT_MODEL_NAME,
            LEXICON_DEFAULT_MODEL
        );
        config.pipeline.model_name = LEXICON_DEFAULT_MODEL.to_string();
    }

    let sink = create_sink(&config.logging).context("failed to open event log")?;
    let registry = ModelRegistry::new(sink.clone()).into_shared();
    let pipeline = PipelineManager::with_components(
        config.pipeline.clone(),
        backend,
        registry,
        Arc::new(MetricsCollector::new()),
        sink,
    )
    .context("failed to initialize the inference pipeline")?;

    Ok((config, pipeline))
}
