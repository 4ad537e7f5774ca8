//! Configuration management for the Geko runtime
//!
//! Provides configuration loading from TOML files and environment variables,
//! validation, and the defaults the pipeline runs with when nothing is set.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Pretrained identifier loaded when no model is configured.
pub const DEFAULT_MODEL_NAME: &str = "bert-base-uncased";

/// Minimum confidence accepted without a retry when nothing else is configured.
pub const DEFAULT_VALIDATION_THRESHOLD: f64 = 0.6;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GekoConfig {
    /// HTTP surface configuration
    pub api: ApiConfig,
    /// Diagnostic logging configuration
    pub logging: LoggingConfig,
    /// Inference pipeline configuration
    pub pipeline: PipelineConfig,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
    /// Structured pipeline event log. `None` keeps events in the tracing stream only.
    pub event_log: Option<EventLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            event_log: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Rotating JSON-lines event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_backup_count() -> usize {
    5
}

impl EventLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: default_max_bytes(),
            backup_count: default_backup_count(),
        }
    }
}

/// A candidate model the pipeline may fall back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackModelConfig {
    pub name: String,
    /// Identifier handed to the loader; defaults to `name`
    #[serde(default)]
    pub path: Option<String>,
    /// Lower value = more preferred
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    1
}

impl FallbackModelConfig {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            path: None,
            priority,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Inference pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_name: String,
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    /// "cpu", "cuda", "cuda:N" or "metal"
    pub device: String,
    /// Tokenization truncation bound
    pub max_length: usize,
    pub validation_threshold: f64,
    pub fallback_models: Vec<FallbackModelConfig>,
    pub max_validation_retries: u32,
    pub trust_remote_code: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            use_cache: true,
            cache_dir: default_cache_dir(),
            device: "cpu".to_string(),
            max_length: 128,
            validation_threshold: DEFAULT_VALIDATION_THRESHOLD,
            fallback_models: Vec::new(),
            max_validation_retries: 2,
            trust_remote_code: false,
        }
    }
}

/// `~/.geko/cache/models`, or a temp dir when no home directory is known
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(".geko")
        .join("cache")
        .join("models")
}

impl PipelineConfig {
    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "pipeline.model_name".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.validation_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.validation_threshold".to_string(),
                reason: format!("{} is outside [0, 1]", self.validation_threshold),
            });
        }

        if self.max_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_length".to_string(),
                reason: "max_length must be > 0".to_string(),
            });
        }

        if !is_supported_device(&self.device) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.device".to_string(),
                reason: format!(
                    "'{}' is not one of cpu, cuda, cuda:<n>, metal",
                    self.device
                ),
            });
        }

        for (index, fallback) in self.fallback_models.iter().enumerate() {
            if fallback.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("pipeline.fallback_models[{}].name", index),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn is_supported_device(device: &str) -> bool {
    match device {
        "cpu" | "cuda" | "metal" => true,
        other => other
            .strip_prefix("cuda:")
            .map(|ordinal| !ordinal.is_empty() && ordinal.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false),
    }
}

impl GekoConfig {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Overlay environment variables onto an existing configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(model_name) = env::var("GEKO_MODEL_NAME") {
            self.pipeline.model_name = model_name;
        }

        if let Ok(device) = env::var("GEKO_DEVICE") {
            self.pipeline.device = device;
        }

        if let Ok(max_length) = env::var("GEKO_MAX_LENGTH") {
            self.pipeline.max_length = parse_env("GEKO_MAX_LENGTH", &max_length)?;
        }

        if let Ok(threshold) = env::var("GEKO_VALIDATION_THRESHOLD") {
            self.pipeline.validation_threshold =
                parse_env("GEKO_VALIDATION_THRESHOLD", &threshold)?;
        }

        if let Ok(retries) = env::var("GEKO_MAX_VALIDATION_RETRIES") {
            self.pipeline.max_validation_retries =
                parse_env("GEKO_MAX_VALIDATION_RETRIES", &retries)?;
        }

        if let Ok(use_cache) = env::var("GEKO_USE_CACHE") {
            self.pipeline.use_cache = parse_env("GEKO_USE_CACHE", &use_cache)?;
        }

        if let Ok(trust) = env::var("GEKO_TRUST_REMOTE_CODE") {
            self.pipeline.trust_remote_code = parse_env("GEKO_TRUST_REMOTE_CODE", &trust)?;
        }

        if let Ok(cache_dir) = env::var("GEKO_CACHE_DIR") {
            self.pipeline.cache_dir = PathBuf::from(cache_dir);
        }

        if let Ok(host) = env::var("API_HOST") {
            self.api.host = host;
        }

        if let Ok(port) = env::var("API_PORT") {
            self.api.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "API_PORT".to_string(),
                reason: "Invalid port number".to_string(),
            })?;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(event_log) = env::var("GEKO_EVENT_LOG") {
            self.logging.event_log = Some(EventLogConfig::new(event_log));
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.port".to_string(),
                reason: "Port cannot be 0".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("Must be one of: {}", valid_levels.join(", ")),
            });
        }

        self.pipeline.validate()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("cannot parse '{}'", raw),
    })
}
