//! Error taxonomy for the Geko inference runtime
//!
//! Only construction-time failures ever leave the runtime as `Err`. Everything
//! that goes wrong inside an `infer` call is converted into data on the
//! returned [`crate::pipeline::InferenceResponse`].

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// A model, tokenizer or config could not be resolved.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model not found: {identifier}")]
    NotFound { identifier: String },

    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model {identifier}: {reason}")]
    InvalidModel { identifier: String, reason: String },

    #[error("Download failed for {identifier}: {reason}")]
    Download { identifier: String, reason: String },

    #[error("Unsupported model source for {identifier}: {reason}")]
    Unsupported { identifier: String, reason: String },
}

impl LoadError {
    /// Whether another resolution source could still succeed for the same
    /// identifier. A corrupt cache entry is retryable against the hub; an
    /// unsupported source is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadError::Io { .. } | LoadError::InvalidModel { .. } | LoadError::NotFound { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The forward pass raised or produced an unusable shape.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Tokenization failed: {reason}")]
    Tokenization { reason: String },

    #[error("Forward pass failed on {model}: {reason}")]
    Forward { model: String, reason: String },

    #[error("Unusable model output: {reason}")]
    UnusableOutput { reason: String },
}

/// Failures that abort construction of a [`crate::pipeline::PipelineManager`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Initial model load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
