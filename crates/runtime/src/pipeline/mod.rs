//! Inference pipeline
//!
//! [`PipelineManager::infer`] normalizes the input, runs the active model,
//! validates the output and, on an error or a rejected output, asks the
//! [`crate::models::ModelRegistry`] for a fallback and retries on it.

pub mod manager;
pub mod output;
pub mod preprocess;
pub mod result;
pub mod state;

pub use manager::{PipelineManager, EMPTY_INPUT_ERROR};
pub use output::DEFAULT_CATEGORIES;
pub use preprocess::{normalize_text, Preprocessed};
pub use result::{
    ConfidenceLevel, InferenceMetadata, InferenceResponse, InferenceResult, PipelineInfo,
    ResponseStatus, MAX_RETURNED_TOKENS,
};
