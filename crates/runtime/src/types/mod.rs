//! Shared types for the Geko runtime

pub mod error;

pub use error::{InferenceError, LoadError, PipelineError};
