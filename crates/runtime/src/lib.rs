//! Geko inference runtime
//!
//! Runs text through a classification model, scores the output, and recovers
//! from errors or low-confidence results by switching to the next model in a
//! prioritized registry.
//!
//! ```ignore
//! use geko_runtime::prelude::*;
//!
//! let pipeline = PipelineManager::new(PipelineConfig::default(), Arc::new(LexiconBackend::new()))?;
//! ```

pub mod config;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod prelude;
pub mod telemetry;
pub mod types;
pub mod validation;

#[cfg(feature = "http-api")]
pub mod api;

// Re-export commonly used types
pub use config::{GekoConfig, PipelineConfig};
pub use models::{ModelRegistry, ModelLoader};
pub use pipeline::{InferenceResponse, PipelineManager};
pub use types::*;
pub use validation::OutputValidator;
