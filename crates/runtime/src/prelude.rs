//! Everything a host needs to build and drive a pipeline:
//!
//! ```ignore
//! use geko_runtime::prelude::*;
//! ```

// Configuration
pub use crate::config::{FallbackModelConfig, GekoConfig, PipelineConfig};

// Pipeline
pub use crate::pipeline::{InferenceResponse, PipelineInfo, PipelineManager, ResponseStatus};

// Models
pub use crate::models::{
    FailureReason, FallbackDecision, LexiconBackend, ModelBackend, ModelRegistry, SharedRegistry,
};

#[cfg(feature = "candle-backend")]
pub use crate::models::CandleBertBackend;

// Validation
pub use crate::validation::{IssueCode, OutputValidator, ValidationResult};

// Telemetry and metrics
pub use crate::metrics::MetricsCollector;
pub use crate::telemetry::{EventSink, MemorySink, TracingSink};

// Errors
pub use crate::types::{InferenceError, LoadError, PipelineError};
