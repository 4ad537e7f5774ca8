//! Loop state for [`super::PipelineManager::infer`].
//!
//! The retry, validate and fallback cycle is a small state machine. Each
//! step owns what it needs, so a switch can never leave a half-updated
//! active model behind.

use crate::models::{FailureReason, ModelBundle};
use crate::validation::{ValidationReport, ValidationResult};

use super::result::{InferenceResponse, InferenceResult};

/// The model currently serving requests, with the registry name it was
/// selected under.
pub struct ActiveModel {
    pub name: String,
    pub bundle: ModelBundle,
}

impl ActiveModel {
    pub fn new(name: impl Into<String>, bundle: ModelBundle) -> Self {
        Self {
            name: name.into(),
            bundle,
        }
    }
}

/// Caps attempts at the number of registered models, and at the configured
/// retries plus the first try. Always allows at least one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max: usize,
    used: usize,
}

impl AttemptBudget {
    pub fn new(registered_models: usize, max_retries: u32) -> Self {
        let by_retries = (max_retries as usize).saturating_add(1);
        Self {
            max: registered_models.min(by_retries).max(1),
            used: 0,
        }
    }

    pub fn consume(&mut self) {
        self.used += 1;
    }

    pub fn has_remaining(&self) -> bool {
        self.used < self.max
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// An attempt's result with its validation attached.
pub struct Judged {
    pub result: InferenceResult,
    pub validation: ValidationResult,
    pub report: ValidationReport,
}

/// What failed, carried into the fallback step so the terminal response can
/// report it when no switch happens.
pub enum Failure {
    Error(String),
    Rejected(Box<Judged>),
}

impl Failure {
    pub fn reason(&self) -> FailureReason {
        match self {
            Failure::Error(_) => FailureReason::Error,
            Failure::Rejected(_) => FailureReason::LowConfidence,
        }
    }
}

pub enum Step {
    Attempt,
    Validate(InferenceResult),
    Fallback(Failure),
    Done(InferenceResponse),
}
