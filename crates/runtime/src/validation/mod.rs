//! Confidence scoring and structural checks for inference outputs.
//!
//! An output is accepted when its confidence (the highest clamped class
//! score) reaches the threshold and no [`IssueCode`] applies.

pub mod validator;

pub use validator::{
    IssueCode, OutputValidator, ReportMetadata, ReportStatus, ValidationReport, ValidationResult,
};
