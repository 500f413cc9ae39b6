//! Error types for the engine.
//!
//! No error in this crate is fatal to the process. Every variant is scoped to
//! the active form, report, or wizard and leaves committed data intact.

use indexmap::IndexMap;
use thiserror::Error;

/// Per-field static validation messages, keyed by value-bag key in schema order.
pub type ValidationErrors = IndexMap<String, String>;

/// Configuration problems detected when a schema is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field key must not be empty")]
    EmptyKey,

    #[error("duplicate field key '{0}'")]
    DuplicateKey(String),

    #[error("field '{field}' depends on unknown field '{parent}'")]
    UnknownDependency { field: String, parent: String },

    #[error("field '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("remote validation for '{field}' references unknown field '{reference}'")]
    UnknownValidationField { field: String, reference: String },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("'{name}' must declare at least one {what}")]
    Empty { name: String, what: &'static str },
}

/// Runtime errors raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A multi-filter template was built without a required parent value.
    #[error("missing dependency value for '{0}'")]
    MissingDependency(String),

    /// Transport error or malformed response while fetching.
    #[error("fetch for '{target}' failed: {reason}")]
    FetchFailure { target: String, reason: String },

    /// Remote validation rejected a value.
    #[error("validation of '{field}' failed: {message}")]
    ValidationFailure { field: String, message: String },

    /// One or more mandatory fields are empty.
    #[error("{} field(s) failed validation", .0.len())]
    StaticValidationFailure(ValidationErrors),

    /// Stage or final submit rejected by the backend.
    #[error("submission of '{stage}' failed: {message}")]
    SubmissionFailure { stage: String, message: String },

    /// A navigation or wizard transition is not allowed in the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl EngineError {
    pub(crate) fn fetch(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::FetchFailure {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Static validation messages, when this is a static validation failure.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::StaticValidationFailure(errors) => Some(errors),
            _ => None,
        }
    }
}
