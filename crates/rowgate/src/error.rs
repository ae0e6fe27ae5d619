//! Error types for the access layer.
//!
//! Validation failures and execution faults are collected on the access
//! object and reported through failure sentinels; only gateway configuration
//! mistakes surface as returned errors.

use std::fmt;

/// Result alias for access-layer operations.
pub type AccessResult<T> = Result<T, AccessError>;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result alias for gateway resolution.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A single field-level failure reported by a record's validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// An entry in an access object's error log.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessError {
    /// The record's own validation rejected a save or update.
    #[error("validation failed: {}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    /// The engine or driver failed while executing a statement.
    #[error("execution fault: {0}")]
    Execution(String),
}

impl AccessError {
    /// The validation failures carried by this entry, if any.
    pub fn violations(&self) -> &[ValidationError] {
        match self {
            AccessError::Validation(errors) => errors,
            AccessError::Execution(_) => &[],
        }
    }
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by an execution engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("unsupported expression: {0}")]
    Unsupported(String),

    #[error("transaction error: {0}")]
    Transaction(String),
}

impl From<EngineError> for AccessError {
    fn from(err: EngineError) -> Self {
        AccessError::Execution(err.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Execution(err.to_string())
    }
}

/// Errors raised by gateway resolution; the only faults this layer returns
/// rather than logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("no access layer configured for model `{0}`; call Gateway::configure first")]
    NotConfigured(&'static str),
}
