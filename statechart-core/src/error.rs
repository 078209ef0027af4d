//! Core error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the statechart engine.
///
/// These cover API misuse and bad input documents. Problems that arise while
/// a machine is running (guard failures, history gaps, illegal candidate
/// configurations) go to the [`ErrorReporter`](crate::reporter::ErrorReporter)
/// instead and never surface here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("unknown state: {state}")]
    UnknownState { state: String },

    #[error("interpreter not started")]
    NotStarted,

    #[error("interpreter already started")]
    AlreadyStarted,

    #[error("interpreter terminated, cannot process '{event}'")]
    Terminated { event: String },

    #[error("macrostep exceeded {limit} microsteps")]
    MicrostepLimit { limit: usize },

    #[error("illegal configuration: {reason}")]
    IllegalConfiguration { reason: String },

    #[error("document not found: {name}")]
    DocumentNotFound { name: String },

    #[error("document already exists with a different checksum: {name}")]
    DocumentExists { name: String },

    #[error("instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("instance already exists: {instance_id}")]
    InstanceExists { instance_id: String },

    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns a stable error code for display and scripting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDocument { .. } => "INVALID_DOCUMENT",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::NotStarted => "NOT_STARTED",
            CoreError::AlreadyStarted => "ALREADY_STARTED",
            CoreError::Terminated { .. } => "TERMINATED",
            CoreError::MicrostepLimit { .. } => "MICROSTEP_LIMIT",
            CoreError::IllegalConfiguration { .. } => "ILLEGAL_CONFIG",
            CoreError::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            CoreError::DocumentExists { .. } => "DOCUMENT_EXISTS",
            CoreError::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            CoreError::InstanceExists { .. } => "INSTANCE_EXISTS",
            CoreError::InvalidExpression { .. } => "BAD_REQUEST",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }

    pub(crate) fn invalid_document(reason: impl Into<String>) -> Self {
        CoreError::InvalidDocument {
            reason: reason.into(),
        }
    }
}

/// Failure raised by an [`Evaluator`](crate::eval::Evaluator).
///
/// Always reported through the error channel; never aborts a macrostep.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("cannot parse '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    #[error("type mismatch at {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot assign to '{location}': {reason}")]
    Assign { location: String, reason: String },
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}
