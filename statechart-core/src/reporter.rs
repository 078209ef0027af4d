//! Error reporting channel.
//!
//! The engine hands every detected problem to an [`ErrorReporter`] as a
//! `(code, detail, context)` triple. Reporting never fails back into the
//! engine; whether a report is fatal is the caller's decision.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes passed to [`ErrorReporter::on_error`].
pub mod codes {
    /// A candidate configuration breaks the OR/AND composition rules.
    pub const ILLEGAL_CONFIG: &str = "ILLEGAL_CONFIG";
    /// A guard or value expression failed to evaluate.
    pub const EXPRESSION_ERROR: &str = "EXPRESSION_ERROR";
    /// An action failed while executing.
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
    /// A history state had neither a snapshot nor a default transition.
    pub const HISTORY_FALLBACK: &str = "HISTORY_FALLBACK";
}

/// The offending object attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorContext {
    /// A set of state identifiers (e.g. the violating group).
    States { ids: Vec<String> },
    /// A single state.
    State { id: String },
    /// A transition, identified by its source state and document rank.
    Transition { source: String, rank: usize },
    /// Executable content attached to a state.
    Action { state: String },
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorContext::States { ids } => write!(f, "states [{}]", ids.join(", ")),
            ErrorContext::State { id } => write!(f, "state '{}'", id),
            ErrorContext::Transition { source, rank } => {
                write!(f, "transition #{} from '{}'", rank, source)
            }
            ErrorContext::Action { state } => write!(f, "action in '{}'", state),
        }
    }
}

/// Sink for engine-detected problems.
pub trait ErrorReporter: Send + Sync {
    fn on_error(&self, code: &str, detail: &str, context: &ErrorContext);
}

/// Reporter that logs through `tracing` at WARN level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn on_error(&self, code: &str, detail: &str, context: &ErrorContext) {
        tracing::warn!(code, %context, "{}", detail);
    }
}

/// A report captured by [`CollectingReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub code: String,
    pub detail: String,
    pub context: ErrorContext,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.code, self.detail, self.context)
    }
}

/// Reporter that keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything reported so far.
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Removes and returns everything reported so far.
    pub fn take(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Returns the most recent report, if any.
    pub fn last(&self) -> Option<Report> {
        self.reports.lock().last().cloned()
    }
}

impl ErrorReporter for CollectingReporter {
    fn on_error(&self, code: &str, detail: &str, context: &ErrorContext) {
        self.reports.lock().push(Report {
            code: code.to_string(),
            detail: detail.to_string(),
            context: context.clone(),
        });
    }
}
