//! # statechart-core
//!
//! Statechart interpreter with hierarchical (OR) and parallel (AND) states.
//!
//! This crate provides:
//! - An arena state tree built from JSON documents or a builder
//! - Configuration legality checking
//! - Optimal enabled transition set selection with conflict resolution
//! - Exit/entry set computation, including shallow and deep history
//! - A run-to-completion step executor with snapshot/restore
//! - A registry of documents and instances for concurrent use
//!
//! Problems found while a machine runs never abort it; they go to an
//! [`ErrorReporter`] as `(code, detail, context)`.

pub mod config;
pub mod configuration;
pub mod document;
pub mod engine;
pub mod entry_exit;
pub mod error;
pub mod eval;
pub mod event;
pub mod executor;
pub mod history;
pub mod model;
pub mod reporter;
pub mod selector;
pub mod validator;

pub use config::EngineConfig;
pub use configuration::Configuration;
pub use document::{Document, DocumentRaw};
pub use engine::{InstanceInfo, StatechartEngine};
pub use entry_exit::{compute_entry_set, compute_exit_set, EntrySet};
pub use error::{ConfigError, CoreError, EvalError};
pub use eval::{Evaluator, GuardExpr, JsonDataModel, Scope};
pub use event::{Event, EventDescriptor};
pub use executor::{ExecutionState, InstanceSnapshot, Interpreter, MacrostepOutcome, MicrostepOutcome};
pub use history::HistoryStore;
pub use model::{Action, StateId, StateKind, StateNode, StateTree, StateTreeBuilder, Transition, TransitionId, TransitionKind, TransitionSpec};
pub use reporter::{CollectingReporter, ErrorContext, ErrorReporter, Report, TracingReporter};
pub use selector::select_transitions;
pub use validator::is_legal_configuration;
