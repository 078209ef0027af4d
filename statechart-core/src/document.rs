//! Statechart documents.
//!
//! Documents use a nested JSON DSL:
//!
//! ```json
//! {
//!   "initial": "idle",
//!   "datamodel": {"count": 0},
//!   "states": [
//!     {"id": "idle", "transitions": [{"event": "start", "target": "running"}]},
//!     {"id": "running", "type": "parallel", "states": [
//!       {"id": "motor", "states": [{"id": "spinning"}]},
//!       {"id": "lamp", "states": [{"id": "lit"}]}
//!     ], "transitions": [
//!       {"event": "stop", "target": "idle", "cond": "ctx.count > 2"}
//!     ]},
//!     {"id": "done", "type": "final"}
//!   ]
//! }
//! ```

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::eval::{GuardExpr, JsonDataModel, ValueExpr};
use crate::executor::Interpreter;
use crate::model::{Action, StateTree, StateTreeBuilder, TransitionKind, TransitionSpec};
use crate::reporter::ErrorReporter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Declared type of a state object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    /// Simple or compound, depending on whether it has children.
    #[default]
    State,
    Parallel,
    Final,
    History,
}

/// A state object as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRaw {
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: StateType,

    /// Explicit default entry targets (compound states only).
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub initial: Vec<String>,

    /// History depth (history states only).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deep: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<StateRaw>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionRaw>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub onentry: Vec<Action>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub onexit: Vec<Action>,
}

/// A transition object as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRaw {
    /// Space-separated event descriptors. Missing means eventless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: TransitionKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct OneOrManyVisitor;

    impl<'de> Visitor<'de> for OneOrManyVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state id or array of state ids")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.split_whitespace().map(str::to_string).collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut ids = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                ids.push(s);
            }
            Ok(ids)
        }
    }

    deserializer.deserialize_any(OneOrManyVisitor)
}

/// Raw document as stored/transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Targets of the initial transition. Missing means the first state.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub initial: Vec<String>,

    /// Initial datamodel for new instances.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub datamodel: Value,

    pub states: Vec<StateRaw>,
}

/// Validated statechart document.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,

    /// Compiled state tree, shared by every instance.
    pub tree: Arc<StateTree>,

    pub datamodel: Value,

    /// Original raw document for storage.
    pub raw: DocumentRaw,

    /// Hash of the document for idempotent registration.
    pub checksum: String,
}

impl Document {
    /// Parses and validates a document from JSON.
    pub fn from_json(name: impl Into<String>, json: &Value) -> Result<Self, CoreError> {
        let raw: DocumentRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(name, raw)
    }

    /// Parses and validates a document from JSON text.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, CoreError> {
        let raw: DocumentRaw = serde_json::from_str(text)?;
        Self::from_raw(name, raw)
    }

    /// Creates a document from raw parts.
    pub fn from_raw(name: impl Into<String>, raw: DocumentRaw) -> Result<Self, CoreError> {
        let name = name.into();

        let mut builder = StateTree::builder();
        builder.name(name.clone());
        for state in &raw.states {
            declare(&mut builder, state, None)?;
        }
        if !raw.initial.is_empty() {
            let targets: Vec<&str> = raw.initial.iter().map(String::as_str).collect();
            builder.document_initial(&targets);
        }
        let tree = builder.build()?;

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        tracing::debug!(
            document = %name,
            states = tree.len(),
            transitions = tree.transition_count(),
            checksum = %checksum,
            "compiled document"
        );

        Ok(Self {
            name,
            tree: Arc::new(tree),
            datamodel: raw.datamodel.clone(),
            raw,
            checksum,
        })
    }

    /// Returns the raw document as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }

    /// Creates an unstarted instance with a fresh copy of the datamodel.
    pub fn interpreter(&self, reporter: Arc<dyn ErrorReporter>, config: EngineConfig) -> Interpreter<JsonDataModel> {
        Interpreter::new(
            Arc::clone(&self.tree),
            JsonDataModel::new(self.datamodel.clone()),
            reporter,
            config,
        )
    }
}

fn declare(builder: &mut StateTreeBuilder, raw: &StateRaw, parent: Option<&str>) -> Result<(), CoreError> {
    let id = raw.id.as_str();
    match raw.kind {
        StateType::State => builder.state(id, parent),
        StateType::Parallel => builder.parallel(id, parent),
        StateType::Final => builder.final_state(id, parent),
        StateType::History => {
            let parent = parent.ok_or_else(|| {
                CoreError::invalid_document(format!("history state '{}' must have a parent", id))
            })?;
            builder.history(id, parent, raw.deep)
        }
    };

    if !raw.initial.is_empty() {
        let targets: Vec<&str> = raw.initial.iter().map(String::as_str).collect();
        builder.initial(id, &targets);
    }

    for action in &raw.onentry {
        check_action(id, action)?;
        builder.on_entry(id, action.clone());
    }
    for action in &raw.onexit {
        check_action(id, action)?;
        builder.on_exit(id, action.clone());
    }

    for t in &raw.transitions {
        let mut spec = TransitionSpec::new().kind(t.kind);
        if let Some(event) = &t.event {
            spec = spec.event(event);
        }
        for target in &t.target {
            spec = spec.target(target.as_str());
        }
        if let Some(cond) = &t.cond {
            GuardExpr::parse(cond).map_err(|e| {
                CoreError::invalid_document(format!("guard on transition from '{}': {}", id, e))
            })?;
            spec = spec.cond(cond.as_str());
        }
        for action in &t.actions {
            check_action(id, action)?;
            spec = spec.action(action.clone());
        }
        builder.transition(id, spec);
    }

    for child in &raw.states {
        declare(builder, child, Some(id))?;
    }
    Ok(())
}

fn check_action(state: &str, action: &Action) -> Result<(), CoreError> {
    let expr = match action {
        Action::Assign { location, expr } => {
            if !location.starts_with("ctx.") {
                return Err(CoreError::invalid_document(format!(
                    "assign in '{}' targets '{}', expected a 'ctx.' location",
                    state, location
                )));
            }
            Some(expr)
        }
        Action::Log { expr, .. } => expr.as_ref(),
        Action::Raise(event) => {
            if event.trim().is_empty() {
                return Err(CoreError::invalid_document(format!(
                    "raise in '{}' has an empty event name",
                    state
                )));
            }
            None
        }
    };
    if let Some(expr) = expr {
        ValueExpr::parse(expr).map_err(|e| {
            CoreError::invalid_document(format!("expression in '{}': {}", state, e))
        })?;
    }
    Ok(())
}
