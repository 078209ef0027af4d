//! Events and event descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An event presented to a running machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated event name, e.g. `error.execution`.
    pub name: String,

    /// Opaque payload, visible to guards as `_event.data`.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Completion event for a compound or parallel state.
    pub fn done_state(state_id: &str) -> Self {
        Self::new(format!("done.state.{}", state_id))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single token of a transition's `event` attribute.
///
/// Matching is by dot-separated prefix: `error` matches `error` and
/// `error.execution` but not `errors`. `*` matches every event and a
/// trailing `.*` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDescriptor(String);

impl EventDescriptor {
    pub fn new(descriptor: impl Into<String>) -> Self {
        let mut descriptor = descriptor.into();
        if descriptor.ends_with(".*") {
            descriptor.truncate(descriptor.len() - 2);
        }
        if descriptor.ends_with('.') {
            descriptor.pop();
        }
        Self(descriptor)
    }

    /// Splits a space-separated `event` attribute into descriptors.
    pub fn parse_list(attr: &str) -> Vec<Self> {
        attr.split_whitespace().map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, event_name: &str) -> bool {
        if self.0 == "*" {
            return true;
        }
        match event_name.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let d = EventDescriptor::new("go");
        assert!(d.matches("go"));
        assert!(!d.matches("gone"));
        assert!(!d.matches("stop"));
    }

    #[test]
    fn test_prefix_match() {
        let d = EventDescriptor::new("error");
        assert!(d.matches("error"));
        assert!(d.matches("error.execution"));
        assert!(d.matches("error.execution.assign"));
        assert!(!d.matches("errors"));
    }

    #[test]
    fn test_wildcard_suffix_ignored() {
        let d = EventDescriptor::new("done.state.*");
        assert_eq!(d.as_str(), "done.state");
        assert!(d.matches("done.state.main"));
        assert!(!d.matches("done.invoke.x"));
    }

    #[test]
    fn test_star_matches_everything() {
        let d = EventDescriptor::new("*");
        assert!(d.matches("anything"));
        assert!(d.matches("a.b.c"));
    }

    #[test]
    fn test_parse_list() {
        let list = EventDescriptor::parse_list("  go   stop.now ");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].as_str(), "go");
        assert_eq!(list[1].as_str(), "stop.now");
        assert!(EventDescriptor::parse_list("").is_empty());
    }

    #[test]
    fn test_done_state_event() {
        let e = Event::done_state("main");
        assert_eq!(e.name, "done.state.main");
        assert_eq!(e.data, Value::Null);
    }
}
