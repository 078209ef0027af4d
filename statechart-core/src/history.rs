//! Per-instance history snapshots.

use crate::configuration::Configuration;
use crate::model::{StateId, StateKind, StateTree};
use std::collections::BTreeMap;

/// Last recorded sub-configuration per history state.
///
/// Owned by one running instance; written whenever a history state's parent
/// is exited and read when the history state is entered again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStore {
    records: BTreeMap<StateId, Vec<StateId>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, history: StateId) -> Option<&[StateId]> {
        self.records.get(&history).map(Vec::as_slice)
    }

    pub fn set(&mut self, history: StateId, states: Vec<StateId>) {
        self.records.insert(history, states);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Recorded entries in document order of the history states.
    pub fn iter(&self) -> impl Iterator<Item = (StateId, &[StateId])> {
        self.records.iter().map(|(h, s)| (*h, s.as_slice()))
    }

    /// Snapshots every history child of `exiting` from `configuration`.
    ///
    /// Deep history keeps the active atomic descendants, shallow history the
    /// active children. Must run before `exiting` leaves the configuration.
    pub fn record_exit(&mut self, tree: &StateTree, exiting: StateId, configuration: &Configuration) {
        for history in tree.history_children(exiting) {
            let deep = matches!(tree.get(history).kind, StateKind::History { deep: true, .. });
            let snapshot: Vec<StateId> = configuration
                .iter()
                .filter(|s| {
                    if deep {
                        tree.get(*s).is_atomic() && tree.is_descendant(*s, exiting)
                    } else {
                        tree.parent(*s) == Some(exiting)
                    }
                })
                .collect();
            tracing::trace!(
                history = tree.id_of(history),
                recorded = snapshot.len(),
                "recorded history"
            );
            self.set(history, snapshot);
        }
    }
}
