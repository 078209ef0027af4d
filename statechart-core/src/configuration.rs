//! The set of active states of a running machine.

use crate::error::CoreError;
use crate::model::{StateId, StateTree};
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::iter::Copied;

/// Active states, iterated in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    states: BTreeSet<StateId>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from document identifiers.
    pub fn from_ids<S: AsRef<str>>(tree: &StateTree, ids: &[S]) -> Result<Self, CoreError> {
        ids.iter().map(|id| tree.lookup(id.as_ref())).collect()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains(&id)
    }

    pub fn insert(&mut self, id: StateId) -> bool {
        self.states.insert(id)
    }

    pub fn remove(&mut self, id: StateId) -> bool {
        self.states.remove(&id)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Active states in document order.
    pub fn iter(&self) -> Copied<btree_set::Iter<'_, StateId>> {
        self.states.iter().copied()
    }

    /// Active atomic (simple or final) states in document order.
    pub fn atomic(&self, tree: &StateTree) -> Vec<StateId> {
        self.iter().filter(|s| tree.get(*s).is_atomic()).collect()
    }

    /// Active state identifiers in document order.
    pub fn ids(&self, tree: &StateTree) -> Vec<String> {
        self.iter().map(|s| tree.id_of(s).to_string()).collect()
    }

    /// Returns true if any active state is a proper descendant of `ancestor`.
    pub fn has_descendant_of(&self, tree: &StateTree, ancestor: StateId) -> bool {
        self.iter().any(|s| tree.is_descendant(s, ancestor))
    }
}

impl FromIterator<StateId> for Configuration {
    fn from_iter<I: IntoIterator<Item = StateId>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Configuration {
    type Item = StateId;
    type IntoIter = Copied<btree_set::Iter<'a, StateId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
