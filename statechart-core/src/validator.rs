//! Configuration legality.
//!
//! A configuration is legal when, for every state it (transitively) makes
//! active:
//! - a parallel state has all of its regions active,
//! - a compound state has at most one child active,
//! - at most one top-level state is active.
//!
//! The check works on any candidate set, not only live configurations, so it
//! doubles as a runtime assertion and as a standalone verification utility.

use crate::model::{StateId, StateKind, StateTree};
use crate::reporter::{codes, ErrorContext, ErrorReporter};
use std::collections::{BTreeMap, BTreeSet};

/// Returns true if `states` is a legal configuration of `tree`.
///
/// On the first violation found exactly one report goes to `reporter` and
/// `false` is returned. Parents are examined in document order, then the top
/// level. An empty candidate set is legal.
pub fn is_legal_configuration<I>(tree: &StateTree, states: I, reporter: &dyn ErrorReporter) -> bool
where
    I: IntoIterator<Item = StateId>,
{
    let candidates: BTreeSet<StateId> = states.into_iter().collect();
    if candidates.is_empty() {
        return true;
    }

    // parent -> active children, with every ancestor of a candidate implied active.
    let mut counts: BTreeMap<StateId, BTreeSet<StateId>> = BTreeMap::new();
    let mut top_level: BTreeSet<StateId> = BTreeSet::new();
    for &state in &candidates {
        if tree.get(state).is_parallel() {
            counts.entry(state).or_default();
        }
        let mut current = state;
        while let Some(parent) = tree.parent(current) {
            counts.entry(parent).or_default().insert(current);
            current = parent;
        }
        top_level.insert(current);
    }

    for (&parent, active) in &counts {
        let node = tree.get(parent);
        match &node.kind {
            StateKind::Parallel => {
                let required = tree.regions(parent).count();
                let present = active.iter().filter(|c| !tree.get(**c).is_history()).count();
                if present < required {
                    reporter.on_error(
                        codes::ILLEGAL_CONFIG,
                        &format!("Not all AND states active for parallel {}", node.id),
                        &group_context(tree, active),
                    );
                    return false;
                }
            }
            StateKind::Compound { .. } => {
                if active.len() > 1 {
                    reporter.on_error(
                        codes::ILLEGAL_CONFIG,
                        &format!("Multiple OR states active for state {}", node.id),
                        &group_context(tree, active),
                    );
                    return false;
                }
            }
            // Leaves and history states have no children to count.
            StateKind::Simple | StateKind::Final | StateKind::History { .. } => {}
        }
    }

    if top_level.len() > 1 {
        reporter.on_error(
            codes::ILLEGAL_CONFIG,
            "Multiple top-level OR states active!",
            &group_context(tree, &top_level),
        );
        return false;
    }

    true
}

fn group_context(tree: &StateTree, group: &BTreeSet<StateId>) -> ErrorContext {
    ErrorContext::States {
        ids: group.iter().map(|s| tree.id_of(*s).to_string()).collect(),
    }
}
