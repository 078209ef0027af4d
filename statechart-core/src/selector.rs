//! Transition selection.
//!
//! Picks the optimal enabled transition set for one microstep: at most one
//! transition per active atomic state, found by walking from the atomic state
//! outwards, then pruned so that no two selected transitions exit the same
//! state.

use crate::configuration::Configuration;
use crate::entry_exit::transition_exit_set;
use crate::eval::{Evaluator, Scope};
use crate::event::Event;
use crate::history::HistoryStore;
use crate::model::{StateId, StateTree, TransitionId};
use crate::reporter::{codes, ErrorContext, ErrorReporter};
use std::collections::HashMap;

/// Selects the transitions to take for `event`, or the eventless ones when
/// `event` is `None`.
///
/// The result is conflict free and ordered by source state in document
/// order, then by transition rank. Guard failures are reported as
/// `EXPRESSION_ERROR` and leave the transition disabled.
pub fn select_transitions<E>(
    tree: &StateTree,
    configuration: &Configuration,
    history: &HistoryStore,
    event: Option<&Event>,
    evaluator: &mut E,
    reporter: &dyn ErrorReporter,
) -> Vec<TransitionId>
where
    E: Evaluator + ?Sized,
{
    let in_state = |id: &str| tree.state_id(id).is_some_and(|s| configuration.contains(s));
    let scope = Scope::new(event, &in_state);

    // Guards are evaluated once per call even when atomic states share an ancestor.
    let mut guards: HashMap<TransitionId, bool> = HashMap::new();
    let mut enabled: Vec<TransitionId> = Vec::new();

    for atomic in configuration.atomic(tree) {
        let found = std::iter::once(atomic)
            .chain(tree.ancestors(atomic))
            .find_map(|state| first_enabled(tree, state, &scope, evaluator, reporter, &mut guards));
        if let Some(tid) = found {
            if !enabled.contains(&tid) {
                enabled.push(tid);
            }
        }
    }

    let mut selected = remove_conflicts(tree, configuration, history, enabled);
    selected.sort_by_key(|t| (tree.transition(*t).source, tree.transition(*t).rank));
    selected
}

fn first_enabled<E>(
    tree: &StateTree,
    state: StateId,
    scope: &Scope<'_>,
    evaluator: &mut E,
    reporter: &dyn ErrorReporter,
    guards: &mut HashMap<TransitionId, bool>,
) -> Option<TransitionId>
where
    E: Evaluator + ?Sized,
{
    for &tid in &tree.get(state).transitions {
        let transition = tree.transition(tid);
        let matches = match scope.event {
            None => transition.is_eventless(),
            Some(event) => !transition.is_eventless() && transition.matches_event(&event.name),
        };
        if !matches {
            continue;
        }

        let passed = match &transition.cond {
            None => true,
            Some(cond) => *guards.entry(tid).or_insert_with(|| match evaluator.eval_cond(cond, scope) {
                Ok(value) => value,
                Err(e) => {
                    reporter.on_error(
                        codes::EXPRESSION_ERROR,
                        &format!("Guard '{}' failed: {}", cond, e),
                        &ErrorContext::Transition {
                            source: tree.id_of(transition.source).to_string(),
                            rank: transition.rank,
                        },
                    );
                    false
                }
            }),
        };
        if passed {
            return Some(tid);
        }
    }
    None
}

/// Drops transitions whose exit sets intersect an already kept one.
///
/// A transition whose source is a descendant of the kept transition's source
/// replaces it; otherwise the one seen first (document order of the atomic
/// states) wins.
fn remove_conflicts(
    tree: &StateTree,
    configuration: &Configuration,
    history: &HistoryStore,
    enabled: Vec<TransitionId>,
) -> Vec<TransitionId> {
    let mut kept: Vec<TransitionId> = Vec::with_capacity(enabled.len());

    for candidate in enabled {
        let exits = transition_exit_set(tree, candidate, configuration, history);
        let source = tree.transition(candidate).source;
        let mut preempted = false;
        let mut replaced = Vec::new();

        for &other in &kept {
            let other_exits = transition_exit_set(tree, other, configuration, history);
            if exits.is_disjoint(&other_exits) {
                continue;
            }
            if tree.is_descendant(source, tree.transition(other).source) {
                replaced.push(other);
            } else {
                preempted = true;
                break;
            }
        }

        if !preempted {
            kept.retain(|t| !replaced.contains(t));
            kept.push(candidate);
        }
    }

    kept
}
