//! Exit and entry set computation.
//!
//! For a set of selected transitions this module decides which active states
//! leave the configuration (deepest first) and which states join it
//! (shallowest first), including default entry into compound, parallel and
//! history states.

use crate::configuration::Configuration;
use crate::history::HistoryStore;
use crate::model::{StateId, StateKind, StateTree, TransitionId, TransitionKind};
use crate::reporter::{codes, ErrorContext, ErrorReporter};
use std::collections::{BTreeMap, BTreeSet};

/// States to enter for one microstep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySet {
    /// States to enter, in document order (ancestors before descendants).
    pub states: Vec<StateId>,
    /// Compound states entered through their default initial.
    pub default_entry: BTreeSet<StateId>,
    /// History default transitions taken, keyed by the history's parent.
    /// Their actions run right after the parent's entry actions.
    pub history_content: BTreeMap<StateId, TransitionId>,
}

/// Targets of a transition with history states replaced by what entering
/// them would actually activate. Does not report.
pub fn effective_targets(tree: &StateTree, transition: TransitionId, history: &HistoryStore) -> Vec<StateId> {
    let mut out = Vec::new();
    for &target in &tree.transition(transition).targets {
        collect_effective(tree, target, history, &mut out);
    }
    out
}

fn collect_effective(tree: &StateTree, state: StateId, history: &HistoryStore, out: &mut Vec<StateId>) {
    match &tree.get(state).kind {
        StateKind::History { default, .. } => {
            if let Some(recorded) = history.get(state) {
                out.extend_from_slice(recorded);
            } else if let Some(default) = default {
                for &target in &tree.transition(*default).targets {
                    collect_effective(tree, target, history, out);
                }
            } else if let Some(parent) = tree.parent(state) {
                out.extend(tree.default_initial(parent));
            }
        }
        StateKind::Simple | StateKind::Compound { .. } | StateKind::Parallel | StateKind::Final => {
            out.push(state)
        }
    }
}

/// The state whose active descendants a transition exits; `None` is the
/// document root.
///
/// An internal transition whose compound source contains every target is
/// scoped to its source. Otherwise the scope is the least common compound
/// ancestor of source and targets. Parallel states never scope a
/// transition, so moving between regions exits and re-enters the parallel.
pub fn transition_domain(tree: &StateTree, transition: TransitionId, history: &HistoryStore) -> Option<StateId> {
    let t = tree.transition(transition);
    let targets = effective_targets(tree, transition, history);

    if t.kind == TransitionKind::Internal
        && tree.get(t.source).is_compound()
        && targets.iter().all(|s| tree.is_descendant(*s, t.source))
    {
        return Some(t.source);
    }

    let mut scope = Vec::with_capacity(targets.len() + 1);
    scope.push(t.source);
    scope.extend(targets);
    tree.lcca(&scope)
}

/// Active states one transition would exit. Empty for targetless transitions.
pub fn transition_exit_set(
    tree: &StateTree,
    transition: TransitionId,
    configuration: &Configuration,
    history: &HistoryStore,
) -> BTreeSet<StateId> {
    if tree.transition(transition).is_targetless() {
        return BTreeSet::new();
    }
    match transition_domain(tree, transition, history) {
        Some(domain) => configuration
            .iter()
            .filter(|s| tree.is_descendant(*s, domain))
            .collect(),
        None => configuration.iter().collect(),
    }
}

/// States exited by `transitions`, deepest (last in document order) first.
pub fn compute_exit_set(
    tree: &StateTree,
    transitions: &[TransitionId],
    configuration: &Configuration,
    history: &HistoryStore,
) -> Vec<StateId> {
    let mut exit: BTreeSet<StateId> = BTreeSet::new();
    for &t in transitions {
        exit.extend(transition_exit_set(tree, t, configuration, history));
    }
    exit.into_iter().rev().collect()
}

/// Records history for every exiting state. Runs before anything leaves the
/// configuration.
pub fn record_history(
    tree: &StateTree,
    exit_set: &[StateId],
    configuration: &Configuration,
    history: &mut HistoryStore,
) {
    for &state in exit_set {
        history.record_exit(tree, state, configuration);
    }
}

/// States entered by `transitions`, in document order.
pub fn compute_entry_set(
    tree: &StateTree,
    transitions: &[TransitionId],
    history: &HistoryStore,
    reporter: &dyn ErrorReporter,
) -> EntrySet {
    let mut builder = EntryBuilder::new(tree, history, reporter);
    for &t in transitions {
        let transition = tree.transition(t);
        if transition.is_targetless() {
            continue;
        }
        for &target in &transition.targets {
            builder.add_descendants(target);
        }
        let domain = transition_domain(tree, t, history);
        for target in effective_targets(tree, t, history) {
            builder.add_ancestors(target, domain);
        }
    }
    builder.finish()
}

/// States entered by the document's initial transition, in document order.
pub fn compute_initial_entry_set(tree: &StateTree, history: &HistoryStore, reporter: &dyn ErrorReporter) -> EntrySet {
    let mut builder = EntryBuilder::new(tree, history, reporter);
    for &target in tree.initial() {
        builder.add_descendants(target);
        builder.add_ancestors(target, None);
    }
    builder.finish()
}

struct EntryBuilder<'a> {
    tree: &'a StateTree,
    history: &'a HistoryStore,
    reporter: &'a dyn ErrorReporter,
    states: BTreeSet<StateId>,
    default_entry: BTreeSet<StateId>,
    history_content: BTreeMap<StateId, TransitionId>,
}

impl<'a> EntryBuilder<'a> {
    fn new(tree: &'a StateTree, history: &'a HistoryStore, reporter: &'a dyn ErrorReporter) -> Self {
        Self {
            tree,
            history,
            reporter,
            states: BTreeSet::new(),
            default_entry: BTreeSet::new(),
            history_content: BTreeMap::new(),
        }
    }

    fn finish(self) -> EntrySet {
        EntrySet {
            states: self.states.into_iter().collect(),
            default_entry: self.default_entry,
            history_content: self.history_content,
        }
    }

    fn covers(&self, region: StateId) -> bool {
        self.states
            .iter()
            .any(|s| *s == region || self.tree.is_descendant(*s, region))
    }

    fn enter_all(&mut self, targets: &[StateId], parent: StateId) {
        for &s in targets {
            self.add_descendants(s);
        }
        for &s in targets {
            self.add_ancestors(s, Some(parent));
        }
    }

    fn add_descendants(&mut self, state: StateId) {
        let tree = self.tree;
        match &tree.get(state).kind {
            StateKind::History { default, .. } => {
                // History states always have a parent; the builder rejects top-level ones.
                let Some(parent) = tree.parent(state) else {
                    return;
                };
                if let Some(recorded) = self.history.get(state) {
                    let recorded = recorded.to_vec();
                    self.enter_all(&recorded, parent);
                } else if let Some(default) = default {
                    self.history_content.insert(parent, *default);
                    let targets = tree.transition(*default).targets.clone();
                    self.enter_all(&targets, parent);
                } else {
                    self.reporter.on_error(
                        codes::HISTORY_FALLBACK,
                        &format!(
                            "History state {} has no recorded configuration and no default transition, entering default child of {}",
                            tree.id_of(state),
                            tree.id_of(parent)
                        ),
                        &ErrorContext::State {
                            id: tree.id_of(state).to_string(),
                        },
                    );
                    let fallback = tree.default_initial(parent);
                    self.enter_all(&fallback, parent);
                }
            }
            StateKind::Compound { .. } => {
                self.states.insert(state);
                self.default_entry.insert(state);
                let initial = tree.default_initial(state);
                self.enter_all(&initial, state);
            }
            StateKind::Parallel => {
                self.states.insert(state);
                for region in tree.regions(state).collect::<Vec<_>>() {
                    if !self.covers(region) {
                        self.add_descendants(region);
                    }
                }
            }
            StateKind::Simple | StateKind::Final => {
                self.states.insert(state);
            }
        }
    }

    fn add_ancestors(&mut self, state: StateId, domain: Option<StateId>) {
        let tree = self.tree;
        for ancestor in tree.ancestors(state) {
            if Some(ancestor) == domain {
                break;
            }
            self.states.insert(ancestor);
            if tree.get(ancestor).is_parallel() {
                for region in tree.regions(ancestor).collect::<Vec<_>>() {
                    if !self.covers(region) {
                        self.add_descendants(region);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransitionSpec;
    use crate::reporter::CollectingReporter;

    /// ```text
    /// main
    ///   ├── idle
    ///   ├── work (parallel)
    ///   │     ├── left ── l1, l2
    ///   │     └── right ── r1, r2
    ///   └── hist (compound, shallow H + deep H)
    ///         ├── h1 ── h1a, h1b
    ///         └── h2
    /// ```
    fn tree() -> StateTree {
        let mut b = StateTree::builder();
        b.state("main", None)
            .state("idle", Some("main"))
            .parallel("work", Some("main"))
            .state("left", Some("work"))
            .state("l1", Some("left"))
            .state("l2", Some("left"))
            .state("right", Some("work"))
            .state("r1", Some("right"))
            .state("r2", Some("right"))
            .state("hist", Some("main"))
            .history("hs", "hist", false)
            .history("hd", "hist", true)
            .state("h1", Some("hist"))
            .state("h1a", Some("h1"))
            .state("h1b", Some("h1"))
            .state("h2", Some("hist"))
            .transition("idle", TransitionSpec::new().event("start").target("work"))
            .transition("l1", TransitionSpec::new().event("next").target("l2"))
            .transition("l1", TransitionSpec::new().event("cross").target("r2"))
            .transition("idle", TransitionSpec::new().event("deep").target("hd"))
            .transition("idle", TransitionSpec::new().event("shallow").target("hs"))
            .transition("main", TransitionSpec::new().event("inner").target("idle").internal())
            .transition("main", TransitionSpec::new().event("outer").target("idle"))
            .transition("idle", TransitionSpec::new().event("fan").target("l2").target("r2"));
        b.build().unwrap()
    }

    fn names(tree: &StateTree, ids: &[StateId]) -> Vec<String> {
        ids.iter().map(|s| tree.id_of(*s).to_string()).collect()
    }

    fn find(tree: &StateTree, source: &str, event: &str) -> TransitionId {
        let src = tree.state_id(source).unwrap();
        *tree
            .get(src)
            .transitions
            .iter()
            .find(|t| tree.transition(**t).matches_event(event))
            .unwrap()
    }

    #[test]
    fn test_initial_entry() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let entry = compute_initial_entry_set(&tree, &HistoryStore::new(), &reporter);
        assert_eq!(names(&tree, &entry.states), vec!["main", "idle"]);
        assert_eq!(entry.default_entry.len(), 1);
    }

    #[test]
    fn test_enter_parallel_fills_all_regions() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "idle", "start");
        let entry = compute_entry_set(&tree, &[t], &HistoryStore::new(), &reporter);
        assert_eq!(
            names(&tree, &entry.states),
            vec!["work", "left", "l1", "right", "r1"]
        );

        let config = Configuration::from_ids(&tree, &["main", "idle"]).unwrap();
        let exit = compute_exit_set(&tree, &[t], &config, &HistoryStore::new());
        assert_eq!(names(&tree, &exit), vec!["idle"]);
    }

    #[test]
    fn test_fan_out_targets() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "idle", "fan");
        let entry = compute_entry_set(&tree, &[t], &HistoryStore::new(), &reporter);
        assert_eq!(
            names(&tree, &entry.states),
            vec!["work", "left", "l2", "right", "r2"]
        );
    }

    #[test]
    fn test_sibling_transition_inside_region() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "l1", "next");
        let config =
            Configuration::from_ids(&tree, &["main", "work", "left", "l1", "right", "r1"]).unwrap();
        let history = HistoryStore::new();

        assert_eq!(transition_domain(&tree, t, &history), tree.state_id("left"));
        let exit = compute_exit_set(&tree, &[t], &config, &history);
        assert_eq!(names(&tree, &exit), vec!["l1"]);
        let entry = compute_entry_set(&tree, &[t], &history, &reporter);
        assert_eq!(names(&tree, &entry.states), vec!["l2"]);
    }

    #[test]
    fn test_cross_region_transition_reenters_parallel() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "l1", "cross");
        let config =
            Configuration::from_ids(&tree, &["main", "work", "left", "l1", "right", "r1"]).unwrap();
        let history = HistoryStore::new();

        assert_eq!(transition_domain(&tree, t, &history), tree.state_id("main"));
        let exit = compute_exit_set(&tree, &[t], &config, &history);
        assert_eq!(names(&tree, &exit), vec!["r1", "right", "l1", "left", "work"]);
        let entry = compute_entry_set(&tree, &[t], &history, &reporter);
        assert_eq!(
            names(&tree, &entry.states),
            vec!["work", "left", "l1", "right", "r2"]
        );
    }

    #[test]
    fn test_internal_vs_external_self_scope() {
        let tree = tree();
        let history = HistoryStore::new();
        let config = Configuration::from_ids(&tree, &["main", "idle"]).unwrap();

        let inner = find(&tree, "main", "inner");
        assert_eq!(transition_domain(&tree, inner, &history), tree.state_id("main"));
        assert_eq!(
            names(&tree, &compute_exit_set(&tree, &[inner], &config, &history)),
            vec!["idle"]
        );

        let outer = find(&tree, "main", "outer");
        assert_eq!(transition_domain(&tree, outer, &history), None);
        assert_eq!(
            names(&tree, &compute_exit_set(&tree, &[outer], &config, &history)),
            vec!["idle", "main"]
        );
    }

    #[test]
    fn test_history_without_record_reports_fallback() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "idle", "deep");
        let entry = compute_entry_set(&tree, &[t], &HistoryStore::new(), &reporter);

        assert_eq!(names(&tree, &entry.states), vec!["hist", "h1", "h1a"]);
        let report = reporter.last().unwrap();
        assert_eq!(report.code, codes::HISTORY_FALLBACK);
        assert_eq!(report.context, ErrorContext::State { id: "hd".to_string() });
    }

    #[test]
    fn test_history_restores_recorded_states() {
        let tree = tree();
        let reporter = CollectingReporter::new();
        let config = Configuration::from_ids(&tree, &["main", "hist", "h1", "h1b"]).unwrap();
        let mut history = HistoryStore::new();
        let hist = tree.state_id("hist").unwrap();
        record_history(&tree, &[hist], &config, &mut history);

        let deep = find(&tree, "idle", "deep");
        let entry = compute_entry_set(&tree, &[deep], &history, &reporter);
        assert_eq!(names(&tree, &entry.states), vec!["hist", "h1", "h1b"]);

        let shallow = find(&tree, "idle", "shallow");
        let entry = compute_entry_set(&tree, &[shallow], &history, &reporter);
        assert_eq!(names(&tree, &entry.states), vec!["hist", "h1", "h1a"]);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_history_default_transition_content() {
        let mut b = StateTree::builder();
        b.state("top", None)
            .state("start", Some("top"))
            .state("c", Some("top"))
            .history("h", "c", false)
            .state("c1", Some("c"))
            .state("c2", Some("c"))
            .transition("h", TransitionSpec::new().target("c2"))
            .transition("start", TransitionSpec::new().event("go").target("h"));
        let tree = b.build().unwrap();
        let reporter = CollectingReporter::new();
        let t = find(&tree, "start", "go");

        let entry = compute_entry_set(&tree, &[t], &HistoryStore::new(), &reporter);
        assert_eq!(names(&tree, &entry.states), vec!["c", "c2"]);
        let c = tree.state_id("c").unwrap();
        assert!(entry.history_content.contains_key(&c));
        assert!(reporter.is_empty());
    }
}
