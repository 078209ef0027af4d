//! Step executor.
//!
//! An [`Interpreter`] owns one running instance: its configuration, history
//! and internal event queue. It applies microsteps and drives them into
//! macrosteps (run to completion) for every external event.

use crate::config::EngineConfig;
use crate::configuration::Configuration;
use crate::entry_exit::{
    compute_entry_set, compute_exit_set, compute_initial_entry_set, record_history, transition_exit_set, EntrySet,
};
use crate::error::CoreError;
use crate::eval::{Evaluator, Scope};
use crate::event::Event;
use crate::history::HistoryStore;
use crate::model::{Action, StateId, StateKind, StateTree, TransitionId};
use crate::reporter::{codes, ErrorContext, ErrorReporter};
use crate::selector::select_transitions;
use crate::validator::is_legal_configuration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, initial macrostep not yet run.
    Uninitialized,
    /// Waiting for the next external event.
    Stable,
    /// Processing microsteps.
    InMacrostep,
    /// A top-level final state was reached.
    Terminated,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Uninitialized => "uninitialized",
            ExecutionState::Stable => "stable",
            ExecutionState::InMacrostep => "in_macrostep",
            ExecutionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Result of one microstep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicrostepOutcome {
    pub transitions: Vec<TransitionId>,
    /// Exit order, deepest first.
    pub exited: Vec<StateId>,
    /// Entry order, shallowest first.
    pub entered: Vec<StateId>,
}

/// Result of one macrostep, with state ids resolved to document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacrostepOutcome {
    pub microsteps: usize,
    pub exited: Vec<String>,
    pub entered: Vec<String>,
    /// Configuration at the end of the macrostep, before any termination
    /// cleanup.
    pub configuration: Vec<String>,
    pub terminated: bool,
}

/// Serializable image of an instance between macrosteps.
///
/// The datamodel is not included; it belongs to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub status: ExecutionState,
    pub configuration: Vec<String>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<String>>,
}

/// A running statechart instance.
pub struct Interpreter<E: Evaluator> {
    tree: Arc<StateTree>,
    evaluator: E,
    reporter: Arc<dyn ErrorReporter>,
    config: EngineConfig,
    configuration: Configuration,
    history: HistoryStore,
    internal: VecDeque<Event>,
    status: ExecutionState,
}

impl<E: Evaluator> Interpreter<E> {
    pub fn new(tree: Arc<StateTree>, evaluator: E, reporter: Arc<dyn ErrorReporter>, config: EngineConfig) -> Self {
        Self {
            tree,
            evaluator,
            reporter,
            config,
            configuration: Configuration::new(),
            history: HistoryStore::new(),
            internal: VecDeque::new(),
            status: ExecutionState::Uninitialized,
        }
    }

    /// Rebuilds an instance from a snapshot.
    ///
    /// The restored configuration must be legal, closed under ancestors and
    /// complete (every active compound or parallel state has an active child).
    pub fn restore(
        tree: Arc<StateTree>,
        evaluator: E,
        reporter: Arc<dyn ErrorReporter>,
        config: EngineConfig,
        snapshot: &InstanceSnapshot,
    ) -> Result<Self, CoreError> {
        let configuration = Configuration::from_ids(&tree, &snapshot.configuration)?;

        match snapshot.status {
            ExecutionState::InMacrostep => {
                return Err(illegal("cannot restore an instance in the middle of a macrostep"));
            }
            ExecutionState::Uninitialized if !configuration.is_empty() => {
                return Err(illegal("uninitialized instance with active states"));
            }
            ExecutionState::Stable if configuration.is_empty() => {
                return Err(illegal("stable instance without active states"));
            }
            _ => {}
        }

        if !is_legal_configuration(&tree, &configuration, reporter.as_ref()) {
            return Err(illegal("restored configuration violates OR/AND composition"));
        }
        check_closed(&tree, &configuration)?;

        let mut history = HistoryStore::new();
        for (id, states) in &snapshot.history {
            let h = tree.lookup(id)?;
            if !tree.get(h).is_history() {
                return Err(illegal(format!("'{}' is not a history state", id)));
            }
            let recorded = states
                .iter()
                .map(|s| tree.lookup(s))
                .collect::<Result<Vec<_>, _>>()?;
            check_history_record(&tree, h, &recorded)?;
            history.set(h, recorded);
        }

        tracing::debug!(
            document = tree.name().unwrap_or_default(),
            states = configuration.len(),
            status = %snapshot.status,
            "restored instance"
        );

        Ok(Self {
            tree,
            evaluator,
            reporter,
            config,
            configuration,
            history,
            internal: VecDeque::new(),
            status: snapshot.status,
        })
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            status: self.status,
            configuration: self.configuration.ids(&self.tree),
            history: self
                .history
                .iter()
                .map(|(h, states)| {
                    (
                        self.tree.id_of(h).to_string(),
                        states.iter().map(|s| self.tree.id_of(*s).to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn status(&self) -> ExecutionState {
        self.status
    }

    pub fn tree(&self) -> &Arc<StateTree> {
        &self.tree
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.configuration.ids(&self.tree)
    }

    pub fn atomic_ids(&self) -> Vec<String> {
        self.configuration
            .atomic(&self.tree)
            .into_iter()
            .map(|s| self.tree.id_of(s).to_string())
            .collect()
    }

    /// Returns true if the state named `id` is active. Unknown ids are never active.
    pub fn is_in(&self, id: &str) -> bool {
        self.tree
            .state_id(id)
            .is_some_and(|s| self.configuration.contains(s))
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    pub fn into_evaluator(self) -> E {
        self.evaluator
    }

    /// Runs the initial macrostep.
    pub fn start(&mut self) -> Result<MacrostepOutcome, CoreError> {
        if self.status != ExecutionState::Uninitialized {
            return Err(CoreError::AlreadyStarted);
        }
        tracing::info!(document = self.tree.name().unwrap_or_default(), "starting interpreter");

        self.status = ExecutionState::InMacrostep;
        let tree = Arc::clone(&self.tree);
        let entry = compute_initial_entry_set(&tree, &self.history, self.reporter.as_ref());

        let mut outcome = MacrostepOutcome::default();
        self.enter(&tree, &entry, None);
        outcome.entered.extend(entry.states.iter().map(|s| tree.id_of(*s).to_string()));

        self.complete_macrostep(outcome)
    }

    /// Processes one external event as a macrostep.
    ///
    /// An event that enables no transition still runs the eventless pass.
    pub fn process_event(&mut self, event: Event) -> Result<MacrostepOutcome, CoreError> {
        match self.status {
            ExecutionState::Uninitialized => return Err(CoreError::NotStarted),
            ExecutionState::Terminated => return Err(CoreError::Terminated { event: event.name }),
            ExecutionState::Stable | ExecutionState::InMacrostep => {}
        }
        tracing::debug!(event = %event, "processing external event");

        self.status = ExecutionState::InMacrostep;
        let tree = Arc::clone(&self.tree);
        let selected = select_transitions(
            &tree,
            &self.configuration,
            &self.history,
            Some(&event),
            &mut self.evaluator,
            self.reporter.as_ref(),
        );

        let mut outcome = MacrostepOutcome::default();
        if !selected.is_empty() {
            let step = self.execute(&tree, &selected, Some(&event));
            record(&tree, &mut outcome, &step);
        }

        self.complete_macrostep(outcome)
    }

    /// Runs eventless transitions and queued internal events until the
    /// instance is stable again.
    pub fn macrostep(&mut self) -> Result<MacrostepOutcome, CoreError> {
        self.ensure_running()?;
        self.status = ExecutionState::InMacrostep;
        self.complete_macrostep(MacrostepOutcome::default())
    }

    /// Applies one microstep for an explicit transition set, without running
    /// the follow-up eventless pass.
    ///
    /// Every source must be active and no two transitions may exit a common
    /// state. A set that fails either check is rejected before anything runs.
    pub fn microstep(&mut self, transitions: &[TransitionId]) -> Result<MicrostepOutcome, CoreError> {
        self.ensure_running()?;
        let tree = Arc::clone(&self.tree);
        self.check_transition_set(&tree, transitions)?;

        let step = self.execute(&tree, transitions, None);

        if self.config.validate_configuration
            && !is_legal_configuration(&tree, &self.configuration, self.reporter.as_ref())
        {
            panic!(
                "microstep left an illegal configuration: {:?}",
                self.configuration.ids(&tree)
            );
        }
        if self.top_level_final_reached() {
            self.terminate(&tree);
        }
        Ok(step)
    }

    fn check_transition_set(&self, tree: &StateTree, transitions: &[TransitionId]) -> Result<(), CoreError> {
        let mut exits = Vec::with_capacity(transitions.len());
        for &t in transitions {
            if t.index() >= tree.transition_count() {
                return Err(illegal(format!("unknown transition #{}", t.index())));
            }
            let source = tree.transition(t).source;
            if !self.configuration.contains(source) {
                return Err(illegal(format!(
                    "transition source '{}' is not active",
                    tree.id_of(source)
                )));
            }
            exits.push((t, transition_exit_set(tree, t, &self.configuration, &self.history)));
        }

        for (i, (a, exit_a)) in exits.iter().enumerate() {
            for (b, exit_b) in &exits[i + 1..] {
                if !exit_a.is_disjoint(exit_b) {
                    return Err(illegal(format!(
                        "transitions from '{}' and '{}' exit a common state",
                        tree.id_of(tree.transition(*a).source),
                        tree.id_of(tree.transition(*b).source)
                    )));
                }
            }
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        match self.status {
            ExecutionState::Uninitialized => Err(CoreError::NotStarted),
            ExecutionState::Terminated => Err(CoreError::Terminated {
                event: String::new(),
            }),
            ExecutionState::Stable | ExecutionState::InMacrostep => Ok(()),
        }
    }

    fn complete_macrostep(&mut self, mut outcome: MacrostepOutcome) -> Result<MacrostepOutcome, CoreError> {
        if let Err(e) = self.run_to_completion(&mut outcome) {
            self.internal.clear();
            self.status = ExecutionState::Stable;
            return Err(e);
        }

        let tree = Arc::clone(&self.tree);
        if self.config.validate_configuration
            && !is_legal_configuration(&tree, &self.configuration, self.reporter.as_ref())
        {
            panic!(
                "macrostep left an illegal configuration: {:?}",
                self.configuration.ids(&tree)
            );
        }

        outcome.configuration = self.configuration.ids(&tree);
        if self.top_level_final_reached() {
            self.terminate(&tree);
            outcome.terminated = true;
        } else {
            self.status = ExecutionState::Stable;
        }
        Ok(outcome)
    }

    fn run_to_completion(&mut self, outcome: &mut MacrostepOutcome) -> Result<(), CoreError> {
        let tree = Arc::clone(&self.tree);
        loop {
            if self.top_level_final_reached() {
                return Ok(());
            }

            let eventless = select_transitions(
                &tree,
                &self.configuration,
                &self.history,
                None,
                &mut self.evaluator,
                self.reporter.as_ref(),
            );
            if !eventless.is_empty() {
                self.bump(outcome)?;
                let step = self.execute(&tree, &eventless, None);
                record(&tree, outcome, &step);
                continue;
            }

            let Some(event) = self.internal.pop_front() else {
                return Ok(());
            };
            tracing::trace!(event = %event, "processing internal event");
            let selected = select_transitions(
                &tree,
                &self.configuration,
                &self.history,
                Some(&event),
                &mut self.evaluator,
                self.reporter.as_ref(),
            );
            if !selected.is_empty() {
                self.bump(outcome)?;
                let step = self.execute(&tree, &selected, Some(&event));
                record(&tree, outcome, &step);
            }
        }
    }

    fn bump(&self, outcome: &mut MacrostepOutcome) -> Result<(), CoreError> {
        outcome.microsteps += 1;
        if outcome.microsteps > self.config.max_microsteps {
            tracing::warn!(limit = self.config.max_microsteps, "microstep limit reached");
            return Err(CoreError::MicrostepLimit {
                limit: self.config.max_microsteps,
            });
        }
        Ok(())
    }

    fn execute(&mut self, tree: &StateTree, transitions: &[TransitionId], event: Option<&Event>) -> MicrostepOutcome {
        tracing::debug!(
            transitions = ?transitions
                .iter()
                .map(|t| format!("{}#{}", tree.id_of(tree.transition(*t).source), tree.transition(*t).rank))
                .collect::<Vec<_>>(),
            "microstep"
        );

        let exited = compute_exit_set(tree, transitions, &self.configuration, &self.history);
        record_history(tree, &exited, &self.configuration, &mut self.history);
        for &state in &exited {
            tracing::trace!(state = tree.id_of(state), "exit");
            let node = tree.get(state);
            self.run_actions(tree, &node.on_exit, event, ErrorContext::Action { state: node.id.clone() });
            self.configuration.remove(state);
        }

        for &t in transitions {
            let transition = tree.transition(t);
            let context = ErrorContext::Transition {
                source: tree.id_of(transition.source).to_string(),
                rank: transition.rank,
            };
            self.run_actions(tree, &transition.actions, event, context);
        }

        let entry = compute_entry_set(tree, transitions, &self.history, self.reporter.as_ref());
        self.enter(tree, &entry, event);

        MicrostepOutcome {
            transitions: transitions.to_vec(),
            exited,
            entered: entry.states,
        }
    }

    fn enter(&mut self, tree: &StateTree, entry: &EntrySet, event: Option<&Event>) {
        for &state in &entry.states {
            tracing::trace!(state = tree.id_of(state), "enter");
            self.configuration.insert(state);
            let node = tree.get(state);
            self.run_actions(tree, &node.on_entry, event, ErrorContext::Action { state: node.id.clone() });

            if let Some(default) = entry.history_content.get(&state) {
                let transition = tree.transition(*default);
                let context = ErrorContext::Transition {
                    source: tree.id_of(transition.source).to_string(),
                    rank: transition.rank,
                };
                self.run_actions(tree, &transition.actions, event, context);
            }

            if node.is_final() {
                self.signal_completion(tree, state);
            }
        }
    }

    /// Queues `done.state.<parent>` for a final child, and for a grandparent
    /// parallel once all of its regions are complete.
    fn signal_completion(&mut self, tree: &StateTree, state: StateId) {
        let Some(parent) = tree.parent(state) else {
            return;
        };
        self.internal.push_back(Event::done_state(tree.id_of(parent)));

        if let Some(grandparent) = tree.parent(parent) {
            if tree.get(grandparent).is_parallel()
                && tree.regions(grandparent).all(|r| self.is_in_final_state(tree, r))
            {
                self.internal.push_back(Event::done_state(tree.id_of(grandparent)));
            }
        }
    }

    fn is_in_final_state(&self, tree: &StateTree, state: StateId) -> bool {
        match &tree.get(state).kind {
            StateKind::Compound { .. } => tree
                .get(state)
                .children
                .iter()
                .any(|c| tree.get(*c).is_final() && self.configuration.contains(*c)),
            StateKind::Parallel => tree.regions(state).all(|r| self.is_in_final_state(tree, r)),
            StateKind::Simple | StateKind::Final | StateKind::History { .. } => false,
        }
    }

    fn top_level_final_reached(&self) -> bool {
        self.tree
            .top_level()
            .iter()
            .any(|s| self.tree.get(*s).is_final() && self.configuration.contains(*s))
    }

    fn terminate(&mut self, tree: &StateTree) {
        tracing::info!(
            document = tree.name().unwrap_or_default(),
            configuration = ?self.configuration.ids(tree),
            "interpreter terminated"
        );
        if self.config.clear_on_termination {
            let active: Vec<StateId> = self.configuration.iter().rev().collect();
            for state in active {
                let node = tree.get(state);
                self.run_actions(tree, &node.on_exit, None, ErrorContext::Action { state: node.id.clone() });
                self.configuration.remove(state);
            }
        }
        self.internal.clear();
        self.status = ExecutionState::Terminated;
    }

    /// Runs one block of executable content. The first failure is reported and
    /// the rest of the block is skipped.
    fn run_actions(&mut self, tree: &StateTree, actions: &[Action], event: Option<&Event>, context: ErrorContext) {
        for action in actions {
            let configuration = &self.configuration;
            let in_state = |id: &str| tree.state_id(id).is_some_and(|s| configuration.contains(s));
            let scope = Scope::new(event, &in_state);

            match action {
                Action::Assign { location, expr } => {
                    let value = match self.evaluator.eval_value(expr, &scope) {
                        Ok(value) => value,
                        Err(e) => {
                            self.reporter.on_error(codes::EXPRESSION_ERROR, &e.to_string(), &context);
                            return;
                        }
                    };
                    if let Err(e) = self.evaluator.assign(location, value) {
                        self.reporter.on_error(codes::EXECUTION_ERROR, &e.to_string(), &context);
                        return;
                    }
                }
                Action::Log { label, expr } => match expr {
                    None => tracing::info!(target: "statechart::log", "{}", label),
                    Some(expr) => match self.evaluator.eval_value(expr, &scope) {
                        Ok(value) => tracing::info!(target: "statechart::log", value = %value, "{}", label),
                        Err(e) => {
                            self.reporter.on_error(codes::EXPRESSION_ERROR, &e.to_string(), &context);
                            return;
                        }
                    },
                },
                Action::Raise(name) => {
                    self.internal.push_back(Event::new(name.clone()));
                }
            }
        }
    }
}

fn record(tree: &StateTree, outcome: &mut MacrostepOutcome, step: &MicrostepOutcome) {
    outcome
        .exited
        .extend(step.exited.iter().map(|s| tree.id_of(*s).to_string()));
    outcome
        .entered
        .extend(step.entered.iter().map(|s| tree.id_of(*s).to_string()));
}

fn illegal(reason: impl Into<String>) -> CoreError {
    CoreError::IllegalConfiguration {
        reason: reason.into(),
    }
}

fn check_closed(tree: &StateTree, configuration: &Configuration) -> Result<(), CoreError> {
    for state in configuration.iter() {
        if let Some(parent) = tree.parent(state) {
            if !configuration.contains(parent) {
                return Err(illegal(format!(
                    "'{}' is active but its parent '{}' is not",
                    tree.id_of(state),
                    tree.id_of(parent)
                )));
            }
        }
        let node = tree.get(state);
        if (node.is_compound() || node.is_parallel()) && !configuration.has_descendant_of(tree, state) {
            return Err(illegal(format!("'{}' is active without an active child", node.id)));
        }
    }
    Ok(())
}

/// A record must describe a configuration its history state could restore:
/// direct children for shallow history, atomic descendants for deep history,
/// and never two states from the same OR-region.
fn check_history_record(tree: &StateTree, history: StateId, recorded: &[StateId]) -> Result<(), CoreError> {
    let id = tree.id_of(history);
    let owner = tree
        .parent(history)
        .ok_or_else(|| illegal(format!("history state '{}' has no parent", id)))?;
    if recorded.is_empty() {
        return Err(illegal(format!("history record for '{}' is empty", id)));
    }
    let deep = matches!(tree.get(history).kind, StateKind::History { deep: true, .. });

    for &state in recorded {
        if !tree.is_descendant(state, owner) {
            return Err(illegal(format!(
                "history record for '{}' holds '{}' outside '{}'",
                id,
                tree.id_of(state),
                tree.id_of(owner)
            )));
        }
        let node = tree.get(state);
        let fits = if deep {
            node.is_atomic()
        } else {
            tree.parent(state) == Some(owner) && !node.is_history()
        };
        if !fits {
            let expected = if deep { "atomic descendants" } else { "direct children" };
            return Err(illegal(format!(
                "history record for '{}' holds '{}', expected {} of '{}'",
                id,
                node.id,
                expected,
                tree.id_of(owner)
            )));
        }
    }

    for (i, &a) in recorded.iter().enumerate() {
        for &b in &recorded[i + 1..] {
            if !tree.are_orthogonal(a, b) {
                return Err(illegal(format!(
                    "history record for '{}' holds '{}' and '{}' which cannot be active together",
                    id,
                    tree.id_of(a),
                    tree.id_of(b)
                )));
            }
        }
    }
    Ok(())
}
