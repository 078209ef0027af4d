//! Static statechart structure.
//!
//! A [`StateTree`] is an arena of [`StateNode`]s. Parent links are arena
//! indices, ownership runs top-down from the arena, and the tree is never
//! mutated after [`StateTreeBuilder::build`]. Arena order is document order
//! (pre-order), so comparing two [`StateId`]s compares their document
//! positions; every ordering rule in the engine relies on this.

use crate::error::CoreError;
use crate::event::EventDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of a state in its tree. Ordered by document position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(usize);

impl StateId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a transition in its tree. Equal to the transition's document rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionId(usize);

impl TransitionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    /// Leaf state.
    Simple,
    /// OR-state: exactly one child active while the state is active.
    Compound {
        /// Explicit default entry targets. Empty means the first
        /// non-history child.
        initial: Vec<StateId>,
    },
    /// AND-state: every child region active while the state is active.
    Parallel,
    /// Leaf state that completes its parent.
    Final,
    /// Pseudo-state replaying its parent's last active sub-configuration.
    History {
        deep: bool,
        /// Used when nothing has been recorded yet.
        default: Option<TransitionId>,
    },
}

/// Whether a transition exits its source when all targets lie inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    External,
    Internal,
}

/// Executable content run on entry, exit, or while taking a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Evaluate `expr` and store the result at `location`.
    Assign { location: String, expr: String },
    /// Emit a log line, optionally with an evaluated expression.
    Log {
        #[serde(default)]
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
    },
    /// Queue an internal event for the current macrostep.
    Raise(String),
}

/// A state in the tree.
#[derive(Debug, Clone)]
pub struct StateNode {
    /// Document identifier, unique in the tree.
    pub id: String,
    pub kind: StateKind,
    /// Back-reference to the parent; `None` for top-level states.
    pub parent: Option<StateId>,
    /// Children in document order.
    pub children: Vec<StateId>,
    /// Outgoing transitions in document order.
    pub transitions: Vec<TransitionId>,
    pub on_entry: Vec<Action>,
    pub on_exit: Vec<Action>,
}

impl StateNode {
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Simple | StateKind::Final)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.kind, StateKind::Compound { .. })
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, StateKind::Parallel)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, StateKind::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self.kind, StateKind::History { .. })
    }
}

/// A transition in the tree.
#[derive(Debug, Clone)]
pub struct Transition {
    pub source: StateId,
    /// Zero targets = targetless, more than one = fan-out into regions.
    pub targets: Vec<StateId>,
    /// Empty = eventless.
    pub events: Vec<EventDescriptor>,
    /// Opaque guard expression handed to the evaluator.
    pub cond: Option<String>,
    pub kind: TransitionKind,
    pub actions: Vec<Action>,
    /// Position in the flattened document.
    pub rank: usize,
}

impl Transition {
    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns true if any descriptor matches the event name.
    pub fn matches_event(&self, name: &str) -> bool {
        self.events.iter().any(|d| d.matches(name))
    }
}

/// Immutable statechart structure.
#[derive(Debug, Clone)]
pub struct StateTree {
    name: Option<String>,
    states: Vec<StateNode>,
    transitions: Vec<Transition>,
    index: HashMap<String, StateId>,
    top_level: Vec<StateId>,
    initial: Vec<StateId>,
}

impl StateTree {
    pub fn builder() -> StateTreeBuilder {
        StateTreeBuilder::new()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: StateId) -> &StateNode {
        &self.states[id.0]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0]
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Looks up a state by document identifier.
    pub fn state_id(&self, id: &str) -> Option<StateId> {
        self.index.get(id).copied()
    }

    /// Like [`state_id`](Self::state_id) but fails with `UnknownState`.
    pub fn lookup(&self, id: &str) -> Result<StateId, CoreError> {
        self.state_id(id).ok_or_else(|| CoreError::UnknownState {
            state: id.to_string(),
        })
    }

    /// Document identifier of a state.
    pub fn id_of(&self, id: StateId) -> &str {
        &self.states[id.0].id
    }

    /// All states in document order.
    pub fn states(&self) -> impl Iterator<Item = (StateId, &StateNode)> {
        self.states
            .iter()
            .enumerate()
            .map(|(i, node)| (StateId(i), node))
    }

    pub fn top_level(&self) -> &[StateId] {
        &self.top_level
    }

    /// Targets of the document's initial transition.
    pub fn initial(&self) -> &[StateId] {
        &self.initial
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.states[id.0].parent
    }

    /// Proper ancestors, innermost first.
    pub fn ancestors(&self, id: StateId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// Returns true if `id` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, id: StateId, ancestor: StateId) -> bool {
        // Descendants follow their ancestor in pre-order.
        if id <= ancestor {
            return false;
        }
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// Children that take part in the configuration (everything but history).
    pub fn regions(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.states[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| !self.states[c.0].is_history())
    }

    pub fn history_children(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.states[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| self.states[c.0].is_history())
    }

    /// Default entry targets of a compound state.
    pub fn default_initial(&self, id: StateId) -> Vec<StateId> {
        match &self.states[id.0].kind {
            StateKind::Compound { initial } if !initial.is_empty() => initial.clone(),
            _ => self.regions(id).take(1).collect(),
        }
    }

    /// Innermost compound proper ancestor of `states[0]` containing all of
    /// `states`. `None` is the implicit document root.
    pub fn lcca(&self, states: &[StateId]) -> Option<StateId> {
        let (head, tail) = states.split_first()?;
        self.ancestors(*head)
            .filter(|a| self.get(*a).is_compound())
            .find(|a| tail.iter().all(|s| self.is_descendant(*s, *a)))
    }

    /// Returns true if `a` and `b` can be active together without either
    /// containing the other: their nearest common ancestor is parallel.
    pub fn are_orthogonal(&self, a: StateId, b: StateId) -> bool {
        if a == b || self.is_descendant(a, b) || self.is_descendant(b, a) {
            return false;
        }
        self.ancestors(a)
            .find(|anc| self.is_descendant(b, *anc))
            .map(|anc| self.get(anc).is_parallel())
            .unwrap_or(false)
    }
}

/// Iterator over proper ancestors, innermost first.
pub struct Ancestors<'a> {
    tree: &'a StateTree,
    next: Option<StateId>,
}

impl Iterator for Ancestors<'_> {
    type Item = StateId;

    fn next(&mut self) -> Option<StateId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

/// Description of a transition handed to [`StateTreeBuilder::transition`].
#[derive(Debug, Clone, Default)]
pub struct TransitionSpec {
    events: Vec<EventDescriptor>,
    targets: Vec<String>,
    cond: Option<String>,
    kind: TransitionKind,
    actions: Vec<Action>,
}

impl TransitionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Space-separated event descriptors.
    pub fn event(mut self, attr: &str) -> Self {
        self.events.extend(EventDescriptor::parse_list(attr));
        self
    }

    pub fn target(mut self, id: impl Into<String>) -> Self {
        self.targets.push(id.into());
        self
    }

    pub fn cond(mut self, expr: impl Into<String>) -> Self {
        self.cond = Some(expr.into());
        self
    }

    pub fn internal(mut self) -> Self {
        self.kind = TransitionKind::Internal;
        self
    }

    pub fn kind(mut self, kind: TransitionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decl {
    State,
    Parallel,
    Final,
    History { deep: bool },
}

impl Decl {
    fn name(self) -> &'static str {
        match self {
            Decl::State => "state",
            Decl::Parallel => "parallel",
            Decl::Final => "final",
            Decl::History { .. } => "history",
        }
    }
}

#[derive(Debug, Clone)]
struct PendingState {
    id: String,
    decl: Decl,
    parent: Option<String>,
    initial: Vec<String>,
    transitions: Vec<TransitionSpec>,
    on_entry: Vec<Action>,
    on_exit: Vec<Action>,
}

/// Builds a [`StateTree`]. All structural checks run in [`build`](Self::build).
///
/// ```rust
/// use statechart_core::{StateTree, TransitionSpec};
///
/// let mut builder = StateTree::builder();
/// builder
///     .state("idle", None)
///     .state("busy", None)
///     .transition("idle", TransitionSpec::new().event("go").target("busy"));
/// let tree = builder.build().unwrap();
/// assert_eq!(tree.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct StateTreeBuilder {
    name: Option<String>,
    pending: Vec<PendingState>,
    initial: Vec<String>,
    errors: Vec<String>,
}

impl StateTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Declares a `state`; it becomes compound if anything is declared under it.
    pub fn state(&mut self, id: &str, parent: Option<&str>) -> &mut Self {
        self.declare(id, Decl::State, parent)
    }

    pub fn parallel(&mut self, id: &str, parent: Option<&str>) -> &mut Self {
        self.declare(id, Decl::Parallel, parent)
    }

    pub fn final_state(&mut self, id: &str, parent: Option<&str>) -> &mut Self {
        self.declare(id, Decl::Final, parent)
    }

    pub fn history(&mut self, id: &str, parent: &str, deep: bool) -> &mut Self {
        self.declare(id, Decl::History { deep }, Some(parent))
    }

    /// Sets explicit default entry targets for a compound state.
    pub fn initial(&mut self, id: &str, targets: &[&str]) -> &mut Self {
        let targets = targets.iter().map(|t| t.to_string()).collect();
        self.with_pending(id, |p| p.initial = targets);
        self
    }

    /// Sets the targets of the document's initial transition.
    pub fn document_initial(&mut self, targets: &[&str]) -> &mut Self {
        self.initial = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Adds a transition to `source`. On a history state this is the
    /// default transition.
    pub fn transition(&mut self, source: &str, spec: TransitionSpec) -> &mut Self {
        self.with_pending(source, |p| p.transitions.push(spec));
        self
    }

    pub fn on_entry(&mut self, id: &str, action: Action) -> &mut Self {
        self.with_pending(id, |p| p.on_entry.push(action));
        self
    }

    pub fn on_exit(&mut self, id: &str, action: Action) -> &mut Self {
        self.with_pending(id, |p| p.on_exit.push(action));
        self
    }

    fn declare(&mut self, id: &str, decl: Decl, parent: Option<&str>) -> &mut Self {
        self.pending.push(PendingState {
            id: id.to_string(),
            decl,
            parent: parent.map(str::to_string),
            initial: Vec::new(),
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
        });
        self
    }

    fn with_pending(&mut self, id: &str, f: impl FnOnce(&mut PendingState)) {
        match self.pending.iter_mut().rev().find(|p| p.id == id) {
            Some(p) => f(p),
            None => self
                .errors
                .push(format!("reference to undeclared state '{}'", id)),
        }
    }

    /// Validates the declarations and lays the tree out in document order.
    pub fn build(&self) -> Result<StateTree, CoreError> {
        if let Some(reason) = self.errors.first() {
            return Err(CoreError::invalid_document(reason.clone()));
        }
        if self.pending.is_empty() {
            return Err(CoreError::invalid_document("document has no states"));
        }

        let mut by_id: HashMap<&str, usize> = HashMap::new();
        for (i, p) in self.pending.iter().enumerate() {
            if p.id.is_empty() {
                return Err(CoreError::invalid_document("state with empty id"));
            }
            if by_id.insert(p.id.as_str(), i).is_some() {
                return Err(CoreError::invalid_document(format!(
                    "duplicate state id '{}'",
                    p.id
                )));
            }
        }

        // Children in declaration order, per provisional index.
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.pending.len()];
        let mut roots = Vec::new();
        for (i, p) in self.pending.iter().enumerate() {
            match &p.parent {
                None => {
                    if let Decl::History { .. } = p.decl {
                        return Err(CoreError::invalid_document(format!(
                            "history state '{}' must have a parent",
                            p.id
                        )));
                    }
                    roots.push(i);
                }
                Some(parent) => {
                    let &pi = by_id.get(parent.as_str()).ok_or_else(|| {
                        CoreError::invalid_document(format!(
                            "state '{}' has unknown parent '{}'",
                            p.id, parent
                        ))
                    })?;
                    match self.pending[pi].decl {
                        Decl::State | Decl::Parallel => children[pi].push(i),
                        other => {
                            return Err(CoreError::invalid_document(format!(
                                "{} state '{}' cannot contain '{}'",
                                other.name(),
                                parent,
                                p.id
                            )))
                        }
                    }
                }
            }
        }

        // Pre-order layout.
        let mut order = Vec::with_capacity(self.pending.len());
        let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(children[i].iter().rev().copied());
        }
        if order.len() != self.pending.len() {
            return Err(CoreError::invalid_document("cycle in state parent links"));
        }
        let mut remap = vec![0usize; self.pending.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }

        let mut index = HashMap::with_capacity(order.len());
        let mut states = Vec::with_capacity(order.len());
        for &old in &order {
            let p = &self.pending[old];
            index.insert(p.id.clone(), StateId(remap[old]));
            let node_children: Vec<StateId> =
                children[old].iter().map(|c| StateId(remap[*c])).collect();
            let kind = match p.decl {
                Decl::State if node_children.is_empty() => StateKind::Simple,
                Decl::State => StateKind::Compound {
                    initial: Vec::new(),
                },
                Decl::Parallel => StateKind::Parallel,
                Decl::Final => StateKind::Final,
                Decl::History { deep } => StateKind::History {
                    deep,
                    default: None,
                },
            };
            states.push(StateNode {
                id: p.id.clone(),
                kind,
                parent: p.parent.as_ref().map(|parent| StateId(remap[by_id[parent.as_str()]])),
                children: node_children,
                transitions: Vec::new(),
                on_entry: p.on_entry.clone(),
                on_exit: p.on_exit.clone(),
            });
        }

        let mut tree = StateTree {
            name: self.name.clone(),
            states,
            transitions: Vec::new(),
            index,
            top_level: roots.iter().map(|r| StateId(remap[*r])).collect(),
            initial: Vec::new(),
        };

        for &old in &order {
            let sid = StateId(remap[old]);
            tree.check_regions(sid)?;
        }

        // Initial targets and transitions, again in document order so that
        // transition ids equal document rank.
        for &old in &order {
            let p = &self.pending[old];
            let sid = StateId(remap[old]);
            if !p.initial.is_empty() {
                tree.attach_initial(sid, &p.initial)?;
            }
            for spec in &p.transitions {
                tree.attach_transition(sid, spec)?;
            }
        }

        tree.initial = if self.initial.is_empty() {
            tree.top_level.iter().take(1).copied().collect()
        } else {
            let targets = tree.resolve_targets(&self.initial)?;
            tree.check_target_set("document initial", &targets)?;
            targets
        };

        Ok(tree)
    }
}

impl StateTree {
    fn check_regions(&self, id: StateId) -> Result<(), CoreError> {
        let node = self.get(id);
        let has_regions = self.regions(id).next().is_some();
        match node.kind {
            StateKind::Compound { .. } | StateKind::Parallel if !has_regions => {
                Err(CoreError::invalid_document(format!(
                    "state '{}' contains only history states",
                    node.id
                )))
            }
            _ => Ok(()),
        }
    }

    fn resolve_targets(&self, ids: &[String]) -> Result<Vec<StateId>, CoreError> {
        ids.iter()
            .map(|t| {
                self.state_id(t).ok_or_else(|| {
                    CoreError::invalid_document(format!("unknown target state '{}'", t))
                })
            })
            .collect()
    }

    /// Multi-target sets must be pairwise orthogonal, otherwise entering
    /// them would break OR-exclusivity.
    fn check_target_set(&self, what: &str, targets: &[StateId]) -> Result<(), CoreError> {
        for (i, a) in targets.iter().enumerate() {
            for b in &targets[i + 1..] {
                if !self.are_orthogonal(*a, *b) {
                    return Err(CoreError::invalid_document(format!(
                        "{} targets '{}' and '{}' cannot be active together",
                        what,
                        self.id_of(*a),
                        self.id_of(*b)
                    )));
                }
            }
        }
        Ok(())
    }

    fn attach_initial(&mut self, id: StateId, targets: &[String]) -> Result<(), CoreError> {
        let resolved = self.resolve_targets(targets)?;
        let node_id = self.id_of(id).to_string();
        if !self.get(id).is_compound() {
            return Err(CoreError::invalid_document(format!(
                "only compound states take an initial attribute, '{}' is not one",
                node_id
            )));
        }
        for t in &resolved {
            if !self.is_descendant(*t, id) || self.get(*t).is_history() {
                return Err(CoreError::invalid_document(format!(
                    "initial target '{}' is not a descendant of '{}'",
                    self.id_of(*t),
                    node_id
                )));
            }
        }
        self.check_target_set(&format!("initial of '{}'", node_id), &resolved)?;
        if let StateKind::Compound { initial } = &mut self.states[id.0].kind {
            *initial = resolved;
        }
        Ok(())
    }

    fn attach_transition(&mut self, source: StateId, spec: &TransitionSpec) -> Result<(), CoreError> {
        let targets = self.resolve_targets(&spec.targets)?;
        let source_id = self.id_of(source).to_string();
        self.check_target_set(&format!("transition from '{}'", source_id), &targets)?;

        let tid = TransitionId(self.transitions.len());
        match self.states[source.0].kind {
            StateKind::History { default, .. } => {
                if default.is_some() {
                    return Err(CoreError::invalid_document(format!(
                        "history state '{}' has more than one default transition",
                        source_id
                    )));
                }
                if !spec.events.is_empty() || spec.cond.is_some() || targets.is_empty() {
                    return Err(CoreError::invalid_document(format!(
                        "default transition of history state '{}' must be unconditional, eventless and targeted",
                        source_id
                    )));
                }
                let owner = self.parent(source).ok_or_else(|| {
                    CoreError::invalid_document(format!(
                        "history state '{}' must have a parent",
                        source_id
                    ))
                })?;
                if let Some(bad) = targets.iter().find(|t| !self.is_descendant(**t, owner)) {
                    return Err(CoreError::invalid_document(format!(
                        "history default target '{}' is outside '{}'",
                        self.id_of(*bad),
                        self.id_of(owner)
                    )));
                }
                if let Some(bad) = targets.iter().find(|t| self.get(**t).is_history()) {
                    return Err(CoreError::invalid_document(format!(
                        "history default target '{}' is itself a history state",
                        self.id_of(*bad)
                    )));
                }
                if let StateKind::History { default, .. } = &mut self.states[source.0].kind {
                    *default = Some(tid);
                }
            }
            _ => self.states[source.0].transitions.push(tid),
        }

        self.transitions.push(Transition {
            source,
            targets,
            events: spec.events.clone(),
            cond: spec.cond.clone(),
            kind: spec.kind,
            actions: spec.actions.clone(),
            rank: tid.0,
        });
        Ok(())
    }
}
