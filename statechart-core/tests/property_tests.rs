//! Property-based tests for the step executor.
//!
//! Random event sequences are fed into documents mixing compound, parallel,
//! history and final states; every completed macrostep must leave a legal,
//! complete configuration.

use proptest::prelude::*;
use serde_json::json;
use statechart_core::{
    is_legal_configuration, CollectingReporter, Document, EngineConfig, Event, ExecutionState, Interpreter,
    JsonDataModel, StateKind, StateTree, TransitionSpec,
};
use std::sync::Arc;

fn rich_document() -> Document {
    let json = json!({
        "datamodel": {"n": "not a number"},
        "states": [
            {"id": "app", "transitions": [{"event": "z", "target": "end"}], "states": [
                {"id": "idle", "transitions": [
                    {"event": "a", "target": "session"},
                    {"event": "b", "target": "hs"},
                    {"event": "c", "target": "hd"},
                    {"event": "d", "target": ["l2b", "r2"]}
                ]},
                {"id": "session", "transitions": [{"event": "x", "target": "idle"}], "states": [
                    {"id": "hs", "type": "history"},
                    {"id": "hd", "type": "history", "deep": true},
                    {"id": "work", "type": "parallel", "transitions": [{"event": "b", "target": "pause"}], "states": [
                        {"id": "left", "states": [
                            {"id": "l1", "transitions": [
                                {"event": "a", "target": "l2"},
                                {"event": "c", "target": "r2"},
                                {"event": "tick", "target": "l2"}
                            ]},
                            {"id": "l2", "transitions": [{"event": "d", "target": "l1"}], "states": [
                                {"id": "l2a", "transitions": [{"event": "b", "target": "l2b"}]},
                                {"id": "l2b", "transitions": [{"cond": "In('r2')", "target": "l1"}]}
                            ]}
                        ]},
                        {"id": "right", "transitions": [{"event": "d", "target": "r1", "type": "internal"}], "states": [
                            {"id": "r1", "transitions": [
                                {"event": "a", "target": "r2"},
                                {"event": "e", "target": "rdone", "cond": "ctx.n > 1"}
                            ]},
                            {"id": "r2", "onentry": [{"raise": "tick"}], "transitions": [{"event": "b", "target": "rdone"}]},
                            {"id": "rdone", "type": "final"}
                        ]}
                    ]},
                    {"id": "pause", "transitions": [
                        {"event": "a", "target": "hd"},
                        {"event": "c", "target": "hs"}
                    ]}
                ]}
            ]},
            {"id": "end", "type": "final"}
        ]
    });
    Document::from_json("rich", &json).unwrap()
}

/// Every active compound has exactly one active child, every active parallel
/// all of its regions, and every active state its parent.
fn assert_complete<E: statechart_core::Evaluator>(interp: &Interpreter<E>) {
    let tree = interp.tree();
    let config = interp.configuration();
    for state in config.iter() {
        let node = tree.get(state);
        if let Some(parent) = node.parent {
            assert!(config.contains(parent), "parent of {} inactive", node.id);
        }
        let active_children = tree.regions(state).filter(|c| config.contains(*c)).count();
        match node.kind {
            StateKind::Compound { .. } => assert_eq!(active_children, 1, "compound {}", node.id),
            StateKind::Parallel => {
                assert_eq!(active_children, tree.regions(state).count(), "parallel {}", node.id)
            }
            _ => {}
        }
    }
}

fn event_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["a", "b", "c", "d", "e", "x", "z", "tick", "unknown"])
}

/// Root compound around a parallel with `REGIONS` regions of `STATES` leaves.
/// `go_<r>_<k>` moves to leaf `k` of region `r` from anywhere in the parallel.
const REGIONS: usize = 3;
const STATES: usize = 3;

fn leaf(r: usize, k: usize) -> String {
    format!("s{}_{}", r, k)
}

fn region_tree() -> StateTree {
    let mut b = StateTree::builder();
    b.state("root", None).parallel("p", Some("root"));
    for r in 0..REGIONS {
        let region = format!("r{}", r);
        b.state(&region, Some("p"));
        for k in 0..STATES {
            b.state(&leaf(r, k), Some(region.as_str()));
        }
    }
    for r in 0..REGIONS {
        for k in 0..STATES {
            for r2 in 0..REGIONS {
                for k2 in 0..STATES {
                    if (r, k) != (r2, k2) {
                        b.transition(
                            &leaf(r, k),
                            TransitionSpec::new()
                                .event(&format!("go_{}_{}", r2, k2))
                                .target(leaf(r2, k2)),
                        );
                    }
                }
            }
        }
    }
    b.build().unwrap()
}

proptest! {
    #[test]
    fn macrosteps_keep_configuration_legal(events in prop::collection::vec(event_name(), 0..40)) {
        let doc = rich_document();
        let reporter = Arc::new(CollectingReporter::new());
        let mut interp = doc.interpreter(reporter.clone(), EngineConfig::default());
        interp.start().unwrap();

        for name in events {
            let outcome = interp.process_event(Event::new(name)).unwrap();
            if outcome.terminated {
                prop_assert_eq!(interp.status(), ExecutionState::Terminated);
                prop_assert!(interp.configuration().is_empty());
                break;
            }
            prop_assert!(is_legal_configuration(interp.tree(), interp.configuration(), reporter.as_ref()));
            assert_complete(&interp);
            prop_assert_eq!(interp.status(), ExecutionState::Stable);
        }

        prop_assert!(reporter
            .reports()
            .iter()
            .all(|r| r.code != statechart_core::reporter::codes::ILLEGAL_CONFIG));
    }

    #[test]
    fn snapshot_restore_preserves_behaviour(
        prefix in prop::collection::vec(event_name(), 0..20),
        suffix in prop::collection::vec(event_name(), 0..20),
    ) {
        let doc = rich_document();
        let reporter = Arc::new(CollectingReporter::new());
        let mut live = doc.interpreter(reporter.clone(), EngineConfig::default());
        live.start().unwrap();
        for name in &prefix {
            if live.status() == ExecutionState::Terminated {
                break;
            }
            live.process_event(Event::new(*name)).unwrap();
        }
        if live.status() != ExecutionState::Stable {
            return Ok(());
        }

        let snapshot = live.snapshot();
        let mut restored = Interpreter::restore(
            Arc::clone(&doc.tree),
            JsonDataModel::new(live.evaluator().ctx().clone()),
            reporter.clone(),
            EngineConfig::default(),
            &snapshot,
        )
        .unwrap();

        for name in &suffix {
            if live.status() == ExecutionState::Terminated {
                break;
            }
            let a = live.process_event(Event::new(*name)).unwrap();
            let b = restored.process_event(Event::new(*name)).unwrap();
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(live.active_ids(), restored.active_ids());
    }

    #[test]
    fn cross_region_transitions_keep_regions_populated(
        moves in prop::collection::vec((0..REGIONS, 0..STATES), 1..30)
    ) {
        let tree = Arc::new(region_tree());
        let reporter = Arc::new(CollectingReporter::new());
        let mut interp = Interpreter::new(
            Arc::clone(&tree),
            JsonDataModel::default(),
            reporter.clone(),
            EngineConfig::default(),
        );
        interp.start().unwrap();

        for (r, k) in moves {
            let was_active = interp.is_in(&leaf(r, k));
            let outcome = interp.process_event(Event::new(format!("go_{}_{}", r, k))).unwrap();

            prop_assert!(interp.is_in(&leaf(r, k)));
            prop_assert!(is_legal_configuration(&tree, interp.configuration(), reporter.as_ref()));
            assert_complete(&interp);
            for region in 0..REGIONS {
                let active = (0..STATES).filter(|k| interp.is_in(&leaf(region, *k))).count();
                prop_assert_eq!(active, 1);
            }
            if !was_active {
                // Regions other than the target's restart from their first leaf.
                for other in (0..REGIONS).filter(|o| *o != r) {
                    let first = leaf(other, 0);
                    let leaving_region = outcome.exited.iter().any(|s| s == "p");
                    prop_assert!(!leaving_region || interp.is_in(&first));
                }
            }
        }
        prop_assert!(reporter.is_empty());
    }
}
