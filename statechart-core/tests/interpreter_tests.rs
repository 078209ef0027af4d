//! End-to-end tests driving documents through the public API.

use serde_json::{json, Value};
use statechart_core::reporter::codes;
use statechart_core::{
    is_legal_configuration, CollectingReporter, CoreError, Document, EngineConfig, ErrorContext, Event,
    ExecutionState, Interpreter, JsonDataModel, StatechartEngine,
};
use std::sync::Arc;

fn load(json: Value) -> Document {
    Document::from_json("test", &json).unwrap()
}

fn start(doc: &Document) -> (Interpreter<JsonDataModel>, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::new());
    let mut interp = doc.interpreter(reporter.clone(), EngineConfig::default());
    interp.start().unwrap();
    (interp, reporter)
}

fn ids(doc: &Document, names: &[&str]) -> Vec<statechart_core::StateId> {
    names.iter().map(|n| doc.tree.lookup(n).unwrap()).collect()
}

// ============================================================================
// Configuration legality
// ============================================================================

#[test]
fn test_parallel_with_only_nested_child_is_illegal() {
    let doc = load(json!({"states": [
        {"id": "4", "type": "parallel", "states": [
            {"id": "1"},
            {"id": "2"},
            {"id": "inner", "type": "parallel", "states": [{"id": "x"}, {"id": "y"}]}
        ]}
    ]}));
    let reporter = CollectingReporter::new();

    assert!(!is_legal_configuration(&doc.tree, ids(&doc, &["inner", "x", "y"]), &reporter));
    assert_eq!(reporter.len(), 1);
    let report = reporter.last().unwrap();
    assert_eq!(report.code, codes::ILLEGAL_CONFIG);
    assert_eq!(report.detail, "Not all AND states active for parallel 4");
}

#[test]
fn test_top_level_exclusivity() {
    let doc = load(json!({"states": [{"id": "1"}, {"id": "2"}]}));
    let reporter = CollectingReporter::new();

    assert!(is_legal_configuration(&doc.tree, ids(&doc, &["1"]), &reporter));
    assert!(!is_legal_configuration(&doc.tree, ids(&doc, &["1", "2"]), &reporter));
    assert_eq!(reporter.last().unwrap().detail, "Multiple top-level OR states active!");
}

#[test]
fn test_or_exclusivity() {
    let doc = load(json!({"states": [
        {"id": "parentid", "states": [{"id": "1"}, {"id": "2"}]}
    ]}));
    let reporter = CollectingReporter::new();

    assert!(!is_legal_configuration(&doc.tree, ids(&doc, &["1", "2"]), &reporter));
    assert_eq!(
        reporter.last().unwrap().detail,
        "Multiple OR states active for state parentid"
    );
}

// ============================================================================
// History
// ============================================================================

fn history_document() -> Document {
    load(json!({"states": [
        {"id": "main", "states": [
            {"id": "player", "transitions": [{"event": "pause", "target": "paused"}], "states": [
                {"id": "shallow", "type": "history"},
                {"id": "deep", "type": "history", "deep": true},
                {"id": "video", "states": [
                    {"id": "sd", "transitions": [{"event": "hd", "target": "hd"}]},
                    {"id": "hd"}
                ]},
                {"id": "menu", "transitions": [{"event": "back", "target": "video"}]}
            ]},
            {"id": "paused", "transitions": [
                {"event": "resume_deep", "target": "deep"},
                {"event": "resume_shallow", "target": "shallow"}
            ]}
        ]}
    ]}))
}

#[test]
fn test_deep_history_restores_leaf() {
    let doc = history_document();
    let (mut interp, reporter) = start(&doc);
    assert_eq!(interp.atomic_ids(), vec!["sd"]);

    interp.process_event(Event::new("hd")).unwrap();
    interp.process_event(Event::new("pause")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["paused"]);

    interp.process_event(Event::new("resume_deep")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["hd"]);
    assert!(reporter.is_empty());
}

#[test]
fn test_shallow_history_restores_child_default() {
    let doc = history_document();
    let (mut interp, _) = start(&doc);

    interp.process_event(Event::new("hd")).unwrap();
    interp.process_event(Event::new("pause")).unwrap();
    interp.process_event(Event::new("resume_shallow")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["sd"]);
    assert!(interp.is_in("video"));
}

#[test]
fn test_history_fallback_is_reported() {
    let doc = load(json!({"states": [
        {"id": "main", "states": [
            {"id": "start", "transitions": [{"event": "go", "target": "h"}]},
            {"id": "c", "states": [
                {"id": "h", "type": "history"},
                {"id": "c1"},
                {"id": "c2"}
            ]}
        ]}
    ]}));
    let (mut interp, reporter) = start(&doc);

    interp.process_event(Event::new("go")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["c1"]);
    let report = reporter.last().unwrap();
    assert_eq!(report.code, codes::HISTORY_FALLBACK);
    assert_eq!(report.context, ErrorContext::State { id: "h".to_string() });
}

#[test]
fn test_history_default_transition_runs_actions() {
    let doc = load(json!({"datamodel": {}, "states": [
        {"id": "main", "states": [
            {"id": "start", "transitions": [{"event": "go", "target": "h"}]},
            {"id": "c", "states": [
                {"id": "h", "type": "history", "transitions": [
                    {"target": "c2", "actions": [{"assign": {"location": "ctx.via", "expr": "\"default\""}}]}
                ]},
                {"id": "c1"},
                {"id": "c2"}
            ]}
        ]}
    ]}));
    let (mut interp, reporter) = start(&doc);

    interp.process_event(Event::new("go")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["c2"]);
    assert_eq!(interp.evaluator().ctx(), &json!({"via": "default"}));
    assert!(reporter.is_empty());
}

// ============================================================================
// Selection and conflicts
// ============================================================================

fn parallel_document() -> Document {
    load(json!({"states": [
        {"id": "root", "states": [
            {"id": "p", "type": "parallel", "transitions": [{"event": "reset", "target": "p"}], "states": [
                {"id": "a", "states": [
                    {"id": "a1", "transitions": [
                        {"event": "step", "target": "a2"},
                        {"event": "jump", "target": "b2"}
                    ]},
                    {"id": "a2"}
                ]},
                {"id": "b", "states": [
                    {"id": "b1", "transitions": [{"event": "step", "target": "b2"}]},
                    {"id": "b2", "transitions": [{"event": "reset", "target": "b1"}]}
                ]}
            ]}
        ]}
    ]}))
}

#[test]
fn test_regions_step_together() {
    let doc = parallel_document();
    let (mut interp, _) = start(&doc);

    let outcome = interp.process_event(Event::new("step")).unwrap();
    assert_eq!(outcome.exited, vec!["b1", "a1"]);
    assert_eq!(outcome.entered, vec!["a2", "b2"]);
    assert_eq!(interp.atomic_ids(), vec!["a2", "b2"]);
}

#[test]
fn test_cross_region_jump_reenters_parallel() {
    let doc = parallel_document();
    let (mut interp, _) = start(&doc);

    let outcome = interp.process_event(Event::new("jump")).unwrap();
    assert!(outcome.exited.contains(&"p".to_string()));
    assert_eq!(interp.atomic_ids(), vec!["a1", "b2"]);
}

#[test]
fn test_descendant_preempts_parallel_reset() {
    let doc = parallel_document();
    let (mut interp, _) = start(&doc);
    interp.process_event(Event::new("jump")).unwrap();

    // a1 has no "reset", so region a falls back to p's reset; b2's own
    // reset is a descendant of p and wins the conflict.
    let outcome = interp.process_event(Event::new("reset")).unwrap();
    assert_eq!(outcome.exited, vec!["b2"]);
    assert_eq!(interp.atomic_ids(), vec!["a1", "b1"]);
}

#[test]
fn test_guard_error_disables_transition() {
    let doc = load(json!({"datamodel": {"n": "many"}, "states": [
        {"id": "s", "states": [
            {"id": "a", "transitions": [
                {"event": "go", "target": "b", "cond": "ctx.n >= 2"},
                {"event": "go", "target": "c"}
            ]},
            {"id": "b"},
            {"id": "c"}
        ]}
    ]}));
    let (mut interp, reporter) = start(&doc);

    interp.process_event(Event::new("go")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["c"]);
    let report = reporter.last().unwrap();
    assert_eq!(report.code, codes::EXPRESSION_ERROR);
    assert_eq!(
        report.context,
        ErrorContext::Transition {
            source: "a".to_string(),
            rank: 0
        }
    );
}

#[test]
fn test_event_data_and_wildcards() {
    let doc = load(json!({"datamodel": {}, "states": [
        {"id": "s", "states": [
            {"id": "waiting", "transitions": [
                {"event": "error", "target": "failed",
                 "actions": [{"assign": {"location": "ctx.reason", "expr": "_event.data.reason"}}]},
                {"event": "*", "target": "other"}
            ]},
            {"id": "failed"},
            {"id": "other"}
        ]}
    ]}));
    let (mut interp, _) = start(&doc);

    interp
        .process_event(Event::with_data("error.io.disk", json!({"reason": "full"})))
        .unwrap();
    assert_eq!(interp.atomic_ids(), vec!["failed"]);
    assert_eq!(interp.evaluator().ctx(), &json!({"reason": "full"}));

    let (mut interp, _) = start(&doc);
    interp.process_event(Event::new("anything")).unwrap();
    assert_eq!(interp.atomic_ids(), vec!["other"]);
}

// ============================================================================
// Macrosteps
// ============================================================================

#[test]
fn test_raise_is_processed_in_same_macrostep() {
    let doc = load(json!({"states": [
        {"id": "s", "states": [
            {"id": "a", "transitions": [{"event": "go", "target": "b", "actions": [{"raise": "again"}]}]},
            {"id": "b", "transitions": [{"event": "again", "target": "c"}]},
            {"id": "c", "transitions": [{"target": "d", "cond": "In('c')"}]},
            {"id": "d"}
        ]}
    ]}));
    let (mut interp, _) = start(&doc);

    let outcome = interp.process_event(Event::new("go")).unwrap();
    assert_eq!(outcome.microsteps, 2);
    assert_eq!(outcome.entered, vec!["b", "c", "d"]);
    assert_eq!(interp.status(), ExecutionState::Stable);
}

#[test]
fn test_microstep_limit_from_config() {
    let doc = load(json!({"states": [
        {"id": "s", "states": [
            {"id": "a", "transitions": [{"event": "spin", "target": "b"}]},
            {"id": "b", "transitions": [{"target": "c"}]},
            {"id": "c", "transitions": [{"target": "b"}]}
        ]}
    ]}));
    let reporter = Arc::new(CollectingReporter::new());
    let config = EngineConfig {
        max_microsteps: 50,
        ..EngineConfig::default()
    };
    let mut interp = doc.interpreter(reporter, config);
    interp.start().unwrap();

    let err = interp.process_event(Event::new("spin")).unwrap_err();
    assert!(matches!(err, CoreError::MicrostepLimit { limit: 50 }));
    assert_eq!(err.error_code(), "MICROSTEP_LIMIT");
}

#[test]
fn test_final_state_terminates_and_runs_exit_actions() {
    let doc = load(json!({"datamodel": {}, "states": [
        {"id": "s", "onexit": [{"assign": {"location": "ctx.s_exited", "expr": "true"}}], "states": [
            {"id": "a", "transitions": [{"event": "finish", "target": "done"}]}
        ]},
        {"id": "done", "type": "final", "onexit": [{"assign": {"location": "ctx.cleaned", "expr": "true"}}]}
    ]}));
    let (mut interp, _) = start(&doc);

    let outcome = interp.process_event(Event::new("finish")).unwrap();
    assert!(outcome.terminated);
    assert_eq!(outcome.configuration, vec!["done"]);
    assert!(interp.configuration().is_empty());
    assert_eq!(interp.evaluator().ctx(), &json!({"s_exited": true, "cleaned": true}));
}

// ============================================================================
// Engine
// ============================================================================

#[test]
fn test_engine_round_trip() {
    let reporter = Arc::new(CollectingReporter::new());
    let engine = StatechartEngine::with_reporter(EngineConfig::default(), reporter.clone());
    let doc = history_document();
    engine.put_document("player", &doc.to_json().unwrap()).unwrap();

    let info = engine.create_instance(Some("tv"), "player", None).unwrap();
    assert_eq!(info.configuration, vec!["main", "player", "video", "sd"]);

    engine.send("tv", Event::new("hd")).unwrap();
    engine.send("tv", Event::new("pause")).unwrap();
    let (snapshot, ctx) = engine.snapshot_instance("tv").unwrap();
    assert_eq!(snapshot.history["deep"], vec!["hd"]);

    engine.delete_instance("tv").unwrap();
    engine.restore_instance("tv", "player", &snapshot, ctx).unwrap();
    let outcome = engine.send("tv", Event::new("resume_deep")).unwrap();
    assert_eq!(outcome.configuration, vec!["main", "player", "video", "hd"]);
    assert!(reporter.is_empty());
}
