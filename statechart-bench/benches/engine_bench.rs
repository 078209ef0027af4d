//! Interpreter and instance registry benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use statechart_core::{CollectingReporter, Document, EngineConfig, Event, StatechartEngine};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Global counter to ensure unique instance IDs across all benchmark iterations
static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn order_document() -> serde_json::Value {
    serde_json::json!({
        "datamodel": {"amount": 500, "retries": 0},
        "states": [
            {"id": "order", "states": [
                {"id": "created", "transitions": [{"event": "START", "target": "processing"}]},
                {"id": "processing", "type": "parallel", "states": [
                    {"id": "payment", "states": [
                        {"id": "pending", "transitions": [
                            {"event": "PAY", "target": "paid", "cond": "ctx.amount <= 1000"}
                        ]},
                        {"id": "paid", "type": "final"}
                    ]},
                    {"id": "shipping", "states": [
                        {"id": "packing", "transitions": [{"event": "SHIP", "target": "shipped"}]},
                        {"id": "shipped", "type": "final"}
                    ]}
                ], "transitions": [
                    {"event": "done.state.processing", "target": "completed"},
                    {"event": "FAIL", "target": "failed"}
                ]},
                {"id": "failed", "transitions": [
                    {"event": "RETRY", "target": "processing",
                     "actions": [{"assign": {"location": "ctx.retries", "expr": "ctx.retries"}}]}
                ]},
                {"id": "completed", "transitions": [{"event": "RESET", "target": "created"}]}
            ]}
        ]
    })
}

fn create_test_engine() -> Arc<StatechartEngine> {
    let reporter = Arc::new(CollectingReporter::new());
    let engine = Arc::new(StatechartEngine::with_reporter(EngineConfig::default(), reporter));
    engine.put_document("order", &order_document()).unwrap();
    engine
}

fn bench_compile_document(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_compile");

    let order = order_document();
    group.bench_function("order", |b| {
        b.iter(|| black_box(Document::from_json("order", &order).unwrap()))
    });

    // Long chain of compound states
    let chain = serde_json::json!({
        "states": (0..50).map(|i| serde_json::json!({
            "id": format!("s{}", i),
            "states": [{"id": format!("s{}_a", i)}, {"id": format!("s{}_b", i)}],
            "transitions": [{"event": format!("NEXT_{}", i), "target": format!("s{}", (i + 1) % 50)}]
        })).collect::<Vec<_>>()
    });
    group.bench_function("chain_50", |b| {
        b.iter(|| black_box(Document::from_json("chain", &chain).unwrap()))
    });

    group.finish();
}

fn bench_create_instance(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_create_instance");

    let engine = create_test_engine();

    group.throughput(Throughput::Elements(1));
    group.bench_function("create", |b| {
        b.iter(|| {
            let id = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
            black_box(
                engine
                    .create_instance(Some(&format!("inst-{}", id)), "order", None)
                    .unwrap(),
            )
        });
    });

    // Generated ids
    group.bench_function("create_uuid", |b| {
        b.iter(|| black_box(engine.create_instance(None, "order", None).unwrap()));
    });

    group.finish();
}

fn bench_macrostep(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_macrostep");

    let engine = create_test_engine();
    let id = "cycle";
    engine.create_instance(Some(id), "order", None).unwrap();

    // One full lifecycle: enter the parallel, finish both regions, complete, reset.
    let lifecycle = ["START", "PAY", "SHIP", "RESET"];
    group.throughput(Throughput::Elements(lifecycle.len() as u64));
    group.bench_function("lifecycle", |b| {
        b.iter(|| {
            for name in lifecycle {
                black_box(engine.send(id, Event::new(name)).unwrap());
            }
        });
    });

    // Event that matches nothing
    group.bench_function("no_match", |b| {
        b.iter(|| black_box(engine.send(id, Event::new("UNKNOWN")).unwrap()));
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_snapshot");

    let engine = create_test_engine();
    engine.create_instance(Some("snap"), "order", None).unwrap();
    engine.send("snap", Event::new("START")).unwrap();

    group.bench_function("snapshot", |b| {
        b.iter(|| black_box(engine.snapshot_instance("snap").unwrap()));
    });

    let (snapshot, ctx) = engine.snapshot_instance("snap").unwrap();
    group.bench_function("restore", |b| {
        b.iter(|| {
            let id = format!("restored-{}", INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed));
            black_box(engine.restore_instance(&id, "order", &snapshot, ctx.clone()).unwrap())
        });
    });

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");
    group.sample_size(20);

    let engine = create_test_engine();

    for batch_size in [100, 1000] {
        let prefix = INSTANCE_COUNTER.fetch_add(batch_size as u64, Ordering::Relaxed);
        for i in 0..batch_size {
            engine
                .create_instance(Some(&format!("tp-{}-{}", prefix, i)), "order", None)
                .unwrap();
        }

        group.throughput(Throughput::Elements(batch_size as u64 * 2));
        group.bench_with_input(BenchmarkId::new("events", batch_size), &batch_size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let id = format!("tp-{}-{}", prefix, i);
                    let _ = engine.send(&id, Event::new("START"));
                    let _ = engine.send(&id, Event::new("FAIL"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compile_document,
    bench_create_instance,
    bench_macrostep,
    bench_snapshot,
    bench_throughput,
);

criterion_main!(benches);
