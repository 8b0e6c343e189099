//! Benchmarks for invalidation, regeneration and dispatch.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use slotgraph::samples::{counter_document, repeat_document, trigger_document};
use slotgraph::{Engine, Value};

fn repeat_engine(n: i64) -> Engine {
    let mut engine = repeat_document().engine();
    engine.set("/list:count", Value::int(n)).ok();
    engine.value("/list:total").ok();
    engine
}

/// Write one generated value and re-read the aggregate over all of them
fn bench_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("write_then_sum", n), &n, |b, &n| {
            let mut engine = repeat_engine(n);
            let mut value = 0;
            b.iter(|| {
                value += 1;
                engine.set("/list/#0:value", Value::int(value)).ok();
                engine.value("/list:total").ok()
            });
        });
    }

    // Fresh reads only
    group.bench_function("steady_read", |b| {
        let mut engine = repeat_engine(100);
        b.iter(|| engine.value("/list:total").ok());
    });

    group.finish();
}

/// Grow and shrink a generated set
fn bench_regeneration(c: &mut Criterion) {
    let mut group = c.benchmark_group("regeneration");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("grow_shrink", n), &n, |b, &n| {
            let mut engine = repeat_engine(n);
            b.iter(|| {
                engine.set("/list:count", Value::int(n / 2)).ok();
                engine.value("/list:total").ok();
                engine.set("/list:count", Value::int(n)).ok();
                engine.value("/list:total").ok()
            });
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("counter_increment", |b| {
        let mut engine = counter_document().engine();
        b.iter(|| engine.dispatch_at("/counter", "increment", Value::Empty).ok());
    });

    group.bench_function("chained_triggers", |b| {
        let mut engine = trigger_document().engine();
        b.iter(|| {
            engine.dispatch_at("/panel", "a", Value::Empty).ok();
            engine.dispatch_at("/panel", "group", Value::Empty).ok()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_invalidation, bench_regeneration, bench_dispatch);
criterion_main!(benches);
