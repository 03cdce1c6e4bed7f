//! Performance benchmarks for rendering and draining.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use evtlog::provider::{ChannelKind, JournalStore, LogProvider, MemoryStore, NewEvent};
use evtlog::{render_message, Query, Subscribe};
use std::sync::Arc;
use tempfile::TempDir;

fn seeded_memory(count: u16) -> Arc<LogProvider<MemoryStore>> {
    let store = MemoryStore::with_channels(["Application"]);
    for i in 0..count {
        store
            .append(
                "Application",
                NewEvent::new("Bench", i % 8)
                    .level((i % 5) as u8)
                    .message("Request %1 from %2 took %3 ms")
                    .inserts([i.to_string(), "10.0.0.1".to_string(), "12".to_string()]),
            )
            .unwrap();
    }
    Arc::new(LogProvider::new(store))
}

/// Benchmark template substitution with varying placeholder counts
fn bench_render_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_message");

    for placeholders in [1usize, 8, 32] {
        let template: String = (1..=placeholders).map(|n| format!("field %{} ", n)).collect();
        let inserts: Vec<String> = (1..=placeholders).map(|n| format!("value{}", n)).collect();
        group.bench_with_input(
            BenchmarkId::new("placeholders", placeholders),
            &placeholders,
            |b, _| b.iter(|| black_box(render_message(&template, &inserts))),
        );
    }

    // Mismatched inserts take the masking path
    group.bench_function("masked", |b| {
        b.iter(|| black_box(render_message("Error %1 at %2 (%3)", &["404"])))
    });

    group.finish();
}

/// Benchmark draining a query with and without a filter
fn bench_query_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_drain");

    for count in [100u16, 1000, 10000] {
        let provider = seeded_memory(count);
        group.bench_with_input(BenchmarkId::new("all", count), &count, |b, _| {
            b.iter(|| {
                let mut query = Query::new(provider.clone(), "Application", "*", None).unwrap();
                black_box(query.each().count())
            });
        });
        group.bench_with_input(BenchmarkId::new("filtered", count), &count, |b, _| {
            b.iter(|| {
                let mut query = Query::new(
                    provider.clone(),
                    "Application",
                    "*[System[Level=2 and (EventID=1 or EventID=3)]]",
                    None,
                )
                .unwrap();
                black_box(query.each().count())
            });
        });
    }

    group.finish();
}

/// Benchmark a subscription draining its backlog, with and without XML
fn bench_subscription_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_backlog");
    let provider = seeded_memory(1000);

    for as_xml in [true, false] {
        group.bench_with_input(BenchmarkId::new("render_as_xml", as_xml), &as_xml, |b, &xml| {
            b.iter(|| {
                let mut sub = Subscribe::new(provider.clone());
                sub.set_read_existing_events(true);
                sub.set_render_as_xml(xml);
                sub.subscribe("Application", "*", None, None).unwrap();
                black_box(sub.each().filter_map(|r| r.ok()).count())
            });
        });
    }

    group.finish();
}

/// Benchmark journal appends
fn bench_journal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_append");

    group.bench_function("append_1000", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let store = JournalStore::open_path(dir.path().join("journal")).unwrap();
            store.create_channel("Application", ChannelKind::Admin).unwrap();
            for i in 0..1000u16 {
                store
                    .append("Application", NewEvent::new("Bench", i).message("Event %1").insert("x"))
                    .unwrap();
            }
            black_box(store.sync().unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_render_message,
    bench_query_drain,
    bench_subscription_backlog,
    bench_journal_append
);
criterion_main!(benches);
