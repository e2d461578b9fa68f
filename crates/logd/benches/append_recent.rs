// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use logd::envelope::{Level, LogMessage};
use logd::query::{QueryEngine, RecentQuery};
use logd::store::{IncomingLog, LogStore, MemoryBackend, DEFAULT_PREFIX};

fn lines(path: &str, count: usize) -> Vec<IncomingLog> {
    (0..count)
        .map(|i| {
            let name = if i % 2 == 0 { "web" } else { "worker" };
            let level = Level::STANDARD[i % Level::STANDARD.len()];
            LogMessage::new(path, name, level, format!("line {i}")).into()
        })
        .collect()
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    group.bench_function("single", |b| {
        let store = LogStore::new(MemoryBackend::new(), DEFAULT_PREFIX);
        let line = lines("bench.log", 1).remove(0);
        b.iter(|| store.append(black_box(line.clone())));
    });

    group.bench_function("batch_100", |b| {
        let store = LogStore::new(MemoryBackend::new(), DEFAULT_PREFIX);
        b.iter_batched(
            || lines("bench.log", 100),
            |batch| store.append_batch("bench.log", batch),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_recent(c: &mut Criterion) {
    let store = Arc::new(LogStore::new(MemoryBackend::new(), DEFAULT_PREFIX));
    for _ in 0..10 {
        let _ = store.append_batch("bench.log", lines("bench.log", 1_000));
    }
    let engine = QueryEngine::new(store);

    let mut group = c.benchmark_group("recent");
    group.bench_function("tail", |b| {
        let query = RecentQuery::new("bench.log");
        b.iter(|| engine.recent(black_box(&query)));
    });
    group.bench_function("name_and_level", |b| {
        let query = RecentQuery::new("bench.log").name("web").level(Level::INFO);
        b.iter(|| engine.recent(black_box(&query)));
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_recent);
criterion_main!(benches);
