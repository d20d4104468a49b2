//! 📊 Submit-path benchmark: how fast can records go through shaping, buffering and an
//! in-memory store?
//!
//! Run with: `cargo bench -p mongosink --bench submit_bench`

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use mongosink::config::{PipelineConfig, UniqueKey};
use mongosink::host::StopSignal;
use mongosink::store::InMemoryStore;
use mongosink::{Pipeline, Record};

const RECORDS: u64 = 1_000;

fn record(n: u64) -> Record<Value> {
    [
        ("url", json!(format!("https://example.com/items/{n}"))),
        ("title", json!("A perfectly ordinary item")),
        ("subtitle", json!("")),
        ("price", json!(n as f64 * 1.25)),
    ]
    .into_iter()
    .collect()
}

async fn push_all(config: PipelineConfig) {
    let (signal, _listener) = StopSignal::new();
    let mut pipeline = Pipeline::open(config, InMemoryStore::new(), Arc::new(signal));
    for n in 0..RECORDS {
        let shaped = pipeline.submit(record(n), "bench").await;
        black_box(shaped.is_ok());
    }
    black_box(pipeline.close().await.is_ok());
}

fn bench_submit(c: &mut Criterion) {
    let Ok(rt) = Runtime::new() else {
        return;
    };
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(RECORDS));

    for buffer in [None, Some(10), Some(100)] {
        let label = buffer.map_or_else(|| "unbuffered".to_string(), |n| format!("buffer_{n}"));
        group.bench_with_input(BenchmarkId::new("insert", label), &buffer, |b, &buffer| {
            b.to_async(&rt).iter(|| {
                push_all(PipelineConfig {
                    buffer,
                    ..PipelineConfig::default()
                })
            });
        });
    }

    group.bench_function("upsert_by_url", |b| {
        b.to_async(&rt).iter(|| {
            push_all(PipelineConfig {
                unique_key: Some(UniqueKey::Field("url".into())),
                ..PipelineConfig::default()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_submit);
criterion_main!(benches);
