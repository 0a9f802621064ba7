use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kvsnap::db::{Factory, StoreParams};
use kvsnap::snapshot::SnapshotEngine;
use serde_json::json;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Fixture generator for databases of a given size
mod fixtures {
    use super::*;

    /// Create `bench` with two stores holding `records` records each
    pub async fn create_database(factory: &Factory, records: usize) {
        factory
            .open_versioned("bench", 1, move |change| {
                change.create_object_store("orders", StoreParams::inline("id").auto_increment())?;
                change.create_index("orders", "by_user", "user", false)?;
                change.create_object_store("events", StoreParams::out_of_line().auto_increment())?;
                for n in 0..records {
                    change.put(
                        "orders",
                        json!({"user": format!("user-{}", n % 50), "total": n, "lines": [1, 2, 3]}),
                        None,
                    )?;
                    change.put("events", json!({"kind": "view", "n": n}), None)?;
                }
                Ok(())
            })
            .await
            .expect("fixture database");
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn bench_capture(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("capture");

    for records in [100, 1_000, 5_000] {
        let temp = TempDir::new().unwrap();
        let factory = Factory::new(temp.path());
        rt.block_on(fixtures::create_database(&factory, records));
        let engine = SnapshotEngine::new(factory, "https://bench.example");

        group.bench_with_input(BenchmarkId::new("records", records), &records, |b, _| {
            b.iter(|| {
                let snapshot = rt.block_on(engine.capture("bench", 1)).unwrap();
                black_box(snapshot.record_count)
            });
        });
    }

    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("restore");

    for records in [100, 1_000] {
        let temp = TempDir::new().unwrap();
        let factory = Factory::new(temp.path());
        rt.block_on(fixtures::create_database(&factory, records));

        // events are out-of-line, a restore would append rather than overwrite them
        let engine = SnapshotEngine::new(factory, "https://bench.example");
        let mut snapshot = rt.block_on(engine.capture("bench", 1)).unwrap();
        snapshot.stores.retain(|store| store == "orders");
        snapshot.snapshot.retain(|store, _| store == "orders");
        snapshot.store_count = 1;
        snapshot.record_count = records;

        group.bench_with_input(BenchmarkId::new("records", records), &records, |b, _| {
            b.iter(|| black_box(rt.block_on(engine.restore(&snapshot)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_capture, bench_restore);
criterion_main!(benches);
