//! Throughput Benchmark for EmberKV
//!
//! Measures command execution through `Engine::execute` under various
//! workloads, with and without the write-ahead log.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::{ConnectionId, Engine, EngineConfig, PersistenceConfig};
use std::sync::Arc;
use std::time::Duration;

fn args(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::from(s.to_string())).collect()
}

fn exec(engine: &Engine, conn: ConnectionId, name: &str, items: Vec<Bytes>) {
    black_box(engine.execute(conn, name, &items).unwrap());
}

/// Benchmark SET and GET
fn bench_strings(c: &mut Criterion) {
    let engine = Engine::default();
    let conn = engine.connect();
    for i in 0..100_000 {
        exec(&engine, conn, "SET", args(&[&format!("key:{}", i), "value"]));
    }

    let mut group = c.benchmark_group("strings");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            exec(&engine, conn, "SET", args(&[&format!("new:{}", i), "small_value"]));
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            exec(&engine, conn, "GET", args(&[&format!("key:{}", i % 100_000)]));
            i += 1;
        });
    });

    group.bench_function("incr_single_counter", |b| {
        b.iter(|| exec(&engine, conn, "INCR", args(&["counter"])));
    });

    group.finish();
}

/// Benchmark the collection types
fn bench_collections(c: &mut Criterion) {
    let engine = Engine::default();
    let conn = engine.connect();

    let mut group = c.benchmark_group("collections");
    group.throughput(Throughput::Elements(1));

    group.bench_function("zadd", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let score = (i % 10_000).to_string();
            exec(&engine, conn, "ZADD", args(&["board", &score, &format!("m{}", i)]));
            i += 1;
        });
    });

    group.bench_function("zrank", |b| {
        let mut i = 0u64;
        b.iter(|| {
            exec(&engine, conn, "ZRANK", args(&["board", &format!("m{}", i % 1_000)]));
            i += 1;
        });
    });

    group.bench_function("rpush_lpop", |b| {
        b.iter(|| {
            exec(&engine, conn, "RPUSH", args(&["queue", "job"]));
            exec(&engine, conn, "LPOP", args(&["queue"]));
        });
    });

    group.bench_function("pfadd", |b| {
        let mut i = 0u64;
        b.iter(|| {
            exec(&engine, conn, "PFADD", args(&["visitors", &format!("u{}", i)]));
            i += 1;
        });
    });

    group.bench_function("xadd", |b| {
        b.iter(|| exec(&engine, conn, "XADD", args(&["events", "MAXLEN", "1000", "*", "k", "v"])));
    });

    group.finish();
}

/// Benchmark a five-command transaction
fn bench_transaction(c: &mut Criterion) {
    let engine = Engine::default();
    let conn = engine.connect();

    let mut group = c.benchmark_group("transaction");
    group.throughput(Throughput::Elements(5));

    group.bench_function("multi_exec_5", |b| {
        b.iter(|| {
            exec(&engine, conn, "MULTI", Vec::new());
            for i in 0..5 {
                exec(&engine, conn, "INCR", args(&[&format!("tx:{}", i)]));
            }
            exec(&engine, conn, "EXEC", Vec::new());
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(Engine::default());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        let conn = engine.connect();
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            exec(&engine, conn, "SET", args(&[&key, "value"]));
                            exec(&engine, conn, "GET", args(&[&key]));
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.keyspace().len());
        });
    });

    group.finish();
}

/// Benchmark writes with the WAL enabled
fn bench_logged_writes(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig {
        persistence: PersistenceConfig::in_dir(dir.path()),
        ..EngineConfig::default()
    };
    let engine = Engine::open(config).unwrap();
    let conn = engine.connect();

    let mut group = c.benchmark_group("persistence");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_batched_fsync", |b| {
        let mut i = 0u64;
        b.iter(|| {
            exec(&engine, conn, "SET", args(&[&format!("key:{}", i % 10_000), "value"]));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_strings,
    bench_collections,
    bench_transaction,
    bench_concurrent,
    bench_logged_writes,
);
criterion_main!(benches);
