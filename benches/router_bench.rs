// Criterion benchmarks for the routers and membership diffing
//
// Run with:
//   cargo bench --bench router_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use miniroute::common::fnv1a_32;
use miniroute::discovery::AddrBackendFactory;
use miniroute::{CoordinationClient, MembershipMonitor, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn monitor(count: usize) -> MembershipMonitor<AddrBackendFactory> {
    let client = CoordinationClient::new(
        vec!["memory".to_string()],
        Duration::from_secs(5),
        Arc::new(MemoryStore::new()),
    );
    let monitor =
        MembershipMonitor::new(client, "/bench", AddrBackendFactory, serde_json::Value::Null)
            .expect("valid path");
    monitor.apply(&addrs(count)).expect("monitor open");
    monitor
}

fn addrs(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("10.0.{}.{}:6379", i / 256, i % 256)).collect()
}

fn bench_round_robin(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_robin");
    for count in [2, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let monitor = monitor(count);
            let router = monitor.round_robin();
            b.iter(|| black_box(router.get_connection()));
        });
    }
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");
    group.bench_function("fnv1a_32_16b", |b| {
        b.iter(|| fnv1a_32(black_box(b"session:12345678")))
    });
    for count in [2, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let monitor = monitor(count);
            let router = monitor.hash_router(None);
            b.iter(|| black_box(router.get_connection(black_box(b"user:42"))));
        });
    }
    group.finish();
}

fn bench_mostly_disabled(c: &mut Criterion) {
    c.bench_function("round_robin_1_of_50_valid", |b| {
        let monitor = monitor(50);
        let all = addrs(50);
        monitor.apply(&all[49..]).expect("monitor open");
        let router = monitor.round_robin();
        b.iter(|| black_box(router.get_connection()));
    });
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let monitor = monitor(count);
            let full = addrs(count);
            let half = &full[..count / 2];
            b.iter(|| {
                monitor.apply(black_box(half)).expect("monitor open");
                monitor.apply(black_box(&full)).expect("monitor open");
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_round_robin,
    bench_hash,
    bench_mostly_disabled,
    bench_apply
);
criterion_main!(benches);
