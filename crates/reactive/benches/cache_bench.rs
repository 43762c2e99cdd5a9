//! Benchmarks for BoundedReactiveCache lookups and eviction scans.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quarry_reactive::{BoundedReactiveCache, LifetimeScope, ReactiveValue};

fn populate(
    capacity: usize,
    live: usize,
) -> (BoundedReactiveCache<ReactiveValue<u64>>, LifetimeScope) {
    let cache = BoundedReactiveCache::with_capacity(capacity);
    let scope = LifetimeScope::new();
    for i in 0..capacity {
        let entry = cache.get_or_create(&format!("key{}", i), ReactiveValue::new);
        if i < live {
            entry.attach(1, &scope, |_: &u64| {}).unwrap();
        }
    }
    (cache, scope)
}

/// Benchmark: hits never scan, regardless of capacity.
fn cache_hit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");
    for capacity in [16usize, 256, 4096].iter() {
        let (cache, _scope) = populate(*capacity, 0);
        let key = format!("key{}", capacity / 2);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, _| {
            b.iter(|| black_box(cache.get_or_create(&key, ReactiveValue::new)));
        });
    }
    group.finish();
}

/// Benchmark: misses at capacity, with a prefix of live entries the scan
/// has to skip.
fn cache_miss_eviction_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_miss_eviction");
    let capacity = 1024usize;
    for live in [0usize, 512, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("live_prefix", live), live, |b, &live| {
            let (cache, _scope) = populate(capacity, live);
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                black_box(cache.get_or_create(&format!("miss{}", next), ReactiveValue::new));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, cache_hit_benchmark, cache_miss_eviction_benchmark);
criterion_main!(benches);
