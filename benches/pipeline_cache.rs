//! Benchmarks for pipeline cache operations
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vizflow_rs::config::EngineConfig;
use vizflow_rs::data::{DataBuffer, DataObject};
use vizflow_rs::dataset::Dataset;
use vizflow_rs::pipeline::{CachePolicy, DataSource, PipelineCache, PipelineFlowState};
use vizflow_rs::types::TimeInterval;

fn frame(time: i64, particles: usize) -> PipelineFlowState {
    let values = (0..particles).map(|i| i as f64 + time as f64).collect();
    let mut root = DataObject::collection();
    root.add_child(vizflow_rs::DataRef::new(DataObject::buffer(
        "Position",
        DataBuffer::from_values(1, values).unwrap(),
    )))
    .unwrap();
    let mut state = PipelineFlowState::from_collection(root);
    state.set_validity(TimeInterval::instant(time));
    state
}

fn bench_cache_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_insert");
    let frames: Vec<PipelineFlowState> = (0..1000).map(|t| frame(t, 16)).collect();

    for (name, policy) in [
        ("bounded_4", CachePolicy::bounded(4)),
        ("trajectory", CachePolicy::unbounded()),
    ] {
        group.throughput(Throughput::Elements(frames.len() as u64));
        group.bench_with_input(BenchmarkId::new("distinct_frames", name), &policy, |b, &policy| {
            b.iter(|| {
                let mut cache = PipelineCache::new(policy);
                for state in &frames {
                    cache.insert(black_box(state.clone()));
                }
                black_box(cache.len())
            });
        });
    }

    // Identical content keeps extending one entry.
    let shared = frame(0, 16);
    group.bench_function("merging_frames", |b| {
        b.iter(|| {
            let mut cache = PipelineCache::new(CachePolicy::bounded(4));
            for time in 0..1000 {
                let mut state = shared.clone();
                state.set_validity(TimeInterval::instant(time));
                cache.insert(black_box(state));
            }
            black_box(cache.len())
        });
    });

    group.finish();
}

fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");

    for size in [16usize, 256, 4096] {
        let mut cache = PipelineCache::new(CachePolicy::unbounded());
        for time in 0..size as i64 {
            cache.insert(frame(time, 4));
        }
        group.bench_with_input(BenchmarkId::new("lookup_time", size), &cache, |b, cache| {
            let mut time = 0i64;
            b.iter(|| {
                time = (time + 7) % size as i64;
                black_box(cache.lookup_time(black_box(time)).is_some())
            });
        });
    }

    group.finish();
}

fn bench_cached_evaluation(c: &mut Criterion) {
    let mut config = EngineConfig::default();
    config.executor.worker_threads = 1;
    config.cache.trajectory_caching = true;
    let mut dataset = Dataset::new(config).unwrap();
    let source = dataset.create_source(DataSource::generator(|request| Ok(frame(request.time, 64))));
    for time in 0..100 {
        dataset.evaluate_blocking(source, time).unwrap();
    }

    c.bench_function("evaluate_cache_hit", |b| {
        let mut time = 0i64;
        b.iter(|| {
            time = (time + 1) % 100;
            black_box(dataset.evaluate_blocking(source, time).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_cache_insert,
    bench_cache_lookup,
    bench_cached_evaluation
);
criterion_main!(benches);
