//! Hot-path benchmarks: ingestion cost per estimator flavor, slicing, and
//! the batching queue.
//!
//! Run with: cargo bench --package rollstat

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rollstat::{AggregationConfig, EstimatorFlavor, IdlePolicy, MetricKind, MetricsEngine, Period};
use std::time::Duration;

fn manual_engine(flavor: EstimatorFlavor) -> MetricsEngine {
    MetricsEngine::new(
        AggregationConfig::default()
            .with_slicer_interval(Duration::from_secs(3600))
            .with_periods(vec![Period::ticks(5), Period::ticks(60)])
            .with_estimator(flavor),
    )
    .unwrap()
}

fn bench_consider_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("consider_value");
    group.throughput(Throughput::Elements(1));
    for flavor in [
        EstimatorFlavor::Disabled,
        EstimatorFlavor::Reservoir,
        EstimatorFlavor::Decay,
    ] {
        let engine = manual_engine(flavor);
        let metric = engine
            .register_with("bench", MetricKind::Timing, flavor, IdlePolicy::Never)
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{flavor:?}")),
            &metric,
            |b, metric| {
                let mut v = 0.0f64;
                b.iter(|| {
                    v += 1.0;
                    metric.consider_value(black_box(v));
                });
            },
        );
    }
    group.finish();
}

fn bench_slice(c: &mut Criterion) {
    let engine = manual_engine(EstimatorFlavor::Reservoir);
    let metric = engine
        .register_with(
            "bench.slice",
            MetricKind::Timing,
            EstimatorFlavor::Reservoir,
            IdlePolicy::Never,
        )
        .unwrap();
    c.bench_function("slice_with_samples", |b| {
        b.iter(|| {
            for i in 0..100 {
                metric.consider_value(i as f64);
            }
            metric.slice_now();
        });
    });
}

fn bench_queued_ingestion(c: &mut Criterion) {
    let engine = MetricsEngine::new(
        AggregationConfig::default()
            .with_slicer_interval(Duration::from_secs(3600))
            .with_periods(vec![Period::ticks(5)])
            .with_ingestion_queue(true),
    )
    .unwrap();
    let metric = engine
        .register_with(
            "bench.queue",
            MetricKind::Timing,
            EstimatorFlavor::Disabled,
            IdlePolicy::Never,
        )
        .unwrap();
    let mut group = c.benchmark_group("ingestion_queue");
    group.throughput(Throughput::Elements(1));
    group.bench_function("push", |b| {
        let mut v = 0.0f64;
        b.iter(|| {
            v += 1.0;
            engine.enqueue(&metric, black_box(v));
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_consider_value,
    bench_slice,
    bench_queued_ingestion
);
criterion_main!(benches);
