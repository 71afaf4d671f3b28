use batch_engine::batching::{handler_fn, infallible_key, BatchEngine, HandlerResult};
use batch_engine::config::BatchEngineConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

type BenchEngine = BatchEngine<u32, (u32, u64), u64>;

fn bench_engine(quiet_period: Duration) -> BenchEngine {
    let config = BatchEngineConfig::default()
        .with_name("bench")
        .with_quiet_period(quiet_period)
        .with_poll_interval(Duration::from_millis(1));

    BatchEngine::new(
        config,
        infallible_key(|request: &(u32, u64)| request.0),
        handler_fn(|_group: u32, requests: Vec<(u32, u64)>| async move {
            HandlerResult::Ok(requests.into_iter().map(|(_, value)| value * 2).collect())
        }),
    )
    .expect("bench config is valid")
}

fn benchmark_coalesced_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("bench runtime");

    let mut group = c.benchmark_group("coalesced_round_trip");
    group.sample_size(20);

    for callers in [1usize, 16, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(callers), &callers, |b, &callers| {
            let engine = bench_engine(Duration::from_millis(1));
            b.to_async(&runtime).iter(|| {
                let engine = engine.clone();
                async move {
                    let handles: Vec<_> = (0..callers as u64)
                        .map(|i| {
                            let engine = engine.clone();
                            tokio::spawn(async move { engine.execute(((i % 4) as u32, i)).await })
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.expect("caller task").expect("result"));
                    }
                }
            });
        });
    }

    group.finish();
}

fn benchmark_submission(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("bench runtime");
    // One key per iteration; each abandoned request flushes within a millisecond
    let engine = bench_engine(Duration::from_millis(1));
    let next_key = AtomicU32::new(0);

    c.bench_function("submit_then_cancel", |b| {
        b.to_async(&runtime).iter(|| {
            let engine = engine.clone();
            let key = next_key.fetch_add(1, Ordering::Relaxed);
            async move {
                let result = engine
                    .execute_until(black_box((key, 1)), std::future::ready(()))
                    .await;
                black_box(result.is_err())
            }
        });
    });
}

criterion_group!(benches, benchmark_coalesced_round_trip, benchmark_submission);
criterion_main!(benches);
