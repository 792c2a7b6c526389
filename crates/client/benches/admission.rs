use std::sync::Arc;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use xload_client::transport::{Exchange, Outcome, Transport, TransportKind};
use xload_client::{Dispatcher, OperationCall};

/// Answers immediately, so only dispatcher bookkeeping is measured.
#[derive(Debug)]
struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Full
    }

    async fn send(&self, exchange: Exchange) -> Outcome {
        Outcome::Success(exchange.body)
    }
}

fn bench_submit(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("dispatcher_send");
    for limit in [1i64, 4, 0] {
        let dispatcher = Dispatcher::new("http://bench/rs/XLoad/", Arc::new(NoopTransport), limit);
        group.bench_with_input(BenchmarkId::new("limit", limit), &dispatcher, |b, dispatcher| {
            b.to_async(&runtime).iter(|| async {
                let calls: Vec<_> = (0..64)
                    .map(|i| {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move { dispatcher.send("solve", json!({ "i": i }), None).await })
                    })
                    .collect();
                for call in calls {
                    black_box(call.await.unwrap().unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("submit_then_cancel_1000", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let dispatcher = Dispatcher::new("http://bench/rs/XLoad/", Arc::new(NoopTransport), 1);
                for i in 0..1000 {
                    black_box(dispatcher.submit(OperationCall::new("solve", json!(i))));
                }
                black_box(dispatcher.cancel_pending());
            })
        });
    });
}

criterion_group!(benches, bench_submit, bench_queue);
criterion_main!(benches);
