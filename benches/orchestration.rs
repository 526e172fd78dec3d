use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::future::{BoxFuture, join_all};
use http::{HeaderMap, StatusCode};
use reqflow::prelude::{RequestDescriptor, RetryPolicy, TransportClient};
use reqflow::{
    RawResponse, ResponseEnvelope, Transport, TransportError, TransportOutcome, TransportRequest,
    classify,
};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

/// Answers every request with the same enveloped payload, without I/O.
struct StaticTransport {
    body: Bytes,
}

impl Transport for StaticTransport {
    fn send(&self, _request: TransportRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        let body = self.body.clone();
        Box::pin(async move {
            Ok(RawResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body,
            })
        })
    }
}

fn benchmark_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("build benchmark runtime")
}

fn benchmark_client() -> TransportClient {
    let body = json!({
        "code": 200,
        "message": "ok",
        "data": {"list": (0..20).map(|id| json!({"id": id, "title": "activity"})).collect::<Vec<_>>(), "total": 200}
    });
    TransportClient::builder("https://api.example.com/v1")
        .transport(Arc::new(StaticTransport {
            body: Bytes::from(body.to_string()),
        }))
        .retry_policy(RetryPolicy::disabled())
        .request_timeout(Duration::from_secs(2))
        .try_build()
        .expect("build benchmark client")
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    group.bench_function("get_with_params", |b| {
        b.iter(|| {
            let descriptor = RequestDescriptor::get("/activities")
                .param("page", 3)
                .param("pageSize", 20)
                .param("keyword", "trail run")
                .build();
            black_box(descriptor.fingerprint().as_str().len());
        });
    });
    group.bench_function("post_json_body", |b| {
        let payload = json!({"title": "Weekend ride", "tags": ["bike", "outdoor"], "capacity": 30});
        b.iter(|| {
            let descriptor = RequestDescriptor::post("/activities")
                .json(payload.clone())
                .build();
            black_box(descriptor.fingerprint().as_str().len());
        });
    });
    group.finish();
}

fn bench_envelope_and_classify(c: &mut Criterion) {
    let success = br#"{"code":200,"message":"ok","data":{"id":1,"title":"a"}}"#.to_vec();
    let failure = br#"{"code":10001,"message":"Activity is closed","data":null}"#.to_vec();

    let mut group = c.benchmark_group("envelope");
    group.bench_function("decode_success", |b| {
        b.iter(|| {
            let envelope: ResponseEnvelope =
                serde_json::from_slice(black_box(&success)).expect("decode envelope");
            black_box(envelope.is_success());
        });
    });
    group.bench_function("classify_business_failure", |b| {
        b.iter(|| {
            let envelope: ResponseEnvelope =
                serde_json::from_slice(black_box(&failure)).expect("decode envelope");
            let error = classify(TransportOutcome::Business {
                code: envelope.code,
                message: envelope.message,
                data: envelope.data,
            });
            black_box(error.code());
        });
    });
    group.finish();
}

fn bench_client_execute(c: &mut Criterion) {
    let runtime = benchmark_runtime();
    let client = Arc::new(benchmark_client());

    let mut group = c.benchmark_group("client_execute");
    group.sample_size(60);

    for concurrency in [1_usize, 16, 64] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                let client = Arc::clone(&client);
                b.to_async(&runtime).iter(|| {
                    let client = Arc::clone(&client);
                    async move {
                        // Distinct params keep the calls from superseding each other.
                        let requests = (0..concurrency)
                            .map(|page| client.get("/activities").param("page", page).send::<Value>());
                        for result in join_all(requests).await {
                            black_box(result.expect("static transport call should succeed"));
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(5));
    targets = bench_fingerprint, bench_envelope_and_classify, bench_client_execute
);
criterion_main!(benches);
