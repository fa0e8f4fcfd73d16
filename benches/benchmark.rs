use capture_coordinator::{
    decode_result, encode_request, to_archival_info, validate_url, CaptureMetadata, CaptureRequest, CaptureService,
    CaptureState, Config, MemoryQueue, MemorySeedStore, Metrics, SeedService, ShadowId,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_url_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_validation");
    configure_fast_group(&mut group);

    let test_urls = vec![
        "https://example.com",
        "example.com/path?query=1",
        "http://user:pw@example.org:8080/a",
        "http://10.0.0.1/",
        "https://[fd00::1]/",
        "ftp://example.com",
    ];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for url in &test_urls {
                let result = validate_url(url, false);
                let _ = black_box(result);
            }
        });
    });

    group.finish();
}

fn benchmark_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata");
    configure_fast_group(&mut group);

    let metadata = CaptureMetadata {
        timestamp: "20240315083000123".to_string(),
        captured_url: "https://example.com/page".to_string(),
    };

    group.bench_function("archival_info", |b| {
        b.iter(|| {
            let info = to_archival_info(black_box(&metadata), "https://wayback.webarchiv.cz/wayback/");
            let _ = black_box(info);
        });
    });

    group.finish();
}

fn benchmark_wire_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_format");
    configure_fast_group(&mut group);

    let request = CaptureRequest {
        seed_url: "https://example.com/page".to_string(),
        seed_shadow_id: ShadowId::generate(),
        state: CaptureState::NotEnqueued,
    };
    let result = br#"{"SeedShadowID":"ABCDEFGHIJKLMNOPQRSTUVWXYZ","Done":true,"ErrorMessages":null,"CaptureMetadata":{"Timestamp":"20240315083000","CapturedUrl":"https://example.com/"}}"#;

    group.bench_function("encode_request", |b| {
        b.iter(|| {
            let payload = encode_request(black_box(&request));
            let _ = black_box(payload);
        });
    });

    group.bench_function("decode_result", |b| {
        b.iter(|| {
            let decoded = decode_result(black_box(result));
            let _ = black_box(decoded);
        });
    });

    group.finish();
}

fn benchmark_in_process_capture(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("in_process_capture");
    configure_fast_group(&mut group);

    group.bench_function("submit_and_enqueue_5", |b| {
        b.iter(|| {
            rt.block_on(async {
                let config = Config::default();
                let metrics = Arc::new(Metrics::new());
                let seeds = Arc::new(SeedService::new(
                    Arc::new(MemorySeedStore::new()),
                    metrics.clone(),
                    &config,
                ));
                let service = CaptureService::new(Arc::new(MemoryQueue::new()), seeds, metrics, config.listener.clone());

                let urls = (0..5)
                    .map(|i| format!("https://example.com/{i}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let outcome = match service.seeds().save(&urls, true).await {
                    Ok(group) => service.capture_group(&group).await.ok(),
                    Err(_) => None,
                };
                black_box(outcome);
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_url_validation,
    benchmark_metadata,
    benchmark_wire_format,
    benchmark_in_process_capture
);
criterion_main!(benches);
