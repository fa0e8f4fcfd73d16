use crate::CaptureState;
use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Counters for the capture pipeline.
///
/// Every event is sent to the installed `metrics` recorder and also kept in
/// local atomics, so a snapshot is available without an exporter.
pub struct Metrics {
    requests_enqueued: Counter,
    enqueue_failures: Counter,
    results_succeeded: Counter,
    results_failed: Counter,
    results_dropped: Counter,
    results_parked: Counter,
    dequeue_failures: Counter,
    seeds_submitted: Counter,
    urls_rejected: Counter,
    listener_running: Gauge,
    result_duration: Histogram,
    local: LocalCounts,
}

#[derive(Default)]
struct LocalCounts {
    requests_enqueued: AtomicU64,
    enqueue_failures: AtomicU64,
    results_succeeded: AtomicU64,
    results_failed: AtomicU64,
    results_dropped: AtomicU64,
    results_parked: AtomicU64,
    dequeue_failures: AtomicU64,
    seeds_submitted: AtomicU64,
    urls_rejected: AtomicU64,
    listener_running: AtomicBool,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_enqueued: register_counter!("capture_requests_enqueued_total"),
            enqueue_failures: register_counter!("capture_enqueue_failures_total"),
            results_succeeded: register_counter!("capture_results_total", "outcome" => "success"),
            results_failed: register_counter!("capture_results_total", "outcome" => "failure"),
            results_dropped: register_counter!("capture_results_dropped_total"),
            results_parked: register_counter!("capture_results_parked_total"),
            dequeue_failures: register_counter!("capture_dequeue_failures_total"),
            seeds_submitted: register_counter!("seeds_submitted_total"),
            urls_rejected: register_counter!("seed_urls_rejected_total"),
            listener_running: register_gauge!("capture_listener_running"),
            result_duration: register_histogram!("capture_result_processing_seconds"),
            local: LocalCounts::default(),
        }
    }

    pub fn record_enqueue(&self, success: bool) {
        if success {
            self.requests_enqueued.increment(1);
            self.local.requests_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.enqueue_failures.increment(1);
            self.local.enqueue_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_result(&self, state: CaptureState, duration: Duration) {
        match state {
            CaptureState::DoneSuccess => {
                self.results_succeeded.increment(1);
                self.local.results_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            CaptureState::DoneFailure => {
                self.results_failed.increment(1);
                self.local.results_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.result_duration.record(duration.as_secs_f64());
    }

    pub fn record_dropped_result(&self) {
        self.results_dropped.increment(1);
        self.local.results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parked_result(&self) {
        self.results_parked.increment(1);
        self.local.results_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeue_failure(&self) {
        self.dequeue_failures.increment(1);
        self.local.dequeue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seeds_submitted(&self, count: usize) {
        self.seeds_submitted.increment(count as u64);
        self.local.seeds_submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rejected_url(&self) {
        self.urls_rejected.increment(1);
        self.local.urls_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_listener_running(&self, running: bool) {
        self.listener_running.set(if running { 1.0 } else { 0.0 });
        self.local.listener_running.store(running, Ordering::Relaxed);
    }

    pub fn listener_running(&self) -> bool {
        self.local.listener_running.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_enqueued: load(&self.local.requests_enqueued),
            enqueue_failures: load(&self.local.enqueue_failures),
            results_succeeded: load(&self.local.results_succeeded),
            results_failed: load(&self.local.results_failed),
            results_dropped: load(&self.local.results_dropped),
            results_parked: load(&self.local.results_parked),
            dequeue_failures: load(&self.local.dequeue_failures),
            seeds_submitted: load(&self.local.seeds_submitted),
            urls_rejected: load(&self.local.urls_rejected),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_enqueued: u64,
    pub enqueue_failures: u64,
    pub results_succeeded: u64,
    pub results_failed: u64,
    pub results_dropped: u64,
    pub results_parked: u64,
    pub dequeue_failures: u64,
    pub seeds_submitted: u64,
    pub urls_rejected: u64,
}

pub struct PrometheusExporter {
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the global recorder and serve `/metrics`. Must run inside the
    /// tokio runtime, and before [`Metrics::new`] for the handles to report.
    pub fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()?;

        info!("Serving Prometheus metrics on {}", self.addr);
        Ok(())
    }
}
