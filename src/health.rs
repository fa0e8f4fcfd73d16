use crate::CaptureService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub broker: HealthLevel,
    pub backlog: HealthLevel,
    pub listener: HealthLevel,
    /// `None` when the broker could not be asked.
    pub pending_requests: Option<usize>,
    pub pending_results: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Requests waiting for a crawler worker
    pub warn_request_backlog: usize,
    pub critical_request_backlog: usize,
    /// Results waiting for the listener
    pub warn_result_backlog: usize,
    pub critical_result_backlog: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warn_request_backlog: 100,
            critical_request_backlog: 1000,
            warn_result_backlog: 50,
            critical_result_backlog: 500,
        }
    }
}

fn level_for(count: usize, warn_at: usize, critical_at: usize) -> HealthLevel {
    if count > critical_at {
        HealthLevel::Critical
    } else if count > warn_at {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

pub struct SystemHealthChecker {
    service: Arc<CaptureService>,
    thresholds: HealthThresholds,
    /// Whether a result listener is supposed to be running in this process
    expect_listener: bool,
    last_check: Option<Instant>,
}

impl SystemHealthChecker {
    pub fn new(service: Arc<CaptureService>, expect_listener: bool) -> Self {
        Self {
            service,
            thresholds: HealthThresholds::default(),
            expect_listener,
            last_check: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn last_check(&self) -> Option<Instant> {
        self.last_check
    }

    pub async fn check_system_health(&mut self) -> HealthStatus {
        let start_time = Instant::now();
        let queue = self.service.queue();

        let (pending_requests, pending_results) =
            match (queue.pending_requests().await, queue.pending_results().await) {
                (Ok(requests), Ok(results)) => (Some(requests), Some(results)),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Broker health critical: {}", e);
                    (None, None)
                }
            };
        let broker = if pending_requests.is_some() {
            HealthLevel::Healthy
        } else {
            HealthLevel::Critical
        };

        let backlog = match (pending_requests, pending_results) {
            (Some(requests), Some(results)) => {
                let t = &self.thresholds;
                let requests_level = level_for(requests, t.warn_request_backlog, t.critical_request_backlog);
                let results_level = level_for(results, t.warn_result_backlog, t.critical_result_backlog);
                if requests_level != HealthLevel::Healthy {
                    warn!("Request backlog at {} entries", requests);
                }
                if results_level != HealthLevel::Healthy {
                    warn!("Result backlog at {} entries", results);
                }
                worst(&[requests_level, results_level])
            }
            _ => HealthLevel::Warning,
        };

        let listener = if !self.expect_listener || self.service.metrics().listener_running() {
            HealthLevel::Healthy
        } else {
            error!("Result listener is not running");
            HealthLevel::Critical
        };

        let overall = worst(&[broker, backlog, listener]);
        self.last_check = Some(start_time);
        info!("Health check completed in {:?}: {:?}", start_time.elapsed(), overall);

        HealthStatus {
            overall,
            broker,
            backlog,
            listener,
            pending_requests,
            pending_results,
            timestamp: Utc::now(),
        }
    }

    pub async fn start_periodic_health_checks(&mut self, interval_duration: Duration, cancel: CancellationToken) {
        let mut interval_timer = interval(interval_duration);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval_timer.tick() => {}
            }

            let status = self.check_system_health().await;
            match status.overall {
                HealthLevel::Healthy => info!("System health: OK"),
                HealthLevel::Warning => warn!(
                    "System health: WARNING - Broker: {:?}, Backlog: {:?}, Listener: {:?}",
                    status.broker, status.backlog, status.listener
                ),
                HealthLevel::Critical => error!(
                    "System health: CRITICAL - Broker: {:?}, Backlog: {:?}, Listener: {:?}",
                    status.broker, status.backlog, status.listener
                ),
            }
        }
    }
}

fn worst(levels: &[HealthLevel]) -> HealthLevel {
    if levels.contains(&HealthLevel::Critical) {
        HealthLevel::Critical
    } else if levels.contains(&HealthLevel::Warning) {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}
