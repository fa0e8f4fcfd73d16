//! Background consumer of the result channel.
//!
//! Exactly one listener should run per result channel. It pops results one
//! at a time and applies them through [`CaptureService::process_result`].
//! A result that cannot be applied, for example one for a seed this store
//! does not know, is parked on the unmatched list so the loop never stalls
//! on it and the result is kept.

use crate::capture_service::{CaptureService, ResultOutcome};
use crate::{CaptureResult, ErrorSeverity, ListenerConfig, QueueError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    Cancelled,
    /// The queue failed `attempts` times in a row.
    QueueFailed { attempts: usize, last_error: QueueError },
}

impl ListenerExit {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ListenerExit::Cancelled => ErrorSeverity::Low,
            ListenerExit::QueueFailed { .. } => ErrorSeverity::Critical,
        }
    }
}

pub struct ResultListener {
    service: Arc<CaptureService>,
    config: ListenerConfig,
}

impl ResultListener {
    pub fn new(service: Arc<CaptureService>, config: ListenerConfig) -> Self {
        Self { service, config }
    }

    async fn park(&self, result: &CaptureResult) {
        let metrics = self.service.metrics();
        match self.service.queue().park_result(result).await {
            Ok(()) => metrics.record_parked_result(),
            Err(e) => {
                error!(shadow_id = %result.seed_shadow_id, error = %e, "Failed to park result, dropping it");
                metrics.record_dropped_result();
            }
        }
    }

    /// Consume results until `cancel` fires or the queue keeps failing.
    ///
    /// Cancellation is checked between polls, never during one: a popped
    /// result is always processed before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) -> ListenerExit {
        info!(poll_timeout = ?self.config.poll_timeout, "Starting result listener");
        let metrics = self.service.metrics().clone();
        metrics.set_listener_running(true);

        let mut failures = 0;
        let exit = loop {
            if cancel.is_cancelled() {
                break ListenerExit::Cancelled;
            }

            match self.service.await_result(self.config.poll_timeout).await {
                Ok(result) => {
                    failures = 0;
                    match self.service.process_result(&result).await {
                        Ok(ResultOutcome::Applied(state)) => {
                            debug!(shadow_id = %result.seed_shadow_id, state = %state, "Result applied");
                        }
                        Ok(ResultOutcome::ArchiveRecorded) => {
                            debug!(shadow_id = %result.seed_shadow_id, "Archive details recorded");
                        }
                        Ok(ResultOutcome::Unfinished | ResultOutcome::Duplicate) => metrics.record_dropped_result(),
                        Err(e) => {
                            warn!(shadow_id = %result.seed_shadow_id, error = %e, "Cannot apply capture result");
                            self.park(&result).await;
                        }
                    }
                }
                Err(QueueError::Timeout) => failures = 0,
                Err(e) if e.is_retryable() => {
                    metrics.record_dequeue_failure();
                    failures += 1;
                    if failures >= self.config.retry.max_attempts {
                        break ListenerExit::QueueFailed {
                            attempts: failures,
                            last_error: e,
                        };
                    }

                    let delay = self.config.retry.delay_for(failures - 1);
                    warn!(
                        attempt = failures,
                        error = %e,
                        "Result poll failed, retrying in {:?}", delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break ListenerExit::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    // The payload is already off the channel; nothing to retry.
                    warn!(error = %e, severity = ?e.severity(), "Dropping unreadable result");
                    metrics.record_dropped_result();
                }
            }
        };

        metrics.set_listener_running(false);
        match &exit {
            ListenerExit::Cancelled => info!("Result listener stopped"),
            ListenerExit::QueueFailed { attempts, last_error } => {
                error!(attempts, error = %last_error, "Result listener gave up")
            }
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CaptureQueue, MockCaptureQueue};
    use crate::{
        CaptureMetadata, CaptureResult, CaptureState, Config, MemoryQueue, MemorySeedStore, Metrics, RetryConfig,
        SeedService, SeedStore, ShadowId,
    };
    use std::time::Duration;

    fn listener_config() -> ListenerConfig {
        ListenerConfig {
            poll_timeout: Duration::from_millis(50),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
            },
        }
    }

    fn service(queue: Arc<dyn CaptureQueue>, store: Arc<MemorySeedStore>) -> Arc<CaptureService> {
        let config = Config::default();
        let metrics = Arc::new(Metrics::new());
        let seeds = Arc::new(SeedService::new(store, metrics.clone(), &config));
        Arc::new(CaptureService::new(queue, seeds, metrics, listener_config()))
    }

    fn result(id: &ShadowId, errors: &[&str]) -> CaptureResult {
        CaptureResult {
            seed_shadow_id: id.clone(),
            done: true,
            error_messages: errors.iter().map(|e| e.to_string()).collect(),
            capture_metadata: Some(CaptureMetadata {
                timestamp: "20240101120000123".to_string(),
                captured_url: "https://example.com".to_string(),
            }),
        }
    }

    async fn wait_for_state(store: &MemorySeedStore, id: &ShadowId, state: CaptureState) {
        for _ in 0..100 {
            if store.get_seed(id).await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("seed {id} never reached {state}");
    }

    #[tokio::test]
    async fn test_listener_applies_results_and_survives_bad_ones() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemorySeedStore::new());
        let service = service(queue.clone(), store.clone());

        let group = service.seeds().save("a.example\nb.example", true).await.unwrap();
        service.capture_group(&group).await.unwrap();
        let (a, b) = (&group.seeds[0].shadow_id, &group.seeds[1].shadow_id);

        let cancel = CancellationToken::new();
        let handle = service.listen_for_results(cancel.clone());

        queue.push_raw_result("not json").await;
        queue.push_result(&result(&ShadowId::from("UNKNOWN"), &[])).await.unwrap();
        queue.push_result(&result(a, &[])).await.unwrap();
        queue.push_result(&result(b, &["timeout"])).await.unwrap();

        wait_for_state(&store, a, CaptureState::DoneSuccess).await;
        wait_for_state(&store, b, CaptureState::DoneFailure).await;

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), ListenerExit::Cancelled);

        let seed = store.get_seed(a).await.unwrap();
        assert_eq!(
            seed.archival_url(),
            Some("https://wayback.webarchiv.cz/wayback/20240101120000123/https://example.com")
        );
        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.results_succeeded, 1);
        assert_eq!(snapshot.results_failed, 1);
        assert_eq!(snapshot.results_dropped, 1);
        assert_eq!(snapshot.results_parked, 1);
    }

    #[tokio::test]
    async fn test_result_for_unknown_seed_is_parked_not_lost() {
        let queue = Arc::new(MemoryQueue::new());
        let service = service(queue.clone(), Arc::new(MemorySeedStore::new()));
        let orphan = result(&ShadowId::from("SUBMITTEDBYANOTHERPROCESS"), &[]);
        queue.push_result(&orphan).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = service.listen_for_results(cancel.clone());
        for _ in 0..100 {
            if !queue.parked_results().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(queue.pending_results().await.unwrap(), 0);
        assert_eq!(queue.parked_results().await, vec![orphan]);
        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.results_parked, 1);
        assert_eq!(snapshot.results_dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_gives_up_after_repeated_failures() {
        let mut queue = MockCaptureQueue::new();
        queue
            .expect_await_result()
            .times(3)
            .returning(|_| Err(QueueError::Transport("connection refused".to_string())));
        let service = service(Arc::new(queue), Arc::new(MemorySeedStore::new()));

        let exit = service.listen_for_results(CancellationToken::new()).await.unwrap();
        assert_eq!(
            exit,
            ListenerExit::QueueFailed {
                attempts: 3,
                last_error: QueueError::Transport("connection refused".to_string()),
            }
        );
        assert_eq!(exit.severity(), ErrorSeverity::Critical);
        assert_eq!(service.metrics().snapshot().dequeue_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let mut queue = MockCaptureQueue::new();
        queue
            .expect_await_result()
            .times(1)
            .returning(|_| Err(QueueError::Transport("connection reset".to_string())));
        let service = service(Arc::new(queue), Arc::new(MemorySeedStore::new()));

        let cancel = CancellationToken::new();
        let handle = service.listen_for_results(cancel.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), ListenerExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_not_failures() {
        let queue = Arc::new(MemoryQueue::new());
        let service = service(queue, Arc::new(MemorySeedStore::new()));

        let cancel = CancellationToken::new();
        let handle = service.listen_for_results(cancel.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), ListenerExit::Cancelled);
        assert_eq!(service.metrics().snapshot().dequeue_failures, 0);
    }
}
