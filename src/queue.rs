//! Hand-off of capture requests and results.
//!
//! The queue is the producer side of two FIFO channels: requests go out to
//! the crawler and results come back. Delivery is at-least-once and the
//! broker is an in-memory store, so a request can get lost; seeds are always
//! persisted before they are enqueued so a request can be repeated.

use crate::{CaptureRequest, CaptureResult, QueueError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Timeout value that blocks until a result arrives.
pub const NO_TIMEOUT: Duration = Duration::ZERO;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureQueue: Send + Sync {
    /// Append a request to the tail of the request channel. Never waits for
    /// a consumer.
    async fn enqueue(&self, request: &CaptureRequest) -> Result<(), QueueError>;

    /// Pop the head of the result channel.
    ///
    /// A zero `timeout` blocks until something arrives. Otherwise waits at
    /// most `timeout` and returns [`QueueError::Timeout`] if nothing did.
    async fn await_result(&self, timeout: Duration) -> Result<CaptureResult, QueueError>;

    /// Number of requests not yet picked up by a worker.
    async fn pending_requests(&self) -> Result<usize, QueueError>;

    /// Number of results not yet consumed.
    async fn pending_results(&self) -> Result<usize, QueueError>;

    /// Set a popped result aside on the unmatched list when this process
    /// cannot apply it, so it can be inspected or replayed later.
    async fn park_result(&self, result: &CaptureResult) -> Result<(), QueueError>;
}

pub fn encode_request(request: &CaptureRequest) -> Result<String, QueueError> {
    request.validate()?;
    Ok(serde_json::to_string(request)?)
}

pub fn decode_result(payload: &[u8]) -> Result<CaptureResult, QueueError> {
    serde_json::from_slice(payload).map_err(|e| QueueError::MalformedPayload(e.to_string()))
}

/// In-process channels with the same semantics as the broker lists.
///
/// Payloads are stored serialized so the wire format is exercised. The
/// `pop_request`/`push_result` helpers play the crawler's side.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    requests: Mutex<VecDeque<String>>,
    results: Mutex<VecDeque<String>>,
    unmatched: Mutex<VecDeque<String>>,
    result_ready: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` when the request channel is empty.
    pub async fn pop_request(&self) -> Result<Option<CaptureRequest>, QueueError> {
        let Some(payload) = self.requests.lock().await.pop_front() else {
            return Ok(None);
        };
        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|e| QueueError::MalformedPayload(e.to_string()))
    }

    pub async fn parked_results(&self) -> Vec<CaptureResult> {
        self.unmatched
            .lock()
            .await
            .iter()
            .filter_map(|payload| decode_result(payload.as_bytes()).ok())
            .collect()
    }

    pub async fn push_result(&self, result: &CaptureResult) -> Result<(), QueueError> {
        let payload = serde_json::to_string(result)?;
        self.push_raw_result(payload).await;
        Ok(())
    }

    pub async fn push_raw_result(&self, payload: impl Into<String>) {
        self.results.lock().await.push_back(payload.into());
        self.result_ready.notify_one();
    }
}

#[async_trait]
impl CaptureQueue for MemoryQueue {
    async fn enqueue(&self, request: &CaptureRequest) -> Result<(), QueueError> {
        let payload = encode_request(request)?;
        self.requests.lock().await.push_back(payload);
        Ok(())
    }

    async fn await_result(&self, timeout: Duration) -> Result<CaptureResult, QueueError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let notified = self.result_ready.notified();
            if let Some(payload) = self.results.lock().await.pop_front() {
                return decode_result(payload.as_bytes());
            }
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified)
                    .await
                    .map_err(|_| QueueError::Timeout)?,
                None => notified.await,
            }
        }
    }

    async fn pending_requests(&self) -> Result<usize, QueueError> {
        Ok(self.requests.lock().await.len())
    }

    async fn pending_results(&self) -> Result<usize, QueueError> {
        Ok(self.results.lock().await.len())
    }

    async fn park_result(&self, result: &CaptureResult) -> Result<(), QueueError> {
        let payload = serde_json::to_string(result)?;
        self.unmatched.lock().await.push_back(payload);
        Ok(())
    }
}
