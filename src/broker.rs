//! Valkey/Redis backed capture queue.
//!
//! Requests are `RPUSH`ed to one list and results `BLPOP`ed from another.
//! A blocking pop occupies its connection until it returns, so producing
//! and consuming use separate connections: concurrent enqueues never wait
//! behind the listener.

use crate::queue::{decode_result, encode_request, CaptureQueue};
use crate::{BrokerConfig, CaptureRequest, CaptureResult, QueueError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RedisQueue {
    producer: ConnectionManager,
    consumer: ConnectionManager,
    request_key: String,
    result_key: String,
    unmatched_key: String,
}

impl RedisQueue {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.url.as_str())?;
        let producer = ConnectionManager::new(client.clone()).await?;
        let consumer = ConnectionManager::new(client).await?;
        info!(
            "Connected to broker at {} (requests: {}, results: {})",
            config.url, config.request_key, config.result_key
        );

        Ok(Self {
            producer,
            consumer,
            request_key: config.request_key.clone(),
            result_key: config.result_key.clone(),
            unmatched_key: config.unmatched_key.clone(),
        })
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.producer.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CaptureQueue for RedisQueue {
    async fn enqueue(&self, request: &CaptureRequest) -> Result<(), QueueError> {
        let payload = encode_request(request)?;
        let mut conn = self.producer.clone();
        let _: i64 = conn.rpush(&self.request_key, payload).await?;
        info!(
            url = %request.seed_url,
            shadow_id = %request.seed_shadow_id,
            "Enqueued capture request"
        );
        Ok(())
    }

    async fn await_result(&self, timeout: Duration) -> Result<CaptureResult, QueueError> {
        let mut conn = self.consumer.clone();
        // BLPOP treats 0 as "block forever" and accepts fractional seconds.
        let popped: Option<(String, Vec<u8>)> =
            conn.blpop(&self.result_key, timeout.as_secs_f64()).await?;
        let Some((_key, payload)) = popped else {
            return Err(QueueError::Timeout);
        };
        debug!("Popped {} bytes from {}", payload.len(), self.result_key);
        decode_result(&payload)
    }

    async fn pending_requests(&self) -> Result<usize, QueueError> {
        let mut conn = self.producer.clone();
        Ok(conn.llen(&self.request_key).await?)
    }

    async fn pending_results(&self) -> Result<usize, QueueError> {
        let mut conn = self.producer.clone();
        Ok(conn.llen(&self.result_key).await?)
    }

    async fn park_result(&self, result: &CaptureResult) -> Result<(), QueueError> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.producer.clone();
        let parked: i64 = conn.rpush(&self.unmatched_key, payload).await?;
        warn!(
            shadow_id = %result.seed_shadow_id,
            parked,
            "Parked result on {}", self.unmatched_key
        );
        Ok(())
    }
}

// These talk to a real broker: `TEST_BROKER_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureState, ShadowId};

    async fn test_queue(suffix: &str) -> Option<(RedisQueue, redis::aio::ConnectionManager)> {
        let url = std::env::var("TEST_BROKER_URL").ok()?;
        let config = BrokerConfig {
            url,
            request_key: format!("test:{suffix}:requests"),
            result_key: format!("test:{suffix}:results"),
            unmatched_key: format!("test:{suffix}:unmatched"),
        };
        let queue = RedisQueue::connect(&config).await.unwrap();
        let mut raw = queue.producer.clone();
        let _: () = raw
            .del(&[&config.request_key, &config.result_key, &config.unmatched_key])
            .await
            .unwrap();
        Some((queue, raw))
    }

    #[tokio::test]
    #[ignore]
    async fn test_enqueue_appends_json_to_request_list() {
        let Some((queue, mut raw)) = test_queue("enqueue").await else { return };
        let request = CaptureRequest {
            seed_url: "https://example.com".to_string(),
            seed_shadow_id: ShadowId::from("BROKER1"),
            state: CaptureState::NotEnqueued,
        };
        queue.enqueue(&request).await.unwrap();
        assert_eq!(queue.pending_requests().await.unwrap(), 1);

        let payload: String = raw.lpop(&queue.request_key, None).await.unwrap();
        let decoded: CaptureRequest = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    #[ignore]
    async fn test_results_pop_in_push_order() {
        let Some((queue, mut raw)) = test_queue("results").await else { return };
        for id in ["R1", "R2"] {
            let payload = format!(r#"{{"SeedShadowID":"{id}","Done":true,"ErrorMessages":[]}}"#);
            let _: i64 = raw.rpush(&queue.result_key, payload).await.unwrap();
        }
        let first = queue.await_result(Duration::from_secs(1)).await.unwrap();
        let second = queue.await_result(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.seed_shadow_id.as_str(), "R1");
        assert_eq!(second.seed_shadow_id.as_str(), "R2");
        assert_eq!(
            queue.await_result(Duration::from_millis(200)).await,
            Err(QueueError::Timeout)
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_park_result_keeps_payload() {
        let Some((queue, mut raw)) = test_queue("park").await else { return };
        let result = CaptureResult {
            seed_shadow_id: ShadowId::from("ORPHAN"),
            done: true,
            error_messages: Vec::new(),
            capture_metadata: None,
        };
        queue.park_result(&result).await.unwrap();

        let payload: Vec<u8> = raw.lpop(&queue.unmatched_key, None).await.unwrap();
        assert_eq!(decode_result(&payload).unwrap(), result);
        assert_eq!(queue.pending_results().await.unwrap(), 0);
    }
}
