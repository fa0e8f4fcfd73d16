//! Messages exchanged with the crawler worker.
//!
//! Field names on the wire are shared with the worker and must not change.

use crate::{CaptureState, QueueError, Seed, ShadowId};
use serde::{Deserialize, Deserializer, Serialize};

/// What the crawler needs to capture one seed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureRequest {
    #[serde(rename = "SeedURL")]
    pub seed_url: String,
    #[serde(rename = "SeedShadowID")]
    pub seed_shadow_id: ShadowId,
    /// Snapshot taken when the request was built.
    #[serde(rename = "Status")]
    pub state: CaptureState,
}

impl CaptureRequest {
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            seed_url: seed.url.clone(),
            seed_shadow_id: seed.shadow_id.clone(),
            state: CaptureState::NotEnqueued,
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.seed_shadow_id.is_empty() {
            return Err(QueueError::InvalidRequest("request has no SeedShadowID".to_string()));
        }
        if self.seed_url.is_empty() {
            return Err(QueueError::InvalidRequest("request has no SeedURL".to_string()));
        }
        Ok(())
    }
}

/// Outcome of a capture, reported by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureResult {
    #[serde(rename = "SeedShadowID")]
    pub seed_shadow_id: ShadowId,
    #[serde(rename = "Done")]
    pub done: bool,
    #[serde(rename = "ErrorMessages", default, deserialize_with = "null_as_empty")]
    pub error_messages: Vec<String>,
    #[serde(rename = "CaptureMetadata", default, skip_serializing_if = "Option::is_none")]
    pub capture_metadata: Option<CaptureMetadata>,
}

/// Where and when the crawler stored a capture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureMetadata {
    /// `YYYYMMDDhhmmss`, optionally followed by three millisecond digits.
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// The URL exactly as the crawler recorded it.
    #[serde(rename = "CapturedUrl")]
    pub captured_url: String,
}

// Workers may send `null` for an empty list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
