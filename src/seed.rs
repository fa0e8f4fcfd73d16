//! Seeds, seed groups and their public identifiers.

use crate::{ArchivalInfo, CaptureState, CleanUrl};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// 26 base32 characters carry 130 bits.
const SHADOW_ID_LEN: usize = 26;

/// Unguessable public handle of a seed or group.
///
/// This is the only identifier that ever leaves the service; storage keys
/// stay internal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ShadowId(String);

impl ShadowId {
    /// Fresh identifier drawn from the OS-seeded thread RNG.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..SHADOW_ID_LEN)
            .map(|_| BASE32_ALPHABET[rng.gen_range(0..BASE32_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ShadowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ShadowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ShadowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A submitted URL tracked through the capture lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    /// Canonical form produced by the URL validator.
    pub url: String,
    /// Public seeds may be listed and searched for.
    pub public: bool,
    pub state: CaptureState,
    /// Where the capture can be replayed. Only present on `DoneSuccess`.
    pub archive: Option<ArchivalInfo>,
    pub shadow_id: ShadowId,
}

impl Seed {
    /// A public seed that has not been handed to the crawler yet.
    pub fn new(url: &CleanUrl) -> Self {
        Self {
            url: url.as_str().to_string(),
            public: true,
            state: CaptureState::NotEnqueued,
            archive: None,
            shadow_id: ShadowId::generate(),
        }
    }

    pub fn archival_url(&self) -> Option<&str> {
        self.archive.as_ref().map(|archive| archive.archival_url.as_str())
    }

    pub fn harvested_at(&self) -> Option<DateTime<Utc>> {
        self.archive.as_ref().map(|archive| archive.harvested_at)
    }

    /// Archive details may only exist on a successful capture.
    pub fn archive_is_consistent(&self) -> bool {
        self.archive.is_none() || self.state == CaptureState::DoneSuccess
    }
}

/// Seeds submitted together. Membership is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedsGroup {
    pub seeds: Vec<Seed>,
    pub shadow_id: ShadowId,
}

impl SeedsGroup {
    pub fn new(seeds: Vec<Seed>) -> Self {
        Self {
            seeds,
            shadow_id: ShadowId::generate(),
        }
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}
