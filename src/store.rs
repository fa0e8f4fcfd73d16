//! Persistence contract for seeds.
//!
//! The coordinator never embeds storage logic; it only relies on these
//! calls succeeding or failing. [`MemorySeedStore`] is the in-process
//! implementation used by tests and embedding; the CLI shares seeds between
//! processes through [`crate::RedisSeedStore`].

use crate::{ArchivalInfo, CaptureState, Seed, SeedsGroup, ShadowId, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeedStore: Send + Sync {
    async fn save(&self, seeds: &[Seed]) -> Result<(), StoreError>;

    /// Store the group together with all of its seeds, or nothing.
    async fn save_group(&self, group: &SeedsGroup) -> Result<(), StoreError>;

    async fn get_group(&self, shadow_id: &ShadowId) -> Result<SeedsGroup, StoreError>;

    async fn get_seed(&self, shadow_id: &ShadowId) -> Result<Seed, StoreError>;

    async fn update_state(&self, shadow_id: &ShadowId, state: CaptureState) -> Result<(), StoreError>;

    /// Set `next` only if the seed is still `expected`, as one atomic step.
    ///
    /// Fails with [`StoreError::StateConflict`] carrying the state found
    /// otherwise.
    async fn compare_and_set_state(
        &self,
        shadow_id: &ShadowId,
        expected: CaptureState,
        next: CaptureState,
    ) -> Result<(), StoreError>;

    async fn update_metadata(
        &self,
        shadow_id: &ShadowId,
        archival_url: &str,
        harvested_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Checks applied to every seed before it is inserted.
pub(crate) fn check_new_seed(seed: &Seed) -> Result<(), StoreError> {
    if seed.url.is_empty() {
        return Err(StoreError::InvariantViolation("seed URL is empty".to_string()));
    }
    if seed.shadow_id.is_empty() {
        return Err(StoreError::InvariantViolation("seed shadow id is empty".to_string()));
    }
    if seed.state != CaptureState::NotEnqueued {
        return Err(StoreError::InvariantViolation(format!(
            "new seed {} must be NotEnqueued, is {}",
            seed.shadow_id, seed.state
        )));
    }
    if seed.archive.is_some() {
        return Err(StoreError::InvariantViolation(format!(
            "new seed {} must not carry archive details",
            seed.shadow_id
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Tables {
    seeds: HashMap<ShadowId, Seed>,
    /// Group shadow id to member shadow ids, in submission order.
    groups: HashMap<ShadowId, Vec<ShadowId>>,
}

impl Tables {
    fn check_insert(&self, seeds: &[Seed]) -> Result<(), StoreError> {
        if seeds.is_empty() {
            return Err(StoreError::EmptyBatch);
        }
        let mut batch = std::collections::HashSet::new();
        for seed in seeds {
            check_new_seed(seed)?;
            if self.seeds.contains_key(&seed.shadow_id) || !batch.insert(&seed.shadow_id) {
                return Err(StoreError::DuplicateShadowId(seed.shadow_id.to_string()));
            }
        }
        Ok(())
    }

    fn seed_mut(&mut self, shadow_id: &ShadowId) -> Result<&mut Seed, StoreError> {
        self.seeds
            .get_mut(shadow_id)
            .ok_or_else(|| StoreError::SeedNotFound(shadow_id.to_string()))
    }

    fn set_state(&mut self, shadow_id: &ShadowId, state: CaptureState) -> Result<(), StoreError> {
        let seed = self.seed_mut(shadow_id)?;
        if seed.archive.is_some() && state != CaptureState::DoneSuccess {
            return Err(StoreError::InvariantViolation(format!(
                "seed {shadow_id} has archive details and cannot become {state}"
            )));
        }
        seed.state = state;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySeedStore {
    tables: RwLock<Tables>,
}

impl MemorySeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_count(&self) -> usize {
        self.tables.read().await.seeds.len()
    }
}

#[async_trait]
impl SeedStore for MemorySeedStore {
    async fn save(&self, seeds: &[Seed]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.check_insert(seeds)?;
        for seed in seeds {
            tables.seeds.insert(seed.shadow_id.clone(), seed.clone());
        }
        Ok(())
    }

    async fn save_group(&self, group: &SeedsGroup) -> Result<(), StoreError> {
        if group.shadow_id.is_empty() {
            return Err(StoreError::InvariantViolation("group shadow id is empty".to_string()));
        }
        let mut tables = self.tables.write().await;
        if tables.groups.contains_key(&group.shadow_id) {
            return Err(StoreError::DuplicateShadowId(group.shadow_id.to_string()));
        }
        tables.check_insert(&group.seeds)?;

        let members = group.seeds.iter().map(|seed| seed.shadow_id.clone()).collect();
        for seed in &group.seeds {
            tables.seeds.insert(seed.shadow_id.clone(), seed.clone());
        }
        tables.groups.insert(group.shadow_id.clone(), members);
        Ok(())
    }

    async fn get_group(&self, shadow_id: &ShadowId) -> Result<SeedsGroup, StoreError> {
        let tables = self.tables.read().await;
        let members = tables
            .groups
            .get(shadow_id)
            .ok_or_else(|| StoreError::GroupNotFound(shadow_id.to_string()))?;
        let seeds = members
            .iter()
            .map(|member| {
                tables
                    .seeds
                    .get(member)
                    .cloned()
                    .ok_or_else(|| StoreError::SeedNotFound(member.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SeedsGroup {
            seeds,
            shadow_id: shadow_id.clone(),
        })
    }

    async fn get_seed(&self, shadow_id: &ShadowId) -> Result<Seed, StoreError> {
        self.tables
            .read()
            .await
            .seeds
            .get(shadow_id)
            .cloned()
            .ok_or_else(|| StoreError::SeedNotFound(shadow_id.to_string()))
    }

    async fn update_state(&self, shadow_id: &ShadowId, state: CaptureState) -> Result<(), StoreError> {
        self.tables.write().await.set_state(shadow_id, state)
    }

    async fn compare_and_set_state(
        &self,
        shadow_id: &ShadowId,
        expected: CaptureState,
        next: CaptureState,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let actual = tables.seed_mut(shadow_id)?.state;
        if actual != expected {
            return Err(StoreError::StateConflict {
                shadow_id: shadow_id.to_string(),
                expected,
                actual,
            });
        }
        tables.set_state(shadow_id, next)
    }

    async fn update_metadata(
        &self,
        shadow_id: &ShadowId,
        archival_url: &str,
        harvested_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if archival_url.is_empty() {
            return Err(StoreError::InvariantViolation("archival URL is empty".to_string()));
        }
        let mut tables = self.tables.write().await;
        let seed = tables.seed_mut(shadow_id)?;
        if seed.state != CaptureState::DoneSuccess {
            return Err(StoreError::InvariantViolation(format!(
                "seed {shadow_id} is {}, archive details need DoneSuccess",
                seed.state
            )));
        }
        seed.archive = Some(ArchivalInfo {
            archival_url: archival_url.to_string(),
            harvested_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_url;

    fn seed(url: &str) -> Seed {
        Seed::new(&validate_url(url, false).unwrap())
    }

    #[tokio::test]
    async fn test_save_and_get_seed() {
        let store = MemorySeedStore::new();
        let seed = seed("example.com");
        store.save(std::slice::from_ref(&seed)).await.unwrap();
        assert_eq!(store.get_seed(&seed.shadow_id).await.unwrap(), seed);
        assert!(matches!(
            store.get_seed(&ShadowId::from("missing")).await,
            Err(StoreError::SeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_empty_and_duplicates() {
        let store = MemorySeedStore::new();
        assert_eq!(store.save(&[]).await, Err(StoreError::EmptyBatch));

        let seed = seed("example.com");
        store.save(std::slice::from_ref(&seed)).await.unwrap();
        assert!(matches!(
            store.save(&[seed.clone()]).await,
            Err(StoreError::DuplicateShadowId(_))
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_non_initial_seeds() {
        let store = MemorySeedStore::new();
        let mut pending = seed("example.com");
        pending.state = CaptureState::Pending;
        assert!(matches!(
            store.save(&[pending]).await,
            Err(StoreError::InvariantViolation(_))
        ));
        assert_eq!(store.seed_count().await, 0);
    }

    #[tokio::test]
    async fn test_group_is_atomic_and_ordered() {
        let store = MemorySeedStore::new();
        let group = SeedsGroup::new(vec![seed("a.example"), seed("b.example"), seed("c.example")]);
        store.save_group(&group).await.unwrap();

        let loaded = store.get_group(&group.shadow_id).await.unwrap();
        assert_eq!(loaded, group);

        let bad = SeedsGroup::new(vec![seed("d.example"), group.seeds[0].clone()]);
        assert!(store.save_group(&bad).await.is_err());
        assert_eq!(store.seed_count().await, 3);
    }

    #[tokio::test]
    async fn test_metadata_requires_success_state() {
        let store = MemorySeedStore::new();
        let seed = seed("example.com");
        store.save(std::slice::from_ref(&seed)).await.unwrap();

        let now = Utc::now();
        assert!(store.update_metadata(&seed.shadow_id, "https://archive/x", now).await.is_err());

        store.update_state(&seed.shadow_id, CaptureState::Pending).await.unwrap();
        store.update_state(&seed.shadow_id, CaptureState::DoneSuccess).await.unwrap();
        store.update_metadata(&seed.shadow_id, "https://archive/x", now).await.unwrap();

        let stored = store.get_seed(&seed.shadow_id).await.unwrap();
        assert_eq!(stored.archival_url(), Some("https://archive/x"));
        assert_eq!(stored.harvested_at(), Some(now));
        assert!(store.update_state(&seed.shadow_id, CaptureState::DoneFailure).await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_expected_state() {
        let store = MemorySeedStore::new();
        let seed = seed("example.com");
        let id = &seed.shadow_id;
        store.save(std::slice::from_ref(&seed)).await.unwrap();

        store
            .compare_and_set_state(id, CaptureState::NotEnqueued, CaptureState::Pending)
            .await
            .unwrap();
        store
            .compare_and_set_state(id, CaptureState::Pending, CaptureState::DoneSuccess)
            .await
            .unwrap();

        // A late Pending mark must not pull a finished seed back.
        let err = store
            .compare_and_set_state(id, CaptureState::NotEnqueued, CaptureState::Pending)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::StateConflict {
                shadow_id: id.to_string(),
                expected: CaptureState::NotEnqueued,
                actual: CaptureState::DoneSuccess,
            }
        );
        assert_eq!(err.conflicting_state(), Some(CaptureState::DoneSuccess));
        assert_eq!(store.get_seed(id).await.unwrap().state, CaptureState::DoneSuccess);

        assert!(matches!(
            store
                .compare_and_set_state(&ShadowId::from("missing"), CaptureState::Pending, CaptureState::DoneFailure)
                .await,
            Err(StoreError::SeedNotFound(_))
        ));
    }
}
