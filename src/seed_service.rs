//! Seed submission and bookkeeping on top of a [`SeedStore`].

use crate::metadata::to_archival_info;
use crate::{
    validate_url, ArchivalInfo, CaptureMetadata, CaptureState, Config, Metrics, Seed, SeedError,
    SeedStore, SeedsGroup, ShadowId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SeedService {
    store: Arc<dyn SeedStore>,
    metrics: Arc<Metrics>,
    /// Longest accepted URL in bytes
    max_url_length: usize,
    /// Most URLs accepted in one submission
    max_lines: usize,
    strict_urls: bool,
    archive_base_url: String,
}

impl SeedService {
    pub fn new(store: Arc<dyn SeedStore>, metrics: Arc<Metrics>, config: &Config) -> Self {
        Self {
            store,
            metrics,
            max_url_length: config.max_url_length,
            max_lines: config.max_lines,
            strict_urls: config.strict_urls,
            archive_base_url: config.archive_base_url.clone(),
        }
    }

    /// Save a newline separated list of URLs from an untrusted source.
    ///
    /// The total size and the number of lines are checked before any URL is
    /// parsed. With `store_group` the seeds are saved as one group.
    pub async fn save(&self, urls_list: &str, store_group: bool) -> Result<SeedsGroup, SeedError> {
        if urls_list.is_empty() {
            return Err(SeedError::EmptyInput);
        }
        let limit = self.max_url_length.saturating_mul(self.max_lines);
        if urls_list.len() > limit {
            return Err(SeedError::InputTooLarge {
                size: urls_list.len(),
                limit,
            });
        }
        let lines: Vec<&str> = urls_list.split('\n').collect();
        if lines.len() > self.max_lines {
            return Err(SeedError::TooManyLines {
                lines: lines.len(),
                limit: self.max_lines,
            });
        }
        self.save_list(&lines, store_group).await
    }

    /// Validate and save already split lines. Sizes are not checked; use
    /// [`SeedService::save`] for untrusted input.
    ///
    /// One invalid line rejects the whole list and nothing is stored.
    pub async fn save_list(&self, lines: &[&str], store_group: bool) -> Result<SeedsGroup, SeedError> {
        if lines.is_empty() {
            return Err(SeedError::EmptyInput);
        }

        let mut seeds = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let url = validate_url(line, self.strict_urls).map_err(|source| {
                self.metrics.record_rejected_url();
                debug!(line = index + 1, error = %source, "Rejected submitted URL");
                SeedError::InvalidUrl {
                    line: index + 1,
                    source,
                }
            })?;
            seeds.push(Seed::new(&url));
        }

        let group = SeedsGroup::new(seeds);
        if store_group {
            self.store.save_group(&group).await?;
        } else {
            self.store.save(&group.seeds).await?;
        }

        self.metrics.record_seeds_submitted(group.len());
        info!(
            group = %group.shadow_id,
            seeds = group.len(),
            grouped = store_group,
            "Saved submitted seeds"
        );
        Ok(group)
    }

    pub async fn get_group(&self, shadow_id: &ShadowId) -> Result<SeedsGroup, SeedError> {
        Ok(self.store.get_group(shadow_id).await?)
    }

    pub async fn get_seed(&self, shadow_id: &ShadowId) -> Result<Seed, SeedError> {
        Ok(self.store.get_seed(shadow_id).await?)
    }

    /// Move a seed to `state` if the lifecycle allows it.
    ///
    /// The store only applies the change while the seed is still in the
    /// state that was checked, so a concurrent update fails with
    /// [`StoreError::StateConflict`] instead of being overwritten.
    pub async fn update_state(&self, shadow_id: &ShadowId, state: CaptureState) -> Result<(), SeedError> {
        let seed = self.store.get_seed(shadow_id).await?;
        self.transition(shadow_id, seed.state, state).await
    }

    /// Move a seed from `from` to `to`, atomically in the store.
    pub async fn transition(&self, shadow_id: &ShadowId, from: CaptureState, to: CaptureState) -> Result<(), SeedError> {
        if !from.can_transition_to(to) {
            warn!(
                shadow_id = %shadow_id,
                from = %from,
                to = %to,
                "Refusing illegal state transition"
            );
            return Err(SeedError::IllegalTransition { from, to });
        }
        self.store.compare_and_set_state(shadow_id, from, to).await?;
        debug!(shadow_id = %shadow_id, state = %to, "Updated seed state");
        Ok(())
    }

    pub fn archival_info(&self, metadata: &CaptureMetadata) -> Result<ArchivalInfo, SeedError> {
        Ok(to_archival_info(metadata, &self.archive_base_url)?)
    }

    /// Record where and when a successful capture was stored.
    pub async fn update_metadata(&self, shadow_id: &ShadowId, archive: &ArchivalInfo) -> Result<(), SeedError> {
        self.store
            .update_metadata(shadow_id, &archive.archival_url, archive.harvested_at)
            .await?;
        Ok(())
    }
}
