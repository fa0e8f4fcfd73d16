//! Capture orchestration
//!
//! Turns seeds into capture requests, hands them to the queue, and applies
//! incoming results to the seed lifecycle.
//!
//! Enqueueing a seed and marking it Pending are two separate steps. A crash
//! between them leaves a request in flight for a seed that still reads
//! NotEnqueued; the result handler reconciles that case by walking the seed
//! through Pending when its result arrives. The same happens when the
//! crawler simply answers before the mark is written. Every state change is
//! a compare-and-set in the store, so neither side can undo the other's.

use crate::listener::{ListenerExit, ResultListener};
use crate::queue::CaptureQueue;
use crate::state::{decide, ResultDecision};
use crate::{
    CaptureError, CaptureRequest, CaptureResult, CaptureState, ListenerConfig, Metrics, QueueError, Seed,
    SeedError, SeedService, SeedsGroup,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one capture result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The seed moved to this terminal state.
    Applied(CaptureState),
    /// `Done=false`; nothing changed.
    Unfinished,
    /// The seed had already finished; nothing changed.
    Duplicate,
    /// The seed was DoneSuccess without archive details; they were written.
    ArchiveRecorded,
}

/// Summary of a group capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupCapture {
    pub enqueued: usize,
    /// Seeds that were already Pending or finished.
    pub skipped: usize,
}

pub struct CaptureService {
    queue: Arc<dyn CaptureQueue>,
    seeds: Arc<SeedService>,
    metrics: Arc<Metrics>,
    listener_config: ListenerConfig,
}

impl CaptureService {
    pub fn new(
        queue: Arc<dyn CaptureQueue>,
        seeds: Arc<SeedService>,
        metrics: Arc<Metrics>,
        listener_config: ListenerConfig,
    ) -> Self {
        Self {
            queue,
            seeds,
            metrics,
            listener_config,
        }
    }

    pub fn seeds(&self) -> &SeedService {
        &self.seeds
    }

    pub fn queue(&self) -> &Arc<dyn CaptureQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Enqueue a capture request for one seed. Does not touch its state.
    pub async fn capture_seed(&self, seed: &Seed) -> Result<(), CaptureError> {
        let request = CaptureRequest::from_seed(seed);
        let enqueued = self.queue.enqueue(&request).await;
        self.metrics.record_enqueue(enqueued.is_ok());
        enqueued.map_err(|e| {
            warn!(shadow_id = %seed.shadow_id, error = %e, "Failed to enqueue capture request");
            CaptureError::Queue(e)
        })
    }

    /// Enqueue every seed of a group in order and mark each one Pending.
    ///
    /// Seeds that are no longer NotEnqueued are skipped, so calling this
    /// again after a partial failure only enqueues what is left. The first
    /// failure stops the batch; seeds before it stay enqueued and Pending.
    pub async fn capture_group(&self, group: &SeedsGroup) -> Result<GroupCapture, CaptureError> {
        let total = group.len();
        let mut summary = GroupCapture::default();

        for seed in &group.seeds {
            if seed.state != CaptureState::NotEnqueued {
                debug!(shadow_id = %seed.shadow_id, state = %seed.state, "Skipping seed");
                summary.skipped += 1;
                continue;
            }

            let step = match self.capture_seed(seed).await {
                Ok(()) => self.mark_pending(seed).await,
                Err(e) => Err(e),
            };
            if let Err(source) = step {
                warn!(
                    group = %group.shadow_id,
                    enqueued = summary.enqueued,
                    total,
                    error = %source,
                    "Group capture stopped"
                );
                return Err(CaptureError::GroupPartiallyEnqueued {
                    enqueued: summary.enqueued,
                    total,
                    source: Box::new(source),
                });
            }
            summary.enqueued += 1;
        }

        info!(
            group = %group.shadow_id,
            enqueued = summary.enqueued,
            skipped = summary.skipped,
            "Group handed to crawler"
        );
        Ok(summary)
    }

    async fn mark_pending(&self, seed: &Seed) -> Result<(), CaptureError> {
        let marked = self
            .seeds
            .transition(&seed.shadow_id, CaptureState::NotEnqueued, CaptureState::Pending)
            .await;
        match marked {
            Ok(()) => Ok(()),
            // Its result already arrived and moved the seed on.
            Err(e) if matches!(e.conflicting_state(), Some(state) if state != CaptureState::NotEnqueued) => {
                debug!(shadow_id = %seed.shadow_id, error = %e, "Seed advanced before it was marked Pending");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pop the next result. See [`CaptureQueue::await_result`] for timeout
    /// semantics.
    pub async fn await_result(&self, timeout: Duration) -> Result<CaptureResult, QueueError> {
        self.queue.await_result(timeout).await
    }

    /// Apply one capture result to its seed.
    ///
    /// Metadata is parsed before any state change, so a result with a bad
    /// timestamp leaves the seed untouched.
    pub async fn process_result(&self, result: &CaptureResult) -> Result<ResultOutcome, SeedError> {
        let started = Instant::now();
        let shadow_id = &result.seed_shadow_id;
        let seed = self.seeds.get_seed(shadow_id).await?;

        let (target, reconcile) = match decide(seed.state, seed.archive.is_some(), result) {
            ResultDecision::Advance { target, reconcile } => (target, reconcile),
            ResultDecision::Unfinished => {
                warn!(shadow_id = %shadow_id, state = %seed.state, "Ignoring result with Done=false");
                return Ok(ResultOutcome::Unfinished);
            }
            ResultDecision::AlreadyFinished(state) => {
                debug!(shadow_id = %shadow_id, state = %state, "Ignoring redelivered result");
                return Ok(ResultOutcome::Duplicate);
            }
            ResultDecision::RecordArchive => return self.record_missing_archive(result).await,
        };

        let archive = match (&result.capture_metadata, target) {
            (Some(metadata), CaptureState::DoneSuccess) => Some(self.seeds.archival_info(metadata)?),
            (Some(_), _) => {
                warn!(shadow_id = %shadow_id, "Ignoring capture metadata on failed capture");
                None
            }
            (None, CaptureState::DoneSuccess) => {
                warn!(shadow_id = %shadow_id, "Successful capture arrived without metadata");
                None
            }
            (None, _) => None,
        };

        if reconcile {
            info!(shadow_id = %shadow_id, "Result for seed never marked Pending, reconciling");
            let marked = self
                .seeds
                .transition(shadow_id, CaptureState::NotEnqueued, CaptureState::Pending)
                .await;
            match marked {
                Ok(()) => {}
                // Marked by the group capture in the meantime.
                Err(e) if e.conflicting_state() == Some(CaptureState::Pending) => {}
                Err(e) => return Err(e),
            }
        }
        self.seeds.transition(shadow_id, CaptureState::Pending, target).await?;
        if let Some(archive) = &archive {
            self.seeds.update_metadata(shadow_id, archive).await?;
        }

        if target == CaptureState::DoneFailure {
            info!(shadow_id = %shadow_id, errors = ?result.error_messages, "Capture failed");
        } else {
            info!(shadow_id = %shadow_id, archival_url = ?archive.map(|a| a.archival_url), "Capture succeeded");
        }
        self.metrics.record_result(target, started.elapsed());
        Ok(ResultOutcome::Applied(target))
    }

    /// Write archive details for a seed whose earlier metadata update failed
    /// after it had already become DoneSuccess.
    async fn record_missing_archive(&self, result: &CaptureResult) -> Result<ResultOutcome, SeedError> {
        let Some(metadata) = &result.capture_metadata else {
            return Ok(ResultOutcome::Duplicate);
        };
        let archive = self.seeds.archival_info(metadata)?;
        self.seeds.update_metadata(&result.seed_shadow_id, &archive).await?;
        info!(
            shadow_id = %result.seed_shadow_id,
            archival_url = %archive.archival_url,
            "Recorded missing archive details"
        );
        Ok(ResultOutcome::ArchiveRecorded)
    }

    /// Start the single background consumer of the result channel.
    ///
    /// It runs until `cancel` fires or the queue keeps failing; the handle
    /// tells which.
    pub fn listen_for_results(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<ListenerExit> {
        let listener = ResultListener::new(self.clone(), self.listener_config.clone());
        tokio::spawn(async move { listener.run(cancel).await })
    }
}
