//! # Dispatch
//!
//! Routes parsed snapshots to the object store.
//!
//! New snapshots take the fast path: one immediate upload attempt, falling
//! back to the [`OfflineQueue`] on a transient failure. The retry loop drains
//! the queue in small batches at a fixed interval. Permanent failures go to
//! the [`DeadLetterLog`] from either path and are never requeued.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::queue::OfflineQueue;
use crate::telemetry::SensorSnapshot;
use crate::upload::{DeadLetterLog, UploadOutcome, Uploader};

/// Default number of queued snapshots attempted per retry cycle
pub const DEFAULT_RETRY_BATCH: usize = 5;

/// Default queue length below which every retry cycle saves the queue
pub const DEFAULT_PERSIST_THRESHOLD: usize = 50;

/// What happened to a snapshot on the fast path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered immediately
    Uploaded,
    /// Upload failed transiently; waiting in the offline queue
    Queued,
    /// Upload failed transiently and the offline queue was full
    Dropped,
    /// Rejected permanently; written to the dead-letter log
    DeadLettered,
}

/// Summary of one retry cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub persisted: bool,
}

/// Retry loop tuning
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub persist_threshold: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_RETRY_BATCH,
            persist_threshold: DEFAULT_PERSIST_THRESHOLD,
        }
    }
}

/// Shared delivery state for the ingestion task and the retry loop
#[derive(Debug)]
pub struct Dispatcher {
    uploader: Uploader,
    queue: Arc<OfflineQueue>,
    dead_letters: DeadLetterLog,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        uploader: Uploader,
        queue: Arc<OfflineQueue>,
        dead_letters: DeadLetterLog,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            uploader,
            queue,
            dead_letters,
            policy,
        }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Fast path: attempt one upload, queueing the snapshot on failure
    pub async fn dispatch(&self, snapshot: SensorSnapshot) -> Disposition {
        match self.uploader.attempt(&snapshot).await {
            UploadOutcome::Delivered { .. } => Disposition::Uploaded,
            UploadOutcome::TransientFailure { .. } => {
                info!(
                    "Failed initial upload for timestamp {:?}. Adding to offline queue.",
                    snapshot.timestamp
                );
                if self.queue.enqueue(snapshot) {
                    Disposition::Queued
                } else {
                    Disposition::Dropped
                }
            }
            UploadOutcome::PermanentFailure { key, reason } => {
                self.dead_letters.record_in_background(&key, &reason, &snapshot).await;
                Disposition::DeadLettered
            }
        }
    }

    /// Run one retry cycle over the front of the offline queue
    ///
    /// Transient failures go back to the front in their original order. The
    /// queue is saved when it is short or the cycle removed anything from it.
    pub async fn retry_cycle(&self) -> CycleReport {
        let batch = self.queue.drain_batch(self.policy.batch_size);
        if batch.is_empty() {
            return CycleReport::default();
        }

        info!("Attempting to upload {} items from offline queue", batch.len());
        let mut report = CycleReport {
            attempted: batch.len(),
            ..Default::default()
        };
        let mut failed = Vec::new();

        for snapshot in batch {
            match self.uploader.attempt(&snapshot).await {
                UploadOutcome::Delivered { .. } => report.delivered += 1,
                UploadOutcome::TransientFailure { .. } => failed.push(snapshot),
                UploadOutcome::PermanentFailure { key, reason } => {
                    self.dead_letters.record_in_background(&key, &reason, &snapshot).await;
                    report.dead_lettered += 1;
                }
            }
        }

        if !failed.is_empty() {
            report.requeued = failed.len();
            self.queue.requeue_front(failed);
            warn!("Re-queued {} items after failed upload attempt", report.requeued);
        }

        let removed = report.delivered + report.dead_lettered;
        if removed > 0 || self.queue.len() < self.policy.persist_threshold {
            report.persisted = self.queue.persist_in_background().await;
        }

        debug!("Retry cycle: {:?}", report);
        report
    }

    /// Run retry cycles every `period` until the task is aborted
    pub async fn run_retry_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.retry_cycle().await;
        }
    }
}
