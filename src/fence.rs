//! Delete fence: defers target-bound deletes during backfill.
//!
//! A record deleted from the legacy index after the backfill snapshot was
//! taken may still be inserted into the target by the backfill engine,
//! since the snapshot predates the delete. Applying the delete immediately
//! would let the insert resurrect the record. The fence holds such deletes
//! in arrival order and replays them only after the backfill has drained
//! its snapshot, so every fenced delete lands after the insert it must
//! supersede.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use index_store::IndexStore;
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::retry::{with_retries, RetryPolicy};

/// A delete held back until backfill completion.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub record_id: String,
    pub requested_at: DateTime<Utc>,
}

struct FenceInner {
    queue: VecDeque<PendingDelete>,
    queued: HashSet<String>,
    active: bool,
}

/// FIFO queue of deferred deletes, deduplicated by record_id.
///
/// A single async lock covers both enqueue and release, so a fenced delete
/// can never be replayed concurrently with (or ahead of) new arrivals.
pub struct DeleteFence {
    inner: Mutex<FenceInner>,
}

impl DeleteFence {
    pub fn new() -> Self {
        DeleteFence {
            inner: Mutex::new(FenceInner {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                active: false,
            }),
        }
    }

    /// Enqueue a delete for later replay. Re-fencing an already-queued
    /// record keeps its original queue position; delete-if-exists makes the
    /// duplicate replay redundant anyway.
    pub async fn fence(&self, record_id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.queued.insert(record_id.to_string()) {
            inner.queue.push_back(PendingDelete {
                record_id: record_id.to_string(),
                requested_at: Utc::now(),
            });
            tracing::info!(record_id, pending = inner.queue.len(), "delete fenced");
        } else {
            tracing::debug!(record_id, "delete already fenced");
        }
    }

    /// Replay all pending deletes against the target index in FIFO arrival
    /// order. Idempotent: releasing an empty or already-drained queue is a
    /// no-op. Returns the number of deletes replayed.
    ///
    /// On a store failure the failing delete stays at the front of the
    /// queue, so a later release resumes where this one stopped.
    pub async fn release(
        &self,
        target: &dyn IndexStore,
        retry: &RetryPolicy,
    ) -> Result<u64, SyncError> {
        let mut inner = self.inner.lock().await;
        let mut replayed = 0u64;

        while let Some(pending) = inner.queue.front().cloned() {
            let outcome = with_retries("replay fenced delete", retry, || {
                target.delete_if_exists(&pending.record_id)
            })
            .await;

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        record_id = %pending.record_id,
                        requested_at = %pending.requested_at,
                        "fenced delete replayed"
                    );
                    inner.queue.pop_front();
                    inner.queued.remove(&pending.record_id);
                    replayed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        record_id = %pending.record_id,
                        error = %e,
                        remaining = inner.queue.len(),
                        "fence release halted"
                    );
                    return Err(SyncError::TargetStore(e));
                }
            }
        }

        if replayed > 0 {
            tracing::info!(replayed, "delete fence drained");
        }
        Ok(replayed)
    }

    /// Mark fencing in force (entering Backfilling, or rollback).
    pub async fn activate(&self) {
        self.inner.lock().await.active = true;
    }

    /// Mark fencing no longer in force.
    pub async fn deactivate(&self) {
        self.inner.lock().await.active = false;
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active
    }

    pub async fn len(&self) -> u64 {
        self.inner.lock().await.queue.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }
}

impl Default for DeleteFence {
    fn default() -> Self {
        Self::new()
    }
}
