//! Dual-write dispatcher: applies change events to both indexes.
//!
//! The legacy index always gets the write, with index-or-replace (last-
//! writer-wins) semantics. The target index is gated by the current
//! migration phase, and target-bound deletes during backfill are diverted
//! to the delete fence. The two indexes are eventually, not atomically,
//! consistent: a target failure is retried independently and never blocks
//! or rolls back the legacy write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use index_store::{IndexStore, StoreError};

use crate::error::SyncError;
use crate::fence::DeleteFence;
use crate::phase::PhaseController;
use crate::retry::{with_retries, RetryPolicy};
use crate::transform::SchemaTransform;
use crate::types::{ChangeEvent, Operation};

/// What happened on the target side of one dispatched event. The legacy
/// side is covered by `apply`'s `Result`: an `Ok` outcome always means the
/// legacy write succeeded.
#[derive(Debug)]
pub enum TargetOutcome {
    /// Write applied to the target index.
    Applied,
    /// Delete diverted to the delete fence.
    Fenced,
    /// Phase gating kept the event off the target index.
    Skipped,
    /// Target write failed after bounded retries. Surfaced here, never
    /// propagated as an error, so the event can still be acknowledged.
    Failed(StoreError),
}

#[derive(Debug)]
pub struct ApplyOutcome {
    pub target: TargetOutcome,
}

pub struct DualWriteDispatcher {
    legacy: Arc<dyn IndexStore>,
    target: Arc<dyn IndexStore>,
    phases: Arc<PhaseController>,
    fence: Arc<DeleteFence>,
    transform: Arc<dyn SchemaTransform>,
    retry: RetryPolicy,
    // Highest sequence applied per record, for out-of-order detection.
    last_applied: Mutex<HashMap<String, u64>>,
}

impl DualWriteDispatcher {
    pub fn new(
        legacy: Arc<dyn IndexStore>,
        target: Arc<dyn IndexStore>,
        phases: Arc<PhaseController>,
        fence: Arc<DeleteFence>,
        transform: Arc<dyn SchemaTransform>,
        retry: RetryPolicy,
    ) -> Self {
        DualWriteDispatcher {
            legacy,
            target,
            phases,
            fence,
            transform,
            retry,
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one change event to both indexes.
    ///
    /// Returns `Err` only when the legacy write fails; the caller must then
    /// leave the event unacknowledged so the feed redelivers it. Target-side
    /// results are reported in the outcome.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<ApplyOutcome, SyncError> {
        self.check_ordering(event);

        // Legacy first. Its failure propagates; the feed's at-least-once
        // redelivery is the retry mechanism of record for this side.
        match &event.operation {
            Operation::Upsert { payload } => {
                with_retries("legacy index_or_replace", &self.retry, || {
                    self.legacy.index_or_replace(&event.record_id, payload)
                })
                .await
                .map_err(SyncError::LegacyStore)?;
            }
            Operation::Delete => {
                with_retries("legacy delete_if_exists", &self.retry, || {
                    self.legacy.delete_if_exists(&event.record_id)
                })
                .await
                .map_err(SyncError::LegacyStore)?;
            }
        }
        self.record_applied(event);

        // One consistent phase snapshot governs the whole target decision.
        let phase = self.phases.current();

        let target = match &event.operation {
            Operation::Upsert { payload } if phase.target_upserts_enabled() => {
                let transformed = self.transform.transform(&event.record_id, payload);
                match transformed {
                    Ok(doc) => {
                        let written = with_retries("target index_or_replace", &self.retry, || {
                            self.target.index_or_replace(&event.record_id, &doc)
                        })
                        .await;
                        match written {
                            Ok(()) => TargetOutcome::Applied,
                            Err(e) => TargetOutcome::Failed(e),
                        }
                    }
                    Err(SyncError::Transform { reason, .. }) => {
                        TargetOutcome::Failed(StoreError::Permanent(reason))
                    }
                    Err(e) => TargetOutcome::Failed(StoreError::Permanent(e.to_string())),
                }
            }
            Operation::Delete if phase.target_deletes_fenced() => {
                self.fence.fence(&event.record_id).await;
                TargetOutcome::Fenced
            }
            Operation::Delete if phase.target_deletes_enabled() => {
                let deleted = with_retries("target delete_if_exists", &self.retry, || {
                    self.target.delete_if_exists(&event.record_id)
                })
                .await;
                match deleted {
                    Ok(()) => TargetOutcome::Applied,
                    Err(e) => TargetOutcome::Failed(e),
                }
            }
            _ => TargetOutcome::Skipped,
        };

        // Every target-bound operation is logged with record id and outcome.
        match &target {
            TargetOutcome::Applied => {
                tracing::info!(record_id = %event.record_id, %phase, outcome = "applied", "target write")
            }
            TargetOutcome::Fenced => {
                tracing::info!(record_id = %event.record_id, %phase, outcome = "fenced", "target write")
            }
            TargetOutcome::Skipped => {
                tracing::debug!(record_id = %event.record_id, %phase, outcome = "skipped", "target write")
            }
            TargetOutcome::Failed(e) => {
                tracing::error!(record_id = %event.record_id, %phase, error = %e, "target write failed; legacy write unaffected")
            }
        }

        Ok(ApplyOutcome { target })
    }

    /// Detect per-record sequence regressions. The later-arriving event
    /// still wins: both indexes are last-write-wins, and the fence design
    /// already covers the only dangerous race.
    fn check_ordering(&self, event: &ChangeEvent) {
        let last_applied = self.last_applied.lock().expect("last_applied lock poisoned");
        if let Some(&last) = last_applied.get(&event.record_id) {
            if event.sequence < last {
                let violation = SyncError::OrderingViolation {
                    record_id: event.record_id.clone(),
                    last,
                    got: event.sequence,
                };
                tracing::warn!(%violation, "applying anyway; arrival order wins");
            } else if event.sequence == last {
                tracing::debug!(
                    record_id = %event.record_id,
                    sequence = event.sequence,
                    "redelivered event"
                );
            }
        }
    }

    fn record_applied(&self, event: &ChangeEvent) {
        let mut last_applied = self.last_applied.lock().expect("last_applied lock poisoned");
        let entry = last_applied.entry(event.record_id.clone()).or_insert(0);
        *entry = (*entry).max(event.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::MigrationPhase;
    use crate::transform::IdentityTransform;
    use index_store::{IndexTarget, InsertOutcome, MemoryIndex};
    use serde_json::json;

    struct Fixture {
        legacy: Arc<MemoryIndex>,
        target: Arc<MemoryIndex>,
        phases: Arc<PhaseController>,
        fence: Arc<DeleteFence>,
        dispatcher: DualWriteDispatcher,
    }

    fn fixture() -> Fixture {
        let legacy = Arc::new(MemoryIndex::new(IndexTarget::new(
            "products-v1",
            "memory://legacy",
            1,
        )));
        let target = Arc::new(MemoryIndex::new(IndexTarget::new(
            "products-v2",
            "memory://target",
            2,
        )));
        let phases = Arc::new(PhaseController::new());
        let fence = Arc::new(DeleteFence::new());
        let dispatcher = DualWriteDispatcher::new(
            legacy.clone(),
            target.clone(),
            phases.clone(),
            fence.clone(),
            Arc::new(IdentityTransform),
            RetryPolicy::default(),
        );
        Fixture {
            legacy,
            target,
            phases,
            fence,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn preparing_writes_legacy_only() {
        let f = fixture();
        let outcome = f
            .dispatcher
            .apply(&ChangeEvent::upsert("a", 1, json!({"v": 1})))
            .await
            .unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Skipped));
        assert_eq!(f.legacy.count().await.unwrap(), 1);
        assert_eq!(f.target.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dual_write_mirrors_upserts_and_deletes() {
        let f = fixture();
        f.phases.transition_to(MigrationPhase::DualWrite).unwrap();

        let outcome = f
            .dispatcher
            .apply(&ChangeEvent::upsert("a", 1, json!({"v": 1})))
            .await
            .unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Applied));
        assert_eq!(f.target.count().await.unwrap(), 1);

        let outcome = f.dispatcher.apply(&ChangeEvent::delete("a", 2)).await.unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Applied));
        assert_eq!(f.legacy.count().await.unwrap(), 0);
        assert_eq!(f.target.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn backfilling_fences_deletes() {
        let f = fixture();
        f.phases.transition_to(MigrationPhase::DualWrite).unwrap();
        f.phases.transition_to(MigrationPhase::Backfilling).unwrap();

        let outcome = f.dispatcher.apply(&ChangeEvent::delete("a", 1)).await.unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Fenced));
        assert_eq!(f.fence.len().await, 1);

        // Upserts still go straight through during backfill.
        let outcome = f
            .dispatcher
            .apply(&ChangeEvent::upsert("b", 1, json!({"v": 1})))
            .await
            .unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Applied));
    }

    #[tokio::test]
    async fn delete_of_absent_target_record_is_not_an_error() {
        let f = fixture();
        f.phases.transition_to(MigrationPhase::DualWrite).unwrap();
        let outcome = f.dispatcher.apply(&ChangeEvent::delete("ghost", 1)).await.unwrap();
        assert!(matches!(outcome.target, TargetOutcome::Applied));
    }

    #[tokio::test]
    async fn transform_shapes_target_payload() {
        let legacy = Arc::new(MemoryIndex::new(IndexTarget::new("v1", "memory://l", 1)));
        let target = Arc::new(MemoryIndex::new(IndexTarget::new("v2", "memory://t", 2)));
        let phases = Arc::new(PhaseController::new());
        phases.transition_to(MigrationPhase::DualWrite).unwrap();

        let rename = |_: &str, payload: &index_store::Document| -> Result<index_store::Document, SyncError> {
            Ok(json!({"name": payload["title"]}))
        };
        let dispatcher = DualWriteDispatcher::new(
            legacy.clone(),
            target.clone(),
            phases,
            Arc::new(DeleteFence::new()),
            Arc::new(rename),
            RetryPolicy::default(),
        );

        dispatcher
            .apply(&ChangeEvent::upsert("a", 1, json!({"title": "widget"})))
            .await
            .unwrap();

        // Legacy keeps the old shape, target gets the migrated one.
        assert_eq!(
            target.insert_if_absent("a", &json!({})).await.unwrap(),
            InsertOutcome::Rejected
        );
        let mut cursor = target.open_snapshot_cursor(10).await.unwrap();
        let batch = cursor.read_batch().await.unwrap().unwrap();
        assert_eq!(batch.docs[0].1, json!({"name": "widget"}));
    }

    #[tokio::test]
    async fn out_of_order_event_still_applies() {
        let f = fixture();
        f.phases.transition_to(MigrationPhase::DualWrite).unwrap();

        f.dispatcher
            .apply(&ChangeEvent::upsert("a", 5, json!({"v": 5})))
            .await
            .unwrap();
        // Sequence regression: logged, but arrival order wins.
        f.dispatcher
            .apply(&ChangeEvent::upsert("a", 3, json!({"v": 3})))
            .await
            .unwrap();

        let mut cursor = f.legacy.open_snapshot_cursor(10).await.unwrap();
        let batch = cursor.read_batch().await.unwrap().unwrap();
        assert_eq!(batch.docs[0].1["v"], 3);
    }
}
