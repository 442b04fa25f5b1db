//! Migration coordinator: the operator-facing control surface.
//!
//! Owns the phase controller, delete fence, dual-write dispatcher, and
//! backfill engine, and performs the side effects each phase edge requires.
//! `advance` moves one edge forward, `rollback` is the single legal
//! backward edge, `status` reports a consistent snapshot of progress.

use std::sync::{Arc, Mutex};

use index_store::IndexStore;

use crate::backfill::{BackfillEngine, BackfillResult};
use crate::config::SyncConfig;
use crate::dispatcher::DualWriteDispatcher;
use crate::error::SyncError;
use crate::fence::DeleteFence;
use crate::phase::{MigrationPhase, PhaseController};
use crate::transform::SchemaTransform;
use crate::types::MigrationStatus;

pub struct Coordinator {
    phases: Arc<PhaseController>,
    fence: Arc<DeleteFence>,
    dispatcher: Arc<DualWriteDispatcher>,
    engine: Arc<BackfillEngine>,
    legacy: Arc<dyn IndexStore>,
    target: Arc<dyn IndexStore>,
    config: SyncConfig,
    // Gate for Backfilling -> CutoverPending: set only by a completed,
    // reconciled backfill run; cleared by rollback.
    last_backfill: Mutex<Option<BackfillResult>>,
}

impl Coordinator {
    pub fn new(
        legacy: Arc<dyn IndexStore>,
        target: Arc<dyn IndexStore>,
        transform: Arc<dyn SchemaTransform>,
        config: SyncConfig,
    ) -> Self {
        let phases = Arc::new(PhaseController::new());
        let fence = Arc::new(DeleteFence::new());
        let dispatcher = Arc::new(DualWriteDispatcher::new(
            legacy.clone(),
            target.clone(),
            phases.clone(),
            fence.clone(),
            transform.clone(),
            config.retry_policy(),
        ));
        let engine = Arc::new(BackfillEngine::new(config.clone(), transform));
        Coordinator {
            phases,
            fence,
            dispatcher,
            engine,
            legacy,
            target,
            config,
            last_backfill: Mutex::new(None),
        }
    }

    /// Dispatcher handle for the change feed pump.
    pub fn dispatcher(&self) -> Arc<DualWriteDispatcher> {
        self.dispatcher.clone()
    }

    /// Backfill engine handle, e.g. for a cooperative abort.
    pub fn backfill_engine(&self) -> Arc<BackfillEngine> {
        self.engine.clone()
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phases.current()
    }

    /// Advance one phase edge, performing its side effects.
    pub async fn advance(&self) -> Result<MigrationPhase, SyncError> {
        let current = self.phases.current();
        match current {
            MigrationPhase::Preparing => {
                // Target index must exist and answer before writes are
                // gated to it.
                self.target
                    .count()
                    .await
                    .map_err(SyncError::TargetStore)?;
                let legacy_schema = self.legacy.target().schema_version;
                let target_schema = self.target.target().schema_version;
                if target_schema == legacy_schema {
                    tracing::warn!(
                        schema_version = target_schema,
                        "target index serves the same schema version as legacy"
                    );
                }
                tracing::info!(
                    legacy = %self.legacy.target(),
                    target = %self.target.target(),
                    "target validated; gating writes to both indexes"
                );
                self.phases.transition_to(MigrationPhase::DualWrite)
            }

            MigrationPhase::DualWrite => {
                self.fence.activate().await;
                self.phases.transition_to(MigrationPhase::Backfilling)
                // The backfill itself runs via `run_backfill`.
            }

            MigrationPhase::Backfilling => {
                if self.last_backfill.lock().expect("last_backfill lock poisoned").is_none() {
                    return Err(SyncError::AdvanceBlocked {
                        phase: current,
                        reason: "backfill has not completed and reconciled".to_string(),
                    });
                }
                // Transition first, so deletes arriving from here on go to
                // the target directly instead of joining a queue that is
                // already being drained. The fenced backlog then replays
                // strictly after every backfill insert.
                let next = self.phases.transition_to(MigrationPhase::CutoverPending)?;
                let released = self
                    .fence
                    .release(self.target.as_ref(), &self.config.retry_policy())
                    .await?;
                self.fence.deactivate().await;
                tracing::info!(released, "fenced deletes replayed after backfill");
                Ok(next)
            }

            MigrationPhase::CutoverPending => {
                // A fence backlog left by a failed earlier release must be
                // drained before reads move over.
                if !self.fence.is_empty().await {
                    self.fence
                        .release(self.target.as_ref(), &self.config.retry_policy())
                        .await?;
                }
                let next = self.phases.transition_to(MigrationPhase::Cutover)?;
                tracing::info!("read traffic redirected to target index");
                Ok(next)
            }

            MigrationPhase::Cutover => {
                let next = self.phases.transition_to(MigrationPhase::Complete)?;
                tracing::info!(legacy = %self.legacy.target(), "legacy index eligible for decommission");
                Ok(next)
            }

            MigrationPhase::Complete => Err(SyncError::AdvanceBlocked {
                phase: current,
                reason: "migration complete".to_string(),
            }),
        }
    }

    /// Run the backfill for the current Backfilling phase.
    ///
    /// On success the completed run gates the advance to CutoverPending.
    /// On failure (including a reconciliation mismatch) the phase stays
    /// Backfilling and the persisted cursor allows a resume.
    pub async fn run_backfill(&self) -> Result<BackfillResult, SyncError> {
        let current = self.phases.current();
        if current != MigrationPhase::Backfilling {
            return Err(SyncError::AdvanceBlocked {
                phase: current,
                reason: "backfill only runs in the backfilling phase".to_string(),
            });
        }
        let result = self.engine.run(self.legacy.as_ref(), self.target.as_ref()).await?;
        *self.last_backfill.lock().expect("last_backfill lock poisoned") = Some(result.clone());
        Ok(result)
    }

    /// Roll back from CutoverPending to DualWrite.
    ///
    /// Re-arms the fence and discards the completed backfill: anything
    /// deleted and recreated after the release needs a fresh backfill, and
    /// its reconciliation starts from zero.
    pub async fn rollback(&self) -> Result<MigrationPhase, SyncError> {
        let next = self.phases.transition_to(MigrationPhase::DualWrite)?;
        self.fence.activate().await;
        *self.last_backfill.lock().expect("last_backfill lock poisoned") = None;
        tracing::warn!("rolled back to dual-write; a new backfill is required before cutover");
        Ok(next)
    }

    /// Consistent snapshot of migration progress.
    pub async fn status(&self) -> MigrationStatus {
        let progress = self.engine.progress();
        let (seen, total, rejected) = match &progress {
            Some(cursor) => (
                cursor.documents_seen,
                cursor.documents_total,
                cursor.rejected_existing,
            ),
            None => (0, 0, 0),
        };
        MigrationStatus {
            phase: self.phases.current(),
            documents_seen: seen,
            documents_total: total,
            rejected_existing: rejected,
            fenced_deletes: self.fence.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pair, test_config};
    use crate::transform::IdentityTransform;
    use crate::types::ChangeEvent;
    use serde_json::json;

    fn coordinator() -> (Coordinator, Arc<index_store::MemoryIndex>, Arc<index_store::MemoryIndex>) {
        let (legacy, target) = memory_pair();
        let coordinator = Coordinator::new(
            legacy.clone(),
            target.clone(),
            Arc::new(IdentityTransform),
            test_config(),
        );
        (coordinator, legacy, target)
    }

    #[tokio::test]
    async fn advance_walks_the_full_path() {
        let (coordinator, legacy, _) = coordinator();
        legacy.index_or_replace("a", &json!({})).await.unwrap();

        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::DualWrite);
        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::Backfilling);
        coordinator.run_backfill().await.unwrap();
        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::CutoverPending);
        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::Cutover);
        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::Complete);

        let err = coordinator.advance().await.unwrap_err();
        assert!(matches!(err, SyncError::AdvanceBlocked { .. }));
    }

    #[tokio::test]
    async fn cutover_pending_requires_completed_backfill() {
        let (coordinator, _, _) = coordinator();
        coordinator.advance().await.unwrap();
        coordinator.advance().await.unwrap();

        let err = coordinator.advance().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::AdvanceBlocked {
                phase: MigrationPhase::Backfilling,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn backfill_refuses_to_run_outside_backfilling() {
        let (coordinator, _, _) = coordinator();
        assert!(coordinator.run_backfill().await.is_err());
    }

    #[tokio::test]
    async fn advance_to_cutover_pending_releases_fence() {
        let (coordinator, legacy, target) = coordinator();
        for id in ["a", "b"] {
            legacy.index_or_replace(id, &json!({})).await.unwrap();
        }

        coordinator.advance().await.unwrap();
        coordinator.advance().await.unwrap();

        // A delete arrives mid-backfill: legacy applies it, target fences.
        let dispatcher = coordinator.dispatcher();
        coordinator.run_backfill().await.unwrap();
        dispatcher.apply(&ChangeEvent::delete("a", 1)).await.unwrap();
        assert_eq!(coordinator.status().await.fenced_deletes, 1);

        // Fenced count makes legacy (1 doc) and target (2 docs) disagree;
        // run_backfill above already reconciled, so only the release is
        // pending.
        coordinator.advance().await.unwrap();
        assert_eq!(coordinator.status().await.fenced_deletes, 0);
        assert_eq!(target.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_requires_new_backfill() {
        let (coordinator, legacy, _) = coordinator();
        legacy.index_or_replace("a", &json!({})).await.unwrap();

        coordinator.advance().await.unwrap();
        coordinator.advance().await.unwrap();
        coordinator.run_backfill().await.unwrap();
        coordinator.advance().await.unwrap();

        assert_eq!(coordinator.rollback().await.unwrap(), MigrationPhase::DualWrite);

        // The old backfill no longer gates the advance.
        coordinator.advance().await.unwrap();
        let err = coordinator.advance().await.unwrap_err();
        assert!(matches!(err, SyncError::AdvanceBlocked { .. }));

        coordinator.run_backfill().await.unwrap();
        assert_eq!(coordinator.advance().await.unwrap(), MigrationPhase::CutoverPending);
    }

    #[tokio::test]
    async fn rollback_only_from_cutover_pending() {
        let (coordinator, _, _) = coordinator();
        assert!(coordinator.rollback().await.is_err());
    }
}
