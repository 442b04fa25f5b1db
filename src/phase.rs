//! Migration phase state machine.
//!
//! The phase is the single authoritative value governing which write-path
//! behaviors are active. All transitions go through [`PhaseController`],
//! which validates legal moves and publishes each change over a watch
//! channel so every component observes the same linearized sequence.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::SyncError;

/// Global migration stage. Monotonic, except the explicit rollback from
/// `CutoverPending` back to `DualWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Target index being created and validated; no writes gated yet.
    Preparing,
    /// Upserts and deletes mirrored to the target index.
    DualWrite,
    /// Bulk backfill in progress; target-bound deletes are fenced.
    Backfilling,
    /// Backfill complete and reconciled; awaiting cutover confirmation.
    CutoverPending,
    /// Read traffic redirected to the target index.
    Cutover,
    /// Legacy index decommission eligible. Terminal.
    Complete,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &str {
        match self {
            MigrationPhase::Preparing => "preparing",
            MigrationPhase::DualWrite => "dual_write",
            MigrationPhase::Backfilling => "backfilling",
            MigrationPhase::CutoverPending => "cutover_pending",
            MigrationPhase::Cutover => "cutover",
            MigrationPhase::Complete => "complete",
        }
    }

    /// Legal transition edges. No edge skips a state.
    pub fn can_transition_to(self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        matches!(
            (self, next),
            (Preparing, DualWrite)
                | (DualWrite, Backfilling)
                | (Backfilling, CutoverPending)
                | (CutoverPending, Cutover)
                | (CutoverPending, DualWrite)
                | (Cutover, Complete)
        )
    }

    /// Whether upserts are mirrored to the target index in this phase.
    pub fn target_upserts_enabled(self) -> bool {
        matches!(
            self,
            MigrationPhase::DualWrite | MigrationPhase::Backfilling | MigrationPhase::CutoverPending
        )
    }

    /// Whether target-bound deletes are diverted to the delete fence.
    pub fn target_deletes_fenced(self) -> bool {
        self == MigrationPhase::Backfilling
    }

    /// Whether deletes are applied to the target index directly.
    pub fn target_deletes_enabled(self) -> bool {
        matches!(
            self,
            MigrationPhase::DualWrite | MigrationPhase::CutoverPending | MigrationPhase::Cutover
        )
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the authoritative phase value.
///
/// Transition validation and the write happen inside a single
/// `watch::Sender::send_modify` critical section, so no reader can observe
/// an intermediate state and no two racing transitions can both succeed
/// from the same source phase.
pub struct PhaseController {
    current: watch::Sender<MigrationPhase>,
}

impl PhaseController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MigrationPhase::Preparing);
        PhaseController { current: tx }
    }

    /// Consistent snapshot of the current phase.
    pub fn current(&self) -> MigrationPhase {
        *self.current.borrow()
    }

    /// Subscribe to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<MigrationPhase> {
        self.current.subscribe()
    }

    /// Attempt a transition. Illegal moves leave the phase unchanged.
    pub fn transition_to(&self, next: MigrationPhase) -> Result<MigrationPhase, SyncError> {
        let mut result = Ok(next);
        self.current.send_modify(|current| {
            if current.can_transition_to(next) {
                tracing::info!(from = %current, to = %next, "phase transition");
                *current = next;
            } else {
                result = Err(SyncError::InvalidTransition {
                    from: *current,
                    to: next,
                });
            }
        });
        result
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}
