//! Error types for the reindexing core.

use crate::phase::MigrationPhase;
use index_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the coordination core.
///
/// Store errors keep their side: legacy-store failures must propagate to the
/// change feed (which redelivers), while target-store failures are isolated
/// and retried without ever blocking legacy consistency.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Legacy index failure. Propagates to the dispatcher's caller so the
    /// event is not acknowledged and the feed redelivers it.
    #[error("legacy index error: {0}")]
    LegacyStore(#[source] StoreError),

    /// Target index failure. Isolated from the legacy write path.
    #[error("target index error: {0}")]
    TargetStore(#[source] StoreError),

    /// Post-backfill reconciliation failed. Blocks phase advance until an
    /// operator decides.
    #[error("reconciliation mismatch: expected {expected}, actual {actual} ({detail})")]
    ReconciliationMismatch {
        expected: u64,
        actual: u64,
        detail: String,
    },

    /// An event arrived out of per-record order. Logged; the later event
    /// wins since both indexes are last-write-wins.
    #[error("out-of-order event for '{record_id}': last applied sequence {last}, got {got}")]
    OrderingViolation {
        record_id: String,
        last: u64,
        got: u64,
    },

    /// Illegal phase transition attempt. The phase is left unchanged.
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        from: MigrationPhase,
        to: MigrationPhase,
    },

    /// The current phase's preconditions for advancing are not met.
    #[error("cannot advance from {phase}: {reason}")]
    AdvanceBlocked {
        phase: MigrationPhase,
        reason: String,
    },

    /// A backfill run halted before draining its snapshot. The persisted
    /// cursor position allows a later resume.
    #[error("backfill aborted at position {position}: {reason}")]
    BackfillAborted { position: u64, reason: String },

    /// Schema migration of a document failed.
    #[error("schema transform failed for '{record_id}': {reason}")]
    Transform { record_id: String, reason: String },

    /// Cursor checkpoint file could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The change feed itself failed (unreadable source, corrupt event).
    #[error("change feed error: {0}")]
    Feed(String),
}
