//! reindex-sync Library
//!
//! A dual-write coordinator for zero-downtime reindexing: keeps a legacy
//! and a target search index consistent while a bulk backfill runs
//! concurrently with live write traffic, then mediates the cutover.
//!
//! # Features
//!
//! - Dual-write dispatch: every change event reaches the legacy index;
//!   the target index is gated by the migration phase
//! - Delete fence: deletes arriving during backfill are deferred and
//!   replayed after it, so backfill inserts can never resurrect them
//! - Resumable backfill: point-in-time snapshot cursor, insert-if-absent
//!   semantics, persisted position checkpoints, post-run reconciliation
//! - Phase controller: validated, linearized transitions with a single
//!   rollback edge from CutoverPending back to DualWrite
//! - Store-agnostic: compiled against the `index-store` traits only
//!
//! # CLI Usage
//!
//! ```bash
//! # Migrate a JSONL-backed legacy index into a target file while
//! # consuming a change feed
//! reindex-sync run \
//!   --legacy-path legacy.jsonl --target-path target.jsonl \
//!   --changes changes.jsonl --checkpoint-dir .reindex-sync-checkpoints
//!
//! # Inspect backfill progress
//! reindex-sync status --checkpoint-dir .reindex-sync-checkpoints
//! ```

pub mod backfill;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod fence;
pub mod phase;
pub mod retry;
pub mod testing;
pub mod transform;
pub mod types;

pub use backfill::{BackfillCursor, BackfillEngine, BackfillResult};
pub use checkpoint::{read_cursor_checkpoint, CursorCheckpointer};
pub use config::SyncConfig;
pub use coordinator::Coordinator;
pub use dispatcher::{ApplyOutcome, DualWriteDispatcher, TargetOutcome};
pub use error::SyncError;
pub use feed::{run_pump, ChangeFeed, JsonlChangeFeed, PumpStats};
pub use fence::{DeleteFence, PendingDelete};
pub use phase::{MigrationPhase, PhaseController};
pub use retry::{with_retries, RetryPolicy};
pub use transform::{IdentityTransform, SchemaTransform};
pub use types::{ChangeEvent, MigrationStatus, Operation};
