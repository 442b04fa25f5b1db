//! IndexStore and SnapshotCursor trait definitions.
//!
//! The coordination core is compiled against these traits only. The CLI
//! entry point picks a concrete store once, and everything downstream is
//! written against `&dyn IndexStore` / `Box<dyn SnapshotCursor>`.

use crate::{IndexTarget, StoreError};
use async_trait::async_trait;

/// Opaque document body. Stores do not interpret it beyond persistence.
pub type Document = serde_json::Value;

/// Result of an `insert_if_absent` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was created.
    Inserted,
    /// A document with this id already existed; nothing was written.
    Rejected,
}

/// One batch of documents read from a snapshot cursor.
#[derive(Debug, Clone)]
pub struct DocumentBatch {
    /// `(record_id, document)` pairs in snapshot iteration order.
    pub docs: Vec<(String, Document)>,
    /// Position immediately after this batch. Persisting it and later
    /// calling `SnapshotCursor::seek` resumes without rereading the batch.
    pub next_position: u64,
}

/// Minimal interface a search index must offer to take part in a migration.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Descriptor for the index this store is bound to.
    fn target(&self) -> &IndexTarget;

    /// Write a document with index-or-replace (last-writer-wins) semantics.
    async fn index_or_replace(&self, id: &str, doc: &Document) -> Result<(), StoreError>;

    /// Create a document only if no document with this id exists.
    ///
    /// A rejection is an outcome, not an error: it tells the caller a newer
    /// write already landed.
    async fn insert_if_absent(&self, id: &str, doc: &Document) -> Result<InsertOutcome, StoreError>;

    /// Delete a document if present. Absence is a no-op, not an error.
    async fn delete_if_exists(&self, id: &str) -> Result<(), StoreError>;

    /// Open a point-in-time snapshot cursor over the store.
    ///
    /// The cursor must not observe mutations committed after this call.
    async fn open_snapshot_cursor(
        &self,
        batch_size: usize,
    ) -> Result<Box<dyn SnapshotCursor>, StoreError>;

    /// Current document count.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// A stable iteration view over an index, fixed at open time.
#[async_trait]
pub trait SnapshotCursor: Send {
    /// Token identifying the snapshot this cursor iterates. Fixed for the
    /// cursor's lifetime; two cursors over the same store state share it.
    fn snapshot_token(&self) -> &str;

    /// Number of documents in the snapshot.
    fn total(&self) -> u64;

    /// Current position (documents already yielded).
    fn position(&self) -> u64;

    /// Reposition to a previously acknowledged position.
    ///
    /// Only positions previously returned as `next_position` (or 0) are
    /// valid; seeking past the snapshot end is a permanent error.
    async fn seek(&mut self, position: u64) -> Result<(), StoreError>;

    /// Read the next batch, or `None` once the snapshot is exhausted.
    async fn read_batch(&mut self) -> Result<Option<DocumentBatch>, StoreError>;
}
