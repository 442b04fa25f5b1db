//! Index-store abstraction for reindex-sync.
//!
//! This crate defines the `IndexStore` trait that abstracts over concrete
//! search engines. The reindexing core is compiled against this interface
//! only, so the same coordination logic works against any engine that can
//! offer the five primitives below plus a point-in-time snapshot cursor.
//!
//! # Architecture
//!
//! - `IndexStore` - the write/read primitives (`index_or_replace`,
//!   `insert_if_absent`, `delete_if_exists`, `count`) plus
//!   `open_snapshot_cursor`
//! - `SnapshotCursor` - a stable iteration view over the store, immune to
//!   mutations committed after it was opened
//! - `StoreError` - typed errors split into transient (retryable) and
//!   permanent (never retried) kinds
//!
//! ## Bundled Implementations
//!
//! - `MemoryIndex` - in-memory store for unit and integration tests
//! - `JsonlIndex` - JSONL-file-backed store used by the CLI runner

mod error;
mod jsonl;
mod memory;
mod snapshot;
mod traits;

#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use jsonl::JsonlIndex;
pub use memory::MemoryIndex;
pub use snapshot::FrozenSnapshotCursor;
pub use traits::{Document, DocumentBatch, IndexStore, InsertOutcome, SnapshotCursor};

use serde::{Deserialize, Serialize};

/// Descriptor for one bound index instance.
///
/// Two of these exist concurrently during a migration: the legacy index and
/// the target index. The descriptor is immutable once created; the index it
/// names is decommissioned only in the final migration phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTarget {
    /// Human-readable index name (e.g. "products-v1")
    pub name: String,
    /// Endpoint the index is reachable at
    pub endpoint: String,
    /// Schema version served by this index
    pub schema_version: u32,
}

impl IndexTarget {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, schema_version: u32) -> Self {
        IndexTarget {
            name: name.into(),
            endpoint: endpoint.into(),
            schema_version,
        }
    }
}

impl std::fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (schema v{})", self.name, self.schema_version)
    }
}
