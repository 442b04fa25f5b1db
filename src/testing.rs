//! Shared test helpers for unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use index_store::{
    Document, IndexStore, IndexTarget, InsertOutcome, MemoryIndex, SnapshotCursor, StoreError,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::feed::ChangeFeed;
use crate::types::ChangeEvent;

/// A config with small batches, fast retries, and no checkpoint directory,
/// so tests neither sleep for real backoff delays nor litter the working
/// directory.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        batch_size: 2,
        worker_lanes: 2,
        max_retries: 2,
        retry_base_delay_ms: 1,
        store_timeout_ms: 1000,
        checkpoint_dir: None,
        reconcile_tolerance: 0,
    }
}

/// Legacy/target in-memory store pair with the usual test descriptors.
pub fn memory_pair() -> (Arc<MemoryIndex>, Arc<MemoryIndex>) {
    (
        Arc::new(MemoryIndex::new(IndexTarget::new(
            "products-v1",
            "memory://legacy",
            1,
        ))),
        Arc::new(MemoryIndex::new(IndexTarget::new(
            "products-v2",
            "memory://target",
            2,
        ))),
    )
}

/// In-memory change feed over a fixed event list, recording acks.
pub struct VecChangeFeed {
    events: std::collections::VecDeque<ChangeEvent>,
    pub acked: Vec<u64>,
}

impl VecChangeFeed {
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        VecChangeFeed {
            events: events.into(),
            acked: Vec::new(),
        }
    }
}

#[async_trait]
impl ChangeFeed for VecChangeFeed {
    async fn next(&mut self) -> Option<Result<ChangeEvent, SyncError>> {
        self.events.pop_front().map(Ok)
    }

    async fn ack(&mut self, sequence: u64) -> Result<(), SyncError> {
        self.acked.push(sequence);
        Ok(())
    }
}

/// Wraps a store and fails a configured number of write calls with a
/// transient error before letting them through. Also records how many
/// `insert_if_absent` attempts each record id received, which lets resume
/// tests prove that acknowledged batches are never reprocessed.
pub struct FlakyStore {
    inner: Arc<dyn IndexStore>,
    skip_remaining: AtomicU32,
    failures_left: AtomicU32,
    insert_attempts: Mutex<HashMap<String, u32>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn IndexStore>) -> Self {
        FlakyStore {
            inner,
            skip_remaining: AtomicU32::new(0),
            failures_left: AtomicU32::new(0),
            insert_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `n` write calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.skip_remaining.store(0, Ordering::SeqCst);
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Let the next `skip` write calls through, then fail `n` of them.
    pub fn fail_after(&self, skip: u32, n: u32) {
        self.skip_remaining.store(skip, Ordering::SeqCst);
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn insert_attempts(&self, id: &str) -> u32 {
        *self
            .insert_attempts
            .lock()
            .expect("insert_attempts lock poisoned")
            .get(id)
            .unwrap_or(&0)
    }

    fn maybe_fail(&self, operation: &str) -> Result<(), StoreError> {
        let skipping = self
            .skip_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if skipping.is_ok() {
            return Ok(());
        }
        let remaining =
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StoreError::Transient(format!("injected {operation} failure"))),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl IndexStore for FlakyStore {
    fn target(&self) -> &IndexTarget {
        self.inner.target()
    }

    async fn index_or_replace(&self, id: &str, doc: &Document) -> Result<(), StoreError> {
        self.maybe_fail("index_or_replace")?;
        self.inner.index_or_replace(id, doc).await
    }

    async fn insert_if_absent(&self, id: &str, doc: &Document) -> Result<InsertOutcome, StoreError> {
        *self
            .insert_attempts
            .lock()
            .expect("insert_attempts lock poisoned")
            .entry(id.to_string())
            .or_insert(0) += 1;
        self.maybe_fail("insert_if_absent")?;
        self.inner.insert_if_absent(id, doc).await
    }

    async fn delete_if_exists(&self, id: &str) -> Result<(), StoreError> {
        self.maybe_fail("delete_if_exists")?;
        self.inner.delete_if_exists(id).await
    }

    async fn open_snapshot_cursor(
        &self,
        batch_size: usize,
    ) -> Result<Box<dyn SnapshotCursor>, StoreError> {
        self.inner.open_snapshot_cursor(batch_size).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }
}
