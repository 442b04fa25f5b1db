//! In-memory index store.
//!
//! A real `IndexStore` implementation that needs no running server, used
//! by unit and integration tests.

use crate::snapshot::FrozenSnapshotCursor;
use crate::{Document, IndexStore, IndexTarget, InsertOutcome, SnapshotCursor, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub struct MemoryIndex {
    target: IndexTarget,
    docs: RwLock<BTreeMap<String, Document>>,
    // Bumped on every successful mutation. Combined with the per-instance
    // seed it yields a snapshot token that is stable across cursor opens
    // exactly while the store content is unchanged.
    revision: AtomicU64,
    token_seed: String,
}

impl MemoryIndex {
    pub fn new(target: IndexTarget) -> Self {
        MemoryIndex {
            target,
            docs: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            token_seed: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Permanent("memory index lock poisoned".to_string())
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    fn target(&self) -> &IndexTarget {
        &self.target
    }

    async fn index_or_replace(&self, id: &str, doc: &Document) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        docs.insert(id.to_string(), doc.clone());
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_if_absent(&self, id: &str, doc: &Document) -> Result<InsertOutcome, StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        if docs.contains_key(id) {
            return Ok(InsertOutcome::Rejected);
        }
        docs.insert(id.to_string(), doc.clone());
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_if_exists(&self, id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        if docs.remove(id).is_some() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn open_snapshot_cursor(
        &self,
        batch_size: usize,
    ) -> Result<Box<dyn SnapshotCursor>, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::lock_poisoned())?;
        let frozen: Vec<(String, Document)> =
            docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let token = format!("{}:{}", self.token_seed, self.revision.load(Ordering::SeqCst));
        tracing::debug!(
            index = %self.target.name,
            snapshot = %token,
            documents = frozen.len(),
            "opened snapshot cursor"
        );
        Ok(Box::new(FrozenSnapshotCursor::new(token, frozen, batch_size)))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(docs.len() as u64)
    }
}
