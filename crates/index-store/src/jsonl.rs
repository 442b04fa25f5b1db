//! JSONL-file-backed index store.
//!
//! One JSON object per line, `{"id": ..., "doc": ...}`, keyed by id. The
//! whole file is loaded at open and rewritten after each mutation, which is
//! plenty for the CLI runner and end-to-end tests this store exists for.
//! Snapshot tokens are process-local: a restarted process opens a fresh
//! snapshot even over identical file contents.

use crate::snapshot::FrozenSnapshotCursor;
use crate::{Document, IndexStore, IndexTarget, InsertOutcome, SnapshotCursor, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Serialize, Deserialize)]
struct JsonlRecord {
    id: String,
    doc: Document,
}

pub struct JsonlIndex {
    target: IndexTarget,
    path: PathBuf,
    docs: RwLock<BTreeMap<String, Document>>,
    revision: AtomicU64,
    token_seed: String,
}

impl JsonlIndex {
    /// Open a JSONL-backed index. A missing file is an empty index; it is
    /// created on first write.
    pub fn open(target: IndexTarget, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut docs = BTreeMap::new();

        if path.exists() {
            let file = std::fs::File::open(&path)?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: JsonlRecord = serde_json::from_str(&line).map_err(|e| {
                    StoreError::Permanent(format!(
                        "invalid JSONL at {}:{}: {e}",
                        path.display(),
                        line_no + 1
                    ))
                })?;
                docs.insert(record.id, record.doc);
            }
        }

        tracing::info!(
            index = %target.name,
            path = %path.display(),
            documents = docs.len(),
            "opened JSONL index"
        );

        Ok(JsonlIndex {
            target,
            path,
            docs: RwLock::new(docs),
            revision: AtomicU64::new(0),
            token_seed: uuid::Uuid::new_v4().to_string(),
        })
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Permanent("JSONL index lock poisoned".to_string())
    }

    // Called with the write lock held so readers never observe a file that
    // is newer than the in-memory map.
    fn persist(&self, docs: &BTreeMap<String, Document>) -> Result<(), StoreError> {
        let mut out = String::new();
        for (id, doc) in docs {
            let record = JsonlRecord {
                id: id.clone(),
                doc: doc.clone(),
            };
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for JsonlIndex {
    fn target(&self) -> &IndexTarget {
        &self.target
    }

    async fn index_or_replace(&self, id: &str, doc: &Document) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        docs.insert(id.to_string(), doc.clone());
        self.persist(&docs)?;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_if_absent(&self, id: &str, doc: &Document) -> Result<InsertOutcome, StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        if docs.contains_key(id) {
            return Ok(InsertOutcome::Rejected);
        }
        docs.insert(id.to_string(), doc.clone());
        self.persist(&docs)?;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_if_exists(&self, id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| Self::lock_poisoned())?;
        if docs.remove(id).is_some() {
            self.persist(&docs)?;
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
        Ok(Box::new(FrozenSnapshotCursor::new(token, frozen, batch_size)))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let docs = self.docs.read().map_err(|_| Self::lock_poisoned())?;
        Ok(docs.len() as u64)
    }
}
