//! Snapshot cursor over a frozen document set.
//!
//! Both bundled stores materialize the snapshot at open time, so they share
//! this cursor: a vector of `(id, doc)` pairs in key order, batched out on
//! demand. A remote engine would instead hold a server-side scroll context
//! behind the same trait.

use crate::{Document, DocumentBatch, SnapshotCursor, StoreError};
use async_trait::async_trait;

pub struct FrozenSnapshotCursor {
    token: String,
    docs: Vec<(String, Document)>,
    position: u64,
    batch_size: usize,
}

impl FrozenSnapshotCursor {
    pub fn new(token: String, docs: Vec<(String, Document)>, batch_size: usize) -> Self {
        FrozenSnapshotCursor {
            token,
            docs,
            position: 0,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl SnapshotCursor for FrozenSnapshotCursor {
    fn snapshot_token(&self) -> &str {
        &self.token
    }

    fn total(&self) -> u64 {
        self.docs.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn seek(&mut self, position: u64) -> Result<(), StoreError> {
        if position > self.docs.len() as u64 {
            return Err(StoreError::Permanent(format!(
                "seek position {position} beyond snapshot end {}",
                self.docs.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    async fn read_batch(&mut self) -> Result<Option<DocumentBatch>, StoreError> {
        let start = self.position as usize;
        if start >= self.docs.len() {
            return Ok(None);
        }
        let end = (start + self.batch_size).min(self.docs.len());
        let docs = self.docs[start..end].to_vec();
        self.position = end as u64;
        Ok(Some(DocumentBatch {
            docs,
            next_position: self.position,
        }))
    }
}
