//! Backfill cursor persistence.
//!
//! The cursor is written to a JSON file after every acknowledged batch, so
//! an aborted run (crash, exhausted retries, operator abort) can resume
//! from the last acknowledged position instead of rereading the snapshot.
//! One file per checkpoint directory; each save overwrites the previous
//! state, which keeps the persisted position gap-free by construction.

use std::path::{Path, PathBuf};

use crate::backfill::BackfillCursor;
use crate::error::SyncError;

const CURSOR_FILE: &str = "backfill_cursor.json";

pub struct CursorCheckpointer {
    dir: PathBuf,
}

impl CursorCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CursorCheckpointer { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(CURSOR_FILE)
    }

    /// Persist the cursor, overwriting any previous checkpoint.
    pub fn save(&self, cursor: &BackfillCursor) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Checkpoint(format!("create {}: {e}", self.dir.display())))?;
        let json = serde_json::to_string_pretty(cursor)
            .map_err(|e| SyncError::Checkpoint(format!("serialize cursor: {e}")))?;
        std::fs::write(self.path(), json)
            .map_err(|e| SyncError::Checkpoint(format!("write {}: {e}", self.path().display())))?;
        tracing::debug!(
            position = cursor.position,
            seen = cursor.documents_seen,
            "backfill cursor checkpointed"
        );
        Ok(())
    }

    /// Load the persisted cursor, if any.
    pub fn load(&self) -> Result<Option<BackfillCursor>, SyncError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Checkpoint(format!("read {}: {e}", path.display())))?;
        let cursor = serde_json::from_str(&content)
            .map_err(|e| SyncError::Checkpoint(format!("parse {}: {e}", path.display())))?;
        Ok(Some(cursor))
    }

    /// Remove the checkpoint. Called when a backfill run completes; the
    /// cursor is destroyed with the run.
    pub fn clear(&self) -> Result<(), SyncError> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| SyncError::Checkpoint(format!("remove {}: {e}", path.display())))?;
        }
        Ok(())
    }
}

/// Read backfill progress from a checkpoint directory without constructing
/// an engine. Used by the CLI `status` command.
pub fn read_cursor_checkpoint(dir: impl AsRef<Path>) -> Result<Option<BackfillCursor>, SyncError> {
    CursorCheckpointer::new(dir.as_ref()).load()
}
