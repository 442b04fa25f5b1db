//! Core event and status types.

use index_store::Document;
use serde::{Deserialize, Serialize};

use crate::phase::MigrationPhase;

/// A committed mutation in the primary data store, as delivered by the
/// change feed. One event per committed mutation; ordering per record_id
/// is the feed's contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Identity of the mutated record.
    pub record_id: String,
    /// What happened to it.
    #[serde(flatten)]
    pub operation: Operation,
    /// Monotonic (per record) sequence token assigned by the feed.
    pub sequence: u64,
}

/// The mutation kind carried by a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create or update, carrying the record's legacy-schema document body.
    Upsert { payload: Document },
    /// Delete.
    Delete,
}

impl ChangeEvent {
    pub fn upsert(record_id: impl Into<String>, sequence: u64, payload: Document) -> Self {
        ChangeEvent {
            record_id: record_id.into(),
            operation: Operation::Upsert { payload },
            sequence,
        }
    }

    pub fn delete(record_id: impl Into<String>, sequence: u64) -> Self {
        ChangeEvent {
            record_id: record_id.into(),
            operation: Operation::Delete,
            sequence,
        }
    }
}

/// Point-in-time view of the migration, returned by the operator surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub phase: MigrationPhase,
    pub documents_seen: u64,
    pub documents_total: u64,
    pub rejected_existing: u64,
    pub fenced_deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_event_jsonl_format() {
        let line = r#"{"record_id":"a","op":"upsert","payload":{"title":"widget"},"sequence":3}"#;
        let event: ChangeEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.record_id, "a");
        assert_eq!(event.sequence, 3);
        assert_eq!(
            event.operation,
            Operation::Upsert {
                payload: json!({"title": "widget"})
            }
        );

        let line = r#"{"record_id":"b","op":"delete","sequence":4}"#;
        let event: ChangeEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.operation, Operation::Delete);
    }
}
