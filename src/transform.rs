//! Schema migration of document payloads.
//!
//! The legacy and target indexes may serialize records differently. Both
//! the dispatcher (live upserts) and the backfill engine (bulk copies) run
//! every target-bound payload through the same user-supplied transform, so
//! a record reaches the target in identical shape on either path.

use crate::error::SyncError;
use index_store::Document;

/// Maps a legacy-schema payload to its target-schema serialization.
pub trait SchemaTransform: Send + Sync {
    fn transform(&self, record_id: &str, payload: &Document) -> Result<Document, SyncError>;
}

/// Passes payloads through unchanged, for migrations where only the index
/// configuration changes.
pub struct IdentityTransform;

impl SchemaTransform for IdentityTransform {
    fn transform(&self, _record_id: &str, payload: &Document) -> Result<Document, SyncError> {
        Ok(payload.clone())
    }
}

impl<F> SchemaTransform for F
where
    F: Fn(&str, &Document) -> Result<Document, SyncError> + Send + Sync,
{
    fn transform(&self, record_id: &str, payload: &Document) -> Result<Document, SyncError> {
        self(record_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_passes_through() {
        let payload = json!({"title": "widget"});
        let out = IdentityTransform.transform("a", &payload).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn closures_are_transforms() {
        let rename = |_: &str, payload: &Document| -> Result<Document, SyncError> {
            let mut doc = payload.clone();
            if let Some(title) = doc.get("title").cloned() {
                doc["name"] = title;
                doc.as_object_mut().unwrap().remove("title");
            }
            Ok(doc)
        };
        let out = rename.transform("a", &json!({"title": "widget"})).unwrap();
        assert_eq!(out, json!({"name": "widget"}));
    }
}
