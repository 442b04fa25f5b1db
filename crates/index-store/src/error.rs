//! Error types for index-store operations.

use thiserror::Error;

/// Errors surfaced by an index store.
///
/// The split matters to callers: transient errors (network, timeout,
/// write conflicts) are retried with backoff; permanent errors (schema
/// mismatch, auth) halt the affected operation immediately.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient error - safe to retry with backoff.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Permanent error - retrying cannot help.
    #[error("permanent store error: {0}")]
    Permanent(String),

    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry with backoff may succeed.
    ///
    /// IO errors count as transient: for the file-backed store they are
    /// indistinguishable from the network hiccups a remote engine reports.
    /// Serialization errors are permanent (the document itself is bad).
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(StoreError::Io(std::io::Error::other("disk")).is_transient());
        assert!(!StoreError::Permanent("schema mismatch".into()).is_transient());

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!StoreError::Serde(bad_json).is_transient());
    }
}
