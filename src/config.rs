//! Configuration for sync operations.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables shared by the dispatcher, backfill engine, and feed pump.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Documents per backfill batch.
    pub batch_size: usize,
    /// Worker lanes for change-event dispatch. Events for one record_id
    /// always hash to the same lane.
    pub worker_lanes: usize,
    /// Attempts per store operation, including the first.
    pub max_retries: u32,
    /// Base backoff delay between retries, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Per-call timeout for store operations, in milliseconds.
    pub store_timeout_ms: u64,
    /// Directory for backfill cursor checkpoints. `None` disables
    /// persistence (and with it cross-run resume).
    pub checkpoint_dir: Option<String>,
    /// Acceptable post-backfill drift between target and legacy document
    /// counts. Zero demands exact agreement, which only a quiesced feed
    /// can guarantee.
    pub reconcile_tolerance: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            batch_size: 1000,
            worker_lanes: 4,
            max_retries: 5,
            retry_base_delay_ms: 100,
            store_timeout_ms: 5000,
            checkpoint_dir: Some(".reindex-sync-checkpoints".to_string()),
            reconcile_tolerance: 0,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            call_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}
