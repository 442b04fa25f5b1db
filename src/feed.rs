//! Change feed consumption.
//!
//! The feed delivers committed primary-store mutations at least once, in
//! per-record order. The pump preserves that ordering under concurrency by
//! routing every event to a worker lane chosen by hashing its record_id:
//! single-record mutations serialize on one lane while unrelated records
//! proceed in parallel. An event is acknowledged only after its legacy
//! write succeeded; target application is best-effort relative to the ack.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dispatcher::{ApplyOutcome, DualWriteDispatcher, TargetOutcome};
use crate::error::SyncError;
use crate::types::ChangeEvent;

/// Source of change events. At-least-once delivery; per-record ordering.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Next event, or `None` when the feed is exhausted.
    async fn next(&mut self) -> Option<Result<ChangeEvent, SyncError>>;

    /// Acknowledge an event as durably applied to the legacy index.
    /// Unacknowledged events are redelivered by the feed.
    async fn ack(&mut self, sequence: u64) -> Result<(), SyncError>;
}

/// Change feed backed by a JSONL file, one [`ChangeEvent`] per line.
pub struct JsonlChangeFeed {
    lines: std::io::Lines<BufReader<std::fs::File>>,
    path: PathBuf,
    line_no: u64,
    acked: u64,
}

impl JsonlChangeFeed {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let file = std::fs::File::open(&path)
            .map_err(|e| SyncError::Feed(format!("open {}: {e}", path.display())))?;
        Ok(JsonlChangeFeed {
            lines: BufReader::new(file).lines(),
            path,
            line_no: 0,
            acked: 0,
        })
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }
}

#[async_trait]
impl ChangeFeed for JsonlChangeFeed {
    async fn next(&mut self) -> Option<Result<ChangeEvent, SyncError>> {
        loop {
            self.line_no += 1;
            match self.lines.next() {
                None => return None,
                Some(Err(e)) => {
                    return Some(Err(SyncError::Feed(format!(
                        "read {}: {e}",
                        self.path.display()
                    ))))
                }
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return Some(serde_json::from_str(&line).map_err(|e| {
                        SyncError::Feed(format!(
                            "invalid change event at {}:{}: {e}",
                            self.path.display(),
                            self.line_no
                        ))
                    }))
                }
            }
        }
    }

    // File feeds have no broker to commit offsets to; the count feeds the
    // run summary.
    async fn ack(&mut self, _sequence: u64) -> Result<(), SyncError> {
        self.acked += 1;
        Ok(())
    }
}

/// Totals from one pump run.
#[derive(Debug, Default, Clone)]
pub struct PumpStats {
    pub processed: u64,
    pub acked: u64,
    /// Events whose legacy write failed; left unacknowledged for
    /// redelivery.
    pub legacy_failures: u64,
    /// Events acknowledged despite a target-side failure.
    pub target_failures: u64,
    pub fenced: u64,
}

fn lane_for(record_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    record_id.hash(&mut hasher);
    (hasher.finish() as usize) % lanes
}

async fn handle_completion<F: ChangeFeed>(
    feed: &mut F,
    stats: &mut PumpStats,
    sequence: u64,
    result: Result<ApplyOutcome, SyncError>,
) -> Result<(), SyncError> {
    match result {
        Ok(outcome) => {
            feed.ack(sequence).await?;
            stats.acked += 1;
            match outcome.target {
                TargetOutcome::Failed(_) => stats.target_failures += 1,
                TargetOutcome::Fenced => stats.fenced += 1,
                _ => {}
            }
        }
        Err(e) => {
            stats.legacy_failures += 1;
            tracing::error!(
                sequence,
                error = %e,
                "event not acknowledged; the feed will redeliver it"
            );
        }
    }
    Ok(())
}

/// Consume `feed` to exhaustion, dispatching through `dispatcher` across
/// `lanes` hash-routed workers.
pub async fn run_pump<F: ChangeFeed>(
    mut feed: F,
    dispatcher: Arc<DualWriteDispatcher>,
    lanes: usize,
) -> Result<PumpStats, SyncError> {
    let lanes = lanes.max(1);
    let (completion_tx, mut completion_rx) =
        mpsc::unbounded_channel::<(u64, Result<ApplyOutcome, SyncError>)>();

    let mut lane_txs = Vec::with_capacity(lanes);
    let mut workers = Vec::with_capacity(lanes);
    for lane in 0..lanes {
        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(64);
        let dispatcher = dispatcher.clone();
        let completion_tx = completion_tx.clone();
        workers.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result = dispatcher.apply(&event).await;
                if completion_tx.send((event.sequence, result)).is_err() {
                    break;
                }
            }
            tracing::debug!(lane, "dispatch lane drained");
        }));
        lane_txs.push(tx);
    }
    drop(completion_tx);

    let mut stats = PumpStats::default();
    while let Some(next) = feed.next().await {
        // Acknowledge whatever the lanes have finished so acks never lag
        // far behind delivery.
        while let Ok((sequence, result)) = completion_rx.try_recv() {
            handle_completion(&mut feed, &mut stats, sequence, result).await?;
        }

        let event = next?;
        stats.processed += 1;
        let lane = lane_for(&event.record_id, lanes);
        lane_txs[lane]
            .send(event)
            .await
            .map_err(|_| SyncError::Feed("dispatch lane closed".to_string()))?;
    }

    // Feed exhausted: close the lanes and drain remaining completions.
    drop(lane_txs);
    while let Some((sequence, result)) = completion_rx.recv().await {
        handle_completion(&mut feed, &mut stats, sequence, result).await?;
    }
    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!(
        processed = stats.processed,
        acked = stats.acked,
        legacy_failures = stats.legacy_failures,
        target_failures = stats.target_failures,
        "change feed drained"
    );
    Ok(stats)
}
