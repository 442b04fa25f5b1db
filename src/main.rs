//! Command-line interface for reindex-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Full migration between JSONL-backed indexes, consuming a change feed
//! # concurrently with the backfill
//! reindex-sync run \
//!   --legacy-path legacy.jsonl \
//!   --target-path target.jsonl \
//!   --changes changes.jsonl \
//!   --batch-size 500 \
//!   --reconcile-tolerance 16
//!
//! # Resume after an aborted backfill (same checkpoint directory)
//! reindex-sync run --legacy-path legacy.jsonl --target-path target.jsonl
//!
//! # Show backfill progress from the checkpoint directory
//! reindex-sync status --checkpoint-dir .reindex-sync-checkpoints
//! ```
//!
//! Change feed format: one JSON event per line, e.g.
//! `{"record_id":"a","op":"upsert","payload":{...},"sequence":1}` or
//! `{"record_id":"a","op":"delete","sequence":2}`.

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use index_store::{IndexStore, IndexTarget, JsonlIndex};
use reindex_sync::{
    read_cursor_checkpoint, run_pump, Coordinator, IdentityTransform, JsonlChangeFeed,
    MigrationPhase, SyncConfig,
};

#[derive(Parser)]
#[command(name = "reindex-sync", version, about = "Zero-downtime search index reindexing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full migration: dual-write, backfill, fence release, cutover.
    Run(RunArgs),
    /// Show backfill progress from a checkpoint directory.
    Status(StatusArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSONL file backing the legacy index
    #[arg(long, env = "REINDEX_LEGACY_PATH")]
    legacy_path: String,

    /// JSONL file backing the target index
    #[arg(long, env = "REINDEX_TARGET_PATH")]
    target_path: String,

    /// JSONL change feed consumed concurrently with the backfill
    #[arg(long)]
    changes: Option<String>,

    /// Legacy index name
    #[arg(long, default_value = "legacy")]
    legacy_name: String,

    /// Target index name
    #[arg(long, default_value = "target")]
    target_name: String,

    /// Schema version served by the target index
    #[arg(long, default_value = "2")]
    target_schema_version: u32,

    /// Batch size for the backfill
    #[arg(long, default_value = "1000")]
    batch_size: usize,

    /// Worker lanes for change-event dispatch
    #[arg(long, default_value = "4")]
    lanes: usize,

    /// Directory for backfill cursor checkpoints
    #[arg(long, default_value = ".reindex-sync-checkpoints")]
    checkpoint_dir: String,

    /// Acceptable post-backfill drift between target and legacy counts
    #[arg(long, default_value = "0")]
    reconcile_tolerance: u64,

    /// Stop after the backfill completes instead of cutting over
    #[arg(long)]
    no_cutover: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Directory holding backfill cursor checkpoints
    #[arg(long, default_value = ".reindex-sync-checkpoints")]
    checkpoint_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Status(args) => status(args),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let legacy: Arc<dyn IndexStore> = Arc::new(
        JsonlIndex::open(
            IndexTarget::new(
                args.legacy_name.as_str(),
                format!("file://{}", args.legacy_path),
                1,
            ),
            &args.legacy_path,
        )
        .with_context(|| format!("failed to open legacy index at {}", args.legacy_path))?,
    );
    let target: Arc<dyn IndexStore> = Arc::new(
        JsonlIndex::open(
            IndexTarget::new(
                args.target_name.as_str(),
                format!("file://{}", args.target_path),
                args.target_schema_version,
            ),
            &args.target_path,
        )
        .with_context(|| format!("failed to open target index at {}", args.target_path))?,
    );

    let config = SyncConfig {
        batch_size: args.batch_size,
        worker_lanes: args.lanes,
        checkpoint_dir: Some(args.checkpoint_dir.clone()),
        reconcile_tolerance: args.reconcile_tolerance,
        ..SyncConfig::default()
    };

    let coordinator = Arc::new(Coordinator::new(
        legacy,
        target,
        Arc::new(IdentityTransform),
        config,
    ));

    coordinator.advance().await.context("entering dual-write")?;

    // The feed pump runs concurrently with the backfill, exactly the
    // situation the delete fence exists for.
    let pump = args.changes.as_ref().map(|path| {
        let feed = JsonlChangeFeed::open(path);
        let dispatcher = coordinator.dispatcher();
        let lanes = args.lanes;
        tokio::spawn(async move { run_pump(feed?, dispatcher, lanes).await })
    });

    coordinator.advance().await.context("entering backfilling")?;
    let result = coordinator
        .run_backfill()
        .await
        .context("backfill failed; rerun with the same checkpoint directory to resume")?;
    tracing::info!(
        seen = result.cursor.documents_seen,
        rejected = result.cursor.rejected_existing,
        inserted = result.inserted,
        "backfill finished"
    );

    // Drain the feed before releasing the fence, so this bounded demo run
    // fences every delete it will ever see. A long-running deployment
    // would keep the pump alive across the release instead.
    if let Some(pump) = pump {
        let stats = pump.await.context("feed pump panicked")??;
        println!(
            "change feed: {} events, {} acked, {} legacy failures, {} target failures, {} fenced",
            stats.processed, stats.acked, stats.legacy_failures, stats.target_failures, stats.fenced
        );
        if stats.legacy_failures > 0 {
            anyhow::bail!("{} events were not acknowledged", stats.legacy_failures);
        }
    }

    coordinator.advance().await.context("entering cutover-pending")?;

    if args.no_cutover {
        println!("stopped at {}", coordinator.phase());
    } else {
        coordinator.advance().await.context("entering cutover")?;
        coordinator.advance().await.context("completing migration")?;
    }

    let status = coordinator.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if coordinator.phase() == MigrationPhase::Complete {
        println!("migration complete; legacy index eligible for decommission");
    }
    Ok(())
}

fn status(args: StatusArgs) -> anyhow::Result<()> {
    match read_cursor_checkpoint(&args.checkpoint_dir)? {
        Some(cursor) => {
            println!("{}", serde_json::to_string_pretty(&cursor)?);
            let pct = if cursor.documents_total > 0 {
                cursor.documents_seen * 100 / cursor.documents_total
            } else {
                100
            };
            println!(
                "backfill in progress: {}/{} documents ({pct}%), {} rejected as already present",
                cursor.documents_seen, cursor.documents_total, cursor.rejected_existing
            );
        }
        None => println!(
            "no backfill cursor in {}; no backfill in progress",
            args.checkpoint_dir
        ),
    }
    Ok(())
}
