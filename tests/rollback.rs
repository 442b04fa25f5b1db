//! Rollback from CutoverPending and the second migration attempt.

use std::sync::Arc;

use index_store::IndexStore;
use reindex_sync::testing::{memory_pair, test_config};
use reindex_sync::{ChangeEvent, Coordinator, IdentityTransform, MigrationPhase};
use serde_json::json;

#[tokio::test]
async fn rollback_then_second_backfill_does_not_rerelease_deletes() {
    let (legacy, target) = memory_pair();
    for id in ["a", "b"] {
        legacy.index_or_replace(id, &json!({"v": "original"})).await.unwrap();
    }

    let coordinator = Coordinator::new(
        legacy.clone(),
        target.clone(),
        Arc::new(IdentityTransform),
        test_config(),
    );
    let dispatcher = coordinator.dispatcher();

    // First attempt: backfill, fence a delete of "a", release it.
    coordinator.advance().await.unwrap();
    coordinator.advance().await.unwrap();
    coordinator.run_backfill().await.unwrap();
    dispatcher.apply(&ChangeEvent::delete("a", 1)).await.unwrap();
    coordinator.advance().await.unwrap();
    assert_eq!(coordinator.phase(), MigrationPhase::CutoverPending);
    assert_eq!(target.count().await.unwrap(), 1);

    // Target is judged unfit; roll back.
    coordinator.rollback().await.unwrap();
    assert_eq!(coordinator.phase(), MigrationPhase::DualWrite);

    // "a" is recreated after the release. The delete released in the first
    // attempt must never be replayed against this new incarnation.
    dispatcher
        .apply(&ChangeEvent::upsert("a", 2, json!({"v": "recreated"})))
        .await
        .unwrap();

    // Second attempt starts its reconciliation from zero.
    coordinator.advance().await.unwrap();
    assert_eq!(coordinator.status().await.fenced_deletes, 0);
    let result = coordinator.run_backfill().await.unwrap();
    assert_eq!(result.cursor.documents_seen, 2);
    assert_eq!(result.cursor.documents_total, 2);

    coordinator.advance().await.unwrap();
    coordinator.advance().await.unwrap();
    coordinator.advance().await.unwrap();
    assert_eq!(coordinator.phase(), MigrationPhase::Complete);

    // The recreated record survived the second release.
    let mut cursor = target.open_snapshot_cursor(10).await.unwrap();
    let batch = cursor.read_batch().await.unwrap().unwrap();
    let a = batch.docs.iter().find(|(id, _)| id == "a").unwrap();
    assert_eq!(a.1["v"], "recreated");
    assert_eq!(target.count().await.unwrap(), 2);
}
