use crate::{IndexStore, IndexTarget, InsertOutcome, JsonlIndex, MemoryIndex};
use serde_json::json;

fn legacy_target() -> IndexTarget {
    IndexTarget::new("products-v1", "memory://legacy", 1)
}

#[tokio::test]
async fn index_or_replace_is_last_writer_wins() {
    let store = MemoryIndex::new(legacy_target());
    store
        .index_or_replace("a", &json!({"title": "first"}))
        .await
        .unwrap();
    store
        .index_or_replace("a", &json!({"title": "second"}))
        .await
        .unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let mut cursor = store.open_snapshot_cursor(10).await.unwrap();
    let batch = cursor.read_batch().await.unwrap().unwrap();
    assert_eq!(batch.docs[0].1["title"], "second");
}

#[tokio::test]
async fn insert_if_absent_rejects_existing() {
    let store = MemoryIndex::new(legacy_target());
    assert_eq!(
        store.insert_if_absent("a", &json!({"v": 1})).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        store.insert_if_absent("a", &json!({"v": 2})).await.unwrap(),
        InsertOutcome::Rejected
    );

    // The rejected write must not have replaced the original.
    let mut cursor = store.open_snapshot_cursor(10).await.unwrap();
    let batch = cursor.read_batch().await.unwrap().unwrap();
    assert_eq!(batch.docs[0].1["v"], 1);
}

#[tokio::test]
async fn delete_if_exists_is_noop_when_absent() {
    let store = MemoryIndex::new(legacy_target());
    store.delete_if_exists("missing").await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn snapshot_cursor_ignores_later_mutations() {
    let store = MemoryIndex::new(legacy_target());
    for id in ["a", "b", "c"] {
        store.index_or_replace(id, &json!({"id": id})).await.unwrap();
    }

    let mut cursor = store.open_snapshot_cursor(2).await.unwrap();
    assert_eq!(cursor.total(), 3);

    // Mutations after the snapshot was taken must not be observed, and the
    // snapshot-time total must not move.
    store.delete_if_exists("a").await.unwrap();
    store.index_or_replace("d", &json!({"id": "d"})).await.unwrap();
    assert_eq!(cursor.total(), 3);

    let mut seen = Vec::new();
    while let Some(batch) = cursor.read_batch().await.unwrap() {
        seen.extend(batch.docs.into_iter().map(|(id, _)| id));
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn snapshot_token_stable_until_mutation() {
    let store = MemoryIndex::new(legacy_target());
    store.index_or_replace("a", &json!({})).await.unwrap();

    let c1 = store.open_snapshot_cursor(10).await.unwrap();
    let c2 = store.open_snapshot_cursor(10).await.unwrap();
    assert_eq!(c1.snapshot_token(), c2.snapshot_token());

    store.index_or_replace("b", &json!({})).await.unwrap();
    let c3 = store.open_snapshot_cursor(10).await.unwrap();
    assert_ne!(c1.snapshot_token(), c3.snapshot_token());
}

#[tokio::test]
async fn cursor_seek_resumes_without_rereading() {
    let store = MemoryIndex::new(legacy_target());
    for i in 0..5 {
        store
            .index_or_replace(&format!("doc-{i}"), &json!({"i": i}))
            .await
            .unwrap();
    }

    let mut cursor = store.open_snapshot_cursor(2).await.unwrap();
    let first = cursor.read_batch().await.unwrap().unwrap();
    assert_eq!(first.next_position, 2);

    // A second cursor over the same snapshot, sought to the acknowledged
    // position, continues exactly where the first left off.
    let mut resumed = store.open_snapshot_cursor(2).await.unwrap();
    resumed.seek(first.next_position).await.unwrap();
    let batch = resumed.read_batch().await.unwrap().unwrap();
    assert_eq!(batch.docs[0].0, "doc-2");

    assert!(resumed.seek(99).await.is_err());
}

#[tokio::test]
async fn jsonl_index_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("products.jsonl");
    let target = IndexTarget::new("products-v2", "file://products", 2);

    {
        let store = JsonlIndex::open(target.clone(), &path).unwrap();
        store
            .index_or_replace("a", &json!({"title": "widget"}))
            .await
            .unwrap();
        assert_eq!(
            store.insert_if_absent("b", &json!({"title": "gadget"})).await.unwrap(),
            InsertOutcome::Inserted
        );
        store.delete_if_exists("a").await.unwrap();
    }

    // Reopen from disk and verify the surviving state.
    let store = JsonlIndex::open(target, &path).unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(
        store.insert_if_absent("b", &json!({})).await.unwrap(),
        InsertOutcome::Rejected
    );
}
