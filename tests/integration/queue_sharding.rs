use bfscope::error::QueueError;
use bfscope::queue::{key_slot, scan_hash_fields, EntryKind, ShardedQueue};
use bfscope::store::{MemoryStore, StoreBackend};
use bfscope::types::SlotRange;
use proptest::prelude::*;

fn three_shards() -> Vec<Vec<SlotRange>> {
    vec![
        vec![SlotRange::new(0, 5460)],
        vec![SlotRange::new(5461, 10922)],
        vec![SlotRange::new(10923, 16383)],
    ]
}

fn prequeue_entry(name: &str) -> String {
    format!(
        r#"{{"operationName":"{}","requestMetadata":{{"targetId":"//pkg:{}"}}}}"#,
        name, name
    )
}

#[tokio::test]
async fn length_sums_every_shard() {
    let store = MemoryStore::clustered(three_shards());
    let queue = ShardedQueue::discover(&store, "{Execution}:PreQueuedOperations")
        .await
        .unwrap();
    let keys: Vec<String> = queue.keys().map(str::to_string).collect();
    assert_eq!(keys.len(), 3);

    store.rpush(&keys[0], (0..4).map(|i| prequeue_entry(&format!("a{}", i))));
    store.rpush(&keys[1], (0..2).map(|i| prequeue_entry(&format!("b{}", i))));
    store.rpush(&keys[2], (0..7).map(|i| prequeue_entry(&format!("c{}", i))));

    assert_eq!(queue.length(&store).await.unwrap(), 13);
    for key in &keys {
        assert!(store.llen(key).await.unwrap() > 0);
    }
}

#[tokio::test]
async fn slice_walks_shards_in_order_until_full() {
    let store = MemoryStore::clustered(three_shards());
    let queue = ShardedQueue::discover(&store, "{Execution}:PreQueuedOperations")
        .await
        .unwrap();
    let keys: Vec<String> = queue.keys().map(str::to_string).collect();
    store.rpush(&keys[0], ["a0", "a1"].map(prequeue_entry));
    store.rpush(&keys[1], ["b0", "b1", "b2"].map(prequeue_entry));
    store.rpush(&keys[2], ["c0"].map(prequeue_entry));

    let entries = queue
        .slice(&store, 0, 3, |raw| EntryKind::Prequeue.decode(raw))
        .await
        .unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();

    assert_eq!(names, vec!["a0", "a1", "b0", "b1"]);
    assert_eq!(
        entries[2]
            .request_metadata
            .as_ref()
            .map(|m| m.target_id.as_str()),
        Some("//pkg:b0")
    );
}

#[tokio::test]
async fn undecodable_entry_fails_the_slice() {
    let store = MemoryStore::new();
    let queue = ShardedQueue::discover(&store, "QueuedOperations").await.unwrap();
    store.rpush("QueuedOperations", ["not json"]);

    let err = queue
        .slice(&store, 0, 9, |raw| EntryKind::Queue.decode(raw))
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::MalformedEntry { .. }));
}

#[tokio::test]
async fn unclustered_store_uses_the_plain_name() {
    let store = MemoryStore::new();
    let queue = ShardedQueue::discover(&store, "QueuedOperations").await.unwrap();

    assert_eq!(queue.keys().collect::<Vec<_>>(), vec!["QueuedOperations"]);
    assert_eq!(queue.length(&store).await.unwrap(), 0);
}

#[tokio::test]
async fn hash_scan_stops_at_limit() {
    let store = MemoryStore::new();
    for i in 0..25 {
        store.hset("DispatchedOperations", format!("shard/operations/{:02}", i), "{}");
    }

    let names = scan_hash_fields(&store, "DispatchedOperations", 12, 5).await.unwrap();
    assert_eq!(names.len(), 12);
    assert_eq!(names[0], "shard/operations/00");

    let all = scan_hash_fields(&store, "DispatchedOperations", 100, 5).await.unwrap();
    assert_eq!(all.len(), 25);
}

proptest! {
    #[test]
    fn every_shard_key_hashes_into_its_own_shard(name in "[A-Za-z:{}]{1,24}") {
        let queue = ShardedQueue::with_topology(&name, &three_shards()).unwrap();
        for shard in queue.shards() {
            let slot = key_slot(&shard.queue_key);
            prop_assert!(shard.slot_ranges.iter().any(|r| r.contains(slot)));
        }
    }
}
