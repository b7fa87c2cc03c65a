//! Integration tests for the comparison cache:
//! - A miss computes, persists and memoises the diff
//! - The pair is ordered
//! - A fresh cache reads the persisted entry
//! - Purge clears both layers

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use verso_core::diff::ChangeType;
use verso_core::error::CoreError;
use verso_db::comparison_cache::ComparisonCache;
use verso_db::error::EngineError;

use common::{editor, Harness};

// ---------------------------------------------------------------------------
// Test: a miss computes and stores, a second call is served in process
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_compare_caches_result() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"title": "A"})).await;
    let v2 = h.create("p1", json!({"title": "A", "body": "new"})).await;
    let cache = ComparisonCache::new(h.engine.clone());

    let first = cache.compare(v1.id, v2.id, &editor()).await.unwrap();
    assert_eq!(first.summary.additions, 1);
    assert_eq!(first.changes[0].change_type, ChangeType::Added);
    assert_eq!(first.metadata.from_version, Some(1));
    assert_eq!(first.metadata.to_version, Some(2));
    assert_eq!(first.metadata.compared_by, Some(7));
    assert_eq!(cache.cached_entries().await, 1);
    assert_eq!(h.store.comparison_count().await, 1);

    let second = cache.compare(v1.id, v2.id, &editor()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(h.store.comparison_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: (a, b) and (b, a) are separate entries with mirrored changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_compare_pair_is_ordered() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"title": "A"})).await;
    let v2 = h.create("p1", json!({"title": "A", "body": "new"})).await;
    let cache = ComparisonCache::new(h.engine.clone());

    let forward = cache.compare(v1.id, v2.id, &editor()).await.unwrap();
    let backward = cache.compare(v2.id, v1.id, &editor()).await.unwrap();

    assert_eq!(forward.changes[0].change_type, ChangeType::Added);
    assert_eq!(backward.changes[0].change_type, ChangeType::Removed);
    assert_eq!(cache.cached_entries().await, 2);
    assert_eq!(h.store.comparison_count().await, 2);
}

// ---------------------------------------------------------------------------
// Test: a new process-level cache picks up the persisted comparison
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_compare_reads_persisted_entry() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"n": 1})).await;
    let v2 = h.create("p1", json!({"n": 2})).await;

    let original = ComparisonCache::new(h.engine.clone())
        .compare(v1.id, v2.id, &editor())
        .await
        .unwrap();

    let restarted = ComparisonCache::new(h.engine.clone());
    assert_eq!(restarted.cached_entries().await, 0);
    let reloaded = restarted.compare(v1.id, v2.id, &editor()).await.unwrap();

    assert_eq!(reloaded.metadata.compared_at, original.metadata.compared_at);
    assert_eq!(h.store.comparison_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: purge empties both layers and the next call recomputes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_purge_clears_everything() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"n": 1})).await;
    let v2 = h.create("p1", json!({"n": 2})).await;
    let cache = ComparisonCache::new(h.engine.clone());
    cache.compare(v1.id, v2.id, &editor()).await.unwrap();
    cache.compare(v2.id, v1.id, &editor()).await.unwrap();

    let purged = cache.purge(&editor()).await.unwrap();

    assert_eq!(purged, 2);
    assert_eq!(cache.cached_entries().await, 0);
    assert_eq!(h.store.comparison_count().await, 0);

    cache.compare(v1.id, v2.id, &editor()).await.unwrap();
    assert_eq!(h.store.comparison_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: comparing a missing version is NotFound and caches nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_compare_missing_version() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"n": 1})).await;
    let cache = ComparisonCache::new(h.engine.clone());

    let result = cache.compare(v1.id, 404, &editor()).await;

    assert_matches!(result, Err(EngineError::Core(CoreError::NotFound { .. })));
    assert_eq!(cache.cached_entries().await, 0);
    assert_eq!(h.store.comparison_count().await, 0);
}
