//! Integration tests for transactional bulk operations:
//! - Error threshold and max_errors aborts under each rollback strategy
//! - Item skipping, batch discard and savepoint rollback directives
//! - Declarative unique and foreign-key checks
//! - Store-level constraint failures roll back only the failing batch
//! - Progress reporting and settings validation

mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use serde_json::{json, Value};
use verso_core::audit::action_types;
use verso_core::bulk::{
    BulkErrorKind, BulkOperationKind, BulkProgress, BulkSettings, ErrorAction, ErrorSeverity,
    IntegrityCheck, RollbackStrategy, ViolationPolicy,
};
use verso_core::error::CoreError;
use verso_db::bulk::{BulkConfig, BulkOperationsManager};
use verso_db::error::EngineError;

use common::{editor, Harness};

fn manager(h: &Harness) -> BulkOperationsManager {
    BulkOperationsManager::new(h.engine.clone(), h.audit.clone())
}

fn settings(table: &str, batch_size: usize, strategy: RollbackStrategy) -> BulkSettings {
    BulkSettings {
        batch_size,
        rollback_strategy: strategy,
        ..BulkSettings::new(table, BulkOperationKind::Insert)
    }
}

fn numbered(count: usize) -> Vec<Value> {
    (0..count).map(|n| json!({ "n": n })).collect()
}

/// Fails every item whose `n` is in `range`.
fn reject_range(range: std::ops::Range<u64>) -> impl Fn(&Value) -> Result<(), String> + Send + Sync {
    move |item| match item["n"].as_u64() {
        Some(n) if range.contains(&n) => Err(format!("item {n} is invalid")),
        _ => Ok(()),
    }
}

fn kinds(errors: &[verso_core::bulk::BulkItemError]) -> Vec<BulkErrorKind> {
    errors.iter().map(|e| e.kind).collect()
}

// ---------------------------------------------------------------------------
// Test: crossing the error threshold under FULL undoes every write
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_threshold_abort_full_rollback() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let mut bulk = settings("items", 10, RollbackStrategy::Full);
    bulk.error_threshold = Some(10.0);
    let config = BulkConfig::new(bulk, numbered(100))
        .with_validator(|item| match item["n"].as_u64() {
            Some(n) if n % 5 == 0 => Err(format!("item {n} is invalid")),
            _ => Ok(()),
        });

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.aborted);
    assert!(!result.success);
    assert!(result.rollback_performed);
    assert!(result.processed < 100, "the run halts early");
    assert_eq!(result.processed, 10);
    assert_eq!(result.failed, 2);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.rolled_back, 8);
    assert_eq!(
        kinds(&result.errors),
        vec![
            BulkErrorKind::Validation,
            BulkErrorKind::Validation,
            BulkErrorKind::Threshold
        ]
    );
    assert_eq!(result.errors[2].action, Some(ErrorAction::AbortOperation));
    assert!(result.abort_reason.unwrap().contains("threshold"));
    assert!(h.store.table_rows("items").await.is_empty());
    assert_eq!(
        h.audit.actions().last().map(String::as_str),
        Some(action_types::BULK_OPERATION)
    );
}

// ---------------------------------------------------------------------------
// Test: under BATCH_LEVEL earlier batches stay committed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_threshold_abort_batch_level_keeps_committed() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let mut bulk = settings("items", 10, RollbackStrategy::BatchLevel);
    bulk.error_threshold = Some(10.0);
    let config = BulkConfig::new(bulk, numbered(100)).with_validator(reject_range(25..40));

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.aborted);
    assert!(result.rollback_performed);
    assert_eq!(result.processed, 30);
    assert_eq!(result.failed, 5);
    assert_eq!(result.succeeded, 20);
    assert_eq!(result.rolled_back, 5);
    assert_eq!(result.metrics.batches_processed, 3);
    assert_eq!(h.store.table_rows("items").await.len(), 20);
}

// ---------------------------------------------------------------------------
// Test: under NONE an abort keeps everything written so far
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_threshold_abort_none_keeps_partial_batch() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let mut bulk = settings("items", 10, RollbackStrategy::None);
    bulk.error_threshold = Some(10.0);
    let config = BulkConfig::new(bulk, numbered(100)).with_validator(reject_range(25..40));

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.aborted);
    assert!(!result.rollback_performed);
    assert_eq!(result.succeeded, 25);
    assert_eq!(result.rolled_back, 0);
    assert_eq!(h.store.table_rows("items").await.len(), 25);
}

// ---------------------------------------------------------------------------
// Test: max_errors aborts once the failure count passes it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_max_errors_abort() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let mut bulk = settings("items", 5, RollbackStrategy::BatchLevel);
    bulk.max_errors = Some(2);
    let config = BulkConfig::new(bulk, numbered(20)).with_validator(reject_range(6..9));

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.aborted);
    assert_eq!(result.failed, 3);
    assert_eq!(result.processed, 10);
    assert_eq!(result.succeeded, 5);
    assert_eq!(h.store.table_rows("items").await.len(), 5);
}

// ---------------------------------------------------------------------------
// Test: with continue_on_error failing items are skipped and the run succeeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_items_skipped() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let config = BulkConfig::new(settings("items", 4, RollbackStrategy::BatchLevel), numbered(10))
        .with_validator(reject_range(3..6))
        .with_transform(|mut item| {
            item["label"] = json!(format!("item-{}", item["n"]));
            Ok(item)
        });

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.success);
    assert!(!result.aborted);
    assert_eq!(result.processed, 10);
    assert_eq!(result.succeeded, 7);
    assert_eq!(result.failed, 3);
    assert!(result
        .errors
        .iter()
        .all(|e| e.kind == BulkErrorKind::Validation && e.action == Some(ErrorAction::SkipItem)));
    assert_eq!(result.errors[0].item_index, Some(3));

    let rows = h.store.table_rows("items").await;
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0]["label"], json!("item-0"));
}

// ---------------------------------------------------------------------------
// Test: a transform error is recorded as a transformation failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transform_error() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let config = BulkConfig::new(settings("items", 10, RollbackStrategy::BatchLevel), numbered(3))
        .with_transform(|item| {
            if item["n"] == json!(1) {
                Err("cannot map item 1".into())
            } else {
                Ok(item)
            }
        });

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert_eq!(result.succeeded, 2);
    assert_eq!(kinds(&result.errors), vec![BulkErrorKind::Transformation]);
    assert_eq!(result.errors[0].severity, ErrorSeverity::Medium);
}

// ---------------------------------------------------------------------------
// Test: ROLLBACK_BATCH discards the batch and skips its remaining items
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_error_handler_rollback_batch() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let config = BulkConfig::new(settings("items", 5, RollbackStrategy::BatchLevel), numbered(10))
        .with_validator(reject_range(7..8))
        .with_error_handler(|error, batch| {
            assert_eq!(error.item_index, Some(7));
            assert_eq!(batch.batch_index, 1);
            assert_eq!(batch.batch_count, 2);
            ErrorAction::RollbackBatch
        });

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.processed, 10);
    assert_eq!(result.succeeded, 5);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.rolled_back, 2);
    assert_eq!(h.store.table_rows("items").await.len(), 5);
}

// ---------------------------------------------------------------------------
// Test: ROLLBACK_TO_SAVEPOINT undoes everything since the latest savepoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_savepoint_level_rollback_to_savepoint() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let mut bulk = settings("items", 2, RollbackStrategy::SavepointLevel);
    bulk.savepoint_frequency = 2;
    let config = BulkConfig::new(bulk, numbered(8))
        .with_validator(reject_range(7..8))
        .with_error_handler(|_, batch| {
            assert_eq!(batch.latest_savepoint.as_deref(), Some("bulk_sp_2"));
            ErrorAction::RollbackToSavepoint
        });

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.savepoints_used, vec!["bulk_sp_0", "bulk_sp_2"]);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.failed, 1);
    assert_eq!(result.rolled_back, 3);

    let written: Vec<Value> = h
        .store
        .table_rows("items")
        .await
        .into_iter()
        .map(|row| row["n"].clone())
        .collect();
    assert_eq!(written, vec![json!(0), json!(1), json!(2), json!(3)]);
}

// ---------------------------------------------------------------------------
// Test: ABORT_OPERATION under FULL undoes earlier batches too
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_error_handler_abort_full() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let config = BulkConfig::new(settings("items", 3, RollbackStrategy::Full), numbered(9))
        .with_validator(reject_range(7..8))
        .with_error_handler(|_, _| ErrorAction::AbortOperation);

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.aborted);
    assert!(result.rollback_performed);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.rolled_back, 7);
    assert!(h.store.table_rows("items").await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: unique checks with a skip policy drop duplicates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unique_check_skips_duplicates() {
    let h = Harness::new();
    h.store.register_table("tags", &[]).await;
    let seed = BulkConfig::new(settings("tags", 10, RollbackStrategy::BatchLevel), vec![json!({"slug": "a"})]);
    manager(&h).execute_bulk(seed, &editor()).await.unwrap();

    let mut bulk = settings("tags", 10, RollbackStrategy::BatchLevel);
    bulk.integrity_checks = vec![IntegrityCheck::unique("slug", ViolationPolicy::Skip)];
    let items = vec![
        json!({"slug": "a"}),
        json!({"slug": "b"}),
        json!({"slug": "b"}),
        json!({"slug": "c"}),
    ];

    let result = manager(&h)
        .execute_bulk(BulkConfig::new(bulk, items), &editor())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.failed, 0);
    assert!(result
        .errors
        .iter()
        .all(|e| e.kind == BulkErrorKind::IntegrityViolation && e.severity == ErrorSeverity::Low));
    assert_eq!(h.store.table_rows("tags").await.len(), 3);
}

// ---------------------------------------------------------------------------
// Test: a foreign-key check with an abort policy stops the run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_foreign_key_check_aborts() {
    let h = Harness::new();
    h.store.register_table("posts", &[]).await;
    h.store.register_table("comments", &[]).await;
    let seed = BulkConfig::new(settings("posts", 10, RollbackStrategy::BatchLevel), vec![json!({"id": 1})]);
    manager(&h).execute_bulk(seed, &editor()).await.unwrap();

    let mut bulk = settings("comments", 10, RollbackStrategy::BatchLevel);
    bulk.integrity_checks = vec![IntegrityCheck::foreign_key(
        "post_id",
        "posts",
        "id",
        ViolationPolicy::Abort,
    )];
    let items = vec![json!({"post_id": 1}), json!({"post_id": 2}), json!({"post_id": 1})];

    let result = manager(&h)
        .execute_bulk(BulkConfig::new(bulk, items), &editor())
        .await
        .unwrap();

    assert!(result.aborted);
    assert!(result.rollback_performed);
    assert_eq!(result.failed, 1);
    assert_eq!(result.processed, 2);
    assert_eq!(result.rolled_back, 1);
    assert_eq!(kinds(&result.errors), vec![BulkErrorKind::IntegrityViolation]);
    assert!(result.abort_reason.unwrap().contains("post_id"));
    assert!(h.store.table_rows("comments").await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: an integrity abort under NONE accounts for the unwritten rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_foreign_key_abort_none_accounts_pending_rows() {
    let h = Harness::new();
    h.store.register_table("posts", &[]).await;
    h.store.register_table("comments", &[]).await;
    let seed = BulkConfig::new(settings("posts", 10, RollbackStrategy::None), vec![json!({"id": 1})]);
    manager(&h).execute_bulk(seed, &editor()).await.unwrap();

    let mut bulk = settings("comments", 3, RollbackStrategy::None);
    bulk.integrity_checks = vec![IntegrityCheck::foreign_key(
        "post_id",
        "posts",
        "id",
        ViolationPolicy::Abort,
    )];
    let items = vec![json!({"post_id": 1}), json!({"post_id": 1}), json!({"post_id": 2})];

    let result = manager(&h)
        .execute_bulk(BulkConfig::new(bulk, items), &editor())
        .await
        .unwrap();

    assert!(result.aborted);
    assert_eq!(result.processed, 3);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.rolled_back, 2);
    assert_eq!(
        result.processed,
        result.succeeded + result.failed + result.skipped + result.rolled_back
    );
    assert!(h.store.table_rows("comments").await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: a constraint failure in the store discards only that batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_store_constraint_failure_discards_batch() {
    let h = Harness::new();
    h.store.register_table("users", &["email"]).await;
    let items = vec![
        json!({"email": "a@x.io"}),
        json!({"email": "b@x.io"}),
        json!({"email": "c@x.io"}),
        json!({"email": "a@x.io"}),
        json!({"email": "d@x.io"}),
    ];

    let result = manager(&h)
        .execute_bulk(
            BulkConfig::new(settings("users", 2, RollbackStrategy::BatchLevel), items),
            &editor(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(kinds(&result.errors), vec![BulkErrorKind::IntegrityViolation]);
    assert_eq!(result.errors[0].batch_index, 1);
    assert_eq!(result.errors[0].action, Some(ErrorAction::RollbackBatch));

    let emails: Vec<Value> = h
        .store
        .table_rows("users")
        .await
        .into_iter()
        .map(|row| row["email"].clone())
        .collect();
    assert_eq!(emails, vec![json!("a@x.io"), json!("b@x.io"), json!("d@x.io")]);
}

// ---------------------------------------------------------------------------
// Test: updates merge into existing rows by id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bulk_update() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    manager(&h)
        .execute_bulk(
            BulkConfig::new(settings("items", 10, RollbackStrategy::BatchLevel), numbered(3)),
            &editor(),
        )
        .await
        .unwrap();

    let update = BulkSettings {
        operation: BulkOperationKind::Update,
        ..settings("items", 10, RollbackStrategy::BatchLevel)
    };
    let result = manager(&h)
        .execute_bulk(
            BulkConfig::new(update, vec![json!({"id": 2, "n": 42})]),
            &editor(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.succeeded, 1);
    let rows = h.store.table_rows("items").await;
    assert_eq!(rows[1], json!({"id": 2, "n": 42}));
}

// ---------------------------------------------------------------------------
// Test: progress is reported after every batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_progress_callback() {
    let h = Harness::new();
    h.store.register_table("items", &[]).await;
    let seen: Arc<Mutex<Vec<BulkProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let config = BulkConfig::new(settings("items", 4, RollbackStrategy::BatchLevel), numbered(10))
        .with_progress(move |progress| sink.lock().unwrap().push(progress.clone()));

    let result = manager(&h).execute_bulk(config, &editor()).await.unwrap();

    assert!(result.success);
    let seen = seen.lock().unwrap();
    let processed: Vec<usize> = seen.iter().map(|p| p.processed).collect();
    assert_eq!(processed, vec![4, 8, 10]);
    assert_eq!(seen[2].batch_count, 3);
    assert_eq!(seen[2].succeeded, 10);
    assert!((seen[2].percent_complete - 100.0).abs() < f64::EPSILON);

    // Four rows of `{"n":k}` at 7 bytes each.
    assert_eq!(result.metrics.batches_processed, 3);
    assert_eq!(result.metrics.peak_batch_payload_bytes, 28);
}

// ---------------------------------------------------------------------------
// Test: invalid settings are rejected before any transaction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let h = Harness::new();

    let zero_batch = settings("items", 0, RollbackStrategy::BatchLevel);
    assert_matches!(
        manager(&h)
            .execute_bulk(BulkConfig::new(zero_batch, numbered(1)), &editor())
            .await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    let mut bad_threshold = settings("items", 10, RollbackStrategy::BatchLevel);
    bad_threshold.error_threshold = Some(150.0);
    assert_matches!(
        manager(&h)
            .execute_bulk(BulkConfig::new(bad_threshold, numbered(1)), &editor())
            .await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    let bad_table = settings("items; drop table users", 10, RollbackStrategy::BatchLevel);
    assert_matches!(
        manager(&h)
            .execute_bulk(BulkConfig::new(bad_table, numbered(1)), &editor())
            .await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );
    assert!(h.audit.events().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a missing table fails each batch write and is reported, not returned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_table_reported() {
    let h = Harness::new();

    let result = manager(&h)
        .execute_bulk(
            BulkConfig::new(settings("missing", 1, RollbackStrategy::Full), numbered(2)),
            &editor(),
        )
        .await
        .unwrap();
    assert!(!result.aborted);
    assert_eq!(result.failed, 2);
    assert_eq!(kinds(&result.errors), vec![BulkErrorKind::Database, BulkErrorKind::Database]);
    assert_eq!(result.errors[0].severity, ErrorSeverity::High);

    let mut strict = settings("missing", 1, RollbackStrategy::Full);
    strict.continue_on_error = false;
    let result = manager(&h)
        .execute_bulk(BulkConfig::new(strict, numbered(2)), &editor())
        .await
        .unwrap();
    assert!(result.aborted);
    assert!(result.rollback_performed);
    assert_eq!(result.processed, 1);
    assert_eq!(result.errors[0].action, Some(ErrorAction::AbortOperation));
}
