//! Integration tests for the rollback coordinator:
//! - Unconfirmed rollbacks fail with ConfirmationRequired and write nothing
//! - A rollback inserts a new draft version equal to the target and never
//!   touches the target row
//! - The rollback record and the new version commit together
//! - Preview reports the impact without writing

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use verso_core::audit::action_types;
use verso_core::diff::ChangeType;
use verso_core::error::CoreError;
use verso_db::error::EngineError;
use verso_db::rollback::{RollbackCoordinator, RollbackRequest};

use common::{editor, Harness};

fn coordinator(h: &Harness) -> RollbackCoordinator {
    RollbackCoordinator::new(h.engine.clone(), h.audit.clone())
}

fn request(content_id: &str, target_version_id: i64, confirmed: bool) -> RollbackRequest {
    RollbackRequest {
        content_type: "blog_post".into(),
        content_id: content_id.into(),
        target_version_id,
        reason: Some("typo in v2".into()),
        confirmed,
    }
}

// ---------------------------------------------------------------------------
// Test: the create-then-rollback example end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rollback_example_scenario() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"title": "A", "body": "x"})).await;
    let v2 = h.create("p1", json!({"title": "A", "body": "y"})).await;
    assert_eq!(v2.version_number, 2);

    let v3 = coordinator(&h)
        .rollback(request("p1", v1.id, true), &editor())
        .await
        .unwrap();

    assert_eq!(v3.version_number, 3);
    assert!(v3.is_current);
    assert!(!v3.is_published);
    assert!(v3.is_draft);
    assert_eq!(v3.content, json!({"title": "A", "body": "x"}));
    assert_eq!(v3.title, "Post (Rollback)");
    assert_eq!(
        v3.change_description.as_deref(),
        Some("Rollback to version 1: typo in v2")
    );
    assert_eq!(v3.diff().unwrap().changes[0].change_type, ChangeType::Modified);

    let rollbacks = coordinator(&h)
        .list_rollbacks("blog_post", "p1", &editor())
        .await
        .unwrap();
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0].from_version_id, v2.id);
    assert_eq!(rollbacks[0].to_version_id, v1.id);
    assert_eq!(rollbacks[0].rollback_data, json!({"title": "A", "body": "y"}));
    assert_eq!(rollbacks[0].executed_by, Some(7));

    // The target row is untouched apart from losing the current flag earlier.
    let stored = h.store.versions("blog_post", "p1").await;
    assert_eq!(stored[0], v1.clone().with_current(false));
    assert_eq!(stored.iter().filter(|v| v.is_current).count(), 1);

    assert_eq!(h.audit.actions().last().map(String::as_str), Some(action_types::ROLLBACK));
}

trait WithCurrent {
    fn with_current(self, is_current: bool) -> Self;
}

impl WithCurrent for verso_db::models::ContentVersion {
    fn with_current(mut self, is_current: bool) -> Self {
        self.is_current = is_current;
        self
    }
}

// ---------------------------------------------------------------------------
// Test: rollback without confirmation writes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rollback_requires_confirmation() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"a": 1})).await;
    h.create("p1", json!({"a": 2})).await;

    let result = coordinator(&h)
        .rollback(request("p1", v1.id, false), &editor())
        .await;

    assert_matches!(
        result,
        Err(EngineError::Core(CoreError::ConfirmationRequired(_)))
    );
    assert_eq!(h.store.versions("blog_post", "p1").await.len(), 2);
    assert!(coordinator(&h)
        .list_rollbacks("blog_post", "p1", &editor())
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// Test: missing target or current version is NotFound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rollback_not_found() {
    let h = Harness::new();

    let no_content = coordinator(&h)
        .rollback(request("ghost", 1, true), &editor())
        .await;
    assert_matches!(no_content, Err(EngineError::Core(CoreError::NotFound { .. })));

    h.create("p1", json!({"a": 1})).await;
    let other = h.create("p2", json!({"a": 1})).await;

    let missing_target = coordinator(&h)
        .rollback(request("p1", 999, true), &editor())
        .await;
    assert_matches!(missing_target, Err(EngineError::Core(CoreError::NotFound { .. })));

    // A version of another content item is not a valid target.
    let foreign_target = coordinator(&h)
        .rollback(request("p1", other.id, true), &editor())
        .await;
    assert_matches!(foreign_target, Err(EngineError::Core(CoreError::NotFound { .. })));
    assert_eq!(h.store.versions("blog_post", "p1").await.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: a failing version insert leaves no rollback record behind
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rollback_is_atomic() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"a": 1})).await;
    h.create("p1", json!({"a": 2})).await;

    // A reason over the description limit is rejected up front.
    let mut too_long = request("p1", v1.id, true);
    too_long.reason = Some("x".repeat(5000));
    assert_matches!(
        coordinator(&h).rollback(too_long, &editor()).await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    // A target title at the limit cannot take the rollback suffix, so the
    // version insert fails after the rollback record was written.
    h.create("p3", json!({"a": 1})).await;
    let mut input = common::new_post("p3", json!({"a": 2}));
    input.title = "t".repeat(500);
    let long = h.versions().create_version(input, &editor()).await.unwrap();
    h.create("p3", json!({"a": 3})).await;

    let result = coordinator(&h)
        .rollback(request("p3", long.id, true), &editor())
        .await;
    assert_matches!(result, Err(EngineError::Core(CoreError::Validation(_))));
    assert!(coordinator(&h)
        .list_rollbacks("blog_post", "p3", &editor())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(h.store.versions("blog_post", "p3").await.len(), 3);
}

// ---------------------------------------------------------------------------
// Test: preview shows current, target and the diff between them
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_preview_rollback() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"title": "A", "body": "x"})).await;
    let v2 = h.create("p1", json!({"title": "A", "body": "y", "tags": ["new"]})).await;

    let impact = coordinator(&h)
        .preview_rollback("blog_post", "p1", v1.id, &editor())
        .await
        .unwrap();

    assert_eq!(impact.current.id, v2.id);
    assert_eq!(impact.target.id, v1.id);
    assert_eq!(impact.diff.summary.modifications, 1);
    assert_eq!(impact.diff.summary.deletions, 1);
    assert_eq!(h.store.versions("blog_post", "p1").await.len(), 2);
}
