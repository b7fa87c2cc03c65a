//! Integration tests for version annotations:
//! - Top-level annotations and one level of replies
//! - Replies to replies and cross-version parents are rejected
//! - Resolving keeps the first resolver and hides the annotation by default

mod common;

use assert_matches::assert_matches;
use serde_json::json;
use verso_core::annotation::annotation_types;
use verso_core::audit::action_types;
use verso_core::error::CoreError;
use verso_core::transaction::AccessContext;
use verso_db::annotations::AnnotationService;
use verso_db::error::EngineError;
use verso_db::models::CreateVersionAnnotation;

use common::{editor, Harness};

fn service(h: &Harness) -> AnnotationService {
    AnnotationService::new(h.engine.clone(), h.audit.clone())
}

fn comment(version_id: i64, parent: Option<i64>, body: &str) -> CreateVersionAnnotation {
    CreateVersionAnnotation {
        version_id,
        parent_annotation_id: parent,
        annotation_type: annotation_types::COMMENT.into(),
        content_path: Some("body".into()),
        body: body.into(),
    }
}

// ---------------------------------------------------------------------------
// Test: a top-level annotation and a reply get depths 0 and 1
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_annotation_and_reply() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"body": "x"})).await;
    let annotations = service(&h);

    let root = annotations
        .add(comment(v1.id, None, "Tighten this"), &editor())
        .await
        .unwrap();
    let reply = annotations
        .add(comment(v1.id, Some(root.id), "Done"), &editor())
        .await
        .unwrap();

    assert_eq!(root.thread_depth, 0);
    assert_eq!(root.created_by, Some(7));
    assert_eq!(reply.thread_depth, 1);
    assert_eq!(reply.parent_annotation_id, Some(root.id));
    assert_eq!(
        h.audit.actions()[1..],
        [action_types::ANNOTATE, action_types::ANNOTATE]
    );
}

// ---------------------------------------------------------------------------
// Test: threads are one level deep and stay on one version
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reply_rules() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({"body": "x"})).await;
    let v2 = h.create("p1", json!({"body": "y"})).await;
    let annotations = service(&h);
    let root = annotations
        .add(comment(v1.id, None, "root"), &editor())
        .await
        .unwrap();
    let reply = annotations
        .add(comment(v1.id, Some(root.id), "reply"), &editor())
        .await
        .unwrap();

    let nested = annotations
        .add(comment(v1.id, Some(reply.id), "too deep"), &editor())
        .await;
    assert_matches!(nested, Err(EngineError::Core(CoreError::Validation(_))));

    let cross_version = annotations
        .add(comment(v2.id, Some(root.id), "wrong version"), &editor())
        .await;
    assert_matches!(cross_version, Err(EngineError::Core(CoreError::Validation(_))));

    let missing_parent = annotations
        .add(comment(v1.id, Some(999), "orphan"), &editor())
        .await;
    assert_matches!(missing_parent, Err(EngineError::Core(CoreError::NotFound { .. })));

    let missing_version = annotations.add(comment(999, None, "nowhere"), &editor()).await;
    assert_matches!(missing_version, Err(EngineError::Core(CoreError::NotFound { .. })));

    let listed = annotations.list(v1.id, true, &editor()).await.unwrap();
    assert_eq!(listed.len(), 2);
}

// ---------------------------------------------------------------------------
// Test: input validation happens before the transaction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_rejects_invalid_input() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({})).await;
    let annotations = service(&h);

    let mut bad_type = comment(v1.id, None, "hi");
    bad_type.annotation_type = "emoji".into();
    assert_matches!(
        annotations.add(bad_type, &editor()).await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    assert_matches!(
        annotations.add(comment(v1.id, None, "  "), &editor()).await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    let mut blank_path = comment(v1.id, None, "hi");
    blank_path.content_path = Some(" ".into());
    assert_matches!(
        annotations.add(blank_path, &editor()).await,
        Err(EngineError::Core(CoreError::Validation(_)))
    );

    assert!(annotations.list(v1.id, true, &editor()).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: resolving is idempotent and resolved annotations are hidden by default
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resolve_annotation() {
    let h = Harness::new();
    let v1 = h.create("p1", json!({})).await;
    let annotations = service(&h);
    let first = annotations
        .add(comment(v1.id, None, "first"), &editor())
        .await
        .unwrap();
    let second = annotations
        .add(comment(v1.id, None, "second"), &editor())
        .await
        .unwrap();

    let resolved = annotations.resolve(first.id, &editor()).await.unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by, Some(7));
    let resolved_at = resolved.resolved_at.unwrap();

    let again = annotations
        .resolve(first.id, &AccessContext::user(99))
        .await
        .unwrap();
    assert_eq!(again.resolved_by, Some(7), "first resolver is kept");
    assert_eq!(again.resolved_at, Some(resolved_at));

    let open = annotations.list(v1.id, false, &editor()).await.unwrap();
    assert_eq!(open.iter().map(|a| a.id).collect::<Vec<_>>(), vec![second.id]);
    let all = annotations.list(v1.id, true, &editor()).await.unwrap();
    assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), vec![first.id, second.id]);

    let missing = annotations.resolve(999, &editor()).await;
    assert_matches!(missing, Err(EngineError::Core(CoreError::NotFound { .. })));
}
