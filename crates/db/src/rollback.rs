//! Rollback coordinator.
//!
//! A rollback never touches the target row. It writes a `version_rollbacks`
//! record holding the pre-rollback content, then creates a new draft version
//! whose content equals the target's, both in one transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use verso_core::audit::{action_types, resource_types, AuditEvent, AuditSink};
use verso_core::diff::{diff, VersionDiff};
use verso_core::error::CoreError;
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};
use verso_core::types::DbId;
use verso_core::versioning::{
    rollback_change_description, rollback_title, validate_change_description,
    validate_content_id, validate_content_type,
};

use crate::engine::{TransactionEngine, TxContext};
use crate::error::EngineError;
use crate::models::{ContentVersion, CreateContentVersion, NewVersionRollback, VersionRollback};
use crate::version_store::VersionStore;

/// Caller input for [`RollbackCoordinator::rollback`].
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    pub content_type: String,
    pub content_id: String,
    pub target_version_id: DbId,
    pub reason: Option<String>,
    /// Must be `true`; the caller shows the impact to a human first.
    #[serde(default)]
    pub confirmed: bool,
}

/// What a rollback would change, for presenting before confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackImpact {
    pub current: ContentVersion,
    pub target: ContentVersion,
    /// Changes from the current content to the target content.
    pub diff: VersionDiff,
}

#[derive(Clone)]
pub struct RollbackCoordinator {
    engine: TransactionEngine,
    audit: Arc<dyn AuditSink>,
}

impl RollbackCoordinator {
    pub fn new(engine: TransactionEngine, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    /// Restore the target version's content as a new current draft.
    pub async fn rollback(
        &self,
        request: RollbackRequest,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        validate_content_type(&request.content_type)?;
        validate_content_id(&request.content_id)?;
        validate_change_description(request.reason.as_deref())?;
        if !request.confirmed {
            return Err(CoreError::ConfirmationRequired(format!(
                "rolling back {}/{} to version id {} replaces the current content",
                request.content_type, request.content_id, request.target_version_id
            ))
            .into());
        }

        let request = Arc::new(request);
        let work_request = Arc::clone(&request);
        let options = self.engine.default_options().with_label("rollback");
        let (version, record) = self
            .engine
            .execute(&options, access, move |ctx| {
                let request = Arc::clone(&work_request);
                Box::pin(async move { Self::rollback_in(ctx, &request).await })
            })
            .await
            .into_result()?;

        tracing::info!(
            content_type = %request.content_type,
            content_id = %request.content_id,
            from_version_id = record.from_version_id,
            to_version_id = record.to_version_id,
            new_version = version.version_number,
            "Rollback completed"
        );
        self.audit.record(
            AuditEvent::new(action_types::ROLLBACK, resource_types::CONTENT_VERSION, version.id)
                .with_user(access.user_id)
                .with_details(json!({
                    "content_type": version.content_type,
                    "content_id": version.content_id,
                    "rollback_id": record.id,
                    "from_version_id": record.from_version_id,
                    "to_version_id": record.to_version_id,
                    "version_number": version.version_number,
                    "reason": record.reason,
                })),
        );
        Ok(version)
    }

    async fn rollback_in(
        ctx: &mut TxContext,
        request: &RollbackRequest,
    ) -> Result<(ContentVersion, VersionRollback), EngineError> {
        let (current, target) = load_pair(ctx, request).await?;

        let executed_by = ctx.user_id();
        let record = ctx
            .tx()
            .insert_rollback(&NewVersionRollback {
                content_type: request.content_type.clone(),
                content_id: request.content_id.clone(),
                from_version_id: current.id,
                to_version_id: target.id,
                reason: request.reason.clone(),
                rollback_data: current.content.clone(),
                executed_by,
            })
            .await?;
        ctx.record_operation(
            OperationDescriptor::new(OperationKind::Insert, "version_rollbacks", 1)
                .with_data(json!({ "id": record.id })),
        );

        let restored = CreateContentVersion {
            change_description: Some(rollback_change_description(
                request.reason.as_deref(),
                target.version_number,
            )),
            branch_name: Some(target.branch_name.clone()),
            is_published: Some(false),
            ..CreateContentVersion::new(
                request.content_type.clone(),
                request.content_id.clone(),
                rollback_title(&target.title),
                target.content.clone(),
            )
        };
        let version = VersionStore::create_version_in(ctx, &restored).await?;
        Ok((version, record))
    }

    /// Describe a rollback without performing it.
    pub async fn preview_rollback(
        &self,
        content_type: &str,
        content_id: &str,
        target_version_id: DbId,
        access: &AccessContext,
    ) -> Result<RollbackImpact, EngineError> {
        let request = Arc::new(RollbackRequest {
            content_type: content_type.to_string(),
            content_id: content_id.to_string(),
            target_version_id,
            reason: None,
            confirmed: false,
        });
        let (current, target) = self
            .engine
            .run(access, move |ctx| {
                let request = Arc::clone(&request);
                Box::pin(async move { load_pair(ctx, &request).await })
            })
            .await?;

        let diff = diff(&current.content, &target.content);
        Ok(RollbackImpact {
            current,
            target,
            diff,
        })
    }

    /// Rollback records for a content item, newest first.
    pub async fn list_rollbacks(
        &self,
        content_type: &str,
        content_id: &str,
        access: &AccessContext,
    ) -> Result<Vec<VersionRollback>, EngineError> {
        let (ct, cid) = (content_type.to_string(), content_id.to_string());
        self.engine
            .run(access, move |ctx| {
                let (ct, cid) = (ct.clone(), cid.clone());
                Box::pin(async move { Ok(ctx.tx().list_rollbacks(&ct, &cid).await?) })
            })
            .await
    }
}

/// Current version and rollback target. The target must belong to the same
/// content item.
async fn load_pair(
    ctx: &mut TxContext,
    request: &RollbackRequest,
) -> Result<(ContentVersion, ContentVersion), EngineError> {
    let current = ctx
        .tx()
        .find_current_version(&request.content_type, &request.content_id)
        .await?
        .ok_or_else(|| {
            EngineError::not_found(
                "content_version",
                format!("current version of {}/{}", request.content_type, request.content_id),
            )
        })?;
    let target = ctx
        .tx()
        .find_version(request.target_version_id)
        .await?
        .filter(|v| v.content_type == request.content_type && v.content_id == request.content_id)
        .ok_or_else(|| CoreError::not_found_id("content_version", request.target_version_id))?;
    ctx.record_operation(OperationDescriptor::new(
        OperationKind::Select,
        "content_versions",
        2,
    ));
    Ok((current, target))
}
