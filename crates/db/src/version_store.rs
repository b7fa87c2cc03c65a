//! Version store: creation, lookup and history of content versions.
//!
//! Version numbers are `max + 1` per `(content_type, content_id)`, assigned
//! under a per-content lock inside the creating transaction. The unique
//! constraint on the number is the backstop: a writer that still loses the
//! race gets a conflict, which `create_version` retries once.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use verso_core::audit::{action_types, resource_types, AuditEvent, AuditSink};
use verso_core::diff::{diff, DiffMetadata, DIFF_ALGORITHM};
use verso_core::error::CoreError;
use verso_core::retention::expiry_for;
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};
use verso_core::types::{DbId, Timestamp};
use verso_core::versioning::{
    clamp_page, clamp_page_size, resolve_branch, validate_branch_name,
    validate_change_description, validate_content, validate_content_id, validate_content_type,
    validate_title,
};

use crate::engine::{TransactionEngine, TxContext, UnitOfWork};
use crate::error::{conflict_from_unique, EngineError};
use crate::models::{
    ContentVersion, CreateContentVersion, NewContentVersion, Page, VersionHistoryQuery,
};

const TABLE: &str = "content_versions";
const ENTITY: &str = "content_version";

#[derive(Clone)]
pub struct VersionStore {
    engine: TransactionEngine,
    audit: Arc<dyn AuditSink>,
}

impl VersionStore {
    pub fn new(engine: TransactionEngine, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Create a new current version of a content item.
    pub async fn create_version(
        &self,
        input: CreateContentVersion,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        validate_create(&input)?;
        let input = Arc::new(input);
        let options = self.engine.default_options().with_label("create_version");
        let mut conflict_retried = false;

        loop {
            let attempt_input = Arc::clone(&input);
            let result = self
                .engine
                .execute(&options, access, move |ctx| {
                    let input = Arc::clone(&attempt_input);
                    Box::pin(async move { Self::create_version_in(ctx, &input).await })
                })
                .await
                .into_result();

            match result {
                Ok(version) => {
                    self.audit.record(
                        AuditEvent::new(action_types::CREATE, resource_types::CONTENT_VERSION, version.id)
                            .with_user(access.user_id)
                            .with_details(json!({
                                "content_type": version.content_type,
                                "content_id": version.content_id,
                                "version_number": version.version_number,
                                "change_description": version.change_description,
                            })),
                    );
                    return Ok(version);
                }
                Err(err) if err.is_conflict() && !conflict_retried => {
                    conflict_retried = true;
                    tracing::warn!(
                        content_type = %input.content_type,
                        content_id = %input.content_id,
                        error = %err,
                        "Version number race lost, retrying once"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Create a version inside an existing transaction.
    ///
    /// Clears the current flag on the content item's versions and inserts the
    /// new one as current. Emits no audit event; the caller owns the
    /// transaction and decides what to report after commit.
    pub async fn create_version_in(
        ctx: &mut TxContext,
        input: &CreateContentVersion,
    ) -> Result<ContentVersion, EngineError> {
        validate_create(input)?;
        let content_type = input.content_type.as_str();
        let content_id = input.content_id.as_str();
        let now = Utc::now();

        ctx.tx().lock_content(content_type, content_id).await?;
        let max = ctx.tx().max_version_number(content_type, content_id).await?;
        let version_number = max.unwrap_or(0) + 1;

        let previous = match max {
            None => None,
            Some(max) => match ctx.tx().find_current_version(content_type, content_id).await? {
                Some(current) => Some(current),
                None => {
                    ctx.tx()
                        .find_version_by_number(content_type, content_id, max)
                        .await?
                }
            },
        };
        ctx.record_operation(OperationDescriptor::new(
            OperationKind::Select,
            TABLE,
            u64::from(previous.is_some()),
        ));

        let diff_from_previous = previous.as_ref().map(|prev| {
            diff(&prev.content, &input.content).with_metadata(DiffMetadata {
                algorithm: DIFF_ALGORITHM.to_string(),
                from_version: Some(prev.version_number),
                to_version: Some(version_number),
                content_type: Some(input.content_type.clone()),
                content_id: Some(input.content_id.clone()),
                compared_at: Some(now),
                compared_by: ctx.user_id(),
            })
        });

        let retention_days = ctx
            .tx()
            .find_retention_policy(content_type)
            .await?
            .and_then(|policy| policy.retention_days);

        let cleared = ctx.tx().clear_current_flag(content_type, content_id).await?;
        ctx.record_operation(OperationDescriptor::new(OperationKind::Update, TABLE, cleared));

        let row = NewContentVersion {
            content_type: input.content_type.clone(),
            content_id: input.content_id.clone(),
            version_number,
            title: input.title.clone(),
            content: input.content.clone(),
            change_description: input.change_description.clone(),
            diff_from_previous,
            is_published: input.is_published.unwrap_or(false),
            is_protected: input.is_protected.unwrap_or(false),
            branch_name: resolve_branch(input.branch_name.as_deref()).to_string(),
            parent_version_id: previous.as_ref().map(|p| p.id),
            merged_from_version_id: input.merged_from_version_id,
            created_by: ctx.user_id(),
            created_at: now,
            retention_expires_at: expiry_for(now, retention_days),
        };
        let version = ctx
            .tx()
            .insert_version(&row)
            .await
            .map_err(|e| conflict_from_unique(e.into()))?;
        ctx.record_operation(
            OperationDescriptor::new(OperationKind::Insert, TABLE, 1)
                .with_data(json!({ "id": version.id, "version_number": version.version_number })),
        );

        tracing::debug!(
            content_type,
            content_id,
            version_number,
            version_id = version.id,
            "Version created"
        );
        Ok(version)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The current version of a content item.
    pub async fn get_current_version(
        &self,
        content_type: &str,
        content_id: &str,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let (ct, cid) = (content_type.to_string(), content_id.to_string());
        let found = self
            .engine
            .run(access, move |ctx| {
                let (ct, cid) = (ct.clone(), cid.clone());
                Box::pin(async move { Ok(ctx.tx().find_current_version(&ct, &cid).await?) })
            })
            .await?;
        found.ok_or_else(|| {
            EngineError::not_found(ENTITY, format!("current version of {content_type}/{content_id}"))
        })
    }

    /// Direct lookup. Protected versions are always returned.
    pub async fn get_by_id(
        &self,
        version_id: DbId,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let found = self
            .engine
            .run(access, move |ctx| {
                Box::pin(async move { Ok(ctx.tx().find_version(version_id).await?) })
            })
            .await?;
        found.ok_or_else(|| CoreError::not_found_id(ENTITY, version_id).into())
    }

    pub async fn get_by_number(
        &self,
        content_type: &str,
        content_id: &str,
        version_number: i32,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let (ct, cid) = (content_type.to_string(), content_id.to_string());
        let found = self
            .engine
            .run(access, move |ctx| {
                let (ct, cid) = (ct.clone(), cid.clone());
                Box::pin(async move {
                    Ok(ctx
                        .tx()
                        .find_version_by_number(&ct, &cid, version_number)
                        .await?)
                })
            })
            .await?;
        found.ok_or_else(|| {
            EngineError::not_found(
                ENTITY,
                format!("{content_type}/{content_id} version {version_number}"),
            )
        })
    }

    /// Filtered, paginated history, newest first.
    pub async fn get_version_history(
        &self,
        content_type: &str,
        content_id: &str,
        query: VersionHistoryQuery,
        access: &AccessContext,
    ) -> Result<Page<ContentVersion>, EngineError> {
        validate_content_type(content_type)?;
        validate_content_id(content_id)?;
        let per_page = clamp_page_size(query.per_page);
        let page = clamp_page(query.page);
        let offset = Page::<ContentVersion>::offset(page, per_page);

        let (ct, cid) = (content_type.to_string(), content_id.to_string());
        let query = Arc::new(query);
        let (items, total) = self
            .engine
            .run(access, move |ctx| {
                let (ct, cid, query) = (ct.clone(), cid.clone(), Arc::clone(&query));
                Box::pin(async move {
                    Ok(ctx
                        .tx()
                        .list_versions(&ct, &cid, &query, per_page, offset)
                        .await?)
                })
            })
            .await?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    // ── Post-creation mutations ──────────────────────────────────────

    /// Publish a version. `published_at` is set the first time only.
    pub async fn publish_version(
        &self,
        version_id: DbId,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let version = self
            .update_one(version_id, access, "publish_version", move |ctx| {
                Box::pin(async move {
                    let updated = ctx.tx().mark_published(version_id, Utc::now()).await?;
                    record_update(ctx, updated.as_ref());
                    Ok(updated)
                })
            })
            .await?;
        self.audit_mutation(
            action_types::PUBLISH,
            &version,
            access,
            json!({ "published_at": version.published_at }),
        );
        Ok(version)
    }

    /// Protect a version from retention cleanup, or lift the protection.
    pub async fn set_protected(
        &self,
        version_id: DbId,
        is_protected: bool,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let version = self
            .update_one(version_id, access, "set_protected", move |ctx| {
                Box::pin(async move {
                    let updated = ctx.tx().set_protected(version_id, is_protected).await?;
                    record_update(ctx, updated.as_ref());
                    Ok(updated)
                })
            })
            .await?;
        let action = if is_protected {
            action_types::PROTECT
        } else {
            action_types::UNPROTECT
        };
        self.audit_mutation(action, &version, access, json!({}));
        Ok(version)
    }

    pub async fn set_retention_expiry(
        &self,
        version_id: DbId,
        expires_at: Option<Timestamp>,
        access: &AccessContext,
    ) -> Result<ContentVersion, EngineError> {
        let version = self
            .update_one(version_id, access, "set_retention_expiry", move |ctx| {
                Box::pin(async move {
                    let updated = ctx.tx().set_retention_expiry(version_id, expires_at).await?;
                    record_update(ctx, updated.as_ref());
                    Ok(updated)
                })
            })
            .await?;
        self.audit_mutation(
            action_types::SET_RETENTION,
            &version,
            access,
            json!({ "retention_expires_at": version.retention_expires_at }),
        );
        Ok(version)
    }

    async fn update_one<F>(
        &self,
        version_id: DbId,
        access: &AccessContext,
        label: &str,
        work: F,
    ) -> Result<ContentVersion, EngineError>
    where
        F: for<'c> FnMut(&'c mut TxContext) -> UnitOfWork<'c, Option<ContentVersion>> + Send,
    {
        let options = self.engine.default_options().with_label(label);
        let updated = self.engine.execute(&options, access, work).await.into_result()?;
        updated.ok_or_else(|| CoreError::not_found_id(ENTITY, version_id).into())
    }

    fn audit_mutation(
        &self,
        action: &str,
        version: &ContentVersion,
        access: &AccessContext,
        extra: serde_json::Value,
    ) {
        let mut details = json!({
            "content_type": version.content_type,
            "content_id": version.content_id,
            "version_number": version.version_number,
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (details.as_object_mut(), extra) {
            map.extend(extra);
        }
        self.audit.record(
            AuditEvent::new(action, resource_types::CONTENT_VERSION, version.id)
                .with_user(access.user_id)
                .with_details(details),
        );
    }
}

fn record_update(ctx: &mut TxContext, updated: Option<&ContentVersion>) {
    let mut op = OperationDescriptor::new(OperationKind::Update, TABLE, u64::from(updated.is_some()));
    if let Some(version) = updated {
        op = op.with_data(json!({ "id": version.id }));
    }
    ctx.record_operation(op);
}
/// Validate caller input for a new version.
pub fn validate_create(input: &CreateContentVersion) -> Result<(), CoreError> {
    validate_content_type(&input.content_type)?;
    validate_content_id(&input.content_id)?;
    validate_title(&input.title)?;
    validate_change_description(input.change_description.as_deref())?;
    if let Some(branch) = input.branch_name.as_deref().filter(|b| !b.trim().is_empty()) {
        validate_branch_name(branch)?;
    }
    validate_content(&input.content)
}
