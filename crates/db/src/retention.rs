//! Retention policies and cleanup runs.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use verso_core::audit::{action_types, resource_types, AuditEvent, AuditSink};
use verso_core::error::CoreError;
use verso_core::retention::{
    is_cleanup_due, select_expired, validate_cleanup_frequency, validate_rules,
};
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};
use verso_core::types::{DbId, Timestamp};
use verso_core::versioning::validate_content_type;

use crate::engine::TransactionEngine;
use crate::error::EngineError;
use crate::models::{RetentionPolicy, UpsertRetentionPolicy};

/// Outcome of one cleanup run for a content type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub content_type: String,
    pub deleted: u64,
    pub deleted_version_ids: Vec<DbId>,
    pub kept_current: usize,
    pub kept_published: usize,
    pub kept_protected: usize,
}

#[derive(Clone)]
pub struct RetentionManager {
    engine: TransactionEngine,
    audit: Arc<dyn AuditSink>,
}

impl RetentionManager {
    pub fn new(engine: TransactionEngine, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    /// Create or replace the policy for a content type.
    pub async fn set_policy(
        &self,
        input: UpsertRetentionPolicy,
        access: &AccessContext,
    ) -> Result<RetentionPolicy, EngineError> {
        validate_content_type(&input.content_type)?;
        validate_rules(&input.rules())?;
        validate_cleanup_frequency(input.cleanup_frequency_hours())?;

        let input = Arc::new(input);
        let options = self.engine.default_options().with_label("set_retention_policy");
        let policy = self
            .engine
            .execute(&options, access, move |ctx| {
                let input = Arc::clone(&input);
                Box::pin(async move {
                    let policy = ctx.tx().upsert_retention_policy(&input).await?;
                    ctx.record_operation(OperationDescriptor::new(
                        OperationKind::Insert,
                        "version_retention_policies",
                        1,
                    ));
                    Ok(policy)
                })
            })
            .await
            .into_result()?;

        self.audit.record(
            AuditEvent::new(
                action_types::SET_RETENTION,
                resource_types::RETENTION_POLICY,
                &policy.content_type,
            )
            .with_user(access.user_id)
            .with_details(json!({
                "max_versions_per_content": policy.max_versions_per_content,
                "retention_days": policy.retention_days,
                "keep_published_versions": policy.keep_published_versions,
                "keep_protected_versions": policy.keep_protected_versions,
                "cleanup_frequency_hours": policy.cleanup_frequency_hours,
            })),
        );
        Ok(policy)
    }

    pub async fn get_policy(
        &self,
        content_type: &str,
        access: &AccessContext,
    ) -> Result<Option<RetentionPolicy>, EngineError> {
        let content_type = content_type.to_string();
        self.engine
            .run(access, move |ctx| {
                let content_type = content_type.clone();
                Box::pin(async move { Ok(ctx.tx().find_retention_policy(&content_type).await?) })
            })
            .await
    }

    pub async fn list_policies(
        &self,
        access: &AccessContext,
    ) -> Result<Vec<RetentionPolicy>, EngineError> {
        self.engine
            .run(access, |ctx| {
                Box::pin(async move { Ok(ctx.tx().list_retention_policies().await?) })
            })
            .await
    }

    /// Apply the content type's policy now.
    pub async fn cleanup(
        &self,
        content_type: &str,
        access: &AccessContext,
    ) -> Result<CleanupReport, EngineError> {
        self.cleanup_at(content_type, Utc::now(), access).await
    }

    /// Apply the content type's policy as of `now`.
    ///
    /// Deleting a version cascades its comparisons and annotations.
    pub async fn cleanup_at(
        &self,
        content_type: &str,
        now: Timestamp,
        access: &AccessContext,
    ) -> Result<CleanupReport, EngineError> {
        let options = self.engine.default_options().with_label("retention_cleanup");
        let work_type = content_type.to_string();
        let report = self
            .engine
            .execute(&options, access, move |ctx| {
                let content_type = work_type.clone();
                Box::pin(async move {
                    let policy = ctx
                        .tx()
                        .find_retention_policy(&content_type)
                        .await?
                        .ok_or_else(|| CoreError::NotFound {
                            entity: "retention_policy",
                            key: content_type.clone(),
                        })?;

                    let candidates = ctx.tx().list_retention_candidates(&content_type).await?;
                    let selection = select_expired(&candidates, &policy.rules(), now);
                    let deleted = if selection.expired.is_empty() {
                        0
                    } else {
                        ctx.tx().delete_versions(&selection.expired).await?
                    };
                    ctx.record_operation(OperationDescriptor::new(
                        OperationKind::Delete,
                        "content_versions",
                        deleted,
                    ));
                    ctx.tx().mark_cleanup(&content_type, now).await?;

                    Ok(CleanupReport {
                        content_type,
                        deleted,
                        deleted_version_ids: selection.expired,
                        kept_current: selection.kept_current,
                        kept_published: selection.kept_published,
                        kept_protected: selection.kept_protected,
                    })
                })
            })
            .await
            .into_result()?;

        tracing::info!(
            content_type = %report.content_type,
            deleted = report.deleted,
            kept_current = report.kept_current,
            kept_published = report.kept_published,
            kept_protected = report.kept_protected,
            "Retention cleanup finished"
        );
        self.audit.record(
            AuditEvent::new(
                action_types::RETENTION_CLEANUP,
                resource_types::RETENTION_POLICY,
                &report.content_type,
            )
            .with_user(access.user_id)
            .with_details(json!({
                "deleted": report.deleted,
                "deleted_version_ids": report.deleted_version_ids,
            })),
        );
        Ok(report)
    }

    /// Run every policy whose cadence has elapsed.
    ///
    /// A failing policy is logged and skipped so one bad content type does
    /// not starve the others.
    pub async fn run_due_cleanups(
        &self,
        now: Timestamp,
        access: &AccessContext,
    ) -> Result<Vec<CleanupReport>, EngineError> {
        let policies = self.list_policies(access).await?;
        let mut reports = Vec::new();

        for policy in policies
            .iter()
            .filter(|p| is_cleanup_due(p.last_cleanup_at, p.cleanup_frequency_hours, now))
        {
            match self.cleanup_at(&policy.content_type, now, access).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(
                        content_type = %policy.content_type,
                        error = %e,
                        "Retention cleanup failed"
                    );
                }
            }
        }
        Ok(reports)
    }
}
