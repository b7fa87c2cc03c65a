//! Annotation threads on versions.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use verso_core::annotation::{child_thread_depth, validate_annotation_type, validate_body};
use verso_core::audit::{action_types, resource_types, AuditEvent, AuditSink};
use verso_core::error::CoreError;
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};
use verso_core::types::DbId;

use crate::engine::TransactionEngine;
use crate::error::EngineError;
use crate::models::{CreateVersionAnnotation, VersionAnnotation};

const TABLE: &str = "version_annotations";
const ENTITY: &str = "version_annotation";

#[derive(Clone)]
pub struct AnnotationService {
    engine: TransactionEngine,
    audit: Arc<dyn AuditSink>,
}

impl AnnotationService {
    pub fn new(engine: TransactionEngine, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    /// Add an annotation, or a reply when `parent_annotation_id` is set.
    ///
    /// Replies go one level deep and must stay on the parent's version.
    pub async fn add(
        &self,
        input: CreateVersionAnnotation,
        access: &AccessContext,
    ) -> Result<VersionAnnotation, EngineError> {
        validate_annotation_type(&input.annotation_type)?;
        validate_body(&input.body)?;
        if input
            .content_path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(CoreError::Validation("content_path must not be blank".into()).into());
        }

        let input = Arc::new(input);
        let options = self.engine.default_options().with_label("add_annotation");
        let annotation = self
            .engine
            .execute(&options, access, move |ctx| {
                let input = Arc::clone(&input);
                Box::pin(async move {
                    if ctx.tx().find_version(input.version_id).await?.is_none() {
                        return Err(CoreError::not_found_id("content_version", input.version_id).into());
                    }

                    let parent_depth = match input.parent_annotation_id {
                        None => None,
                        Some(parent_id) => {
                            let parent = ctx
                                .tx()
                                .find_annotation(parent_id)
                                .await?
                                .ok_or_else(|| CoreError::not_found_id(ENTITY, parent_id))?;
                            if parent.version_id != input.version_id {
                                return Err(CoreError::Validation(format!(
                                    "parent annotation {parent_id} belongs to another version"
                                ))
                                .into());
                            }
                            Some(parent.thread_depth)
                        }
                    };
                    let depth = child_thread_depth(parent_depth)?;

                    let created_by = ctx.user_id();
                    let annotation = ctx
                        .tx()
                        .insert_annotation(&input, depth, created_by)
                        .await?;
                    ctx.record_operation(OperationDescriptor::new(OperationKind::Insert, TABLE, 1));
                    Ok(annotation)
                })
            })
            .await
            .into_result()?;

        self.audit.record(
            AuditEvent::new(action_types::ANNOTATE, resource_types::VERSION_ANNOTATION, annotation.id)
                .with_user(access.user_id)
                .with_details(json!({
                    "version_id": annotation.version_id,
                    "annotation_type": annotation.annotation_type,
                    "parent_annotation_id": annotation.parent_annotation_id,
                })),
        );
        Ok(annotation)
    }

    /// Annotations on a version in creation order.
    pub async fn list(
        &self,
        version_id: DbId,
        include_resolved: bool,
        access: &AccessContext,
    ) -> Result<Vec<VersionAnnotation>, EngineError> {
        self.engine
            .run(access, move |ctx| {
                Box::pin(async move {
                    Ok(ctx
                        .tx()
                        .list_annotations(version_id, include_resolved)
                        .await?)
                })
            })
            .await
    }

    /// Mark an annotation resolved. Resolving twice keeps the first resolver.
    pub async fn resolve(
        &self,
        annotation_id: DbId,
        access: &AccessContext,
    ) -> Result<VersionAnnotation, EngineError> {
        let options = self.engine.default_options().with_label("resolve_annotation");
        let resolved = self
            .engine
            .execute(&options, access, move |ctx| {
                Box::pin(async move {
                    let resolved_by = ctx.user_id();
                    let resolved = ctx
                        .tx()
                        .resolve_annotation(annotation_id, resolved_by, Utc::now())
                        .await?;
                    ctx.record_operation(OperationDescriptor::new(
                        OperationKind::Update,
                        TABLE,
                        u64::from(resolved.is_some()),
                    ));
                    Ok(resolved)
                })
            })
            .await
            .into_result()?
            .ok_or_else(|| CoreError::not_found_id(ENTITY, annotation_id))?;

        self.audit.record(
            AuditEvent::new(
                action_types::RESOLVE_ANNOTATION,
                resource_types::VERSION_ANNOTATION,
                resolved.id,
            )
            .with_user(access.user_id)
            .with_details(json!({ "version_id": resolved.version_id })),
        );
        Ok(resolved)
    }
}
