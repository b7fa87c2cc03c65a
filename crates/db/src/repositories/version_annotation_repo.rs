//! Repository for the `version_annotations` table.

use sqlx::PgConnection;
use verso_core::types::{DbId, Timestamp};

use crate::models::{CreateVersionAnnotation, VersionAnnotation};

const COLUMNS: &str = "id, version_id, parent_annotation_id, annotation_type, content_path, \
    body, thread_depth, resolved, resolved_by, resolved_at, created_by, created_at, updated_at";

pub struct VersionAnnotationRepo;

impl VersionAnnotationRepo {
    pub async fn create(
        conn: &mut PgConnection,
        input: &CreateVersionAnnotation,
        thread_depth: i16,
        created_by: Option<DbId>,
    ) -> Result<VersionAnnotation, sqlx::Error> {
        let query = format!(
            "INSERT INTO version_annotations
                (version_id, parent_annotation_id, annotation_type, content_path, body,
                 thread_depth, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VersionAnnotation>(&query)
            .bind(input.version_id)
            .bind(input.parent_annotation_id)
            .bind(&input.annotation_type)
            .bind(&input.content_path)
            .bind(&input.body)
            .bind(thread_depth)
            .bind(created_by)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<VersionAnnotation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM version_annotations WHERE id = $1");
        sqlx::query_as::<_, VersionAnnotation>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Annotations of a version in creation order.
    pub async fn list_for_version(
        conn: &mut PgConnection,
        version_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<VersionAnnotation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM version_annotations \
             WHERE version_id = $1 AND ($2 OR resolved = false) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, VersionAnnotation>(&query)
            .bind(version_id)
            .bind(include_resolved)
            .fetch_all(conn)
            .await
    }

    /// Mark resolved. Resolving twice keeps the first resolver and time.
    pub async fn resolve(
        conn: &mut PgConnection,
        id: DbId,
        resolved_by: Option<DbId>,
        at: Timestamp,
    ) -> Result<Option<VersionAnnotation>, sqlx::Error> {
        let query = format!(
            "UPDATE version_annotations SET
                resolved = true,
                resolved_by = CASE WHEN resolved THEN resolved_by ELSE $2 END,
                resolved_at = COALESCE(resolved_at, $3),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VersionAnnotation>(&query)
            .bind(id)
            .bind(resolved_by)
            .bind(at)
            .fetch_optional(conn)
            .await
    }
}
