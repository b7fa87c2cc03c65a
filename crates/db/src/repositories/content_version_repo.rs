//! Repository for the `content_versions` table.

use sqlx::types::Json;
use sqlx::PgConnection;
use verso_core::retention::RetentionCandidate;
use verso_core::types::{DbId, Timestamp};

use crate::models::{ContentVersion, NewContentVersion, VersionHistoryQuery};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, content_type, content_id, version_number, title, content, \
    change_description, diff_from_previous, is_current, is_published, is_draft, is_protected, \
    branch_name, parent_version_id, merged_from_version_id, created_by, created_at, \
    published_at, retention_expires_at, updated_at";

/// Filter shared by the history listing and its count. `$1`..`$6`.
const HISTORY_FILTER: &str = "content_type = $1 AND content_id = $2 \
    AND ($3::text IS NULL OR branch_name = $3) \
    AND ($4::bool IS NULL OR is_published = $4) \
    AND ($5::bool IS NULL OR is_draft = $5) \
    AND ($6 OR NOT is_protected)";

type CandidateRow = (
    DbId,
    String,
    i32,
    bool,
    bool,
    bool,
    Timestamp,
    Option<Timestamp>,
);

pub struct ContentVersionRepo;

impl ContentVersionRepo {
    // ── Locking & numbering ──────────────────────────────────────────

    /// Take a transaction-scoped advisory lock for one content item.
    pub async fn lock_content(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || ':' || $2, 0))")
            .bind(content_type)
            .bind(content_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Highest version number for a content item, `None` if it has no versions.
    pub async fn max_version_number(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<i32>, sqlx::Error> {
        let row: (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(version_number) FROM content_versions \
             WHERE content_type = $1 AND content_id = $2",
        )
        .bind(content_type)
        .bind(content_id)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM content_versions WHERE id = $1");
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn find_current(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM content_versions \
             WHERE content_type = $1 AND content_id = $2 AND is_current = true"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(content_type)
            .bind(content_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn find_by_number(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
        version_number: i32,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM content_versions \
             WHERE content_type = $1 AND content_id = $2 AND version_number = $3"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(content_type)
            .bind(content_id)
            .bind(version_number)
            .fetch_optional(conn)
            .await
    }

    /// Filtered page of a content item's versions, newest first, with the
    /// filtered total.
    pub async fn list_history(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
        filter: &VersionHistoryQuery,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ContentVersion>, i64), sqlx::Error> {
        let count_query = format!("SELECT COUNT(*) FROM content_versions WHERE {HISTORY_FILTER}");
        let total: (i64,) = sqlx::query_as(&count_query)
            .bind(content_type)
            .bind(content_id)
            .bind(filter.branch_name.as_deref())
            .bind(filter.is_published)
            .bind(filter.is_draft)
            .bind(filter.include_protected)
            .fetch_one(&mut *conn)
            .await?;

        let query = format!(
            "SELECT {COLUMNS} FROM content_versions WHERE {HISTORY_FILTER} \
             ORDER BY version_number DESC LIMIT $7 OFFSET $8"
        );
        let items = sqlx::query_as::<_, ContentVersion>(&query)
            .bind(content_type)
            .bind(content_id)
            .bind(filter.branch_name.as_deref())
            .bind(filter.is_published)
            .bind(filter.is_draft)
            .bind(filter.include_protected)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;
        Ok((items, total.0))
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Clear the current flag on every version of a content item.
    pub async fn clear_current(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE content_versions SET is_current = false, updated_at = NOW() \
             WHERE content_type = $1 AND content_id = $2 AND is_current = true",
        )
        .bind(content_type)
        .bind(content_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Insert a new version with `is_current = true`.
    pub async fn create(
        conn: &mut PgConnection,
        input: &NewContentVersion,
    ) -> Result<ContentVersion, sqlx::Error> {
        let query = format!(
            "INSERT INTO content_versions
                (content_type, content_id, version_number, title, content, change_description,
                 diff_from_previous, is_current, is_published, is_draft, is_protected, branch_name,
                 parent_version_id, merged_from_version_id, created_by, created_at, published_at,
                 retention_expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8, NOT $8, $9, $10, $11, $12, $13, $14, $15, $16)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(&input.content_type)
            .bind(&input.content_id)
            .bind(input.version_number)
            .bind(&input.title)
            .bind(&input.content)
            .bind(&input.change_description)
            .bind(input.diff_from_previous.as_ref().map(Json))
            .bind(input.is_published)
            .bind(input.is_protected)
            .bind(&input.branch_name)
            .bind(input.parent_version_id)
            .bind(input.merged_from_version_id)
            .bind(input.created_by)
            .bind(input.created_at)
            .bind(input.published_at())
            .bind(input.retention_expires_at)
            .fetch_one(conn)
            .await
    }

    /// Mark a version published. `published_at` is written once and kept.
    pub async fn mark_published(
        conn: &mut PgConnection,
        id: DbId,
        at: Timestamp,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!(
            "UPDATE content_versions SET
                is_published = true,
                is_draft = false,
                published_at = COALESCE(published_at, $2),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(id)
            .bind(at)
            .fetch_optional(conn)
            .await
    }

    pub async fn set_protected(
        conn: &mut PgConnection,
        id: DbId,
        is_protected: bool,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!(
            "UPDATE content_versions SET is_protected = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(id)
            .bind(is_protected)
            .fetch_optional(conn)
            .await
    }

    pub async fn set_retention_expiry(
        conn: &mut PgConnection,
        id: DbId,
        expires_at: Option<Timestamp>,
    ) -> Result<Option<ContentVersion>, sqlx::Error> {
        let query = format!(
            "UPDATE content_versions SET retention_expires_at = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ContentVersion>(&query)
            .bind(id)
            .bind(expires_at)
            .fetch_optional(conn)
            .await
    }

    // ── Retention ────────────────────────────────────────────────────

    pub async fn list_retention_candidates(
        conn: &mut PgConnection,
        content_type: &str,
    ) -> Result<Vec<RetentionCandidate>, sqlx::Error> {
        let rows: Vec<CandidateRow> = sqlx::query_as(
            "SELECT id, content_id, version_number, is_current, is_published, is_protected, \
                    created_at, retention_expires_at \
             FROM content_versions WHERE content_type = $1",
        )
        .bind(content_type)
        .fetch_all(conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, content_id, version_number, is_current, is_published, is_protected, created_at, retention_expires_at)| {
                    RetentionCandidate {
                        id,
                        content_id,
                        version_number,
                        is_current,
                        is_published,
                        is_protected,
                        created_at,
                        retention_expires_at,
                    }
                },
            )
            .collect())
    }

    /// Permanently delete versions. Comparisons and annotations cascade.
    pub async fn delete_by_ids(conn: &mut PgConnection, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM content_versions WHERE id = ANY($1)")
            .bind(ids)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }
}
