//! Repository for the `version_retention_policies` table.

use sqlx::PgConnection;
use verso_core::types::Timestamp;

use crate::models::{RetentionPolicy, UpsertRetentionPolicy};

const COLUMNS: &str = "id, content_type, max_versions_per_content, retention_days, \
    keep_published_versions, keep_protected_versions, cleanup_frequency_hours, last_cleanup_at, \
    created_at, updated_at";

pub struct RetentionPolicyRepo;

impl RetentionPolicyRepo {
    pub async fn find_by_content_type(
        conn: &mut PgConnection,
        content_type: &str,
    ) -> Result<Option<RetentionPolicy>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM version_retention_policies WHERE content_type = $1");
        sqlx::query_as::<_, RetentionPolicy>(&query)
            .bind(content_type)
            .fetch_optional(conn)
            .await
    }

    /// Create or replace the policy for a content type. `last_cleanup_at` is kept.
    pub async fn upsert(
        conn: &mut PgConnection,
        input: &UpsertRetentionPolicy,
    ) -> Result<RetentionPolicy, sqlx::Error> {
        let rules = input.rules();
        let query = format!(
            "INSERT INTO version_retention_policies
                (content_type, max_versions_per_content, retention_days, keep_published_versions,
                 keep_protected_versions, cleanup_frequency_hours)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (content_type) DO UPDATE SET
                max_versions_per_content = EXCLUDED.max_versions_per_content,
                retention_days = EXCLUDED.retention_days,
                keep_published_versions = EXCLUDED.keep_published_versions,
                keep_protected_versions = EXCLUDED.keep_protected_versions,
                cleanup_frequency_hours = EXCLUDED.cleanup_frequency_hours,
                updated_at = NOW()
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RetentionPolicy>(&query)
            .bind(&input.content_type)
            .bind(rules.max_versions_per_content)
            .bind(rules.retention_days)
            .bind(rules.keep_published_versions)
            .bind(rules.keep_protected_versions)
            .bind(input.cleanup_frequency_hours())
            .fetch_one(conn)
            .await
    }

    pub async fn list_all(conn: &mut PgConnection) -> Result<Vec<RetentionPolicy>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM version_retention_policies ORDER BY content_type");
        sqlx::query_as::<_, RetentionPolicy>(&query)
            .fetch_all(conn)
            .await
    }

    pub async fn mark_cleanup(
        conn: &mut PgConnection,
        content_type: &str,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE version_retention_policies SET last_cleanup_at = $2, updated_at = NOW() \
             WHERE content_type = $1",
        )
        .bind(content_type)
        .bind(at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
