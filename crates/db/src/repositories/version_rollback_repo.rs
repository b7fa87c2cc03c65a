//! Repository for the `version_rollbacks` audit table.

use sqlx::PgConnection;

use crate::models::{NewVersionRollback, VersionRollback};

const COLUMNS: &str = "id, content_type, content_id, from_version_id, to_version_id, reason, \
    rollback_data, executed_by, executed_at";

pub struct VersionRollbackRepo;

impl VersionRollbackRepo {
    pub async fn create(
        conn: &mut PgConnection,
        input: &NewVersionRollback,
    ) -> Result<VersionRollback, sqlx::Error> {
        let query = format!(
            "INSERT INTO version_rollbacks
                (content_type, content_id, from_version_id, to_version_id, reason, rollback_data,
                 executed_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VersionRollback>(&query)
            .bind(&input.content_type)
            .bind(&input.content_id)
            .bind(input.from_version_id)
            .bind(input.to_version_id)
            .bind(&input.reason)
            .bind(&input.rollback_data)
            .bind(input.executed_by)
            .fetch_one(conn)
            .await
    }

    /// Rollbacks of one content item, most recent first.
    pub async fn list_for_content(
        conn: &mut PgConnection,
        content_type: &str,
        content_id: &str,
    ) -> Result<Vec<VersionRollback>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM version_rollbacks \
             WHERE content_type = $1 AND content_id = $2 \
             ORDER BY executed_at DESC, id DESC"
        );
        sqlx::query_as::<_, VersionRollback>(&query)
            .bind(content_type)
            .bind(content_id)
            .fetch_all(conn)
            .await
    }
}
