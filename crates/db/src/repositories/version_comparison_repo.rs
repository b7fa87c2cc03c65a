//! Repository for the `version_comparisons` table.

use sqlx::types::Json;
use sqlx::PgConnection;
use verso_core::types::DbId;

use crate::models::{NewVersionComparison, VersionComparison};

const COLUMNS: &str = "id, from_version_id, to_version_id, diff, total_changes, additions, \
    modifications, deletions, compared_by, created_at";

pub struct VersionComparisonRepo;

impl VersionComparisonRepo {
    pub async fn find_pair(
        conn: &mut PgConnection,
        from_version_id: DbId,
        to_version_id: DbId,
    ) -> Result<Option<VersionComparison>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM version_comparisons \
             WHERE from_version_id = $1 AND to_version_id = $2"
        );
        sqlx::query_as::<_, VersionComparison>(&query)
            .bind(from_version_id)
            .bind(to_version_id)
            .fetch_optional(conn)
            .await
    }

    /// Store a comparison. A concurrent writer for the same pair wins or
    /// loses harmlessly: both computed the same diff.
    pub async fn upsert(
        conn: &mut PgConnection,
        input: &NewVersionComparison,
    ) -> Result<VersionComparison, sqlx::Error> {
        let summary = &input.diff.summary;
        let query = format!(
            "INSERT INTO version_comparisons
                (from_version_id, to_version_id, diff, total_changes, additions, modifications,
                 deletions, compared_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT uq_version_comparisons_pair DO UPDATE SET
                diff = EXCLUDED.diff,
                total_changes = EXCLUDED.total_changes,
                additions = EXCLUDED.additions,
                modifications = EXCLUDED.modifications,
                deletions = EXCLUDED.deletions,
                compared_by = EXCLUDED.compared_by
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VersionComparison>(&query)
            .bind(input.from_version_id)
            .bind(input.to_version_id)
            .bind(Json(&input.diff))
            .bind(count(summary.total_changes))
            .bind(count(summary.additions))
            .bind(count(summary.modifications))
            .bind(count(summary.deletions))
            .bind(input.compared_by)
            .fetch_one(conn)
            .await
    }

    /// Delete every cached comparison. Returns the number of rows removed.
    pub async fn purge(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM version_comparisons")
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
