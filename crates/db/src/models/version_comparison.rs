//! Persisted comparison cache entries.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use verso_core::diff::VersionDiff;
use verso_core::types::{DbId, Timestamp};

/// A row from the `version_comparisons` table. Derived data, never authoritative.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VersionComparison {
    pub id: DbId,
    pub from_version_id: DbId,
    pub to_version_id: DbId,
    pub diff: Json<VersionDiff>,
    pub total_changes: i32,
    pub additions: i32,
    pub modifications: i32,
    pub deletions: i32,
    pub compared_by: Option<DbId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewVersionComparison {
    pub from_version_id: DbId,
    pub to_version_id: DbId,
    pub diff: VersionDiff,
    pub compared_by: Option<DbId>,
}
