//! Rollback audit records.

use serde::Serialize;
use sqlx::FromRow;
use verso_core::types::{DbId, Timestamp};

/// A row from the `version_rollbacks` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VersionRollback {
    pub id: DbId,
    pub content_type: String,
    pub content_id: String,
    /// The version that was current when the rollback ran.
    pub from_version_id: DbId,
    /// The historical version whose content was restored.
    pub to_version_id: DbId,
    pub reason: Option<String>,
    /// Content of `from_version_id` at the time of the rollback.
    pub rollback_data: serde_json::Value,
    pub executed_by: Option<DbId>,
    pub executed_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewVersionRollback {
    pub content_type: String,
    pub content_id: String,
    pub from_version_id: DbId,
    pub to_version_id: DbId,
    pub reason: Option<String>,
    pub rollback_data: serde_json::Value,
    pub executed_by: Option<DbId>,
}
