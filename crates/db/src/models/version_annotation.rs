//! Version annotation model (threaded review comments).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use verso_core::types::{DbId, Timestamp};

/// A row from the `version_annotations` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VersionAnnotation {
    pub id: DbId,
    pub version_id: DbId,
    pub parent_annotation_id: Option<DbId>,
    pub annotation_type: String,
    /// Dotted content path the annotation refers to, if any.
    pub content_path: Option<String>,
    pub body: String,
    pub thread_depth: i16,
    pub resolved: bool,
    pub resolved_by: Option<DbId>,
    pub resolved_at: Option<Timestamp>,
    pub created_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for adding an annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVersionAnnotation {
    pub version_id: DbId,
    pub parent_annotation_id: Option<DbId>,
    pub annotation_type: String,
    pub content_path: Option<String>,
    pub body: String,
}
