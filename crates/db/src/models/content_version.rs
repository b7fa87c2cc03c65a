//! Content version entity model and DTOs.
//!
//! Versions are immutable snapshots. After insert only `is_current`,
//! `is_published`/`is_draft`/`published_at`, `is_protected` and
//! `retention_expires_at` may change.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use verso_core::diff::VersionDiff;
use verso_core::retention::RetentionCandidate;
use verso_core::types::{DbId, Timestamp};

/// A row from the `content_versions` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ContentVersion {
    pub id: DbId,
    pub content_type: String,
    pub content_id: String,
    pub version_number: i32,
    pub title: String,
    pub content: serde_json::Value,
    pub change_description: Option<String>,
    /// `None` only for the first version of a content item.
    pub diff_from_previous: Option<Json<VersionDiff>>,
    pub is_current: bool,
    pub is_published: bool,
    pub is_draft: bool,
    pub is_protected: bool,
    pub branch_name: String,
    pub parent_version_id: Option<DbId>,
    pub merged_from_version_id: Option<DbId>,
    pub created_by: Option<DbId>,
    pub created_at: Timestamp,
    pub published_at: Option<Timestamp>,
    pub retention_expires_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl ContentVersion {
    pub fn diff(&self) -> Option<&VersionDiff> {
        self.diff_from_previous.as_deref()
    }

    pub fn to_retention_candidate(&self) -> RetentionCandidate {
        RetentionCandidate {
            id: self.id,
            content_id: self.content_id.clone(),
            version_number: self.version_number,
            is_current: self.is_current,
            is_published: self.is_published,
            is_protected: self.is_protected,
            created_at: self.created_at,
            retention_expires_at: self.retention_expires_at,
        }
    }
}

/// DTO for creating a new version.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContentVersion {
    pub content_type: String,
    pub content_id: String,
    pub title: String,
    pub content: serde_json::Value,
    pub change_description: Option<String>,
    pub branch_name: Option<String>,
    pub is_published: Option<bool>,
    pub is_protected: Option<bool>,
    pub merged_from_version_id: Option<DbId>,
}

impl CreateContentVersion {
    pub fn new(
        content_type: impl Into<String>,
        content_id: impl Into<String>,
        title: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            content_id: content_id.into(),
            title: title.into(),
            content,
            change_description: None,
            branch_name: None,
            is_published: None,
            is_protected: None,
            merged_from_version_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.change_description = Some(description.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    pub fn published(mut self, is_published: bool) -> Self {
        self.is_published = Some(is_published);
        self
    }

    pub fn protected(mut self, is_protected: bool) -> Self {
        self.is_protected = Some(is_protected);
        self
    }
}

/// A fully resolved row, ready for insert.
#[derive(Debug, Clone)]
pub struct NewContentVersion {
    pub content_type: String,
    pub content_id: String,
    pub version_number: i32,
    pub title: String,
    pub content: serde_json::Value,
    pub change_description: Option<String>,
    pub diff_from_previous: Option<VersionDiff>,
    pub is_published: bool,
    pub is_protected: bool,
    pub branch_name: String,
    pub parent_version_id: Option<DbId>,
    pub merged_from_version_id: Option<DbId>,
    pub created_by: Option<DbId>,
    pub created_at: Timestamp,
    pub retention_expires_at: Option<Timestamp>,
}

impl NewContentVersion {
    /// `published_at` is set only when the version is created published.
    pub fn published_at(&self) -> Option<Timestamp> {
        self.is_published.then_some(self.created_at)
    }
}

/// Filters and pagination for version history listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VersionHistoryQuery {
    pub branch_name: Option<String>,
    pub is_published: Option<bool>,
    pub is_draft: Option<bool>,
    /// Protected versions are hidden from listings unless this is set.
    pub include_protected: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl VersionHistoryQuery {
    /// Returns `true` if `version` passes the filters (pagination aside).
    pub fn matches(&self, version: &ContentVersion) -> bool {
        self.branch_name
            .as_deref()
            .is_none_or(|b| version.branch_name == b)
            && self.is_published.is_none_or(|p| version.is_published == p)
            && self.is_draft.is_none_or(|d| version.is_draft == d)
            && (self.include_protected || !version.is_protected)
    }
}
