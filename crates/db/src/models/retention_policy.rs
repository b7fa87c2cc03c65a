//! Per content type retention policy.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use verso_core::retention::{RetentionRules, DEFAULT_CLEANUP_FREQUENCY_HOURS};
use verso_core::types::{DbId, Timestamp};

/// A row from the `version_retention_policies` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct RetentionPolicy {
    pub id: DbId,
    pub content_type: String,
    pub max_versions_per_content: Option<i32>,
    pub retention_days: Option<i32>,
    pub keep_published_versions: bool,
    pub keep_protected_versions: bool,
    pub cleanup_frequency_hours: i32,
    pub last_cleanup_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RetentionPolicy {
    pub fn rules(&self) -> RetentionRules {
        RetentionRules {
            max_versions_per_content: self.max_versions_per_content,
            retention_days: self.retention_days,
            keep_published_versions: self.keep_published_versions,
            keep_protected_versions: self.keep_protected_versions,
        }
    }
}

/// DTO for creating or replacing a content type's policy.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRetentionPolicy {
    pub content_type: String,
    pub max_versions_per_content: Option<i32>,
    pub retention_days: Option<i32>,
    pub keep_published_versions: Option<bool>,
    pub keep_protected_versions: Option<bool>,
    pub cleanup_frequency_hours: Option<i32>,
}

impl UpsertRetentionPolicy {
    pub fn rules(&self) -> RetentionRules {
        let defaults = RetentionRules::default();
        RetentionRules {
            max_versions_per_content: self.max_versions_per_content,
            retention_days: self.retention_days,
            keep_published_versions: self
                .keep_published_versions
                .unwrap_or(defaults.keep_published_versions),
            keep_protected_versions: self
                .keep_protected_versions
                .unwrap_or(defaults.keep_protected_versions),
        }
    }

    pub fn cleanup_frequency_hours(&self) -> i32 {
        self.cleanup_frequency_hours
            .unwrap_or(DEFAULT_CLEANUP_FREQUENCY_HOURS)
    }
}
