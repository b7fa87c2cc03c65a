//! Version retention rules (pure selection logic).
//!
//! The repository layer loads policies and candidate rows; this module decides
//! which versions are eligible for deletion. No database dependencies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Default cadence for scheduled cleanup runs.
pub const DEFAULT_CLEANUP_FREQUENCY_HOURS: i32 = 24;

/// Upper bound on `retention_days` (one hundred years).
pub const MAX_RETENTION_DAYS: i32 = 36_500;

/// Per content type retention limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRules {
    /// Keep at most this many versions per content item (newest first).
    pub max_versions_per_content: Option<i32>,
    /// Versions older than this many days become eligible for deletion.
    pub retention_days: Option<i32>,
    pub keep_published_versions: bool,
    pub keep_protected_versions: bool,
}

impl Default for RetentionRules {
    fn default() -> Self {
        Self {
            max_versions_per_content: None,
            retention_days: None,
            keep_published_versions: true,
            keep_protected_versions: true,
        }
    }
}

/// Validate a set of retention rules.
pub fn validate_rules(rules: &RetentionRules) -> Result<(), CoreError> {
    if rules.max_versions_per_content.is_none() && rules.retention_days.is_none() {
        return Err(CoreError::Validation(
            "A retention policy needs max_versions_per_content or retention_days".into(),
        ));
    }
    if let Some(max) = rules.max_versions_per_content {
        if max < 1 {
            return Err(CoreError::Validation(
                "max_versions_per_content must be at least 1".into(),
            ));
        }
    }
    if let Some(days) = rules.retention_days {
        if !(1..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(CoreError::Validation(format!(
                "retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
    }
    Ok(())
}

/// Validate a cleanup cadence in hours.
pub fn validate_cleanup_frequency(hours: i32) -> Result<(), CoreError> {
    if hours < 1 {
        return Err(CoreError::Validation(
            "cleanup_frequency_hours must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Expiry timestamp for a version created at `created_at`, if the policy
/// has an age limit. Returns `None` when the expiry falls outside the
/// representable date range.
pub fn expiry_for(created_at: Timestamp, retention_days: Option<i32>) -> Option<Timestamp> {
    let days = chrono::Duration::try_days(i64::from(retention_days?))?;
    created_at.checked_add_signed(days)
}

/// Returns `true` when a scheduled cleanup should run now.
pub fn is_cleanup_due(last_cleanup_at: Option<Timestamp>, frequency_hours: i32, now: Timestamp) -> bool {
    match last_cleanup_at {
        None => true,
        Some(last) => now - last >= chrono::Duration::hours(i64::from(frequency_hours)),
    }
}

/// The fields of a version that retention decisions depend on.
#[derive(Debug, Clone)]
pub struct RetentionCandidate {
    pub id: DbId,
    pub content_id: String,
    pub version_number: i32,
    pub is_current: bool,
    pub is_published: bool,
    pub is_protected: bool,
    pub created_at: Timestamp,
    pub retention_expires_at: Option<Timestamp>,
}

/// Outcome of evaluating a content type's versions against its rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSelection {
    /// Version ids to delete.
    pub expired: Vec<DbId>,
    /// Eligible by age/count but kept because they are current.
    pub kept_current: usize,
    pub kept_published: usize,
    pub kept_protected: usize,
}

/// Select the versions that exceed the rules.
///
/// A version is eligible when it falls outside the newest
/// `max_versions_per_content` of its content item, or when its explicit
/// `retention_expires_at` (or `created_at + retention_days`) has passed.
/// The current version is never selected.
pub fn select_expired(
    candidates: &[RetentionCandidate],
    rules: &RetentionRules,
    now: Timestamp,
) -> RetentionSelection {
    let mut by_content: BTreeMap<&str, Vec<&RetentionCandidate>> = BTreeMap::new();
    for candidate in candidates {
        by_content
            .entry(candidate.content_id.as_str())
            .or_default()
            .push(candidate);
    }

    let mut selection = RetentionSelection::default();
    for versions in by_content.values_mut() {
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));

        for (rank, version) in versions.iter().enumerate() {
            let over_count = rules
                .max_versions_per_content
                .is_some_and(|max| rank >= max.max(0) as usize);
            let expiry = version
                .retention_expires_at
                .or_else(|| expiry_for(version.created_at, rules.retention_days));
            let over_age = expiry.is_some_and(|at| at <= now);

            if !over_count && !over_age {
                continue;
            }
            if version.is_current {
                selection.kept_current += 1;
            } else if version.is_protected && rules.keep_protected_versions {
                selection.kept_protected += 1;
            } else if version.is_published && rules.keep_published_versions {
                selection.kept_published += 1;
            } else {
                selection.expired.push(version.id);
            }
        }
    }
    selection
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn candidate(id: DbId, content_id: &str, number: i32, age_days: i64) -> RetentionCandidate {
        RetentionCandidate {
            id,
            content_id: content_id.to_string(),
            version_number: number,
            is_current: false,
            is_published: false,
            is_protected: false,
            created_at: now() - Duration::days(age_days),
            retention_expires_at: None,
        }
    }

    fn count_rules(max: i32) -> RetentionRules {
        RetentionRules {
            max_versions_per_content: Some(max),
            ..RetentionRules::default()
        }
    }

    #[test]
    fn rules_need_a_limit() {
        assert!(validate_rules(&RetentionRules::default()).is_err());
        assert!(validate_rules(&count_rules(3)).is_ok());
        assert!(validate_rules(&count_rules(0)).is_err());
        let by_age = RetentionRules {
            retention_days: Some(0),
            ..RetentionRules::default()
        };
        assert!(validate_rules(&by_age).is_err());
    }

    #[test]
    fn retention_days_upper_bound() {
        let rules = |days| RetentionRules {
            retention_days: Some(days),
            ..RetentionRules::default()
        };
        assert!(validate_rules(&rules(MAX_RETENTION_DAYS)).is_ok());
        assert!(validate_rules(&rules(MAX_RETENTION_DAYS + 1)).is_err());
        assert!(validate_rules(&rules(i32::MAX)).is_err());
    }

    #[test]
    fn expiry_out_of_range_is_none() {
        assert_eq!(expiry_for(now(), None), None);
        assert_eq!(expiry_for(now(), Some(1)), Some(now() + Duration::days(1)));
        assert_eq!(expiry_for(now(), Some(i32::MAX)), None);
        assert_eq!(expiry_for(chrono::DateTime::<Utc>::MAX_UTC, Some(1)), None);
    }

    #[test]
    fn count_limit_keeps_newest() {
        let mut versions: Vec<_> = (1..=5).map(|n| candidate(n, "p1", n as i32, 0)).collect();
        versions[4].is_current = true;

        let selection = select_expired(&versions, &count_rules(2), now());
        assert_eq!(selection.expired, vec![3, 2, 1]);
    }

    #[test]
    fn count_limit_is_per_content_item() {
        let versions = vec![
            candidate(1, "a", 1, 0),
            candidate(2, "a", 2, 0),
            candidate(3, "b", 1, 0),
        ];
        let selection = select_expired(&versions, &count_rules(1), now());
        assert_eq!(selection.expired, vec![1]);
    }

    #[test]
    fn age_limit_uses_created_at() {
        let versions = vec![candidate(1, "p", 1, 40), candidate(2, "p", 2, 5)];
        let rules = RetentionRules {
            retention_days: Some(30),
            ..RetentionRules::default()
        };
        assert_eq!(select_expired(&versions, &rules, now()).expired, vec![1]);
    }

    #[test]
    fn explicit_expiry_overrides_age() {
        let mut fresh = candidate(1, "p", 1, 0);
        fresh.retention_expires_at = Some(now() - Duration::hours(1));
        let mut old_but_extended = candidate(2, "p", 2, 90);
        old_but_extended.retention_expires_at = Some(now() + Duration::days(1));
        let rules = RetentionRules {
            retention_days: Some(30),
            ..RetentionRules::default()
        };

        let selection = select_expired(&[fresh, old_but_extended], &rules, now());
        assert_eq!(selection.expired, vec![1]);
    }

    #[test]
    fn current_published_and_protected_are_kept() {
        let mut current = candidate(1, "p", 4, 100);
        current.is_current = true;
        let mut published = candidate(2, "p", 3, 100);
        published.is_published = true;
        let mut protected = candidate(3, "p", 2, 100);
        protected.is_protected = true;
        let plain = candidate(4, "p", 1, 100);
        let rules = RetentionRules {
            retention_days: Some(30),
            ..RetentionRules::default()
        };

        let selection = select_expired(&[current, published, protected, plain], &rules, now());
        assert_eq!(selection.expired, vec![4]);
        assert_eq!(selection.kept_current, 1);
        assert_eq!(selection.kept_published, 1);
        assert_eq!(selection.kept_protected, 1);
    }

    #[test]
    fn override_flags_can_be_disabled() {
        let mut published = candidate(1, "p", 1, 100);
        published.is_published = true;
        let rules = RetentionRules {
            retention_days: Some(30),
            keep_published_versions: false,
            keep_protected_versions: true,
            max_versions_per_content: None,
        };
        assert_eq!(select_expired(&[published], &rules, now()).expired, vec![1]);
    }

    #[test]
    fn cleanup_cadence() {
        assert!(is_cleanup_due(None, 24, now()));
        assert!(!is_cleanup_due(Some(now() - Duration::hours(2)), 24, now()));
        assert!(is_cleanup_due(Some(now() - Duration::hours(24)), 24, now()));
    }

    #[test]
    fn expiry_computation() {
        assert_eq!(expiry_for(now(), None), None);
        assert_eq!(expiry_for(now(), Some(7)), Some(now() + Duration::days(7)));
    }
}
