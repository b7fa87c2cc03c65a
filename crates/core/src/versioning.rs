//! Content version constants and input validation.
//!
//! This module lives in `core` (zero internal deps) so the version store, the
//! rollback coordinator, and any tooling share one set of rules.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Branch used when the caller does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Suffix appended to the title of a version produced by rollback.
pub const ROLLBACK_TITLE_SUFFIX: &str = " (Rollback)";

/// Maximum length of a content type slug.
pub const MAX_CONTENT_TYPE_LEN: usize = 64;

/// Maximum length of a content id.
pub const MAX_CONTENT_ID_LEN: usize = 255;

/// Maximum length of a version title.
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum length of a change description.
pub const MAX_CHANGE_DESCRIPTION_LEN: usize = 2000;

/// Maximum length of a branch name.
pub const MAX_BRANCH_NAME_LEN: usize = 100;

/// Default page size for version history listings.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound for a version history page.
pub const MAX_PAGE_SIZE: i64 = 100;

static CONTENT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid content type regex"));

static BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid branch regex"));

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a content type slug such as `blog_post`.
pub fn validate_content_type(content_type: &str) -> Result<(), CoreError> {
    if content_type.is_empty() {
        return Err(CoreError::Validation("content_type is required".into()));
    }
    if content_type.len() > MAX_CONTENT_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "content_type must be at most {MAX_CONTENT_TYPE_LEN} characters"
        )));
    }
    if !CONTENT_TYPE_RE.is_match(content_type) {
        return Err(CoreError::Validation(format!(
            "Invalid content_type '{content_type}': use lowercase letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Validate a content id. Any non-blank string up to the length limit.
pub fn validate_content_id(content_id: &str) -> Result<(), CoreError> {
    if content_id.trim().is_empty() {
        return Err(CoreError::Validation("content_id is required".into()));
    }
    if content_id.len() > MAX_CONTENT_ID_LEN {
        return Err(CoreError::Validation(format!(
            "content_id must be at most {MAX_CONTENT_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a version title.
pub fn validate_title(title: &str) -> Result<(), CoreError> {
    if title.trim().is_empty() {
        return Err(CoreError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::Validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate an optional change description.
pub fn validate_change_description(description: Option<&str>) -> Result<(), CoreError> {
    match description {
        Some(d) if d.chars().count() > MAX_CHANGE_DESCRIPTION_LEN => Err(CoreError::Validation(
            format!("change_description must be at most {MAX_CHANGE_DESCRIPTION_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

/// Validate a branch name (`main`, `feature/spring-sale`, `v2.1`).
pub fn validate_branch_name(branch: &str) -> Result<(), CoreError> {
    if branch.len() > MAX_BRANCH_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "branch_name must be at most {MAX_BRANCH_NAME_LEN} characters"
        )));
    }
    if !BRANCH_RE.is_match(branch) {
        return Err(CoreError::Validation(format!(
            "Invalid branch_name '{branch}'"
        )));
    }
    Ok(())
}

/// Content must be a JSON object at the root.
pub fn validate_content(content: &serde_json::Value) -> Result<(), CoreError> {
    if content.is_object() {
        Ok(())
    } else {
        Err(CoreError::Validation(
            "content must be a JSON object".to_string(),
        ))
    }
}

/// Resolve the branch for a new version, falling back to [`DEFAULT_BRANCH`].
pub fn resolve_branch(branch: Option<&str>) -> &str {
    match branch {
        Some(b) if !b.trim().is_empty() => b,
        _ => DEFAULT_BRANCH,
    }
}

// ---------------------------------------------------------------------------
// Rollback helpers
// ---------------------------------------------------------------------------

/// Title of the version materialised by a rollback.
pub fn rollback_title(target_title: &str) -> String {
    format!("{target_title}{ROLLBACK_TITLE_SUFFIX}")
}

/// Change description of the version materialised by a rollback.
pub fn rollback_change_description(reason: Option<&str>, target_version_number: i32) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("Rollback to version {target_version_number}: {reason}"),
        None => format!("Rollback to version {target_version_number}"),
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(per_page: Option<i64>) -> i64 {
    per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Clamp a 1-based page number.
pub fn clamp_page(page: Option<i64>) -> i64 {
    page.unwrap_or(1).max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_slugs() {
        assert!(validate_content_type("blog_post").is_ok());
        assert!(validate_content_type("page2").is_ok());
        assert!(validate_content_type("").is_err());
        assert!(validate_content_type("Blog").is_err());
        assert!(validate_content_type("blog-post").is_err());
        assert!(validate_content_type("2page").is_err());
        assert!(validate_content_type(&"a".repeat(MAX_CONTENT_TYPE_LEN + 1)).is_err());
    }

    #[test]
    fn content_id_must_be_non_blank() {
        assert!(validate_content_id("p1").is_ok());
        assert!(validate_content_id("   ").is_err());
        assert!(validate_content_id(&"x".repeat(MAX_CONTENT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn title_rules() {
        assert!(validate_title("Hello").is_ok());
        let err = validate_title("").unwrap_err();
        assert_eq!(err, CoreError::Validation("title is required".into()));
        assert!(validate_title(&"t".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn change_description_length() {
        assert!(validate_change_description(None).is_ok());
        assert!(validate_change_description(Some("fixed typo")).is_ok());
        let long = "d".repeat(MAX_CHANGE_DESCRIPTION_LEN + 1);
        assert!(validate_change_description(Some(&long)).is_err());
    }

    #[test]
    fn branch_names() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/spring-sale").is_ok());
        assert!(validate_branch_name("v2.1").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-leading").is_err());
        assert!(validate_branch_name("has space").is_err());
    }

    #[test]
    fn content_must_be_object() {
        assert!(validate_content(&serde_json::json!({"a": 1})).is_ok());
        assert!(validate_content(&serde_json::json!([1])).is_err());
        assert!(validate_content(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn branch_resolution_defaults_to_main() {
        assert_eq!(resolve_branch(None), DEFAULT_BRANCH);
        assert_eq!(resolve_branch(Some("  ")), DEFAULT_BRANCH);
        assert_eq!(resolve_branch(Some("draft")), "draft");
    }

    #[test]
    fn rollback_text() {
        assert_eq!(rollback_title("A"), "A (Rollback)");
        assert_eq!(
            rollback_change_description(Some("bad edit"), 1),
            "Rollback to version 1: bad edit"
        );
        assert_eq!(rollback_change_description(Some("  "), 3), "Rollback to version 3");
        assert_eq!(rollback_change_description(None, 3), "Rollback to version 3");
    }

    #[test]
    fn pagination_clamps() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
        assert_eq!(clamp_page_size(Some(10_000)), MAX_PAGE_SIZE);
        assert_eq!(clamp_page(Some(-3)), 1);
        assert_eq!(clamp_page(Some(4)), 4);
    }
}
