//! Version annotation constants and validation.
//!
//! Annotations are comments, suggestions, or approvals attached to a version,
//! optionally at a dotted content path. Threads are one level deep: a reply
//! may only target a top-level annotation.

use crate::error::CoreError;

/// Known annotation types.
pub mod annotation_types {
    pub const COMMENT: &str = "comment";
    pub const SUGGESTION: &str = "suggestion";
    pub const APPROVAL: &str = "approval";
}

/// All valid annotation types.
pub const VALID_ANNOTATION_TYPES: &[&str] = &[
    annotation_types::COMMENT,
    annotation_types::SUGGESTION,
    annotation_types::APPROVAL,
];

/// Deepest allowed thread depth (0 = top-level, 1 = reply).
pub const MAX_THREAD_DEPTH: i16 = 1;

/// Maximum annotation body length.
pub const MAX_BODY_LEN: usize = 10_000;

/// Validate that an annotation type is one of the known types.
pub fn validate_annotation_type(annotation_type: &str) -> Result<(), CoreError> {
    if VALID_ANNOTATION_TYPES.contains(&annotation_type) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid annotation type '{annotation_type}'. Must be one of: {}",
            VALID_ANNOTATION_TYPES.join(", ")
        )))
    }
}

/// Validate an annotation body.
pub fn validate_body(body: &str) -> Result<(), CoreError> {
    if body.trim().is_empty() {
        return Err(CoreError::Validation("annotation body is required".into()));
    }
    if body.chars().count() > MAX_BODY_LEN {
        return Err(CoreError::Validation(format!(
            "annotation body must be at most {MAX_BODY_LEN} characters"
        )));
    }
    Ok(())
}

/// Thread depth for a new annotation given its parent's depth.
///
/// Returns an error when the parent is itself a reply.
pub fn child_thread_depth(parent_depth: Option<i16>) -> Result<i16, CoreError> {
    match parent_depth {
        None => Ok(0),
        Some(depth) if depth < MAX_THREAD_DEPTH => Ok(depth + 1),
        Some(_) => Err(CoreError::Validation(
            "Replies can only be added to top-level annotations".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_accepted() {
        for t in VALID_ANNOTATION_TYPES {
            assert!(validate_annotation_type(t).is_ok());
        }
    }

    #[test]
    fn unknown_type_lists_valid_options() {
        let err = validate_annotation_type("emoji").unwrap_err();
        assert!(err.to_string().contains("comment, suggestion, approval"));
    }

    #[test]
    fn body_must_not_be_blank() {
        assert!(validate_body("looks good").is_ok());
        assert!(validate_body(" \n").is_err());
        assert!(validate_body(&"b".repeat(MAX_BODY_LEN + 1)).is_err());
    }

    #[test]
    fn threading_is_single_level() {
        assert_eq!(child_thread_depth(None).unwrap(), 0);
        assert_eq!(child_thread_depth(Some(0)).unwrap(), 1);
        assert!(child_thread_depth(Some(1)).is_err());
    }
}
