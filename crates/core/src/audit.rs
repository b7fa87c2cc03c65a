//! Audit event types and the sink contract.
//!
//! Persistence of audit events is owned by whoever implements [`AuditSink`].
//! The version store and rollback coordinator emit events after their
//! transaction commits, so a sink never sees work that was rolled back.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Action type constants
// ---------------------------------------------------------------------------

/// Known action types for audit events.
pub mod action_types {
    pub const CREATE: &str = "CREATE";
    pub const PUBLISH: &str = "PUBLISH";
    pub const PROTECT: &str = "PROTECT";
    pub const UNPROTECT: &str = "UNPROTECT";
    pub const SET_RETENTION: &str = "SET_RETENTION";
    pub const ROLLBACK: &str = "ROLLBACK";
    pub const ANNOTATE: &str = "ANNOTATE";
    pub const RESOLVE_ANNOTATION: &str = "RESOLVE_ANNOTATION";
    pub const RETENTION_CLEANUP: &str = "RETENTION_CLEANUP";
    pub const BULK_OPERATION: &str = "BULK_OPERATION";
}

/// Resource types named in audit events.
pub mod resource_types {
    pub const CONTENT_VERSION: &str = "content_version";
    pub const VERSION_ANNOTATION: &str = "version_annotation";
    pub const RETENTION_POLICY: &str = "version_retention_policy";
    pub const BULK_TABLE: &str = "bulk_table";
}

/// Fields that should be redacted from audit details before they leave the process.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "private_key",
    "authorization",
    "credential",
];

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One audit record: `{action, resource_id, details, user_id, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub user_id: Option<DbId>,
    pub timestamp: Timestamp,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
            details: serde_json::Value::Object(serde_json::Map::new()),
            user_id: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach details. Sensitive keys are redacted.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = redact_sensitive_fields(&details);
        self
    }

    pub fn with_user(mut self, user_id: Option<DbId>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Receiver of audit events.
///
/// Implementations must not block for long: the caller has already committed
/// and is about to return to its own caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

/// Replace the value of any key matching [`SENSITIVE_FIELDS`] with `"[REDACTED]"`.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| lower_key.contains(f)) {
                    redacted.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_fields() {
        let event = AuditEvent::new(action_types::CREATE, resource_types::CONTENT_VERSION, 12)
            .with_user(Some(3))
            .with_details(json!({"version_number": 2}));
        assert_eq!(event.action, "CREATE");
        assert_eq!(event.resource_id, "12");
        assert_eq!(event.user_id, Some(3));
        assert_eq!(event.details["version_number"], 2);
    }

    #[test]
    fn details_are_redacted() {
        let event = AuditEvent::new(action_types::BULK_OPERATION, resource_types::BULK_TABLE, "t")
            .with_details(json!({"api_key": "abc", "nested": {"Password": "x"}, "rows": 3}));
        assert_eq!(event.details["api_key"], "[REDACTED]");
        assert_eq!(event.details["nested"]["Password"], "[REDACTED]");
        assert_eq!(event.details["rows"], 3);
    }

    #[test]
    fn redaction_walks_arrays() {
        let redacted = redact_sensitive_fields(&json!([{"token": "t"}, 1]));
        assert_eq!(redacted, json!([{"token": "[REDACTED]"}, 1]));
    }
}
