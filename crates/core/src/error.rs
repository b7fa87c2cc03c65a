/// Domain-level failures shared by every layer above `core`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A destructive operation was requested without explicit confirmation.
    /// Callers present the impact to a human and re-invoke with confirmation.
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a lookup by numeric id.
    pub fn not_found_id(entity: &'static str, id: crate::types::DbId) -> Self {
        Self::NotFound {
            entity,
            key: format!("with id {id}"),
        }
    }

    /// Stable machine-readable code, suitable for logs and UI branching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
