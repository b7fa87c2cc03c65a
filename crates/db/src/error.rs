//! Errors surfaced by the engine and the services built on it.

use verso_core::error::CoreError;

use crate::store::{constraints, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Savepoint creation, rollback, or release failed.
    #[error("Savepoint error: {0}")]
    Savepoint(String),

    #[error("Transaction timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Stopped by an error handler directive or an error threshold.
    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Integrity check failed on {table}.{column}: {message}")]
    IntegrityViolation {
        table: String,
        column: String,
        message: String,
    },
}

impl EngineError {
    /// Deadlock-class failures that warrant re-running the unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }

    /// A lost version-number race (or an explicit domain conflict).
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Core(CoreError::Conflict(_)) => true,
            Self::Store(err) => matches!(
                err.unique_constraint(),
                Some(constraints::VERSION_NUMBER | constraints::SINGLE_CURRENT)
            ),
            _ => false,
        }
    }

    /// Stable machine-readable code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(err) => err.code(),
            Self::Store(StoreError::UniqueViolation { .. }) => "CONFLICT",
            Self::Store(StoreError::Deadlock) => "DEADLOCK",
            Self::Store(_) => "DATABASE_ERROR",
            Self::Savepoint(_) => "SAVEPOINT_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Aborted(_) => "ABORTED",
            Self::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Core(CoreError::NotFound {
            entity,
            key: key.into(),
        })
    }
}

/// Map a lost numbering race to a domain conflict; pass other errors through.
pub fn conflict_from_unique(err: EngineError) -> EngineError {
    if err.is_conflict() {
        if let EngineError::Store(store_err) = &err {
            return EngineError::Core(CoreError::Conflict(format!(
                "Concurrent version creation: {store_err}"
            )));
        }
    }
    err
}
