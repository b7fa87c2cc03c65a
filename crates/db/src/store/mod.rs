//! Outbound store contract.
//!
//! A [`Store`] opens transactions; a [`StoreTx`] is one open transaction with
//! savepoint control and the row operations every service needs. Two
//! implementations ship: [`PgStore`] over a sqlx pool and [`MemoryStore`] for
//! embedding and tests.
//!
//! Dropping a [`StoreTx`] without committing rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use verso_core::bulk::BulkOperationKind;
use verso_core::retention::RetentionCandidate;
use verso_core::transaction::IsolationLevel;
use verso_core::types::{DbId, Timestamp};

use crate::models::{
    ContentVersion, CreateVersionAnnotation, NewContentVersion, NewVersionComparison,
    NewVersionRollback, RetentionPolicy, UpsertRetentionPolicy, VersionAnnotation,
    VersionComparison, VersionHistoryQuery, VersionRollback,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// SQLSTATE codes the store classifies.
pub mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const SAVEPOINT_EXCEPTION: &str = "3B000";
    pub const INVALID_SAVEPOINT: &str = "3B001";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_COLUMN: &str = "42703";
}

/// Constraint names shared by both stores.
pub mod constraints {
    pub const VERSION_NUMBER: &str = "uq_content_versions_number";
    pub const SINGLE_CURRENT: &str = "uq_content_versions_current";
    pub const COMPARISON_PAIR: &str = "uq_version_comparisons_pair";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate value violates unique constraint: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key violation: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("Deadlock detected")]
    Deadlock,

    #[error("Could not serialize access due to concurrent update")]
    SerializationFailure,

    #[error("Savepoint failure: {0}")]
    Savepoint(String),

    #[error("Unknown table or column: {0}")]
    UndefinedRelation(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Deadlocks and serialization failures: re-running the whole unit of
    /// work in a fresh transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Deadlock | Self::SerializationFailure)
    }

    /// Returns the violated constraint name for unique violations.
    pub fn unique_constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint } => Some(constraint),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let sqlx::Error::Database(db_err) = &err else {
            return Self::Database(err);
        };
        let constraint = || db_err.constraint().unwrap_or("unknown").to_string();
        match db_err.code().as_deref() {
            Some(sqlstate::UNIQUE_VIOLATION) => Self::UniqueViolation {
                constraint: constraint(),
            },
            Some(sqlstate::FOREIGN_KEY_VIOLATION) => Self::ForeignKeyViolation {
                constraint: constraint(),
            },
            Some(sqlstate::DEADLOCK_DETECTED) => Self::Deadlock,
            Some(sqlstate::SERIALIZATION_FAILURE) => Self::SerializationFailure,
            Some(sqlstate::SAVEPOINT_EXCEPTION | sqlstate::INVALID_SAVEPOINT) => {
                Self::Savepoint(db_err.message().to_string())
            }
            Some(sqlstate::UNDEFINED_TABLE | sqlstate::UNDEFINED_COLUMN) => {
                Self::UndefinedRelation(db_err.message().to_string())
            }
            _ => Self::Database(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A relational store supporting isolation levels and nested savepoints.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction at `isolation`.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Deepest savepoint nesting the store accepts, if it enforces one.
    fn max_savepoint_depth(&self) -> Option<usize> {
        None
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// One open transaction.
#[async_trait]
pub trait StoreTx: Send {
    // -- Transaction control -------------------------------------------------

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;

    // -- content_versions ----------------------------------------------------

    /// Serialise version creation for one content item until this
    /// transaction ends.
    async fn lock_content(&mut self, content_type: &str, content_id: &str)
        -> Result<(), StoreError>;

    async fn max_version_number(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<i32>, StoreError>;

    async fn find_version(&mut self, id: DbId) -> Result<Option<ContentVersion>, StoreError>;

    async fn find_current_version(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<ContentVersion>, StoreError>;

    async fn find_version_by_number(
        &mut self,
        content_type: &str,
        content_id: &str,
        version_number: i32,
    ) -> Result<Option<ContentVersion>, StoreError>;

    /// Set `is_current = false` on every version of the content item.
    async fn clear_current_flag(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<u64, StoreError>;

    /// Insert a version as the current one.
    async fn insert_version(
        &mut self,
        input: &NewContentVersion,
    ) -> Result<ContentVersion, StoreError>;

    /// Filtered page of versions, newest first, plus the filtered total.
    async fn list_versions(
        &mut self,
        content_type: &str,
        content_id: &str,
        query: &VersionHistoryQuery,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ContentVersion>, i64), StoreError>;

    /// Mark published; `published_at` is only set if it was unset.
    async fn mark_published(
        &mut self,
        id: DbId,
        at: Timestamp,
    ) -> Result<Option<ContentVersion>, StoreError>;

    async fn set_protected(
        &mut self,
        id: DbId,
        is_protected: bool,
    ) -> Result<Option<ContentVersion>, StoreError>;

    async fn set_retention_expiry(
        &mut self,
        id: DbId,
        expires_at: Option<Timestamp>,
    ) -> Result<Option<ContentVersion>, StoreError>;

    async fn list_retention_candidates(
        &mut self,
        content_type: &str,
    ) -> Result<Vec<RetentionCandidate>, StoreError>;

    /// Delete versions by id, cascading comparisons and annotations.
    async fn delete_versions(&mut self, ids: &[DbId]) -> Result<u64, StoreError>;

    // -- version_comparisons -------------------------------------------------

    async fn find_comparison(
        &mut self,
        from_version_id: DbId,
        to_version_id: DbId,
    ) -> Result<Option<VersionComparison>, StoreError>;

    /// Insert or overwrite the entry for the pair.
    async fn upsert_comparison(
        &mut self,
        input: &NewVersionComparison,
    ) -> Result<VersionComparison, StoreError>;

    async fn purge_comparisons(&mut self) -> Result<u64, StoreError>;

    // -- version_rollbacks ---------------------------------------------------

    async fn insert_rollback(
        &mut self,
        input: &NewVersionRollback,
    ) -> Result<VersionRollback, StoreError>;

    async fn list_rollbacks(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Vec<VersionRollback>, StoreError>;

    // -- version_annotations -------------------------------------------------

    async fn insert_annotation(
        &mut self,
        input: &CreateVersionAnnotation,
        thread_depth: i16,
        created_by: Option<DbId>,
    ) -> Result<VersionAnnotation, StoreError>;

    async fn find_annotation(&mut self, id: DbId)
        -> Result<Option<VersionAnnotation>, StoreError>;

    async fn list_annotations(
        &mut self,
        version_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<VersionAnnotation>, StoreError>;

    async fn resolve_annotation(
        &mut self,
        id: DbId,
        resolved_by: Option<DbId>,
        at: Timestamp,
    ) -> Result<Option<VersionAnnotation>, StoreError>;

    // -- version_retention_policies ------------------------------------------

    async fn find_retention_policy(
        &mut self,
        content_type: &str,
    ) -> Result<Option<RetentionPolicy>, StoreError>;

    async fn upsert_retention_policy(
        &mut self,
        input: &UpsertRetentionPolicy,
    ) -> Result<RetentionPolicy, StoreError>;

    async fn list_retention_policies(&mut self) -> Result<Vec<RetentionPolicy>, StoreError>;

    async fn mark_cleanup(&mut self, content_type: &str, at: Timestamp)
        -> Result<(), StoreError>;

    // -- Generic bulk tables -------------------------------------------------

    /// Write JSON object rows into `table`. Updates and deletes match on `id`.
    /// Returns the number of affected rows.
    async fn bulk_write(
        &mut self,
        table: &str,
        kind: BulkOperationKind,
        rows: &[serde_json::Value],
    ) -> Result<u64, StoreError>;

    /// Count rows of `table` whose `column` equals `value`.
    async fn count_matching(
        &mut self,
        table: &str,
        column: &str,
        value: &serde_json::Value,
    ) -> Result<i64, StoreError>;
}
