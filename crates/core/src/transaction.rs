//! Transaction options and bookkeeping types.
//!
//! The execution engine in `verso_db` drives these; they live here so that
//! callers can build options and inspect results without a database crate.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Default transaction timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of deadlock retries after the first attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default pause before a deadlock retry (multiplied by the attempt number).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// PostgreSQL identifiers are limited to 63 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

/// SQL transaction isolation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// The SQL spelling used in `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Parse the snake_case config spelling (`read_committed`, ...).
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "read_uncommitted" => Ok(Self::ReadUncommitted),
            "read_committed" => Ok(Self::ReadCommitted),
            "repeatable_read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            other => Err(CoreError::Validation(format!(
                "Unknown isolation level '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-invocation settings for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// Bound on the whole transaction lifetime, retries included.
    pub timeout: Duration,
    /// Deadlock retries after the first attempt.
    pub retry_count: u32,
    pub retry_backoff: Duration,
    /// Free-form label carried into logs.
    pub label: Option<String>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            label: None,
        }
    }
}

impl TransactionOptions {
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Access context
// ---------------------------------------------------------------------------

/// Who is acting, carried into audit events and `created_by` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub user_id: Option<DbId>,
    pub request_id: uuid::Uuid,
}

impl AccessContext {
    pub fn user(user_id: DbId) -> Self {
        Self {
            user_id: Some(user_id),
            request_id: uuid::Uuid::new_v4(),
        }
    }

    /// Context for background jobs and maintenance tasks.
    pub fn system() -> Self {
        Self {
            user_id: None,
            request_id: uuid::Uuid::new_v4(),
        }
    }
}

// ---------------------------------------------------------------------------
// State & recorded operations
// ---------------------------------------------------------------------------

/// Lifecycle of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Started,
    SavepointCreated,
    SavepointRolledBack,
    SavepointReleased,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::SavepointCreated => "SAVEPOINT_CREATED",
            Self::SavepointRolledBack => "SAVEPOINT_ROLLED_BACK",
            Self::SavepointReleased => "SAVEPOINT_RELEASED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    /// Returns `true` once the transaction has been resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Kind of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }
}

/// What a unit of work reports through `record_operation`.
///
/// Pure bookkeeping for audit and metrics; never replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub affected_rows: u64,
    pub duration: Duration,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, table: impl Into<String>, affected_rows: u64) -> Self {
        Self {
            kind,
            table: table.into(),
            data: None,
            affected_rows,
            duration: Duration::ZERO,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// An operation as stored in the transaction context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedOperation {
    /// Position in the context's operation list at record time.
    pub sequence: usize,
    #[serde(flatten)]
    pub descriptor: OperationDescriptor,
    pub recorded_at: Timestamp,
}

/// Result of a successful `rollback_to_savepoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavepointRollback {
    pub savepoint: String,
    pub reason: String,
    /// Recorded operations discarded by the rollback.
    pub affected_operations: usize,
    /// Inner savepoints that no longer exist after the rollback.
    pub discarded_savepoints: Vec<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a SQL identifier (table, column, or savepoint name).
pub fn validate_identifier(kind: &str, name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} name must be 1 to {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid {kind} name '{name}': use letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Double-quote an identifier for SQL. Call [`validate_identifier`] first.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
