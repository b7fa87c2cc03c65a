//! Transactional bulk operation vocabulary and batching math.
//!
//! The bulk manager in `verso_db` owns execution. This module holds the
//! settings, directives, error classification, and progress/metrics types so
//! callers can configure runs and render results without a database crate.

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::transaction::validate_identifier;

/// Default number of items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Prefix of the savepoint opened around every batch.
pub const BATCH_SAVEPOINT_PREFIX: &str = "bulk_batch_";

/// Prefix of the periodic savepoints of `SAVEPOINT_LEVEL` runs.
pub const PERIODIC_SAVEPOINT_PREFIX: &str = "bulk_sp_";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How much work is undone when a run aborts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStrategy {
    /// One transaction per batch; an abort keeps everything written so far.
    None,
    /// One transaction per batch; an abort rolls back the current batch.
    #[default]
    BatchLevel,
    /// One transaction for the run, with a savepoint every N batches.
    SavepointLevel,
    /// One transaction for the run; an abort rolls back everything.
    Full,
}

impl RollbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::BatchLevel => "BATCH_LEVEL",
            Self::SavepointLevel => "SAVEPOINT_LEVEL",
            Self::Full => "FULL",
        }
    }

    /// Returns `true` when every batch runs inside one shared transaction.
    pub fn uses_single_transaction(&self) -> bool {
        matches!(self, Self::SavepointLevel | Self::Full)
    }
}

/// The write a bulk run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationKind {
    Insert,
    Update,
    Delete,
}

impl BulkOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Directive returned by an error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorAction {
    /// Mark the item failed and continue the batch.
    SkipItem,
    /// Undo everything since the most recent periodic savepoint.
    RollbackToSavepoint,
    /// Discard the current batch and move on to the next one.
    RollbackBatch,
    /// Stop processing and roll back per the run's strategy.
    AbortOperation,
}

impl ErrorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipItem => "SKIP_ITEM",
            Self::RollbackToSavepoint => "ROLLBACK_TO_SAVEPOINT",
            Self::RollbackBatch => "ROLLBACK_BATCH",
            Self::AbortOperation => "ABORT_OPERATION",
        }
    }
}

/// What went wrong with an item or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkErrorKind {
    Validation,
    Transformation,
    IntegrityViolation,
    Database,
    Savepoint,
    Transaction,
    Threshold,
}

impl BulkErrorKind {
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation | Self::Transformation => ErrorSeverity::Medium,
            Self::IntegrityViolation | Self::Database => ErrorSeverity::High,
            Self::Savepoint | Self::Transaction | Self::Threshold => ErrorSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// What happens when an integrity check fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    #[default]
    Abort,
    Skip,
}

/// Declarative assertion evaluated per item before the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityRule {
    /// No existing row (or earlier item in the run's batch) has the same value.
    Unique { column: String },
    /// The value exists in `references_table.references_column`. Nulls pass.
    ForeignKey {
        column: String,
        references_table: String,
        references_column: String,
    },
}

impl IntegrityRule {
    pub fn column(&self) -> &str {
        match self {
            Self::Unique { column } | Self::ForeignKey { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub rule: IntegrityRule,
    #[serde(default)]
    pub on_violation: ViolationPolicy,
}

impl IntegrityCheck {
    pub fn unique(column: impl Into<String>, on_violation: ViolationPolicy) -> Self {
        Self {
            rule: IntegrityRule::Unique {
                column: column.into(),
            },
            on_violation,
        }
    }

    pub fn foreign_key(
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
        on_violation: ViolationPolicy,
    ) -> Self {
        Self {
            rule: IntegrityRule::ForeignKey {
                column: column.into(),
                references_table: references_table.into(),
                references_column: references_column.into(),
            },
            on_violation,
        }
    }
}

// ---------------------------------------------------------------------------
// Reporting types
// ---------------------------------------------------------------------------

/// One entry in a bulk result's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Index into the submitted items; `None` for batch-level failures.
    pub item_index: Option<usize>,
    pub batch_index: usize,
    pub kind: BulkErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<serde_json::Value>,
    /// Directive applied in response, once decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ErrorAction>,
}

impl BulkItemError {
    pub fn new(kind: BulkErrorKind, batch_index: usize, message: impl Into<String>) -> Self {
        Self {
            item_index: None,
            batch_index,
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            item: None,
            action: None,
        }
    }

    pub fn for_item(mut self, item_index: usize, item: serde_json::Value) -> Self {
        self.item_index = Some(item_index);
        self.item = Some(item);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Where an error happened, handed to the error handler with the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    pub batch_index: usize,
    pub batch_count: usize,
    pub item_index: Option<usize>,
    pub items_in_batch: usize,
    pub processed: usize,
    pub failed: usize,
    pub latest_savepoint: Option<String>,
    pub strategy: RollbackStrategy,
}

/// Running totals, reported after every batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub total_items: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rolled_back: usize,
    pub batch_index: usize,
    pub batch_count: usize,
    pub percent_complete: f64,
}

/// Performance numbers for a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkMetrics {
    pub duration: Duration,
    pub batches_processed: usize,
    pub operations_executed: usize,
    pub operations_per_second: f64,
    pub rows_per_second: f64,
    /// Largest serialized batch payload held at once, in bytes. Stands in
    /// for peak memory use.
    pub peak_batch_payload_bytes: usize,
    pub deadlock_count: u32,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Plain-data part of a bulk run's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSettings {
    pub table: String,
    pub operation: BulkOperationKind,
    pub batch_size: usize,
    pub rollback_strategy: RollbackStrategy,
    /// Create a savepoint every N batches (`SAVEPOINT_LEVEL` only; 0 disables).
    pub savepoint_frequency: usize,
    pub continue_on_error: bool,
    pub max_errors: Option<usize>,
    /// Failure percentage (0-100) above which the run aborts.
    pub error_threshold: Option<f64>,
    #[serde(default)]
    pub integrity_checks: Vec<IntegrityCheck>,
}

impl BulkSettings {
    pub fn new(table: impl Into<String>, operation: BulkOperationKind) -> Self {
        Self {
            table: table.into(),
            operation,
            batch_size: DEFAULT_BATCH_SIZE,
            rollback_strategy: RollbackStrategy::default(),
            savepoint_frequency: 1,
            continue_on_error: true,
            max_errors: None,
            error_threshold: None,
            integrity_checks: Vec::new(),
        }
    }
}

/// Validate bulk settings before any work starts.
pub fn validate_settings(settings: &BulkSettings) -> Result<(), CoreError> {
    validate_identifier("table", &settings.table)?;
    if settings.batch_size == 0 || settings.batch_size > MAX_BATCH_SIZE {
        return Err(CoreError::Validation(format!(
            "batch_size must be between 1 and {MAX_BATCH_SIZE}"
        )));
    }
    if let Some(threshold) = settings.error_threshold {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(CoreError::Validation(
                "error_threshold must be a percentage between 0 and 100".into(),
            ));
        }
    }
    if settings.max_errors == Some(0) {
        return Err(CoreError::Validation("max_errors must be at least 1".into()));
    }
    for check in &settings.integrity_checks {
        validate_identifier("column", check.rule.column())?;
        if let IntegrityRule::ForeignKey {
            references_table,
            references_column,
            ..
        } = &check.rule
        {
            validate_identifier("table", references_table)?;
            validate_identifier("column", references_column)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Batching math
// ---------------------------------------------------------------------------

/// Split `len` items into consecutive ranges of at most `batch_size`.
pub fn partition(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Failed items as a percentage of processed items.
pub fn failure_percentage(failed: usize, processed: usize) -> f64 {
    if processed == 0 {
        0.0
    } else {
        failed as f64 * 100.0 / processed as f64
    }
}

/// Returns `true` when the failure percentage is above `threshold`.
pub fn exceeds_threshold(failed: usize, processed: usize, threshold: Option<f64>) -> bool {
    threshold.is_some_and(|limit| failure_percentage(failed, processed) > limit)
}

/// Returns `true` when a periodic savepoint opens before `batch_index`.
pub fn savepoint_due(batch_index: usize, frequency: usize) -> bool {
    frequency > 0 && batch_index % frequency == 0
}

/// Rate of `count` over `elapsed`; zero for an empty interval.
pub fn per_second(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Directive used when no error handler is configured.
///
/// Item errors skip the item; batch errors discard the batch. Either aborts
/// when the run does not continue on error.
pub fn default_action(item_level: bool, continue_on_error: bool) -> ErrorAction {
    match (continue_on_error, item_level) {
        (false, _) => ErrorAction::AbortOperation,
        (true, true) => ErrorAction::SkipItem,
        (true, false) => ErrorAction::RollbackBatch,
    }
}

pub fn batch_savepoint_name(batch_index: usize) -> String {
    format!("{BATCH_SAVEPOINT_PREFIX}{batch_index}")
}

pub fn periodic_savepoint_name(batch_index: usize) -> String {
    format!("{PERIODIC_SAVEPOINT_PREFIX}{batch_index}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
