//! Transactional bulk operations.
//!
//! Items are split into batches and written with one `bulk_write` per batch.
//! `FULL` and `SAVEPOINT_LEVEL` runs share one transaction across batches;
//! `NONE` and `BATCH_LEVEL` commit each batch on its own. Every batch runs
//! under an internal savepoint so a failed write can be discarded without
//! poisoning the surrounding transaction.
//!
//! In single-transaction runs the progress callback fires from inside the
//! transaction, and fires again for replayed batches after a deadlock retry.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;
use verso_core::audit::{action_types, resource_types, AuditEvent, AuditSink};
use verso_core::bulk::{
    batch_savepoint_name, default_action, exceeds_threshold, failure_percentage, partition,
    per_second, periodic_savepoint_name, savepoint_due, validate_settings, BatchContext,
    BulkErrorKind, BulkItemError, BulkMetrics, BulkOperationKind, BulkProgress, BulkSettings,
    ErrorAction, ErrorSeverity, IntegrityCheck, IntegrityRule, RollbackStrategy, ViolationPolicy,
};
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};

use crate::engine::{TransactionEngine, TransactionResult, TxContext};
use crate::error::EngineError;
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-item validation. `Err` carries the message recorded for the item.
pub type ValidateFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Per-item transformation applied after validation.
pub type TransformFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

pub type ProgressFn = Arc<dyn Fn(&BulkProgress) + Send + Sync>;

/// Decides how the run continues after an item or batch error.
pub type ErrorHandlerFn = Arc<dyn Fn(&BulkItemError, &BatchContext) -> ErrorAction + Send + Sync>;

/// A bulk run: settings, the items and optional callbacks.
#[derive(Clone)]
pub struct BulkConfig {
    pub settings: BulkSettings,
    pub items: Vec<Value>,
    pub validate: Option<ValidateFn>,
    pub transform: Option<TransformFn>,
    pub on_progress: Option<ProgressFn>,
    pub error_handler: Option<ErrorHandlerFn>,
}

impl BulkConfig {
    pub fn new(settings: BulkSettings, items: Vec<Value>) -> Self {
        Self {
            settings,
            items,
            validate: None,
            transform: None,
            on_progress: None,
            error_handler: None,
        }
    }

    pub fn with_validator(
        mut self,
        validate: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn with_transform(
        mut self,
        transform: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_progress(mut self, on_progress: impl Fn(&BulkProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&BulkItemError, &BatchContext) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for BulkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkConfig")
            .field("settings", &self.settings)
            .field("items", &self.items.len())
            .field("validate", &self.validate.is_some())
            .field("transform", &self.transform.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Structured summary of a bulk run, returned even when the run aborts.
#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub operation_id: Uuid,
    /// The run reached its last batch without aborting. Item failures that
    /// were skipped are reported in the counts and `errors`.
    pub success: bool,
    pub table: String,
    pub operation: BulkOperationKind,
    pub rollback_strategy: RollbackStrategy,
    pub total_items: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Rows discarded by a rollback, whether already written or still pending.
    pub rolled_back: usize,
    pub errors: Vec<BulkItemError>,
    pub savepoints_used: Vec<String>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub rollback_performed: bool,
    pub rollback_reason: Option<String>,
    pub metrics: BulkMetrics,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Counters carried across batches. Each transaction works on a copy and
/// hands it back, so a retried transaction restarts from the pre-transaction
/// totals.
#[derive(Debug, Clone, Default)]
struct RunState {
    processed: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    rolled_back: usize,
    batches_processed: usize,
    errors: Vec<BulkItemError>,
    savepoints_used: Vec<String>,
    latest_savepoint: Option<String>,
    written_since_savepoint: usize,
    peak_batch_payload_bytes: usize,
}

/// How a transaction's unit of work ended when it did not fail.
#[derive(Debug)]
enum Flow {
    Completed,
    /// Aborted under `NONE`: the work so far is committed.
    Aborted(String),
}

/// Why processing stopped early inside a transaction.
enum Stop {
    /// Abort per the run's rollback strategy.
    Abort(EngineError),
    /// Store or savepoint failure; the transaction fails (and may be retried).
    Fatal(EngineError),
}

impl From<EngineError> for Stop {
    fn from(err: EngineError) -> Self {
        Self::Fatal(err)
    }
}

impl From<StoreError> for Stop {
    fn from(err: StoreError) -> Self {
        Self::Fatal(err.into())
    }
}

enum ItemOutcome {
    Ready(Value),
    Skipped,
    Failed(BulkItemError),
}

type Batch = (usize, Range<usize>);

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BulkOperationsManager {
    engine: TransactionEngine,
    audit: Arc<dyn AuditSink>,
}

impl BulkOperationsManager {
    pub fn new(engine: TransactionEngine, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    /// Run a bulk operation.
    ///
    /// Returns `Err` only for invalid settings. Every failure after the run
    /// starts is reported in the [`BulkResult`].
    pub async fn execute_bulk(
        &self,
        config: BulkConfig,
        access: &AccessContext,
    ) -> Result<BulkResult, EngineError> {
        validate_settings(&config.settings)?;

        let started = Instant::now();
        let operation_id = Uuid::now_v7();
        let config = Arc::new(config);
        let settings = &config.settings;
        let strategy = settings.rollback_strategy;
        let batches: Vec<Batch> = partition(config.items.len(), settings.batch_size)
            .into_iter()
            .enumerate()
            .collect();
        let batch_count = batches.len();

        tracing::info!(
            %operation_id,
            table = %settings.table,
            operation = settings.operation.as_str(),
            strategy = strategy.as_str(),
            items = config.items.len(),
            batches = batch_count,
            "Bulk operation started"
        );

        let groups: Vec<Vec<Batch>> = if strategy.uses_single_transaction() {
            vec![batches]
        } else {
            batches.into_iter().map(|batch| vec![batch]).collect()
        };

        let mut run = RunState::default();
        let mut operations_executed = 0;
        let mut deadlock_count = 0;
        let mut abort_reason = None;
        let mut rollback_reason = None;

        for group in groups.into_iter().filter(|g| !g.is_empty()) {
            let first_batch = group[0].0;
            let base_succeeded = run.succeeded;
            let (after, result) = self
                .run_transaction(&config, run.clone(), group, batch_count, access)
                .await;
            run = after;
            operations_executed += result.operations_executed;
            deadlock_count += result.deadlock_retries;

            if result.success {
                if let Some(Flow::Aborted(reason)) = result.data {
                    abort_reason = Some(reason);
                    break;
                }
                continue;
            }

            // The transaction rolled back: its writes are gone.
            let undone = run.succeeded.saturating_sub(base_succeeded);
            run.succeeded = base_succeeded;
            run.rolled_back += undone;
            let error = result.error.unwrap_or_else(|| {
                EngineError::Aborted("transaction failed without an error".into())
            });
            if !matches!(
                error,
                EngineError::Aborted(_) | EngineError::IntegrityViolation { .. }
            ) {
                run.errors.push(
                    BulkItemError::new(BulkErrorKind::Transaction, first_batch, error.to_string())
                        .with_severity(ErrorSeverity::Critical),
                );
            }
            abort_reason = Some(error.to_string());
            rollback_reason = result.rollback_reason.or_else(|| Some(error.to_string()));
            break;
        }

        let duration = started.elapsed();
        let aborted = abort_reason.is_some();
        let result = BulkResult {
            operation_id,
            success: !aborted,
            table: settings.table.clone(),
            operation: settings.operation,
            rollback_strategy: strategy,
            total_items: config.items.len(),
            processed: run.processed,
            succeeded: run.succeeded,
            failed: run.failed,
            skipped: run.skipped,
            rolled_back: run.rolled_back,
            errors: run.errors,
            savepoints_used: run.savepoints_used,
            aborted,
            abort_reason,
            rollback_performed: rollback_reason.is_some(),
            rollback_reason,
            metrics: BulkMetrics {
                duration,
                batches_processed: run.batches_processed,
                operations_executed,
                operations_per_second: per_second(operations_executed, duration),
                rows_per_second: per_second(run.succeeded, duration),
                peak_batch_payload_bytes: run.peak_batch_payload_bytes,
                deadlock_count,
            },
        };

        if result.aborted {
            tracing::warn!(
                %operation_id,
                reason = result.abort_reason.as_deref().unwrap_or_default(),
                rollback_performed = result.rollback_performed,
                succeeded = result.succeeded,
                failed = result.failed,
                "Bulk operation aborted"
            );
        } else {
            tracing::info!(
                %operation_id,
                succeeded = result.succeeded,
                failed = result.failed,
                skipped = result.skipped,
                duration_ms = duration.as_millis() as u64,
                "Bulk operation finished"
            );
        }

        self.audit.record(
            AuditEvent::new(action_types::BULK_OPERATION, resource_types::BULK_TABLE, &result.table)
                .with_user(access.user_id)
                .with_details(json!({
                    "operation_id": operation_id,
                    "operation": result.operation,
                    "rollback_strategy": result.rollback_strategy,
                    "total_items": result.total_items,
                    "succeeded": result.succeeded,
                    "failed": result.failed,
                    "skipped": result.skipped,
                    "aborted": result.aborted,
                })),
        );
        Ok(result)
    }

    /// Process `batches` in one engine transaction, starting from `base`.
    async fn run_transaction(
        &self,
        config: &Arc<BulkConfig>,
        base: RunState,
        batches: Vec<Batch>,
        batch_count: usize,
        access: &AccessContext,
    ) -> (RunState, TransactionResult<Flow>) {
        let slot: Arc<Mutex<Option<RunState>>> = Arc::new(Mutex::new(None));
        let options = self.engine.default_options().with_label("bulk_operation");

        let work_slot = Arc::clone(&slot);
        let work_config = Arc::clone(config);
        let work_batches = Arc::new(batches);
        let work_base = base.clone();
        let result = self
            .engine
            .execute(&options, access, move |ctx| {
                let slot = Arc::clone(&work_slot);
                let config = Arc::clone(&work_config);
                let batches = Arc::clone(&work_batches);
                let mut run = work_base.clone();
                Box::pin(async move {
                    let outcome = process_batches(ctx, &config, &batches, batch_count, &mut run).await;
                    *slot.lock().await = Some(run);
                    outcome
                })
            })
            .await;

        // A timed-out attempt never hands its state back.
        let state = slot.lock().await.take().unwrap_or(base);
        (state, result)
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

async fn process_batches(
    ctx: &mut TxContext,
    config: &BulkConfig,
    batches: &[Batch],
    batch_count: usize,
    run: &mut RunState,
) -> Result<Flow, EngineError> {
    let settings = &config.settings;
    let strategy = settings.rollback_strategy;

    for (batch_index, range) in batches {
        match run_batch(ctx, config, *batch_index, batch_count, range.clone(), run).await {
            Ok(()) => {}
            Err(Stop::Fatal(err)) => return Err(err),
            Err(Stop::Abort(err)) if strategy == RollbackStrategy::None => {
                return Ok(Flow::Aborted(err.to_string()));
            }
            Err(Stop::Abort(err)) => return Err(err),
        }
    }
    Ok(Flow::Completed)
}

/// One batch plus its periodic savepoint, progress report and limit checks.
async fn run_batch(
    ctx: &mut TxContext,
    config: &BulkConfig,
    batch_index: usize,
    batch_count: usize,
    range: Range<usize>,
    run: &mut RunState,
) -> Result<(), Stop> {
    let settings = &config.settings;
    if settings.rollback_strategy == RollbackStrategy::SavepointLevel
        && savepoint_due(batch_index, settings.savepoint_frequency)
    {
        open_periodic_savepoint(ctx, run, batch_index).await?;
    }
    process_batch(ctx, config, batch_index, batch_count, range, run).await?;
    run.batches_processed += 1;
    report_progress(config, run, batch_index, batch_count);
    match check_limits(settings, run, batch_index) {
        Some(err) => Err(Stop::Abort(err)),
        None => Ok(()),
    }
}

async fn open_periodic_savepoint(
    ctx: &mut TxContext,
    run: &mut RunState,
    batch_index: usize,
) -> Result<(), Stop> {
    // Only the latest periodic savepoint is a rollback target.
    if let Some(previous) = run.latest_savepoint.take() {
        ctx.release_savepoint(&previous).await?;
    }
    let name = periodic_savepoint_name(batch_index);
    ctx.create_savepoint(&name).await?;
    run.savepoints_used.push(name.clone());
    run.latest_savepoint = Some(name);
    run.written_since_savepoint = 0;
    Ok(())
}

async fn process_batch(
    ctx: &mut TxContext,
    config: &BulkConfig,
    batch_index: usize,
    batch_count: usize,
    range: Range<usize>,
    run: &mut RunState,
) -> Result<(), Stop> {
    let settings = &config.settings;
    let batch_savepoint = batch_savepoint_name(batch_index);
    let items_in_batch = range.len();
    ctx.create_savepoint(&batch_savepoint).await?;

    let mut pending: Vec<Value> = Vec::with_capacity(items_in_batch);
    let mut seen: HashMap<String, HashSet<String>> = HashMap::new();

    for index in range.clone() {
        run.processed += 1;
        let outcome = match prepare_item(ctx, config, batch_index, index, &mut seen, run).await {
            Ok(outcome) => outcome,
            Err(Stop::Abort(err)) => {
                // Prepared rows of this batch are never written.
                run.rolled_back += pending.len();
                return Err(Stop::Abort(err));
            }
            Err(fatal) => return Err(fatal),
        };
        let error = match outcome {
            ItemOutcome::Ready(row) => {
                pending.push(row);
                continue;
            }
            ItemOutcome::Skipped => {
                run.skipped += 1;
                continue;
            }
            ItemOutcome::Failed(error) => error,
        };

        run.failed += 1;
        let batch_ctx = batch_context(settings, run, batch_index, batch_count, Some(index), items_in_batch);
        let action = decide(config, &error, &batch_ctx, true);
        let message = error.message.clone();
        run.errors.push(BulkItemError {
            action: Some(action),
            ..error
        });

        let remaining = range.end - index - 1;
        match action {
            ErrorAction::SkipItem => {}
            ErrorAction::RollbackBatch => {
                discard_batch(ctx, run, &batch_savepoint, pending.len(), remaining, &message).await?;
                return Ok(());
            }
            ErrorAction::RollbackToSavepoint => {
                rollback_to_latest(ctx, run, &batch_savepoint, pending.len(), remaining, &message)
                    .await?;
                return Ok(());
            }
            ErrorAction::AbortOperation => {
                run.rolled_back += pending.len();
                return Err(Stop::Abort(EngineError::Aborted(format!(
                    "error handler aborted the run at item {index}: {message}"
                ))));
            }
        }
    }

    if !pending.is_empty() {
        let rows = pending.len();
        let payload_bytes: usize = pending.iter().map(|row| row.to_string().len()).sum();
        run.peak_batch_payload_bytes = run.peak_batch_payload_bytes.max(payload_bytes);

        let write_started = Instant::now();
        match ctx
            .tx()
            .bulk_write(&settings.table, settings.operation, &pending)
            .await
        {
            Ok(affected) => {
                ctx.record_operation(
                    OperationDescriptor::new(operation_kind(settings.operation), &settings.table, affected)
                        .with_data(json!({ "batch_index": batch_index, "rows": rows }))
                        .with_duration(write_started.elapsed()),
                );
                run.succeeded += rows;
                run.written_since_savepoint += rows;
            }
            Err(err) if err.is_retryable() => return Err(err.into()),
            Err(err) => {
                let message = err.to_string();
                ctx.rollback_to_savepoint(&batch_savepoint, &message).await?;
                ctx.release_savepoint(&batch_savepoint).await?;
                run.failed += rows;

                let kind = match err {
                    StoreError::UniqueViolation { .. } | StoreError::ForeignKeyViolation { .. } => {
                        BulkErrorKind::IntegrityViolation
                    }
                    _ => BulkErrorKind::Database,
                };
                let error = BulkItemError::new(kind, batch_index, &message);
                let batch_ctx = batch_context(settings, run, batch_index, batch_count, None, items_in_batch);
                let action = decide(config, &error, &batch_ctx, false);
                run.errors.push(BulkItemError {
                    action: Some(action),
                    ..error
                });
                tracing::warn!(
                    batch_index,
                    rows,
                    error = %message,
                    action = action.as_str(),
                    "Bulk batch write failed"
                );

                return match action {
                    ErrorAction::SkipItem | ErrorAction::RollbackBatch => Ok(()),
                    ErrorAction::RollbackToSavepoint => {
                        rollback_to_latest(ctx, run, &batch_savepoint, 0, 0, &message).await
                    }
                    ErrorAction::AbortOperation => Err(Stop::Abort(EngineError::Aborted(format!(
                        "batch {batch_index} failed: {message}"
                    )))),
                };
            }
        }
    }

    ctx.release_savepoint(&batch_savepoint).await?;
    Ok(())
}

/// Validate, transform and integrity-check one item.
async fn prepare_item(
    ctx: &mut TxContext,
    config: &BulkConfig,
    batch_index: usize,
    index: usize,
    seen: &mut HashMap<String, HashSet<String>>,
    run: &mut RunState,
) -> Result<ItemOutcome, Stop> {
    let settings = &config.settings;
    let item = config.items[index].clone();

    if let Some(validate) = &config.validate {
        if let Err(message) = validate(&item) {
            return Ok(ItemOutcome::Failed(
                BulkItemError::new(BulkErrorKind::Validation, batch_index, message).for_item(index, item),
            ));
        }
    }

    let row = match &config.transform {
        Some(transform) => match transform(item.clone()) {
            Ok(row) => row,
            Err(message) => {
                return Ok(ItemOutcome::Failed(
                    BulkItemError::new(BulkErrorKind::Transformation, batch_index, message)
                        .for_item(index, item),
                ));
            }
        },
        None => item,
    };

    for check in &settings.integrity_checks {
        let Some(message) = check_integrity(ctx, settings, check, &row, seen).await? else {
            continue;
        };
        let column = check.rule.column().to_string();
        match check.on_violation {
            ViolationPolicy::Skip => {
                run.errors.push(BulkItemError {
                    action: Some(ErrorAction::SkipItem),
                    ..BulkItemError::new(BulkErrorKind::IntegrityViolation, batch_index, message)
                        .for_item(index, row)
                        .with_severity(ErrorSeverity::Low)
                });
                return Ok(ItemOutcome::Skipped);
            }
            ViolationPolicy::Abort => {
                run.failed += 1;
                run.errors.push(BulkItemError {
                    action: Some(ErrorAction::AbortOperation),
                    ..BulkItemError::new(BulkErrorKind::IntegrityViolation, batch_index, &message)
                        .for_item(index, row)
                });
                return Err(Stop::Abort(EngineError::IntegrityViolation {
                    table: settings.table.clone(),
                    column,
                    message,
                }));
            }
        }
    }

    for check in &settings.integrity_checks {
        if let IntegrityRule::Unique { column } = &check.rule {
            if let Some(value) = row.get(column).filter(|v| !v.is_null()) {
                seen.entry(column.clone()).or_default().insert(value.to_string());
            }
        }
    }
    Ok(ItemOutcome::Ready(row))
}

/// `Some(message)` when `row` violates `check`.
async fn check_integrity(
    ctx: &mut TxContext,
    settings: &BulkSettings,
    check: &IntegrityCheck,
    row: &Value,
    seen: &HashMap<String, HashSet<String>>,
) -> Result<Option<String>, Stop> {
    let column = check.rule.column();
    let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
        return Ok(None);
    };

    match &check.rule {
        IntegrityRule::Unique { .. } => {
            // Updates and deletes address existing rows by design.
            if settings.operation != BulkOperationKind::Insert {
                return Ok(None);
            }
            if seen.get(column).is_some_and(|values| values.contains(&value.to_string())) {
                return Ok(Some(format!("duplicate {column} {value} within the batch")));
            }
            let existing = ctx.tx().count_matching(&settings.table, column, value).await?;
            Ok((existing > 0).then(|| format!("{column} {value} already exists")))
        }
        IntegrityRule::ForeignKey {
            references_table,
            references_column,
            ..
        } => {
            if settings.operation == BulkOperationKind::Delete {
                return Ok(None);
            }
            let found = ctx
                .tx()
                .count_matching(references_table, references_column, value)
                .await?;
            Ok((found == 0).then(|| {
                format!("{column} {value} has no match in {references_table}.{references_column}")
            }))
        }
    }
}

/// Undo the current batch and skip its remaining items.
async fn discard_batch(
    ctx: &mut TxContext,
    run: &mut RunState,
    batch_savepoint: &str,
    pending: usize,
    remaining: usize,
    reason: &str,
) -> Result<(), Stop> {
    ctx.rollback_to_savepoint(batch_savepoint, reason).await?;
    ctx.release_savepoint(batch_savepoint).await?;
    run.rolled_back += pending;
    run.processed += remaining;
    run.skipped += remaining;
    Ok(())
}

/// Undo everything since the latest periodic savepoint, or just the batch
/// when there is none.
async fn rollback_to_latest(
    ctx: &mut TxContext,
    run: &mut RunState,
    batch_savepoint: &str,
    pending: usize,
    remaining: usize,
    reason: &str,
) -> Result<(), Stop> {
    let Some(savepoint) = run.latest_savepoint.clone() else {
        if ctx.has_savepoint(batch_savepoint) {
            return discard_batch(ctx, run, batch_savepoint, pending, remaining, reason).await;
        }
        run.processed += remaining;
        run.skipped += remaining;
        return Ok(());
    };

    ctx.rollback_to_savepoint(&savepoint, reason).await?;
    let undone = run.written_since_savepoint;
    run.succeeded -= undone;
    run.rolled_back += undone + pending;
    run.written_since_savepoint = 0;
    run.processed += remaining;
    run.skipped += remaining;
    Ok(())
}

fn decide(config: &BulkConfig, error: &BulkItemError, batch: &BatchContext, item_level: bool) -> ErrorAction {
    match &config.error_handler {
        Some(handler) => handler(error, batch),
        None => default_action(item_level, config.settings.continue_on_error),
    }
}

fn batch_context(
    settings: &BulkSettings,
    run: &RunState,
    batch_index: usize,
    batch_count: usize,
    item_index: Option<usize>,
    items_in_batch: usize,
) -> BatchContext {
    BatchContext {
        batch_index,
        batch_count,
        item_index,
        items_in_batch,
        processed: run.processed,
        failed: run.failed,
        latest_savepoint: run.latest_savepoint.clone(),
        strategy: settings.rollback_strategy,
    }
}

fn report_progress(config: &BulkConfig, run: &RunState, batch_index: usize, batch_count: usize) {
    let total_items = config.items.len();
    let progress = BulkProgress {
        total_items,
        processed: run.processed,
        succeeded: run.succeeded,
        failed: run.failed,
        skipped: run.skipped,
        rolled_back: run.rolled_back,
        batch_index,
        batch_count,
        percent_complete: if total_items == 0 {
            100.0
        } else {
            run.processed as f64 * 100.0 / total_items as f64
        },
    };
    tracing::debug!(
        batch_index,
        processed = progress.processed,
        succeeded = progress.succeeded,
        failed = progress.failed,
        "Bulk batch finished"
    );
    if let Some(on_progress) = &config.on_progress {
        on_progress(&progress);
    }
}

/// An abort error when the run has crossed `max_errors` or the threshold.
fn check_limits(settings: &BulkSettings, run: &mut RunState, batch_index: usize) -> Option<EngineError> {
    let message = if settings.max_errors.is_some_and(|max| run.failed > max) {
        format!(
            "{} failed items exceed max_errors of {}",
            run.failed,
            settings.max_errors.unwrap_or_default()
        )
    } else if exceeds_threshold(run.failed, run.processed, settings.error_threshold) {
        format!(
            "failure rate {:.1}% exceeds the {:.1}% threshold",
            failure_percentage(run.failed, run.processed),
            settings.error_threshold.unwrap_or_default()
        )
    } else {
        return None;
    };

    run.errors.push(BulkItemError {
        action: Some(ErrorAction::AbortOperation),
        ..BulkItemError::new(BulkErrorKind::Threshold, batch_index, &message)
    });
    Some(EngineError::Aborted(message))
}

fn operation_kind(kind: BulkOperationKind) -> OperationKind {
    match kind {
        BulkOperationKind::Insert => OperationKind::Insert,
        BulkOperationKind::Update => OperationKind::Update,
        BulkOperationKind::Delete => OperationKind::Delete,
    }
}
