//! Transaction execution engine.
//!
//! Runs a unit of work inside one store transaction with an isolation level,
//! a whole-lifetime timeout and deadlock retries. A retry re-runs the unit of
//! work from scratch in a fresh transaction, so a unit of work must not
//! perform side effects outside the transaction (or must make them
//! idempotent).
//!
//! Units of work are closures returning a boxed future that borrows the
//! [`TxContext`]. Anything else they need is cloned into the future:
//!
//! ```ignore
//! let result = engine
//!     .execute(&options, &access, move |ctx| {
//!         let rows = rows.clone();
//!         Box::pin(async move {
//!             let n = ctx.tx().bulk_write("items", BulkOperationKind::Insert, &rows).await?;
//!             Ok(n)
//!         })
//!     })
//!     .await;
//! ```

mod context;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use verso_core::error::CoreError;
use verso_core::transaction::{
    AccessContext, RecordedOperation, SavepointRollback, TransactionOptions, TransactionState,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::{Store, StoreTx};

pub use context::TxContext;
use context::ContextTrail;

/// The future a unit of work returns.
pub type UnitOfWork<'c, T> = BoxFuture<'c, Result<T, EngineError>>;

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of one [`TransactionEngine::execute`] call.
///
/// Operation and savepoint fields describe the final attempt; operations of
/// earlier, retried attempts are discarded.
#[derive(Debug)]
pub struct TransactionResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<EngineError>,
    pub duration: Duration,
    pub attempts: u32,
    pub deadlock_retries: u32,
    pub operations_executed: usize,
    pub operations: Vec<RecordedOperation>,
    pub savepoints_created: Vec<String>,
    pub savepoint_rollbacks: Vec<SavepointRollback>,
    pub rollback_performed: bool,
    pub rollback_reason: Option<String>,
    pub final_state: TransactionState,
}

impl<T> TransactionResult<T> {
    fn committed(data: T, trail: ContextTrail, started: Instant, attempts: u32, retries: u32) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration: started.elapsed(),
            attempts,
            deadlock_retries: retries,
            operations_executed: trail.operations.len(),
            operations: trail.operations,
            savepoints_created: trail.savepoints_created,
            savepoint_rollbacks: trail.savepoint_rollbacks,
            rollback_performed: false,
            rollback_reason: None,
            final_state: TransactionState::Committed,
        }
    }

    fn failed(
        error: EngineError,
        trail: ContextTrail,
        started: Instant,
        attempts: u32,
        retries: u32,
        rollback_performed: bool,
    ) -> Self {
        Self {
            success: false,
            data: None,
            rollback_reason: rollback_performed.then(|| error.to_string()),
            error: Some(error),
            duration: started.elapsed(),
            attempts,
            deadlock_retries: retries,
            operations_executed: trail.operations.len(),
            operations: trail.operations,
            savepoints_created: trail.savepoints_created,
            savepoint_rollbacks: trail.savepoint_rollbacks,
            rollback_performed,
            final_state: TransactionState::RolledBack,
        }
    }

    /// Collapse into the unit of work's value or the terminal error.
    pub fn into_result(self) -> Result<T, EngineError> {
        match (self.data, self.error) {
            (_, Some(err)) => Err(err),
            (Some(data), None) => Ok(data),
            (None, None) => Err(EngineError::Core(CoreError::Internal(
                "transaction finished without a result".into(),
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TransactionEngine {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl TransactionEngine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Options seeded from the engine configuration.
    pub fn default_options(&self) -> TransactionOptions {
        self.config.transaction_options()
    }

    fn savepoint_limit(&self) -> usize {
        match self.store.max_savepoint_depth() {
            Some(store_limit) => store_limit.min(self.config.max_savepoint_depth),
            None => self.config.max_savepoint_depth,
        }
    }

    /// Run `work` with the default options and return its value.
    pub async fn run<T, F>(&self, access: &AccessContext, work: F) -> Result<T, EngineError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut TxContext) -> UnitOfWork<'c, T> + Send,
    {
        self.execute(&self.default_options(), access, work)
            .await
            .into_result()
    }

    /// Run `work` inside a transaction.
    ///
    /// Commits when the unit of work returns `Ok`, rolls back when it returns
    /// `Err` or the timeout expires. Deadlock-class errors re-run `work` in a
    /// new transaction up to `options.retry_count` times.
    pub async fn execute<T, F>(
        &self,
        options: &TransactionOptions,
        access: &AccessContext,
        mut work: F,
    ) -> TransactionResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut TxContext) -> UnitOfWork<'c, T> + Send,
    {
        let started = Instant::now();
        let label = options.label.as_deref().unwrap_or("transaction");
        let savepoint_limit = self.savepoint_limit();
        let mut attempt: u32 = 0;
        let mut retries: u32 = 0;

        loop {
            attempt += 1;
            // An earlier attempt of this call has been rolled back already.
            let rolled_back_before = attempt > 1;

            let remaining = options.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return self.timed_out(label, started, attempt, retries, rolled_back_before);
            }

            let tx = match tokio::time::timeout(remaining, self.store.begin(options.isolation)).await {
                Err(_) => return self.timed_out(label, started, attempt, retries, rolled_back_before),
                Ok(Err(err)) => {
                    let err = EngineError::Store(err);
                    if err.is_retryable() && retries < options.retry_count {
                        retries += 1;
                        self.backoff(label, options, attempt, &err, started).await;
                        continue;
                    }
                    tracing::error!(label, error = %err, "Failed to begin transaction");
                    return TransactionResult::failed(
                        err,
                        ContextTrail::default(),
                        started,
                        attempt,
                        retries,
                        rolled_back_before,
                    );
                }
                Ok(Ok(tx)) => tx,
            };

            tracing::debug!(
                label,
                attempt,
                isolation = %options.isolation,
                backend = self.store.backend(),
                "Transaction started"
            );

            let mut ctx = TxContext::new(tx, access.clone(), attempt, savepoint_limit);
            let remaining = options.timeout.saturating_sub(started.elapsed());
            let outcome = tokio::time::timeout(remaining, work(&mut ctx)).await;
            let (tx, trail) = ctx.finish();

            let error = match outcome {
                Ok(Ok(data)) => match tx.commit().await {
                    Ok(()) => {
                        tracing::info!(
                            label,
                            attempts = attempt,
                            deadlock_retries = retries,
                            operations = trail.operations.len(),
                            duration_ms = started.elapsed().as_millis() as u64,
                            "Transaction committed"
                        );
                        return TransactionResult::committed(data, trail, started, attempt, retries);
                    }
                    // A failed COMMIT leaves nothing to roll back.
                    Err(err) => EngineError::Store(err),
                },
                Ok(Err(err)) => {
                    rollback_quietly(tx, label).await;
                    err
                }
                Err(_) => {
                    rollback_quietly(tx, label).await;
                    let err = EngineError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    tracing::error!(label, attempt, error = %err, "Transaction timed out");
                    return TransactionResult::failed(err, trail, started, attempt, retries, true);
                }
            };

            if error.is_retryable() && retries < options.retry_count {
                retries += 1;
                self.backoff(label, options, attempt, &error, started).await;
                continue;
            }

            tracing::warn!(
                label,
                attempts = attempt,
                error = %error,
                code = error.code(),
                "Transaction rolled back"
            );
            return TransactionResult::failed(error, trail, started, attempt, retries, true);
        }
    }

    async fn backoff(
        &self,
        label: &str,
        options: &TransactionOptions,
        attempt: u32,
        error: &EngineError,
        started: Instant,
    ) {
        let delay = options
            .retry_backoff
            .saturating_mul(attempt)
            .min(options.timeout.saturating_sub(started.elapsed()));
        tracing::warn!(
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying transaction after deadlock"
        );
        tokio::time::sleep(delay).await;
    }

    fn timed_out<T>(
        &self,
        label: &str,
        started: Instant,
        attempt: u32,
        retries: u32,
        rollback_performed: bool,
    ) -> TransactionResult<T> {
        let err = EngineError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::error!(label, attempt, error = %err, "Transaction timed out");
        TransactionResult::failed(
            err,
            ContextTrail::default(),
            started,
            attempt,
            retries,
            rollback_performed,
        )
    }
}

async fn rollback_quietly(tx: Box<dyn StoreTx>, label: &str) {
    if let Err(err) = tx.rollback().await {
        tracing::error!(label, error = %err, "Rollback failed");
    }
}
