//! Per-invocation transaction context handed to a unit of work.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use verso_core::transaction::{
    validate_identifier, AccessContext, OperationDescriptor, RecordedOperation,
    SavepointRollback, TransactionState,
};
use verso_core::types::DbId;

use crate::error::EngineError;
use crate::store::{StoreError, StoreTx};

/// An active savepoint and the operation count at the moment it was created.
#[derive(Debug, Clone)]
struct SavepointMark {
    name: String,
    operation_index: usize,
}

/// What a context leaves behind once its transaction is handed back.
#[derive(Debug, Default)]
pub(crate) struct ContextTrail {
    pub operations: Vec<RecordedOperation>,
    pub savepoints_created: Vec<String>,
    pub savepoint_rollbacks: Vec<SavepointRollback>,
}

/// The unit of work's view of its transaction.
///
/// Tracks recorded operations and strictly nested savepoints. Rolling back
/// to a savepoint discards the operations recorded after it and every
/// savepoint created after it; the savepoint itself stays usable.
pub struct TxContext {
    tx: Box<dyn StoreTx>,
    access: AccessContext,
    attempt: u32,
    state: TransactionState,
    started_at: Instant,
    max_savepoint_depth: usize,
    operations: Vec<RecordedOperation>,
    savepoints: Vec<SavepointMark>,
    savepoints_created: Vec<String>,
    savepoint_rollbacks: Vec<SavepointRollback>,
}

impl TxContext {
    pub(crate) fn new(
        tx: Box<dyn StoreTx>,
        access: AccessContext,
        attempt: u32,
        max_savepoint_depth: usize,
    ) -> Self {
        Self {
            tx,
            access,
            attempt,
            state: TransactionState::Started,
            started_at: Instant::now(),
            max_savepoint_depth,
            operations: Vec::new(),
            savepoints: Vec::new(),
            savepoints_created: Vec::new(),
            savepoint_rollbacks: Vec::new(),
        }
    }

    /// The open store transaction.
    pub fn tx(&mut self) -> &mut dyn StoreTx {
        self.tx.as_mut()
    }

    pub fn access(&self) -> &AccessContext {
        &self.access
    }

    pub fn user_id(&self) -> Option<DbId> {
        self.access.user_id
    }

    /// 1 for the first attempt, incremented on each deadlock retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn operations(&self) -> &[RecordedOperation] {
        &self.operations
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Names of the savepoints currently open, outermost first.
    pub fn active_savepoints(&self) -> Vec<&str> {
        self.savepoints.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn has_savepoint(&self, name: &str) -> bool {
        self.savepoints.iter().any(|s| s.name == name)
    }

    /// Append an operation to the audit trail. Returns its sequence number.
    pub fn record_operation(&mut self, descriptor: OperationDescriptor) -> usize {
        let sequence = self.operations.len();
        tracing::trace!(
            sequence,
            kind = descriptor.kind.as_str(),
            table = %descriptor.table,
            affected_rows = descriptor.affected_rows,
            "Operation recorded"
        );
        self.operations.push(RecordedOperation {
            sequence,
            descriptor,
            recorded_at: Utc::now(),
        });
        sequence
    }

    /// Create a named savepoint.
    ///
    /// Fails with [`EngineError::Savepoint`] when the name is invalid, already
    /// open in this transaction, the depth limit is reached, or the store
    /// rejects it.
    pub async fn create_savepoint(&mut self, name: &str) -> Result<(), EngineError> {
        validate_identifier("savepoint", name)
            .map_err(|e| EngineError::Savepoint(e.to_string()))?;
        if self.has_savepoint(name) {
            return Err(EngineError::Savepoint(format!(
                "Savepoint '{name}' already exists in this transaction"
            )));
        }
        if self.savepoints.len() >= self.max_savepoint_depth {
            return Err(EngineError::Savepoint(format!(
                "Savepoint depth limit of {} reached",
                self.max_savepoint_depth
            )));
        }

        self.tx.savepoint(name).await.map_err(savepoint_error)?;
        self.savepoints.push(SavepointMark {
            name: name.to_string(),
            operation_index: self.operations.len(),
        });
        self.savepoints_created.push(name.to_string());
        self.state = TransactionState::SavepointCreated;
        tracing::debug!(savepoint = name, depth = self.savepoints.len(), "Savepoint created");
        Ok(())
    }

    /// Roll the transaction back to `name`.
    ///
    /// The caller decides how to continue; execution does not resume by
    /// itself.
    pub async fn rollback_to_savepoint(
        &mut self,
        name: &str,
        reason: &str,
    ) -> Result<SavepointRollback, EngineError> {
        let index = self
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| EngineError::Savepoint(format!("Savepoint '{name}' does not exist")))?;

        self.tx
            .rollback_to_savepoint(name)
            .await
            .map_err(savepoint_error)?;

        let mark_index = self.savepoints[index].operation_index;
        let affected_operations = self.operations.len().saturating_sub(mark_index);
        self.operations.truncate(mark_index);
        let discarded_savepoints: Vec<String> = self
            .savepoints
            .drain(index + 1..)
            .map(|s| s.name)
            .collect();

        let rollback = SavepointRollback {
            savepoint: name.to_string(),
            reason: reason.to_string(),
            affected_operations,
            discarded_savepoints,
        };
        self.savepoint_rollbacks.push(rollback.clone());
        self.state = TransactionState::SavepointRolledBack;
        tracing::warn!(
            savepoint = name,
            reason,
            affected_operations,
            discarded = rollback.discarded_savepoints.len(),
            "Rolled back to savepoint"
        );
        Ok(rollback)
    }

    /// Release `name` and every savepoint created after it, keeping their work.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<(), EngineError> {
        let index = self
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| EngineError::Savepoint(format!("Savepoint '{name}' does not exist")))?;

        self.tx.release_savepoint(name).await.map_err(savepoint_error)?;
        self.savepoints.truncate(index);
        self.state = TransactionState::SavepointReleased;
        tracing::debug!(savepoint = name, "Savepoint released");
        Ok(())
    }

    pub(crate) fn finish(self) -> (Box<dyn StoreTx>, ContextTrail) {
        (
            self.tx,
            ContextTrail {
                operations: self.operations,
                savepoints_created: self.savepoints_created,
                savepoint_rollbacks: self.savepoint_rollbacks,
            },
        )
    }
}

/// Deadlock-class errors keep their class so the engine can retry.
fn savepoint_error(err: StoreError) -> EngineError {
    if err.is_retryable() {
        EngineError::Store(err)
    } else {
        EngineError::Savepoint(err.to_string())
    }
}
