//! Process-local store.
//!
//! Transactions are serialised by an async mutex: `begin` waits for the
//! previous transaction to finish, then works on a private copy of the state.
//! Savepoints are snapshots of that copy. Commit publishes the copy; dropping
//! the transaction discards it. Constraint names match the PostgreSQL schema
//! so error handling is identical across both stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::types::Json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use verso_core::bulk::BulkOperationKind;
use verso_core::retention::RetentionCandidate;
use verso_core::transaction::{validate_identifier, IsolationLevel};
use verso_core::types::{DbId, Timestamp};

use crate::models::{
    ContentVersion, CreateVersionAnnotation, NewContentVersion, NewVersionComparison,
    NewVersionRollback, RetentionPolicy, UpsertRetentionPolicy, VersionAnnotation,
    VersionComparison, VersionHistoryQuery, VersionRollback,
};
use crate::store::{constraints, Store, StoreError, StoreTx};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: BTreeMap<i64, Map<String, Value>>,
    unique_columns: Vec<String>,
    last_id: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    versions: BTreeMap<DbId, ContentVersion>,
    comparisons: BTreeMap<DbId, VersionComparison>,
    annotations: BTreeMap<DbId, VersionAnnotation>,
    rollbacks: BTreeMap<DbId, VersionRollback>,
    policies: BTreeMap<DbId, RetentionPolicy>,
    tables: BTreeMap<String, MemoryTable>,
    last_id: DbId,
}

impl MemoryState {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn versions_of<'a>(
        &'a self,
        content_type: &'a str,
        content_id: &'a str,
    ) -> impl Iterator<Item = &'a ContentVersion> + 'a {
        self.versions
            .values()
            .filter(move |v| v.content_type == content_type && v.content_id == content_id)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UndefinedRelation(format!("relation \"{name}\" does not exist")))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    max_savepoint_depth: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject savepoints nested deeper than `depth`.
    pub fn with_max_savepoint_depth(mut self, depth: usize) -> Self {
        self.max_savepoint_depth = Some(depth);
        self
    }

    /// Create a generic table for bulk writes. Rows get an `id` column;
    /// `unique_columns` are enforced like a UNIQUE constraint.
    pub async fn register_table(&self, name: &str, unique_columns: &[&str]) {
        let mut state = self.state.lock().await;
        state.tables.insert(
            name.to_string(),
            MemoryTable {
                unique_columns: unique_columns.iter().map(|c| c.to_string()).collect(),
                ..MemoryTable::default()
            },
        );
    }

    /// Committed rows of a generic table in id order.
    pub async fn table_rows(&self, name: &str) -> Vec<Value> {
        let state = self.state.lock().await;
        state
            .tables
            .get(name)
            .map(|t| t.rows.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Committed versions of one content item in version order.
    pub async fn versions(&self, content_type: &str, content_id: &str) -> Vec<ContentVersion> {
        let state = self.state.lock().await;
        let mut versions: Vec<_> = state.versions_of(content_type, content_id).cloned().collect();
        versions.sort_by_key(|v| v.version_number);
        versions
    }

    /// Number of committed rows in the comparison table.
    pub async fn comparison_count(&self) -> usize {
        self.state.lock().await.comparisons.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, _isolation: IsolationLevel) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            savepoints: Vec::new(),
            max_depth: self.max_savepoint_depth,
        }))
    }

    fn max_savepoint_depth(&self) -> Option<usize> {
        self.max_savepoint_depth
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    savepoints: Vec<(String, MemoryState)>,
    max_depth: Option<usize>,
}

impl MemoryTx {
    fn savepoint_index(&self, name: &str) -> Result<usize, StoreError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::Savepoint(format!("savepoint \"{name}\" does not exist")))
    }

    fn update_version(
        &mut self,
        id: DbId,
        apply: impl FnOnce(&mut ContentVersion),
    ) -> Option<ContentVersion> {
        let version = self.working.versions.get_mut(&id)?;
        apply(version);
        version.updated_at = Utc::now();
        Some(version.clone())
    }
}

fn unique_violation(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn row_object(row: &Value) -> Result<&Map<String, Value>, StoreError> {
    row.as_object()
        .ok_or_else(|| StoreError::InvalidRow("bulk rows must be JSON objects".into()))
}

fn row_id(row: &Map<String, Value>) -> Result<i64, StoreError> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::InvalidRow("row is missing an integer id".into()))
}

fn check_unique(table_name: &str, table: &MemoryTable, row: &Map<String, Value>) -> Result<(), StoreError> {
    let own_id = row.get("id").and_then(Value::as_i64);
    for column in &table.unique_columns {
        let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = table
            .rows
            .iter()
            .any(|(id, other)| Some(*id) != own_id && other.get(column) == Some(value));
        if clash {
            return Err(unique_violation(&format!("{table_name}_{column}_key")));
        }
    }
    Ok(())
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        validate_identifier("savepoint", name).map_err(|e| StoreError::Savepoint(e.to_string()))?;
        if let Some(max) = self.max_depth {
            if self.savepoints.len() >= max {
                return Err(StoreError::Savepoint(format!(
                    "savepoint depth limit of {max} reached"
                )));
            }
        }
        self.savepoints.push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        self.working = self.savepoints[index].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    // -- content_versions ----------------------------------------------------

    async fn lock_content(&mut self, _content_type: &str, _content_id: &str) -> Result<(), StoreError> {
        // Transactions are already serialised by the state mutex.
        Ok(())
    }

    async fn max_version_number(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<i32>, StoreError> {
        Ok(self
            .working
            .versions_of(content_type, content_id)
            .map(|v| v.version_number)
            .max())
    }

    async fn find_version(&mut self, id: DbId) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self.working.versions.get(&id).cloned())
    }

    async fn find_current_version(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self
            .working
            .versions_of(content_type, content_id)
            .find(|v| v.is_current)
            .cloned())
    }

    async fn find_version_by_number(
        &mut self,
        content_type: &str,
        content_id: &str,
        version_number: i32,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self
            .working
            .versions_of(content_type, content_id)
            .find(|v| v.version_number == version_number)
            .cloned())
    }

    async fn clear_current_flag(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut cleared = 0;
        for version in self.working.versions.values_mut() {
            if version.content_type == content_type
                && version.content_id == content_id
                && version.is_current
            {
                version.is_current = false;
                version.updated_at = now;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn insert_version(
        &mut self,
        input: &NewContentVersion,
    ) -> Result<ContentVersion, StoreError> {
        let siblings: Vec<&ContentVersion> = self
            .working
            .versions_of(&input.content_type, &input.content_id)
            .collect();
        if siblings.iter().any(|v| v.version_number == input.version_number) {
            return Err(unique_violation(constraints::VERSION_NUMBER));
        }
        if siblings.iter().any(|v| v.is_current) {
            return Err(unique_violation(constraints::SINGLE_CURRENT));
        }

        let id = self.working.next_id();
        let version = ContentVersion {
            id,
            content_type: input.content_type.clone(),
            content_id: input.content_id.clone(),
            version_number: input.version_number,
            title: input.title.clone(),
            content: input.content.clone(),
            change_description: input.change_description.clone(),
            diff_from_previous: input.diff_from_previous.clone().map(Json),
            is_current: true,
            is_published: input.is_published,
            is_draft: !input.is_published,
            is_protected: input.is_protected,
            branch_name: input.branch_name.clone(),
            parent_version_id: input.parent_version_id,
            merged_from_version_id: input.merged_from_version_id,
            created_by: input.created_by,
            created_at: input.created_at,
            published_at: input.published_at(),
            retention_expires_at: input.retention_expires_at,
            updated_at: input.created_at,
        };
        self.working.versions.insert(id, version.clone());
        Ok(version)
    }

    async fn list_versions(
        &mut self,
        content_type: &str,
        content_id: &str,
        query: &VersionHistoryQuery,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ContentVersion>, i64), StoreError> {
        let mut matching: Vec<ContentVersion> = self
            .working
            .versions_of(content_type, content_id)
            .filter(|v| query.matches(v))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((items, total))
    }

    async fn mark_published(
        &mut self,
        id: DbId,
        at: Timestamp,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self.update_version(id, |v| {
            v.is_published = true;
            v.is_draft = false;
            v.published_at = v.published_at.or(Some(at));
        }))
    }

    async fn set_protected(
        &mut self,
        id: DbId,
        is_protected: bool,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self.update_version(id, |v| v.is_protected = is_protected))
    }

    async fn set_retention_expiry(
        &mut self,
        id: DbId,
        expires_at: Option<Timestamp>,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(self.update_version(id, |v| v.retention_expires_at = expires_at))
    }

    async fn list_retention_candidates(
        &mut self,
        content_type: &str,
    ) -> Result<Vec<RetentionCandidate>, StoreError> {
        Ok(self
            .working
            .versions
            .values()
            .filter(|v| v.content_type == content_type)
            .map(ContentVersion::to_retention_candidate)
            .collect())
    }

    async fn delete_versions(&mut self, ids: &[DbId]) -> Result<u64, StoreError> {
        let mut deleted = 0;
        for id in ids {
            if self.working.versions.remove(id).is_some() {
                deleted += 1;
            }
        }
        self.working
            .comparisons
            .retain(|_, c| !ids.contains(&c.from_version_id) && !ids.contains(&c.to_version_id));
        self.working
            .annotations
            .retain(|_, a| !ids.contains(&a.version_id));
        Ok(deleted)
    }

    // -- version_comparisons -------------------------------------------------

    async fn find_comparison(
        &mut self,
        from_version_id: DbId,
        to_version_id: DbId,
    ) -> Result<Option<VersionComparison>, StoreError> {
        Ok(self
            .working
            .comparisons
            .values()
            .find(|c| c.from_version_id == from_version_id && c.to_version_id == to_version_id)
            .cloned())
    }

    async fn upsert_comparison(
        &mut self,
        input: &NewVersionComparison,
    ) -> Result<VersionComparison, StoreError> {
        for version_id in [input.from_version_id, input.to_version_id] {
            if !self.working.versions.contains_key(&version_id) {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: "version_comparisons_version_fkey".into(),
                });
            }
        }
        let existing = self
            .working
            .comparisons
            .values()
            .find(|c| {
                c.from_version_id == input.from_version_id && c.to_version_id == input.to_version_id
            })
            .map(|c| (c.id, c.created_at));
        let (id, created_at) = match existing {
            Some(found) => found,
            None => (self.working.next_id(), Utc::now()),
        };
        let summary = &input.diff.summary;
        let to_i32 = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
        let row = VersionComparison {
            id,
            from_version_id: input.from_version_id,
            to_version_id: input.to_version_id,
            diff: Json(input.diff.clone()),
            total_changes: to_i32(summary.total_changes),
            additions: to_i32(summary.additions),
            modifications: to_i32(summary.modifications),
            deletions: to_i32(summary.deletions),
            compared_by: input.compared_by,
            created_at,
        };
        self.working.comparisons.insert(id, row.clone());
        Ok(row)
    }

    async fn purge_comparisons(&mut self) -> Result<u64, StoreError> {
        let purged = self.working.comparisons.len() as u64;
        self.working.comparisons.clear();
        Ok(purged)
    }

    // -- version_rollbacks ---------------------------------------------------

    async fn insert_rollback(
        &mut self,
        input: &NewVersionRollback,
    ) -> Result<VersionRollback, StoreError> {
        let id = self.working.next_id();
        let row = VersionRollback {
            id,
            content_type: input.content_type.clone(),
            content_id: input.content_id.clone(),
            from_version_id: input.from_version_id,
            to_version_id: input.to_version_id,
            reason: input.reason.clone(),
            rollback_data: input.rollback_data.clone(),
            executed_by: input.executed_by,
            executed_at: Utc::now(),
        };
        self.working.rollbacks.insert(id, row.clone());
        Ok(row)
    }

    async fn list_rollbacks(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Vec<VersionRollback>, StoreError> {
        let mut rows: Vec<VersionRollback> = self
            .working
            .rollbacks
            .values()
            .filter(|r| r.content_type == content_type && r.content_id == content_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    // -- version_annotations -------------------------------------------------

    async fn insert_annotation(
        &mut self,
        input: &CreateVersionAnnotation,
        thread_depth: i16,
        created_by: Option<DbId>,
    ) -> Result<VersionAnnotation, StoreError> {
        if !self.working.versions.contains_key(&input.version_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "version_annotations_version_id_fkey".into(),
            });
        }
        if let Some(parent) = input.parent_annotation_id {
            if !self.working.annotations.contains_key(&parent) {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: "version_annotations_parent_annotation_id_fkey".into(),
                });
            }
        }
        let id = self.working.next_id();
        let now = Utc::now();
        let row = VersionAnnotation {
            id,
            version_id: input.version_id,
            parent_annotation_id: input.parent_annotation_id,
            annotation_type: input.annotation_type.clone(),
            content_path: input.content_path.clone(),
            body: input.body.clone(),
            thread_depth,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.working.annotations.insert(id, row.clone());
        Ok(row)
    }

    async fn find_annotation(&mut self, id: DbId) -> Result<Option<VersionAnnotation>, StoreError> {
        Ok(self.working.annotations.get(&id).cloned())
    }

    async fn list_annotations(
        &mut self,
        version_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<VersionAnnotation>, StoreError> {
        Ok(self
            .working
            .annotations
            .values()
            .filter(|a| a.version_id == version_id && (include_resolved || !a.resolved))
            .cloned()
            .collect())
    }

    async fn resolve_annotation(
        &mut self,
        id: DbId,
        resolved_by: Option<DbId>,
        at: Timestamp,
    ) -> Result<Option<VersionAnnotation>, StoreError> {
        let Some(annotation) = self.working.annotations.get_mut(&id) else {
            return Ok(None);
        };
        if !annotation.resolved {
            annotation.resolved = true;
            annotation.resolved_by = resolved_by;
            annotation.resolved_at = Some(at);
        }
        annotation.updated_at = Utc::now();
        Ok(Some(annotation.clone()))
    }

    // -- version_retention_policies ------------------------------------------

    async fn find_retention_policy(
        &mut self,
        content_type: &str,
    ) -> Result<Option<RetentionPolicy>, StoreError> {
        Ok(self
            .working
            .policies
            .values()
            .find(|p| p.content_type == content_type)
            .cloned())
    }

    async fn upsert_retention_policy(
        &mut self,
        input: &UpsertRetentionPolicy,
    ) -> Result<RetentionPolicy, StoreError> {
        let rules = input.rules();
        let now = Utc::now();
        let existing = self
            .working
            .policies
            .values()
            .find(|p| p.content_type == input.content_type)
            .map(|p| (p.id, p.created_at, p.last_cleanup_at));
        let (id, created_at, last_cleanup_at) = match existing {
            Some(found) => found,
            None => (self.working.next_id(), now, None),
        };
        let row = RetentionPolicy {
            id,
            content_type: input.content_type.clone(),
            max_versions_per_content: rules.max_versions_per_content,
            retention_days: rules.retention_days,
            keep_published_versions: rules.keep_published_versions,
            keep_protected_versions: rules.keep_protected_versions,
            cleanup_frequency_hours: input.cleanup_frequency_hours(),
            last_cleanup_at,
            created_at,
            updated_at: now,
        };
        self.working.policies.insert(id, row.clone());
        Ok(row)
    }

    async fn list_retention_policies(&mut self) -> Result<Vec<RetentionPolicy>, StoreError> {
        let mut policies: Vec<_> = self.working.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.content_type.cmp(&b.content_type));
        Ok(policies)
    }

    async fn mark_cleanup(&mut self, content_type: &str, at: Timestamp) -> Result<(), StoreError> {
        for policy in self.working.policies.values_mut() {
            if policy.content_type == content_type {
                policy.last_cleanup_at = Some(at);
                policy.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    // -- Generic bulk tables -------------------------------------------------

    async fn bulk_write(
        &mut self,
        table: &str,
        kind: BulkOperationKind,
        rows: &[Value],
    ) -> Result<u64, StoreError> {
        // A failing row fails the whole statement, so write into a copy.
        let mut staged = self.working.table_mut(table)?.clone();
        let mut affected = 0;

        for row in rows {
            let object = row_object(row)?;
            match kind {
                BulkOperationKind::Insert => {
                    let mut object = object.clone();
                    let id = match object.get("id").and_then(Value::as_i64) {
                        Some(id) => id,
                        None => {
                            staged.last_id += 1;
                            staged.last_id
                        }
                    };
                    if staged.rows.contains_key(&id) {
                        return Err(unique_violation(&format!("{table}_pkey")));
                    }
                    staged.last_id = staged.last_id.max(id);
                    object.insert("id".into(), Value::from(id));
                    check_unique(table, &staged, &object)?;
                    staged.rows.insert(id, object);
                    affected += 1;
                }
                BulkOperationKind::Update => {
                    let id = row_id(object)?;
                    let Some(mut merged) = staged.rows.get(&id).cloned() else {
                        continue;
                    };
                    merged.extend(object.clone());
                    check_unique(table, &staged, &merged)?;
                    staged.rows.insert(id, merged);
                    affected += 1;
                }
                BulkOperationKind::Delete => {
                    let id = row_id(object)?;
                    if staged.rows.remove(&id).is_some() {
                        affected += 1;
                    }
                }
            }
        }

        *self.working.table_mut(table)? = staged;
        Ok(affected)
    }

    async fn count_matching(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<i64, StoreError> {
        let table = self.working.table_mut(table)?;
        Ok(table
            .rows
            .values()
            .filter(|row| row.get(column) == Some(value))
            .count() as i64)
    }
}
