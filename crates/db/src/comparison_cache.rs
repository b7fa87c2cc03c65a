//! Memoised version comparisons.
//!
//! Versions are immutable, so a diff between two of them never changes.
//! Entries are written once per ordered pair, kept in process and persisted
//! to `version_comparisons`. Purging either layer only costs recomputation.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use verso_core::diff::{diff, DiffMetadata, VersionDiff, DIFF_ALGORITHM};
use verso_core::error::CoreError;
use verso_core::transaction::{AccessContext, OperationDescriptor, OperationKind};
use verso_core::types::DbId;

use crate::engine::TransactionEngine;
use crate::error::EngineError;
use crate::models::NewVersionComparison;

const TABLE: &str = "version_comparisons";

pub struct ComparisonCache {
    engine: TransactionEngine,
    entries: RwLock<HashMap<(DbId, DbId), VersionDiff>>,
}

impl ComparisonCache {
    pub fn new(engine: TransactionEngine) -> Self {
        Self {
            engine,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Diff `from_version_id` against `to_version_id`.
    ///
    /// The pair is ordered: `compare(a, b)` and `compare(b, a)` are distinct
    /// entries with mirrored changes.
    pub async fn compare(
        &self,
        from_version_id: DbId,
        to_version_id: DbId,
        access: &AccessContext,
    ) -> Result<VersionDiff, EngineError> {
        let key = (from_version_id, to_version_id);
        if let Some(hit) = self.entries.read().await.get(&key) {
            tracing::debug!(from_version_id, to_version_id, "Comparison cache hit");
            return Ok(hit.clone());
        }

        let options = self.engine.default_options().with_label("compare_versions");
        let computed = self
            .engine
            .execute(&options, access, move |ctx| {
                Box::pin(async move {
                    if let Some(stored) = ctx
                        .tx()
                        .find_comparison(from_version_id, to_version_id)
                        .await?
                    {
                        return Ok(stored.diff.0);
                    }

                    let from = ctx
                        .tx()
                        .find_version(from_version_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found_id("content_version", from_version_id))?;
                    let to = ctx
                        .tx()
                        .find_version(to_version_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found_id("content_version", to_version_id))?;

                    let compared_by = ctx.user_id();
                    let result = diff(&from.content, &to.content).with_metadata(DiffMetadata {
                        algorithm: DIFF_ALGORITHM.to_string(),
                        from_version: Some(from.version_number),
                        to_version: Some(to.version_number),
                        content_type: Some(to.content_type.clone()),
                        content_id: Some(to.content_id.clone()),
                        compared_at: Some(Utc::now()),
                        compared_by,
                    });

                    ctx.tx()
                        .upsert_comparison(&NewVersionComparison {
                            from_version_id,
                            to_version_id,
                            diff: result.clone(),
                            compared_by,
                        })
                        .await?;
                    ctx.record_operation(OperationDescriptor::new(OperationKind::Insert, TABLE, 1));
                    Ok(result)
                })
            })
            .await
            .into_result()?;

        // Concurrent misses on the same pair compute identical diffs.
        self.entries.write().await.insert(key, computed.clone());
        tracing::debug!(
            from_version_id,
            to_version_id,
            total_changes = computed.summary.total_changes,
            "Comparison cached"
        );
        Ok(computed)
    }

    /// Drop every cached comparison, in process and persisted.
    pub async fn purge(&self, access: &AccessContext) -> Result<u64, EngineError> {
        let options = self.engine.default_options().with_label("purge_comparisons");
        let purged = self
            .engine
            .execute(&options, access, |ctx| {
                Box::pin(async move {
                    let purged = ctx.tx().purge_comparisons().await?;
                    ctx.record_operation(OperationDescriptor::new(
                        OperationKind::Delete,
                        TABLE,
                        purged,
                    ));
                    Ok(purged)
                })
            })
            .await
            .into_result()?;

        let dropped = {
            let mut entries = self.entries.write().await;
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        tracing::info!(persisted = purged, in_process = dropped, "Comparison cache purged");
        Ok(purged)
    }

    /// Number of comparisons held in process.
    pub async fn cached_entries(&self) -> usize {
        self.entries.read().await.len()
    }
}
