//! PostgreSQL store over a sqlx pool.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use verso_core::bulk::BulkOperationKind;
use verso_core::retention::RetentionCandidate;
use verso_core::transaction::{quote_identifier, validate_identifier, IsolationLevel};
use verso_core::types::{DbId, Timestamp};

use crate::models::{
    ContentVersion, CreateVersionAnnotation, NewContentVersion, NewVersionComparison,
    NewVersionRollback, RetentionPolicy, UpsertRetentionPolicy, VersionAnnotation,
    VersionComparison, VersionHistoryQuery, VersionRollback,
};
use crate::repositories::{
    BulkTableRepo, ContentVersionRepo, RetentionPolicyRepo, VersionAnnotationRepo,
    VersionComparisonRepo, VersionRollbackRepo,
};
use crate::store::{Store, StoreError, StoreTx};
use crate::DbPool;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// An open PostgreSQL transaction.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTx {
    async fn run_savepoint_command(&mut self, verb: &str, name: &str) -> Result<(), StoreError> {
        validate_identifier("savepoint", name).map_err(|e| StoreError::Savepoint(e.to_string()))?;
        let statement = format!("{verb} {}", quote_identifier(name));
        sqlx::query(&statement).execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.run_savepoint_command("SAVEPOINT", name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.run_savepoint_command("ROLLBACK TO SAVEPOINT", name).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.run_savepoint_command("RELEASE SAVEPOINT", name).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }

    async fn lock_content(&mut self, content_type: &str, content_id: &str) -> Result<(), StoreError> {
        Ok(ContentVersionRepo::lock_content(&mut self.tx, content_type, content_id).await?)
    }

    async fn max_version_number(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<i32>, StoreError> {
        Ok(ContentVersionRepo::max_version_number(&mut self.tx, content_type, content_id).await?)
    }

    async fn find_version(&mut self, id: DbId) -> Result<Option<ContentVersion>, StoreError> {
        Ok(ContentVersionRepo::find_by_id(&mut self.tx, id).await?)
    }

    async fn find_current_version(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(ContentVersionRepo::find_current(&mut self.tx, content_type, content_id).await?)
    }

    async fn find_version_by_number(
        &mut self,
        content_type: &str,
        content_id: &str,
        version_number: i32,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(
            ContentVersionRepo::find_by_number(&mut self.tx, content_type, content_id, version_number)
                .await?,
        )
    }

    async fn clear_current_flag(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<u64, StoreError> {
        Ok(ContentVersionRepo::clear_current(&mut self.tx, content_type, content_id).await?)
    }

    async fn insert_version(
        &mut self,
        input: &NewContentVersion,
    ) -> Result<ContentVersion, StoreError> {
        Ok(ContentVersionRepo::create(&mut self.tx, input).await?)
    }

    async fn list_versions(
        &mut self,
        content_type: &str,
        content_id: &str,
        query: &VersionHistoryQuery,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ContentVersion>, i64), StoreError> {
        Ok(ContentVersionRepo::list_history(
            &mut self.tx,
            content_type,
            content_id,
            query,
            limit,
            offset,
        )
        .await?)
    }

    async fn mark_published(
        &mut self,
        id: DbId,
        at: Timestamp,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(ContentVersionRepo::mark_published(&mut self.tx, id, at).await?)
    }

    async fn set_protected(
        &mut self,
        id: DbId,
        is_protected: bool,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(ContentVersionRepo::set_protected(&mut self.tx, id, is_protected).await?)
    }

    async fn set_retention_expiry(
        &mut self,
        id: DbId,
        expires_at: Option<Timestamp>,
    ) -> Result<Option<ContentVersion>, StoreError> {
        Ok(ContentVersionRepo::set_retention_expiry(&mut self.tx, id, expires_at).await?)
    }

    async fn list_retention_candidates(
        &mut self,
        content_type: &str,
    ) -> Result<Vec<RetentionCandidate>, StoreError> {
        Ok(ContentVersionRepo::list_retention_candidates(&mut self.tx, content_type).await?)
    }

    async fn delete_versions(&mut self, ids: &[DbId]) -> Result<u64, StoreError> {
        Ok(ContentVersionRepo::delete_by_ids(&mut self.tx, ids).await?)
    }

    async fn find_comparison(
        &mut self,
        from_version_id: DbId,
        to_version_id: DbId,
    ) -> Result<Option<VersionComparison>, StoreError> {
        Ok(VersionComparisonRepo::find_pair(&mut self.tx, from_version_id, to_version_id).await?)
    }

    async fn upsert_comparison(
        &mut self,
        input: &NewVersionComparison,
    ) -> Result<VersionComparison, StoreError> {
        Ok(VersionComparisonRepo::upsert(&mut self.tx, input).await?)
    }

    async fn purge_comparisons(&mut self) -> Result<u64, StoreError> {
        Ok(VersionComparisonRepo::purge(&mut self.tx).await?)
    }

    async fn insert_rollback(
        &mut self,
        input: &NewVersionRollback,
    ) -> Result<VersionRollback, StoreError> {
        Ok(VersionRollbackRepo::create(&mut self.tx, input).await?)
    }

    async fn list_rollbacks(
        &mut self,
        content_type: &str,
        content_id: &str,
    ) -> Result<Vec<VersionRollback>, StoreError> {
        Ok(VersionRollbackRepo::list_for_content(&mut self.tx, content_type, content_id).await?)
    }

    async fn insert_annotation(
        &mut self,
        input: &CreateVersionAnnotation,
        thread_depth: i16,
        created_by: Option<DbId>,
    ) -> Result<VersionAnnotation, StoreError> {
        Ok(VersionAnnotationRepo::create(&mut self.tx, input, thread_depth, created_by).await?)
    }

    async fn find_annotation(&mut self, id: DbId) -> Result<Option<VersionAnnotation>, StoreError> {
        Ok(VersionAnnotationRepo::find_by_id(&mut self.tx, id).await?)
    }

    async fn list_annotations(
        &mut self,
        version_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<VersionAnnotation>, StoreError> {
        Ok(VersionAnnotationRepo::list_for_version(&mut self.tx, version_id, include_resolved).await?)
    }

    async fn resolve_annotation(
        &mut self,
        id: DbId,
        resolved_by: Option<DbId>,
        at: Timestamp,
    ) -> Result<Option<VersionAnnotation>, StoreError> {
        Ok(VersionAnnotationRepo::resolve(&mut self.tx, id, resolved_by, at).await?)
    }

    async fn find_retention_policy(
        &mut self,
        content_type: &str,
    ) -> Result<Option<RetentionPolicy>, StoreError> {
        Ok(RetentionPolicyRepo::find_by_content_type(&mut self.tx, content_type).await?)
    }

    async fn upsert_retention_policy(
        &mut self,
        input: &UpsertRetentionPolicy,
    ) -> Result<RetentionPolicy, StoreError> {
        Ok(RetentionPolicyRepo::upsert(&mut self.tx, input).await?)
    }

    async fn list_retention_policies(&mut self) -> Result<Vec<RetentionPolicy>, StoreError> {
        Ok(RetentionPolicyRepo::list_all(&mut self.tx).await?)
    }

    async fn mark_cleanup(&mut self, content_type: &str, at: Timestamp) -> Result<(), StoreError> {
        Ok(RetentionPolicyRepo::mark_cleanup(&mut self.tx, content_type, at).await?)
    }

    async fn bulk_write(
        &mut self,
        table: &str,
        kind: BulkOperationKind,
        rows: &[serde_json::Value],
    ) -> Result<u64, StoreError> {
        BulkTableRepo::write(&mut self.tx, table, kind, rows).await
    }

    async fn count_matching(
        &mut self,
        table: &str,
        column: &str,
        value: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        BulkTableRepo::count_matching(&mut self.tx, table, column, value).await
    }
}
