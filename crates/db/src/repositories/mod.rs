//! PostgreSQL repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&mut PgConnection` as the first argument, so they run inside
//! whatever transaction the caller holds.

pub mod bulk_table_repo;
pub mod content_version_repo;
pub mod retention_policy_repo;
pub mod version_annotation_repo;
pub mod version_comparison_repo;
pub mod version_rollback_repo;

pub use bulk_table_repo::BulkTableRepo;
pub use content_version_repo::ContentVersionRepo;
pub use retention_policy_repo::RetentionPolicyRepo;
pub use version_annotation_repo::VersionAnnotationRepo;
pub use version_comparison_repo::VersionComparisonRepo;
pub use version_rollback_repo::VersionRollbackRepo;
