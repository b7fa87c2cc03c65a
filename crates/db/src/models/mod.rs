//! Row models and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create/upsert DTO for caller input
//! - Where the service resolves extra fields, a `New*` struct handed to the store

pub mod content_version;
pub mod page;
pub mod retention_policy;
pub mod version_annotation;
pub mod version_comparison;
pub mod version_rollback;

pub use content_version::{ContentVersion, CreateContentVersion, NewContentVersion, VersionHistoryQuery};
pub use page::Page;
pub use retention_policy::{RetentionPolicy, UpsertRetentionPolicy};
pub use version_annotation::{CreateVersionAnnotation, VersionAnnotation};
pub use version_comparison::{NewVersionComparison, VersionComparison};
pub use version_rollback::{NewVersionRollback, VersionRollback};
