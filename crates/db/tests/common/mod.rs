//! Shared wiring for the in-memory integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use verso_core::transaction::AccessContext;
use verso_db::audit::MemoryAuditSink;
use verso_db::config::EngineConfig;
use verso_db::engine::TransactionEngine;
use verso_db::models::{ContentVersion, CreateContentVersion};
use verso_db::store::MemoryStore;
use verso_db::version_store::VersionStore;

pub struct Harness {
    pub store: MemoryStore,
    pub engine: TransactionEngine,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let config = EngineConfig {
            retry_backoff: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        Self::with_config(store, config)
    }

    pub fn with_config(store: MemoryStore, config: EngineConfig) -> Self {
        let engine = TransactionEngine::new(Arc::new(store.clone()), config);
        Self {
            store,
            engine,
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    pub fn versions(&self) -> VersionStore {
        VersionStore::new(self.engine.clone(), self.audit.clone())
    }

    /// Create a version of `blog_post/{content_id}` and return it.
    pub async fn create(&self, content_id: &str, content: Value) -> ContentVersion {
        self.versions()
            .create_version(new_post(content_id, content), &editor())
            .await
            .unwrap()
    }
}

pub fn editor() -> AccessContext {
    AccessContext::user(7)
}

pub fn new_post(content_id: &str, content: Value) -> CreateContentVersion {
    CreateContentVersion::new("blog_post", content_id, "Post", content)
}
