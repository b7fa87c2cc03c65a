//! Audit sinks shipped with the crate.

use std::sync::Mutex;

use verso_core::audit::{AuditEvent, AuditSink};

/// Writes each event as a structured `tracing` record at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "verso_db::audit",
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            user_id = ?event.user_id,
            details = %event.details,
            timestamp = %event.timestamp,
            "Audit event"
        );
    }
}

/// Keeps events in memory. Useful in tests and for embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
