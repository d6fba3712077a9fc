//! AuditSink adapters.
//!
//! - `TracingAuditSink`: emits each event as a structured `tracing` record
//! - `MemoryAuditSink`: keeps events in memory for assertions

use std::sync::Mutex;

use tracing::warn;

use crate::ports::{AuditEvent, AuditSink};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let data = serde_json::to_string(&event.data).unwrap_or_default();
        warn!(target: "audit", event_id = %event.event_id, data = %data, "audit event");
    }
}

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
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
