//! Structured audit trail for material exchange actions.
//!
//! Events: order submission/cancellation, executed trades, instrument halts.
//! Format: one JSON line per event with timestamp, actor, action, resource,
//! outcome. Sink: stdout or pluggable (e.g. in-memory for tests).

use crate::types::MemberId;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Audited action type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OrderSubmit,
    OrderCancel,
    Trade,
    InstrumentHalt,
}

/// Who performed an audited action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditActor {
    Member(MemberId),
    Engine,
}

/// Single audit record: one line of JSON per event.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    /// Unix timestamp (seconds since epoch). Wall-clock, unlike the
    /// deterministic submission sequence on orders.
    pub timestamp_secs: u64,
    pub actor: AuditActor,
    pub action: AuditAction,
    /// Resource identifiers (order_id, trade_id, symbol, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
    /// "accepted", "rejected", "executed", "halted", ...
    pub outcome: String,
}

impl AuditEvent {
    pub fn now(
        actor: AuditActor,
        action: AuditAction,
        resource: Option<serde_json::Value>,
        outcome: impl Into<String>,
    ) -> Self {
        let timestamp_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            timestamp_secs,
            actor,
            action,
            resource,
            outcome: outcome.into(),
        }
    }
}

/// Sink for audit events. Implementations write to stdout, a file, or an
/// in-memory buffer (tests).
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Writes one JSON line per event to stdout. Safe from multiple threads.
pub struct StdoutAuditSink;

impl AuditSink for StdoutAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
    }
}

/// In-memory sink that stores events for tests. Clones share the buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        self.events.lock().expect("lock").push(event.clone());
    }
}
