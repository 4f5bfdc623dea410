//! Audit sinks.
//!
//! Appending is best-effort. A failing or slow sink is logged and skipped;
//! it never rolls back or blocks the state change it describes.

use async_trait::async_trait;
use letterflow_core::AuditEntry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors from an audit sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("Audit append timed out after {0:?}")]
    TimedOut(Duration),
}

/// Append-only destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Writes entries as structured `tracing` events under `letterflow::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "letterflow::audit",
            letter_id = %entry.letter_id,
            owner = %entry.owner,
            event = ?entry.event,
            actor = %entry.actor,
            from = entry.from.map(|s| s.as_str()),
            to = entry.to.map(|s| s.as_str()),
            note = entry.note.as_deref(),
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory. Used by tests and the CLI demo.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Make every append fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("sink switched off".to_string()));
        }
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// Append `entry`, bounded by `timeout`. Failures are logged, not returned.
pub(crate) async fn append_best_effort(sink: &dyn AuditSink, entry: AuditEntry, timeout: Duration) {
    let letter_id = entry.letter_id.clone();
    let result = match tokio::time::timeout(timeout, sink.append(entry)).await {
        Ok(result) => result,
        Err(_) => Err(AuditError::TimedOut(timeout)),
    };

    if let Err(e) = result {
        tracing::warn!(letter_id = %letter_id, error = %e, "Audit append failed");
    }
}
