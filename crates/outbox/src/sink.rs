//! Notification sink trait
//!
//! The transport (webhook, email, queue) lives outside PayGuard; the
//! outbox only needs something it can hand a payload to. Sinks should be
//! idempotent: the same event may be delivered more than once.

use async_trait::async_trait;
use payguard_velocity::StatusChanged;
use thiserror::Error;

/// A sink delivery failure. Treated as transient; the outbox retries up
/// to its policy's bound.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Downstream consumer of status-changed events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name (for logging)
    fn name(&self) -> &str;

    /// Deliver one event. Returning an error schedules a retry.
    async fn deliver(&self, event: &StatusChanged) -> Result<(), SinkError>;
}

/// Sink that just logs deliveries. Useful as a default wiring and in the
/// CLI drain command.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &StatusChanged) -> Result<(), SinkError> {
        tracing::info!(
            agent = %event.agent_id,
            old = %event.old_status,
            new = %event.new_status,
            reason = %event.reason,
            "status change delivered"
        );
        Ok(())
    }
}
