//! Outbox errors

use thiserror::Error;

/// Errors from the outbox
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Outbox entry not found: {0}")]
    NotFound(String),

    #[error("Corrupt outbox row: {0}")]
    InvalidRow(String),
}
