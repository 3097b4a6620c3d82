//! Alert store errors

use thiserror::Error;

/// Errors from the alert store
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Corrupt alert row: {0}")]
    InvalidRow(String),
}
