//! Audit trail errors

use thiserror::Error;

/// Errors from the audit trail
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Audit trail lock poisoned")]
    Poisoned,
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;
