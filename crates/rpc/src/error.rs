//! Orchestrator errors

use thiserror::Error;

/// Errors surfaced by the orchestrator.
///
/// Component errors pass through unchanged so callers can branch on the
/// precise rejection (e.g. retry `LedgerError::LockTimeout`).
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("{action} requires an owner or admin caller")]
    Forbidden { action: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Corrupt journal: {0}")]
    Journal(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] payguard_ledger::LedgerError),

    #[error("Budget error: {0}")]
    Budget(#[from] payguard_budget::BudgetError),

    #[error("Velocity error: {0}")]
    Velocity(#[from] payguard_velocity::VelocityError),

    #[error("Alert store error: {0}")]
    Alert(#[from] payguard_alerts::AlertError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] payguard_outbox::OutboxError),

    #[error("Audit error: {0}")]
    Audit(#[from] payguard_audit::AuditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
