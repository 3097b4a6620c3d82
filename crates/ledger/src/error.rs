//! Ledger errors

use payguard_core::{Cents, OrgId};
use thiserror::Error;

/// Errors from the balance ledger.
///
/// `LockTimeout` is transient and safe to retry with backoff; everything
/// else is a terminal rejection for the given call.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0} cents")]
    InvalidAmount(Cents),

    #[error("Insufficient funds for {organization_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        organization_id: OrgId,
        available: Cents,
        requested: Cents,
    },

    #[error("Unknown organization: {0}")]
    UnknownOrganization(OrgId),

    #[error("Organization already exists: {0}")]
    OrganizationExists(OrgId),

    #[error("Balance overflow for {0}")]
    AmountOverflow(OrgId),

    #[error("Timed out waiting for the {organization_id} balance lock after {waited_ms}ms")]
    LockTimeout {
        organization_id: OrgId,
        waited_ms: u64,
    },

    #[error("Ledger state poisoned by a panicked writer")]
    Poisoned,
}

impl LedgerError {
    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout { .. })
    }
}
