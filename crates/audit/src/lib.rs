//! PayGuard Audit Trail - append-only record of financial mutations
//!
//! Every mutation attempt against the ledger or an agent's status produces
//! an `AuditRecord`. Records are written as JSONL and are never modified
//! after creation. A failed audit write never rolls back the underlying
//! financial mutation; callers log and count the failure instead (the
//! orchestrator surfaces it as a system alert).

pub mod error;
pub mod record;
pub mod trail;

pub use error::{AuditError, AuditResult};
pub use record::{AuditRecord, AuditStatus};
pub use trail::AuditTrail;
