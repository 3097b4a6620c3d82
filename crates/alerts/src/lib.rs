//! PayGuard Alerts - threshold breaches as durable records
//!
//! Deriving alerts is a pure function of current budget/status state;
//! persisting them is the store's job. De-duplication uses a stable id
//! derived from `(agent, condition)`: re-deriving a condition that already
//! has an open alert refreshes that alert instead of creating a duplicate.
//! Alerts are never deleted, only marked read or resolved.

pub mod alert;
pub mod derive;
pub mod error;
pub mod store;

pub use alert::{Alert, AlertCandidate, AlertCondition, AlertSeverity};
pub use derive::{derive_alerts, AlertThresholds};
pub use error::AlertError;
pub use store::{AlertStore, UpsertOutcome};
