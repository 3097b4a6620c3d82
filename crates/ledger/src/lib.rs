//! PayGuard Ledger - Organization balance core
//!
//! All prepaid balance state changes go through this crate.
//!
//! # Key Types
//! - `BalanceLedger`: per-organization balance with serialized mutation
//! - `SpendEvent`: a settlement reported by the payment network
//! - `SettlementOutcome`: applied vs. idempotent replay
//!
//! # Concurrency
//! Mutations on the same organization serialize behind a per-organization
//! lock acquired with a bounded wait; operations on different organizations
//! run fully in parallel. Settlement processing is idempotent on
//! `settlement_id` - the duplicate check is part of the public contract,
//! not an accident of storage schema.

pub mod error;
pub mod ledger;
pub mod settlement;

pub use error::LedgerError;
pub use ledger::BalanceLedger;
pub use settlement::{SettlementOutcome, SpendEvent};
