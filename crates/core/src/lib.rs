//! PayGuard Core - Domain types
//!
//! This crate contains the fundamental types used across PayGuard:
//! - `Cents`: Non-negative integer money amount (cent precision)
//! - `OrgId` / `AgentId` / `SettlementId`: Validated identifiers
//! - `Actor` / `Role`: Caller capability model
//! - `AgentStatus`: Circuit-breaker status vocabulary

pub mod actor;
pub mod amount;
pub mod ids;
pub mod status;

pub use actor::{Actor, Role};
pub use amount::{AmountError, Cents};
pub use ids::{AgentId, IdError, OrgId, SettlementId};
pub use status::AgentStatus;
