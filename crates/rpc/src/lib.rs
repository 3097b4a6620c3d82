//! PayGuard RPC - wires the guardrail components together
//!
//! The `AppContext` owns every component and implements the settlement
//! pipeline, the synchronous authorization check, and the role-gated
//! manual operations. The `payguard` binary is a thin CLI over it.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod journal;

pub use config::GuardrailConfig;
pub use context::{AgentView, AppContext, AuthDecision, DeclineReason, SettlementReport};
pub use error::GuardError;
pub use journal::{GuardEvent, JournalStore};
