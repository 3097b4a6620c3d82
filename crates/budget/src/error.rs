//! Budget tracker errors

use payguard_core::{AgentId, Cents};
use thiserror::Error;

/// Errors from the budget tracker
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Agent already registered: {0}")]
    AgentExists(AgentId),

    #[error("Amount must be positive, got {0} cents")]
    InvalidAmount(Cents),

    #[error("Accumulated spend overflow for {0}")]
    SpendOverflow(AgentId),

    #[error("Budget state poisoned by a panicked writer")]
    Poisoned,
}
