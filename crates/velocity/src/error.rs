//! Velocity guard errors

use payguard_core::{AgentId, AgentStatus};
use thiserror::Error;

/// Errors from the velocity guard
#[derive(Debug, Error)]
pub enum VelocityError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Agent already registered: {0}")]
    AgentExists(AgentId),

    #[error("Status changes require an owner or admin caller")]
    Forbidden,

    #[error("Status changes require a non-empty reason")]
    ReasonRequired,

    #[error("Agent {agent_id} is already {status}")]
    StatusUnchanged {
        agent_id: AgentId,
        status: AgentStatus,
    },

    #[error("Velocity state poisoned by a panicked writer")]
    Poisoned,
}
