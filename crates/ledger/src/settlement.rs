//! Settlement events from the payment network

use chrono::{DateTime, Utc};
use payguard_core::{AgentId, Cents, OrgId, SettlementId};
use serde::{Deserialize, Serialize};

/// A finalized spend reported by the payment network after a transaction
/// completes. Delivered at-least-once; processing is idempotent on
/// `settlement_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendEvent {
    pub settlement_id: SettlementId,
    pub agent_id: AgentId,
    pub organization_id: OrgId,
    pub amount_cents: Cents,
    pub occurred_at: DateTime<Utc>,
}

impl SpendEvent {
    pub fn new(
        settlement_id: SettlementId,
        agent_id: AgentId,
        organization_id: OrgId,
        amount_cents: Cents,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            settlement_id,
            agent_id,
            organization_id,
            amount_cents,
            occurred_at,
        }
    }
}

/// Result of applying a settlement to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// The settlement mutated the balance.
    Applied { new_balance: Cents },
    /// The settlement was seen before; the ledger was not touched. Carries
    /// the balance that resulted from the first application.
    AlreadyApplied { balance: Cents },
}

impl SettlementOutcome {
    /// The organization balance after this settlement, whether it was
    /// applied now or on a previous delivery.
    pub fn balance(&self) -> Cents {
        match self {
            SettlementOutcome::Applied { new_balance } => *new_balance,
            SettlementOutcome::AlreadyApplied { balance } => *balance,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, SettlementOutcome::AlreadyApplied { .. })
    }
}
