//! Alert derivation - pure function of current state
//!
//! No storage access here: callers pass the budget snapshot and status
//! they already hold and persist whatever comes back.

use payguard_budget::BudgetSnapshot;
use payguard_core::AgentStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::alert::{AlertCandidate, AlertCondition, AlertSeverity};

/// Budget usage thresholds, in percent. Defaults follow the product rules
/// (75 / 90 / 100) but stay configurable for production tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_warning_percent")]
    pub warning_percent: Decimal,

    #[serde(default = "default_danger_percent")]
    pub danger_percent: Decimal,

    #[serde(default = "default_critical_percent")]
    pub critical_percent: Decimal,
}

fn default_warning_percent() -> Decimal {
    Decimal::new(75, 0)
}

fn default_danger_percent() -> Decimal {
    Decimal::new(90, 0)
}

fn default_critical_percent() -> Decimal {
    Decimal::new(100, 0)
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning_percent: default_warning_percent(),
            danger_percent: default_danger_percent(),
            critical_percent: default_critical_percent(),
        }
    }
}

/// Derive alert candidates for an agent from its current budget usage and
/// circuit-breaker status. Only the highest applicable budget threshold is
/// reported; status conditions are reported independently.
pub fn derive_alerts(
    budget: &BudgetSnapshot,
    status: AgentStatus,
    thresholds: &AlertThresholds,
) -> Vec<AlertCandidate> {
    let mut candidates = Vec::new();
    let agent_id = budget.agent_id.clone();

    // Unlimited budgets (usage None) never produce budget alerts
    if let Some(usage) = budget.usage_percent {
        let rounded = usage.round_dp(1);
        if usage >= thresholds.critical_percent {
            candidates.push(AlertCandidate {
                condition: AlertCondition::BudgetCritical,
                severity: AlertSeverity::Critical,
                title: "Monthly budget exhausted".to_string(),
                message: format!(
                    "Agent {} has used {}% of its monthly budget",
                    agent_id, rounded
                ),
                agent_id: Some(agent_id.clone()),
                transaction_id: None,
            });
        } else if usage >= thresholds.danger_percent {
            candidates.push(AlertCandidate {
                condition: AlertCondition::BudgetDanger,
                severity: AlertSeverity::Danger,
                title: "Monthly budget nearly exhausted".to_string(),
                message: format!(
                    "Agent {} has used {}% of its monthly budget",
                    agent_id, rounded
                ),
                agent_id: Some(agent_id.clone()),
                transaction_id: None,
            });
        } else if usage >= thresholds.warning_percent {
            candidates.push(AlertCandidate {
                condition: AlertCondition::BudgetWarning,
                severity: AlertSeverity::Warning,
                title: "Monthly budget running high".to_string(),
                message: format!(
                    "Agent {} has used {}% of its monthly budget",
                    agent_id, rounded
                ),
                agent_id: Some(agent_id.clone()),
                transaction_id: None,
            });
        }
    }

    match status {
        AgentStatus::Red => candidates.push(AlertCandidate {
            condition: AlertCondition::AgentFrozen,
            severity: AlertSeverity::Critical,
            title: "Agent frozen".to_string(),
            message: format!(
                "Agent {} breached a hard velocity limit; authorizations are declined until an explicit status reset",
                agent_id
            ),
            agent_id: Some(agent_id.clone()),
            transaction_id: None,
        }),
        AgentStatus::Yellow => candidates.push(AlertCandidate {
            condition: AlertCondition::AgentThrottled,
            severity: AlertSeverity::Warning,
            title: "Agent throttled".to_string(),
            message: format!("Agent {} breached a soft velocity limit", agent_id),
            agent_id: Some(agent_id.clone()),
            transaction_id: None,
        }),
        AgentStatus::Green => {}
    }

    candidates
}
