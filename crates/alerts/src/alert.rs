//! Alert types

use chrono::{DateTime, Utc};
use payguard_core::{AgentId, OrgId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Alert severity - ordered from lowest to highest so display ordering is
/// `max()`-compatible: critical > danger > warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning = 1,
    Danger = 2,
    Critical = 3,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Danger => "danger",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(AlertSeverity::Warning),
            "danger" => Some(AlertSeverity::Danger),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

impl PartialOrd for AlertSeverity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlertSeverity {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// The condition an alert reports. One open alert may exist per
/// `(agent, condition)` pair at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Budget usage crossed the warning threshold
    BudgetWarning,
    /// Budget usage crossed the danger threshold
    BudgetDanger,
    /// Budget usage reached or passed 100%
    BudgetCritical,
    /// Circuit breaker is red
    AgentFrozen,
    /// Circuit breaker is yellow
    AgentThrottled,
    /// Audit writes are failing; reconciliation needed
    AuditLag,
}

impl AlertCondition {
    pub fn key(&self) -> &'static str {
        match self {
            AlertCondition::BudgetWarning => "budget_warning",
            AlertCondition::BudgetDanger => "budget_danger",
            AlertCondition::BudgetCritical => "budget_critical",
            AlertCondition::AgentFrozen => "agent_frozen",
            AlertCondition::AgentThrottled => "agent_throttled",
            AlertCondition::AuditLag => "audit_lag",
        }
    }

    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "budget_warning" => Some(AlertCondition::BudgetWarning),
            "budget_danger" => Some(AlertCondition::BudgetDanger),
            "budget_critical" => Some(AlertCondition::BudgetCritical),
            "agent_frozen" => Some(AlertCondition::AgentFrozen),
            "agent_throttled" => Some(AlertCondition::AgentThrottled),
            "audit_lag" => Some(AlertCondition::AuditLag),
            _ => None,
        }
    }
}

/// Stable de-duplication key for an `(agent, condition)` pair. System
/// conditions without an agent hash under a fixed scope.
pub fn dedup_key(agent_id: Option<&AgentId>, condition: AlertCondition) -> String {
    let scope = agent_id.map(|a| a.as_str()).unwrap_or("system");
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b":");
    hasher.update(condition.key().as_bytes());
    hex::encode(hasher.finalize())
}

/// A derived alert before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCandidate {
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub agent_id: Option<AgentId>,
    pub transaction_id: Option<String>,
}

impl AlertCandidate {
    pub fn dedup_key(&self) -> String {
        dedup_key(self.agent_id.as_ref(), self.condition)
    }
}

/// A persisted alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub dedup_key: String,
    pub organization_id: OrgId,
    pub agent_id: Option<AgentId>,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub transaction_id: Option<String>,
    pub is_read: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}
