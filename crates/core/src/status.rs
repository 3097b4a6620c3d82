//! Agent circuit-breaker status vocabulary
//!
//! Ordered from least to most restrictive so evaluation can use `max()`:
//! `Green < Yellow < Red`. The transition rules themselves live in the
//! velocity guard; this is just the shared vocabulary type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum_macros::{Display, EnumString};

/// Circuit-breaker status of an agent.
///
/// - `Green`: normal, authorizations allowed
/// - `Yellow`: throttled, a soft limit was breached
/// - `Red`: frozen, a hard limit was breached; authorizations are declined
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Green = 1,
    Yellow = 2,
    Red = 3,
}

impl AgentStatus {
    /// Frozen agents must have all further authorizations declined.
    pub fn is_frozen(&self) -> bool {
        matches!(self, AgentStatus::Red)
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, AgentStatus::Yellow)
    }
}

impl PartialOrd for AgentStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgentStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Green
    }
}
