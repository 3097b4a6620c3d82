//! Circuit-breaker state machine
//!
//! Evaluation can only move an agent's status upward (toward `red`).
//! The single downward path is `reset_status`, which demands an elevated
//! caller and a reason and emits a `StatusChanged` event for auditing and
//! notification fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use payguard_core::{Actor, AgentId, AgentStatus, Cents};
use serde::{Deserialize, Serialize};

use crate::error::VelocityError;
use crate::window::SpendWindow;

/// Per-agent velocity limits. `None` at any granularity means unlimited
/// there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityLimits {
    pub soft_limit_cents_per_minute: Option<Cents>,
    pub hard_limit_cents_per_minute: Option<Cents>,
    pub soft_limit_cents_per_day: Option<Cents>,
    pub hard_limit_cents_per_day: Option<Cents>,
}

impl VelocityLimits {
    /// No limits at all - every evaluation stays green.
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Emitted whenever an agent's status actually changes, by escalation or
/// by a manual reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub agent_id: AgentId,
    pub old_status: AgentStatus,
    pub new_status: AgentStatus,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

/// Result of evaluating one settlement.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub status: AgentStatus,
    pub minute_total: Cents,
    pub day_total: Cents,
    /// Present only when this settlement escalated the status.
    pub change: Option<StatusChanged>,
}

struct AgentGuard {
    limits: VelocityLimits,
    window: SpendWindow,
    status: AgentStatus,
    status_changed_at: DateTime<Utc>,
}

impl AgentGuard {
    /// Status the current windows call for, considered in isolation.
    /// Never consulted to lower the actual status.
    fn breach_status(&self, minute: Cents, day: Cents) -> (AgentStatus, Option<String>) {
        if let Some(limit) = self.limits.hard_limit_cents_per_minute {
            if minute > limit {
                return (
                    AgentStatus::Red,
                    Some(format!("hard per-minute limit exceeded: {} > {}", minute, limit)),
                );
            }
        }
        if let Some(limit) = self.limits.hard_limit_cents_per_day {
            if day > limit {
                return (
                    AgentStatus::Red,
                    Some(format!("hard per-day limit exceeded: {} > {}", day, limit)),
                );
            }
        }
        if let Some(limit) = self.limits.soft_limit_cents_per_minute {
            if minute > limit {
                return (
                    AgentStatus::Yellow,
                    Some(format!("soft per-minute limit exceeded: {} > {}", minute, limit)),
                );
            }
        }
        if let Some(limit) = self.limits.soft_limit_cents_per_day {
            if day > limit {
                return (
                    AgentStatus::Yellow,
                    Some(format!("soft per-day limit exceeded: {} > {}", day, limit)),
                );
            }
        }
        (AgentStatus::Green, None)
    }
}

/// Per-agent rate limiter and status keeper.
pub struct VelocityGuard {
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentGuard>>>>,
}

impl VelocityGuard {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent at provisioning time. New agents start green.
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        limits: VelocityLimits,
        now: DateTime<Utc>,
    ) -> Result<(), VelocityError> {
        let mut agents = self.agents.write().map_err(|_| VelocityError::Poisoned)?;

        if agents.contains_key(&agent_id) {
            return Err(VelocityError::AgentExists(agent_id));
        }

        agents.insert(
            agent_id.clone(),
            Arc::new(Mutex::new(AgentGuard {
                limits,
                window: SpendWindow::new(now),
                status: AgentStatus::Green,
                status_changed_at: now,
            })),
        );

        tracing::info!(agent = %agent_id, "velocity guard registered");
        Ok(())
    }

    /// Record a settlement and re-evaluate the windows. The status can
    /// only escalate here; an agent already at the breached level emits no
    /// new change event.
    pub fn evaluate(
        &self,
        agent_id: &AgentId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<Evaluation, VelocityError> {
        let guard = self.agent(agent_id)?;
        let mut state = guard.lock().map_err(|_| VelocityError::Poisoned)?;

        state.window.record(amount, at);
        let minute = state.window.minute_total(at);
        let day = state.window.day_total(at);

        let (breach, reason) = state.breach_status(minute, day);
        let current = state.status;
        let target = current.max(breach);

        let change = if target > current {
            state.status = target;
            state.status_changed_at = at;
            let change = StatusChanged {
                agent_id: agent_id.clone(),
                old_status: current,
                new_status: target,
                reason: reason.unwrap_or_else(|| "velocity limit exceeded".to_string()),
                changed_at: at,
            };
            tracing::warn!(
                agent = %agent_id,
                old = %change.old_status,
                new = %change.new_status,
                reason = %change.reason,
                "agent status escalated"
            );
            Some(change)
        } else {
            None
        };

        Ok(Evaluation {
            status: state.status,
            minute_total: minute,
            day_total: day,
            change,
        })
    }

    /// Current status of an agent.
    pub fn status(&self, agent_id: &AgentId) -> Result<AgentStatus, VelocityError> {
        let guard = self.agent(agent_id)?;
        let state = guard.lock().map_err(|_| VelocityError::Poisoned)?;
        Ok(state.status)
    }

    pub fn status_changed_at(&self, agent_id: &AgentId) -> Result<DateTime<Utc>, VelocityError> {
        let guard = self.agent(agent_id)?;
        let state = guard.lock().map_err(|_| VelocityError::Poisoned)?;
        Ok(state.status_changed_at)
    }

    /// Manually change an agent's status. This is the only path that can
    /// improve a status, and it is restricted to elevated callers and
    /// requires a reason.
    pub fn reset_status(
        &self,
        agent_id: &AgentId,
        to: AgentStatus,
        actor: &Actor,
        reason: &str,
    ) -> Result<StatusChanged, VelocityError> {
        if !actor.role.is_elevated() {
            return Err(VelocityError::Forbidden);
        }
        if reason.trim().is_empty() {
            return Err(VelocityError::ReasonRequired);
        }

        let guard = self.agent(agent_id)?;
        let mut state = guard.lock().map_err(|_| VelocityError::Poisoned)?;

        if state.status == to {
            return Err(VelocityError::StatusUnchanged {
                agent_id: agent_id.clone(),
                status: to,
            });
        }

        let now = Utc::now();
        let change = StatusChanged {
            agent_id: agent_id.clone(),
            old_status: state.status,
            new_status: to,
            reason: reason.trim().to_string(),
            changed_at: now,
        };
        state.status = to;
        state.status_changed_at = now;

        tracing::info!(
            agent = %agent_id,
            old = %change.old_status,
            new = %change.new_status,
            by = %actor.audit_label(),
            "agent status manually changed"
        );
        Ok(change)
    }

    /// Replay hook: reinstate a persisted status at startup without
    /// emitting a change event or requiring a caller.
    pub fn restore_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<(), VelocityError> {
        let guard = self.agent(agent_id)?;
        let mut state = guard.lock().map_err(|_| VelocityError::Poisoned)?;
        state.status = status;
        state.status_changed_at = changed_at;
        Ok(())
    }

    pub fn has_agent(&self, agent_id: &AgentId) -> bool {
        self.agents
            .read()
            .map(|agents| agents.contains_key(agent_id))
            .unwrap_or(false)
    }

    fn agent(&self, agent_id: &AgentId) -> Result<Arc<Mutex<AgentGuard>>, VelocityError> {
        let agents = self.agents.read().map_err(|_| VelocityError::Poisoned)?;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| VelocityError::UnknownAgent(agent_id.clone()))
    }
}

impl Default for VelocityGuard {
    fn default() -> Self {
        Self::new()
    }
}
