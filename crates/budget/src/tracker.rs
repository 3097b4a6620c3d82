//! Budget tracker implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Months, Utc};
use payguard_core::{AgentId, Cents};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BudgetError;

/// Per-agent budget state, guarded by its own mutex so spends on different
/// agents never contend.
#[derive(Debug)]
struct AgentBudget {
    monthly_budget: Cents,
    current_spend: Cents,
    reset_date: DateTime<Utc>,
}

impl AgentBudget {
    /// Apply any pending period rollover. `current_spend` only ever grows
    /// between rollovers, so zeroing here is the single point where it may
    /// decrease.
    fn roll_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let mut rolled = false;
        while now >= self.reset_date {
            self.current_spend = Cents::ZERO;
            self.reset_date = advance_reset(self.reset_date);
            rolled = true;
        }
        rolled
    }

    fn snapshot(&self, agent_id: &AgentId) -> BudgetSnapshot {
        BudgetSnapshot {
            agent_id: agent_id.clone(),
            monthly_budget: self.monthly_budget,
            current_spend: self.current_spend,
            remaining: self.monthly_budget.signed_sub(&self.current_spend),
            usage_percent: usage_percent(self.current_spend, self.monthly_budget),
            reset_date: self.reset_date,
        }
    }
}

fn advance_reset(date: DateTime<Utc>) -> DateTime<Utc> {
    date.checked_add_months(Months::new(1))
        .unwrap_or(date + Duration::days(31))
}

/// Percentage of the monthly budget consumed, exact to the cent.
///
/// A zero budget means "unlimited" and yields `None` - never a division
/// error.
fn usage_percent(spend: Cents, budget: Cents) -> Option<Decimal> {
    if budget.is_zero() {
        None
    } else {
        Some(spend.to_decimal() * Decimal::from(100) / budget.to_decimal())
    }
}

/// Point-in-time view of an agent's budget, after rollover was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub agent_id: AgentId,
    pub monthly_budget: Cents,
    pub current_spend: Cents,
    /// Budget minus spend; negative when over budget.
    pub remaining: i64,
    /// `None` when the budget is zero (unlimited).
    pub usage_percent: Option<Decimal>,
    pub reset_date: DateTime<Utc>,
}

impl BudgetSnapshot {
    pub fn is_over_budget(&self) -> bool {
        self.remaining < 0
    }
}

/// Tracks accumulated spend per agent.
pub struct BudgetTracker {
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentBudget>>>>,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent at provisioning time. A zero budget means
    /// unlimited.
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        monthly_budget: Cents,
        reset_date: DateTime<Utc>,
    ) -> Result<(), BudgetError> {
        let mut agents = self.agents.write().map_err(|_| BudgetError::Poisoned)?;

        if agents.contains_key(&agent_id) {
            return Err(BudgetError::AgentExists(agent_id));
        }

        agents.insert(
            agent_id.clone(),
            Arc::new(Mutex::new(AgentBudget {
                monthly_budget,
                current_spend: Cents::ZERO,
                reset_date,
            })),
        );

        tracing::info!(agent = %agent_id, budget = %monthly_budget, "agent budget registered");
        Ok(())
    }

    /// Add a settled amount to the agent's accumulated spend and return the
    /// resulting snapshot. Applies lazy rollover first.
    pub fn record_spend(
        &self,
        agent_id: &AgentId,
        amount: Cents,
        at: DateTime<Utc>,
    ) -> Result<BudgetSnapshot, BudgetError> {
        if amount.is_zero() {
            return Err(BudgetError::InvalidAmount(amount));
        }

        let budget = self.agent(agent_id)?;
        let mut guard = budget.lock().map_err(|_| BudgetError::Poisoned)?;

        guard.roll_if_due(at);
        guard.current_spend = guard
            .current_spend
            .checked_add(&amount)
            .ok_or_else(|| BudgetError::SpendOverflow(agent_id.clone()))?;

        let snapshot = guard.snapshot(agent_id);
        drop(guard);

        if snapshot.is_over_budget() {
            tracing::warn!(agent = %agent_id, spend = %snapshot.current_spend, "agent over budget");
        }
        Ok(snapshot)
    }

    /// Current budget view for an agent. Applies lazy rollover.
    pub fn snapshot(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<BudgetSnapshot, BudgetError> {
        let budget = self.agent(agent_id)?;
        let mut guard = budget.lock().map_err(|_| BudgetError::Poisoned)?;
        guard.roll_if_due(now);
        Ok(guard.snapshot(agent_id))
    }

    /// Explicitly close out the current period: zero the spend and advance
    /// the reset date past `now`.
    pub fn reset_period(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<BudgetSnapshot, BudgetError> {
        let budget = self.agent(agent_id)?;
        let mut guard = budget.lock().map_err(|_| BudgetError::Poisoned)?;

        guard.current_spend = Cents::ZERO;
        while guard.reset_date <= now {
            guard.reset_date = advance_reset(guard.reset_date);
        }

        tracing::info!(agent = %agent_id, reset_date = %guard.reset_date, "budget period reset");
        Ok(guard.snapshot(agent_id))
    }

    /// Sweep every agent whose period has ended. Returns how many agents
    /// were rolled over. Intended for a scheduled job; equivalent to the
    /// lazy path.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, BudgetError> {
        let agents = self.agents.read().map_err(|_| BudgetError::Poisoned)?;
        let mut rolled = 0;

        for budget in agents.values() {
            let mut guard = budget.lock().map_err(|_| BudgetError::Poisoned)?;
            if guard.roll_if_due(now) {
                rolled += 1;
            }
        }

        Ok(rolled)
    }

    pub fn has_agent(&self, agent_id: &AgentId) -> bool {
        self.agents
            .read()
            .map(|agents| agents.contains_key(agent_id))
            .unwrap_or(false)
    }

    fn agent(&self, agent_id: &AgentId) -> Result<Arc<Mutex<AgentBudget>>, BudgetError> {
        let agents = self.agents.read().map_err(|_| BudgetError::Poisoned)?;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| BudgetError::UnknownAgent(agent_id.clone()))
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cents(v: i64) -> Cents {
        Cents::new(v).unwrap()
    }

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn next_month() -> DateTime<Utc> {
        Utc::now() + Duration::days(30)
    }

    #[test]
    fn test_register_and_snapshot() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(10_000), next_month())
            .unwrap();

        let snapshot = tracker.snapshot(&id, Utc::now()).unwrap();
        assert_eq!(snapshot.current_spend, Cents::ZERO);
        assert_eq!(snapshot.remaining, 10_000);
        assert_eq!(snapshot.usage_percent, Some(Decimal::ZERO));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(10_000), next_month())
            .unwrap();
        assert!(matches!(
            tracker.register_agent(id.clone(), cents(5_000), next_month()),
            Err(BudgetError::AgentExists(_))
        ));
    }

    #[test]
    fn test_spend_accumulates() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(10_000), next_month())
            .unwrap();

        tracker.record_spend(&id, cents(3_000), Utc::now()).unwrap();
        let snapshot = tracker.record_spend(&id, cents(2_500), Utc::now()).unwrap();

        assert_eq!(snapshot.current_spend, cents(5_500));
        assert_eq!(snapshot.remaining, 4_500);
        assert_eq!(snapshot.usage_percent, Some(dec!(55)));
    }

    #[test]
    fn test_remaining_goes_negative_without_rejection() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(1_000), next_month())
            .unwrap();

        let snapshot = tracker.record_spend(&id, cents(1_500), Utc::now()).unwrap();

        assert_eq!(snapshot.remaining, -500);
        assert!(snapshot.is_over_budget());
        assert_eq!(snapshot.usage_percent, Some(dec!(150)));
    }

    #[test]
    fn test_zero_budget_is_unlimited() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), Cents::ZERO, next_month())
            .unwrap();

        let snapshot = tracker.record_spend(&id, cents(50_000), Utc::now()).unwrap();

        assert_eq!(snapshot.usage_percent, None);
        // remaining is still reported as the signed difference
        assert_eq!(snapshot.remaining, -50_000);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(1_000), next_month())
            .unwrap();
        assert!(matches!(
            tracker.record_spend(&id, Cents::ZERO, Utc::now()),
            Err(BudgetError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_unknown_agent() {
        let tracker = BudgetTracker::new();
        assert!(matches!(
            tracker.snapshot(&agent("ghost"), Utc::now()),
            Err(BudgetError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_lazy_rollover_on_access() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        let reset = Utc::now() - Duration::hours(1);
        tracker.register_agent(id.clone(), cents(10_000), reset).unwrap();

        // Spend recorded before the boundary... simulated by recording
        // directly after registration with a timestamp before reset_date.
        let before_boundary = reset - Duration::hours(2);
        tracker.record_spend(&id, cents(4_000), before_boundary).unwrap();

        // First access after the boundary rolls the period over
        let snapshot = tracker.snapshot(&id, Utc::now()).unwrap();
        assert_eq!(snapshot.current_spend, Cents::ZERO);
        assert!(snapshot.reset_date > Utc::now());
    }

    #[test]
    fn test_rollover_spans_multiple_periods() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        // Reset date three months in the past
        let reset = Utc::now() - Duration::days(90);
        tracker.register_agent(id.clone(), cents(10_000), reset).unwrap();

        let snapshot = tracker.snapshot(&id, Utc::now()).unwrap();
        assert!(snapshot.reset_date > Utc::now());
    }

    #[test]
    fn test_explicit_reset_period() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(10_000), next_month())
            .unwrap();
        tracker.record_spend(&id, cents(8_000), Utc::now()).unwrap();

        let snapshot = tracker.reset_period(&id, Utc::now()).unwrap();

        assert_eq!(snapshot.current_spend, Cents::ZERO);
        assert_eq!(snapshot.remaining, 10_000);
        assert!(snapshot.reset_date > Utc::now());
    }

    #[test]
    fn test_sweep_resets_expired_agents_only() {
        let tracker = BudgetTracker::new();
        let expired = agent("expired");
        let active = agent("active");
        tracker
            .register_agent(expired.clone(), cents(10_000), Utc::now() - Duration::hours(1))
            .unwrap();
        tracker
            .register_agent(active.clone(), cents(10_000), next_month())
            .unwrap();

        let rolled = tracker.sweep(Utc::now()).unwrap();
        assert_eq!(rolled, 1);

        // Sweeping again finds nothing due
        assert_eq!(tracker.sweep(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_spend_monotonic_within_period() {
        let tracker = BudgetTracker::new();
        let id = agent("agent-1");
        tracker
            .register_agent(id.clone(), cents(10_000), next_month())
            .unwrap();

        let mut last = Cents::ZERO;
        for _ in 0..10 {
            let snapshot = tracker.record_spend(&id, cents(100), Utc::now()).unwrap();
            assert!(snapshot.current_spend > last);
            last = snapshot.current_spend;
        }
    }

    #[test]
    fn test_usage_percent_exact() {
        assert_eq!(usage_percent(cents(7_400), cents(10_000)), Some(dec!(74)));
        assert_eq!(usage_percent(cents(1), cents(3)), Some(dec!(1) * dec!(100) / dec!(3)));
        assert_eq!(usage_percent(cents(500), Cents::ZERO), None);
    }
}
