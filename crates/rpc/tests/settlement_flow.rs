//! End-to-end settlement pipeline tests

use chrono::{Duration, TimeZone, Utc};
use payguard_alerts::AlertCondition;
use payguard_core::{Actor, AgentId, AgentStatus, Cents, OrgId, Role, SettlementId};
use payguard_ledger::SpendEvent;
use payguard_outbox::{DeliveryStatus, LogSink};
use payguard_rpc::{AppContext, AuthDecision, DeclineReason, GuardError, GuardrailConfig};
use payguard_velocity::VelocityLimits;

fn cents(v: i64) -> Cents {
    Cents::new(v).unwrap()
}

fn org() -> OrgId {
    OrgId::new("org-1").unwrap()
}

fn agent() -> AgentId {
    AgentId::new("agent-1").unwrap()
}

fn owner() -> Actor {
    Actor::new("u-owner", org(), Role::Owner)
}

fn viewer() -> Actor {
    Actor::new("u-viewer", org(), Role::Viewer)
}

fn ctx() -> AppContext {
    AppContext::in_memory(GuardrailConfig::default()).unwrap()
}

fn settlement(id: &str, amount: i64, at: chrono::DateTime<Utc>) -> SpendEvent {
    SpendEvent::new(
        SettlementId::new(id).unwrap(),
        agent(),
        org(),
        cents(amount),
        at,
    )
}

fn base_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

/// Org funded with `balance`, agent with the given budget and limits.
fn provisioned(balance: i64, budget: i64, limits: VelocityLimits) -> AppContext {
    let ctx = ctx();
    ctx.create_organization(&owner(), org(), cents(balance)).unwrap();
    ctx.register_agent(
        &owner(),
        agent(),
        org(),
        cents(budget),
        Utc::now() + Duration::days(30),
        limits,
    )
    .unwrap();
    ctx
}

#[test]
fn settlement_deducts_balance_and_accumulates_spend() {
    let ctx = provisioned(100_000, 50_000, VelocityLimits::unlimited());

    let report = ctx
        .process_settlement(&settlement("stl-1", 12_500, Utc::now()))
        .unwrap();

    assert!(!report.is_replay());
    assert_eq!(report.outcome.balance(), cents(87_500));
    assert_eq!(report.status, AgentStatus::Green);
    assert_eq!(report.budget.unwrap().current_spend, cents(12_500));
    assert_eq!(ctx.balance(&org()).unwrap(), cents(87_500));
}

#[test]
fn duplicate_settlement_short_circuits_whole_pipeline() {
    let ctx = provisioned(100_000, 50_000, VelocityLimits::unlimited());
    let event = settlement("stl-1", 10_000, Utc::now());

    let first = ctx.process_settlement(&event).unwrap();
    let second = ctx.process_settlement(&event).unwrap();

    assert!(!first.is_replay());
    assert!(second.is_replay());
    // Same resulting balance reported both times
    assert_eq!(first.outcome.balance(), second.outcome.balance());
    // Ledger mutated once
    assert_eq!(ctx.balance(&org()).unwrap(), cents(90_000));
    // Budget counted once
    let view = ctx.agent_view(&agent()).unwrap();
    assert_eq!(view.budget.current_spend, cents(10_000));
}

#[test]
fn budget_alert_progression_without_duplicates() {
    let ctx = provisioned(1_000_000, 10_000, VelocityLimits::unlimited());
    let t = base_time();

    // 7400: under every threshold
    ctx.process_settlement(&settlement("stl-1", 7_400, t)).unwrap();
    assert_eq!(ctx.open_alerts(&org()).unwrap().len(), 0);

    // 7500: warning
    let report = ctx
        .process_settlement(&settlement("stl-2", 100, t + Duration::minutes(5)))
        .unwrap();
    assert_eq!(report.alerts_created, 1);
    let open = ctx.open_alerts(&org()).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].condition, AlertCondition::BudgetWarning);

    // 9000: danger joins the still-open warning
    ctx.process_settlement(&settlement("stl-3", 1_500, t + Duration::minutes(10)))
        .unwrap();
    let open = ctx.open_alerts(&org()).unwrap();
    let conditions: Vec<_> = open.iter().map(|a| a.condition).collect();
    assert!(conditions.contains(&AlertCondition::BudgetDanger));

    // 10000: critical; and no duplicate warning appeared at any point
    ctx.process_settlement(&settlement("stl-4", 1_000, t + Duration::minutes(15)))
        .unwrap();
    let open = ctx.open_alerts(&org()).unwrap();
    let conditions: Vec<_> = open.iter().map(|a| a.condition).collect();
    assert!(conditions.contains(&AlertCondition::BudgetCritical));
    assert_eq!(
        conditions
            .iter()
            .filter(|c| **c == AlertCondition::BudgetWarning)
            .count(),
        1
    );

    // Ordered most severe first
    let severities: Vec<_> = open.iter().map(|a| a.severity as u8).collect();
    let mut sorted = severities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(severities, sorted);
}

#[test]
fn hard_velocity_breach_freezes_agent_and_declines_authorizations() {
    let limits = VelocityLimits {
        hard_limit_cents_per_minute: Some(cents(5_000)),
        ..VelocityLimits::default()
    };
    let ctx = provisioned(1_000_000, 0, limits);
    let t = base_time();

    // 6000 cents within 60 seconds
    ctx.process_settlement(&settlement("stl-1", 3_000, t)).unwrap();
    let report = ctx
        .process_settlement(&settlement("stl-2", 3_000, t + Duration::seconds(20)))
        .unwrap();

    let change = report.status_change.expect("escalation expected");
    assert_eq!(change.new_status, AgentStatus::Red);

    // Frozen agents are declined
    assert_eq!(
        ctx.authorize(&agent(), cents(1)).unwrap(),
        AuthDecision::Declined {
            reason: DeclineReason::AgentFrozen
        }
    );

    // A frozen-agent alert is open
    let conditions: Vec<_> = ctx
        .open_alerts(&org())
        .unwrap()
        .iter()
        .map(|a| a.condition)
        .collect();
    assert!(conditions.contains(&AlertCondition::AgentFrozen));

    // 24 idle hours later it is still red, and no second change fired
    let report = ctx
        .process_settlement(&settlement("stl-3", 100, t + Duration::hours(24)))
        .unwrap();
    assert_eq!(report.status, AgentStatus::Red);
    assert!(report.status_change.is_none());

    // The status-changed event is queued exactly once
    assert_eq!(ctx.outbox.count_by_status(DeliveryStatus::Pending).unwrap(), 1);
}

#[test]
fn manual_reset_restores_green_and_fans_out() {
    let limits = VelocityLimits {
        hard_limit_cents_per_minute: Some(cents(5_000)),
        ..VelocityLimits::default()
    };
    let ctx = provisioned(1_000_000, 0, limits);
    let t = base_time();

    ctx.process_settlement(&settlement("stl-1", 6_000, t)).unwrap();
    assert_eq!(ctx.agent_view(&agent()).unwrap().status, AgentStatus::Red);

    // Non-elevated callers cannot reset
    let err = ctx
        .reset_status(&viewer(), &agent(), AgentStatus::Green, "please")
        .unwrap_err();
    assert!(matches!(
        err,
        GuardError::Velocity(payguard_velocity::VelocityError::Forbidden)
    ));

    // Elevated reset with a reason works
    let change = ctx
        .reset_status(&owner(), &agent(), AgentStatus::Green, "reviewed: limits were misconfigured")
        .unwrap();
    assert_eq!(change.old_status, AgentStatus::Red);
    assert_eq!(change.new_status, AgentStatus::Green);
    assert!(ctx.authorize(&agent(), cents(100)).unwrap().is_approved());

    // Escalation + manual reset both queued for notification fan-out
    assert_eq!(ctx.outbox.count_by_status(DeliveryStatus::Pending).unwrap(), 2);
}

#[tokio::test]
async fn queued_notifications_drain_to_sink() {
    let limits = VelocityLimits {
        hard_limit_cents_per_minute: Some(cents(5_000)),
        ..VelocityLimits::default()
    };
    let ctx = provisioned(1_000_000, 0, limits);
    ctx.process_settlement(&settlement("stl-1", 6_000, base_time()))
        .unwrap();

    let report = ctx.drain_notifications(&LogSink).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(ctx.outbox.count_by_status(DeliveryStatus::Pending).unwrap(), 0);
    assert_eq!(ctx.outbox.count_by_status(DeliveryStatus::Delivered).unwrap(), 1);
}

#[test]
fn authorization_considers_budget_and_balance() {
    let ctx = provisioned(5_000, 10_000, VelocityLimits::unlimited());

    // Within budget and balance
    assert!(ctx.authorize(&agent(), cents(4_000)).unwrap().is_approved());

    // Exceeds remaining budget
    ctx.process_settlement(&settlement("stl-1", 4_000, Utc::now()))
        .unwrap();
    assert_eq!(
        ctx.authorize(&agent(), cents(7_000)).unwrap(),
        AuthDecision::Declined {
            reason: DeclineReason::BudgetExhausted
        }
    );

    // Within budget but exceeds the remaining prepaid balance (1000 left)
    assert_eq!(
        ctx.authorize(&agent(), cents(2_000)).unwrap(),
        AuthDecision::Declined {
            reason: DeclineReason::InsufficientBalance
        }
    );
}

#[test]
fn unlimited_budget_authorizes_any_amount_within_balance() {
    let ctx = provisioned(1_000_000, 0, VelocityLimits::unlimited());

    assert!(ctx.authorize(&agent(), cents(900_000)).unwrap().is_approved());
    assert_eq!(
        ctx.authorize(&agent(), cents(1_000_001)).unwrap(),
        AuthDecision::Declined {
            reason: DeclineReason::InsufficientBalance
        }
    );
}

#[test]
fn manual_operations_require_elevated_role() {
    let ctx = ctx();

    let err = ctx
        .create_organization(&viewer(), org(), cents(100))
        .unwrap_err();
    assert!(matches!(err, GuardError::Forbidden { .. }));

    ctx.create_organization(&owner(), org(), cents(100)).unwrap();

    assert!(matches!(
        ctx.add_funds(&viewer(), &org(), cents(100)),
        Err(GuardError::Forbidden { .. })
    ));
    assert!(matches!(
        ctx.deduct_funds(&viewer(), &org(), cents(100)),
        Err(GuardError::Forbidden { .. })
    ));
    assert!(matches!(
        ctx.register_agent(
            &viewer(),
            agent(),
            org(),
            cents(0),
            Utc::now() + Duration::days(30),
            VelocityLimits::unlimited(),
        ),
        Err(GuardError::Forbidden { .. })
    ));
}

#[test]
fn settlement_for_foreign_agent_is_rejected_before_mutation() {
    let ctx = provisioned(100_000, 0, VelocityLimits::unlimited());
    let other = OrgId::new("org-2").unwrap();
    ctx.create_organization(&Actor::new("u-owner", other.clone(), Role::Owner), other.clone(), cents(50_000))
        .unwrap();

    // Settlement names org-2 but the agent spends against org-1
    let event = SpendEvent::new(
        SettlementId::new("stl-x").unwrap(),
        agent(),
        other.clone(),
        cents(1_000),
        Utc::now(),
    );

    assert!(matches!(
        ctx.process_settlement(&event),
        Err(GuardError::Validation(_))
    ));
    assert_eq!(ctx.balance(&other).unwrap(), cents(50_000));
    assert_eq!(ctx.balance(&org()).unwrap(), cents(100_000));
}

#[test]
fn settlements_are_audited() {
    let ctx = provisioned(100_000, 0, VelocityLimits::unlimited());

    ctx.process_settlement(&settlement("stl-1", 1_000, Utc::now()))
        .unwrap();
    ctx.process_settlement(&settlement("stl-2", 2_000, Utc::now()))
        .unwrap();

    let records = ctx.audit.read_all().unwrap();
    let settlements: Vec<_> = records
        .iter()
        .filter(|r| r.action == "apply_settlement")
        .collect();
    assert_eq!(settlements.len(), 2);
    assert!(settlements.iter().all(|r| r.is_success()));
}

#[test]
fn journal_replay_restores_state_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let limits = VelocityLimits {
        hard_limit_cents_per_minute: Some(cents(5_000)),
        ..VelocityLimits::default()
    };

    {
        let ctx = AppContext::open(dir.path(), GuardrailConfig::default()).unwrap();
        ctx.create_organization(&owner(), org(), cents(0)).unwrap();
        ctx.add_funds(&owner(), &org(), cents(100_000)).unwrap();
        ctx.register_agent(
            &owner(),
            agent(),
            org(),
            cents(50_000),
            Utc::now() + Duration::days(30),
            limits,
        )
        .unwrap();
        ctx.process_settlement(&settlement("stl-1", 6_000, Utc::now()))
            .unwrap();
        assert_eq!(ctx.agent_view(&agent()).unwrap().status, AgentStatus::Red);
    }

    // Reopen: balances, spend, status and the idempotency guard survive
    let ctx = AppContext::open(dir.path(), GuardrailConfig::default()).unwrap();

    assert_eq!(ctx.balance(&org()).unwrap(), cents(94_000));
    let view = ctx.agent_view(&agent()).unwrap();
    assert_eq!(view.status, AgentStatus::Red);
    assert_eq!(view.budget.current_spend, cents(6_000));

    let replayed = ctx
        .process_settlement(&settlement("stl-1", 6_000, Utc::now()))
        .unwrap();
    assert!(replayed.is_replay());
    assert_eq!(ctx.balance(&org()).unwrap(), cents(94_000));
}

#[test]
fn replay_preserves_manual_reset() {
    let dir = tempfile::tempdir().unwrap();
    let limits = VelocityLimits {
        hard_limit_cents_per_minute: Some(cents(5_000)),
        ..VelocityLimits::default()
    };

    {
        let ctx = AppContext::open(dir.path(), GuardrailConfig::default()).unwrap();
        ctx.create_organization(&owner(), org(), cents(100_000)).unwrap();
        ctx.register_agent(
            &owner(),
            agent(),
            org(),
            cents(0),
            Utc::now() + Duration::days(30),
            limits,
        )
        .unwrap();
        ctx.process_settlement(&settlement("stl-1", 6_000, Utc::now()))
            .unwrap();
        ctx.reset_status(&owner(), &agent(), AgentStatus::Green, "reviewed and cleared")
            .unwrap();
    }

    let ctx = AppContext::open(dir.path(), GuardrailConfig::default()).unwrap();
    assert_eq!(ctx.agent_view(&agent()).unwrap().status, AgentStatus::Green);
}
