//! CLI commands

use chrono::{DateTime, Utc};
use payguard_core::{Actor, AgentId, AgentStatus, Cents, OrgId, SettlementId};
use payguard_ledger::SpendEvent;
use payguard_outbox::LogSink;
use payguard_velocity::VelocityLimits;

use crate::context::{AppContext, AuthDecision};

fn dollars(cents: Cents) -> String {
    format!("{}.{:02}", cents.value() / 100, cents.value() % 100)
}

/// Register an organization with an opening balance
pub fn create_org(
    ctx: &AppContext,
    actor: &Actor,
    org: &str,
    opening_cents: i64,
) -> Result<(), anyhow::Error> {
    let org_id = OrgId::new(org)?;
    let opening = Cents::new(opening_cents)?;

    let balance = ctx.create_organization(actor, org_id.clone(), opening)?;

    println!("✅ Organization {} created with balance ${}", org_id, dollars(balance));
    Ok(())
}

/// Add funds to an organization
pub fn fund(
    ctx: &AppContext,
    actor: &Actor,
    org: &str,
    amount_cents: i64,
) -> Result<(), anyhow::Error> {
    let org_id = OrgId::new(org)?;
    let amount = Cents::new(amount_cents)?;

    let balance = ctx.add_funds(actor, &org_id, amount)?;

    println!("✅ Added ${} to {} (balance: ${})", dollars(amount), org_id, dollars(balance));
    Ok(())
}

/// Manually deduct funds from an organization
pub fn deduct(
    ctx: &AppContext,
    actor: &Actor,
    org: &str,
    amount_cents: i64,
) -> Result<(), anyhow::Error> {
    let org_id = OrgId::new(org)?;
    let amount = Cents::new(amount_cents)?;

    let balance = ctx.deduct_funds(actor, &org_id, amount)?;

    println!("✅ Deducted ${} from {} (balance: ${})", dollars(amount), org_id, dollars(balance));
    Ok(())
}

/// Provision an agent cardholder
#[allow(clippy::too_many_arguments)]
pub fn register_agent(
    ctx: &AppContext,
    actor: &Actor,
    agent: &str,
    org: &str,
    monthly_budget_cents: i64,
    reset_date: DateTime<Utc>,
    limits: VelocityLimits,
) -> Result<(), anyhow::Error> {
    let agent_id = AgentId::new(agent)?;
    let org_id = OrgId::new(org)?;
    let budget = Cents::new(monthly_budget_cents)?;

    ctx.register_agent(actor, agent_id.clone(), org_id, budget, reset_date, limits)?;

    println!("✅ Agent {} registered (budget ${}/month)", agent_id, dollars(budget));
    Ok(())
}

/// Process a settlement notification
pub fn settle(
    ctx: &AppContext,
    settlement_id: &str,
    agent: &str,
    org: &str,
    amount_cents: i64,
    occurred_at: Option<DateTime<Utc>>,
) -> Result<(), anyhow::Error> {
    let event = SpendEvent::new(
        SettlementId::new(settlement_id)?,
        AgentId::new(agent)?,
        OrgId::new(org)?,
        Cents::new(amount_cents)?,
        occurred_at.unwrap_or_else(Utc::now),
    );

    let report = ctx.process_settlement(&event)?;

    if report.is_replay() {
        println!(
            "ℹ️  Settlement {} already applied (balance ${})",
            settlement_id,
            dollars(report.outcome.balance())
        );
        return Ok(());
    }

    println!(
        "✅ Settlement {} applied: ${} (balance ${}, agent {})",
        settlement_id,
        dollars(event.amount_cents),
        dollars(report.outcome.balance()),
        report.status,
    );
    if let Some(change) = report.status_change {
        println!("⚠️  Agent escalated {} → {}: {}", change.old_status, change.new_status, change.reason);
    }
    if report.alerts_created > 0 {
        println!("🔔 {} new alert(s) raised", report.alerts_created);
    }
    Ok(())
}

/// Run a synchronous authorization check
pub fn authorize(ctx: &AppContext, agent: &str, amount_cents: i64) -> Result<(), anyhow::Error> {
    let agent_id = AgentId::new(agent)?;
    let amount = Cents::new(amount_cents)?;

    match ctx.authorize(&agent_id, amount)? {
        AuthDecision::Approved => {
            println!("✅ Approved: {} may spend ${}", agent_id, dollars(amount));
        }
        AuthDecision::Declined { reason } => {
            println!("❌ Declined: {}", reason);
        }
    }
    Ok(())
}

/// Show an organization's balance
pub fn balance(ctx: &AppContext, org: &str) -> Result<(), anyhow::Error> {
    let org_id = OrgId::new(org)?;
    let balance = ctx.balance(&org_id)?;

    println!("Balance for {}: ${}", org_id, dollars(balance));
    Ok(())
}

/// Show an agent's budget usage and circuit-breaker status
pub fn status(ctx: &AppContext, agent: &str) -> Result<(), anyhow::Error> {
    let agent_id = AgentId::new(agent)?;
    let view = ctx.agent_view(&agent_id)?;

    println!("Agent {}", agent_id);
    println!("  status:     {} (since {})", view.status, view.status_changed_at);
    println!(
        "  spend:      ${} of ${}",
        dollars(view.budget.current_spend),
        dollars(view.budget.monthly_budget)
    );
    match view.budget.usage_percent {
        Some(usage) => println!("  usage:      {}%", usage.round_dp(1)),
        None => println!("  usage:      unlimited"),
    }
    println!("  resets at:  {}", view.budget.reset_date);
    Ok(())
}

/// List open alerts for an organization
pub fn alerts(ctx: &AppContext, org: &str) -> Result<(), anyhow::Error> {
    let org_id = OrgId::new(org)?;
    let alerts = ctx.open_alerts(&org_id)?;

    if alerts.is_empty() {
        println!("No open alerts for {}", org_id);
        return Ok(());
    }

    println!("Open alerts for {} ({}):", org_id, alerts.len());
    for alert in alerts {
        let read = if alert.is_read { " " } else { "*" };
        println!(
            "{} [{:>8}] {} — {}",
            read,
            alert.severity.as_str(),
            alert.title,
            alert.message
        );
    }
    Ok(())
}

/// Manually change an agent's status
pub fn reset_status(
    ctx: &AppContext,
    actor: &Actor,
    agent: &str,
    to: AgentStatus,
    reason: &str,
) -> Result<(), anyhow::Error> {
    let agent_id = AgentId::new(agent)?;

    let change = ctx.reset_status(actor, &agent_id, to, reason)?;

    println!(
        "✅ Agent {} status changed {} → {} ({})",
        agent_id, change.old_status, change.new_status, change.reason
    );
    Ok(())
}

/// Close out an agent's budget period early
pub fn reset_budget(ctx: &AppContext, actor: &Actor, agent: &str) -> Result<(), anyhow::Error> {
    let agent_id = AgentId::new(agent)?;

    let snapshot = ctx.reset_budget_period(actor, &agent_id)?;

    println!(
        "✅ Budget period reset for {} (next reset {})",
        agent_id, snapshot.reset_date
    );
    Ok(())
}

/// Deliver pending status-changed notifications
pub async fn drain(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let report = ctx.drain_notifications(&LogSink).await?;

    println!(
        "✅ Drained outbox: {} delivered, {} retried, {} failed",
        report.delivered, report.retried, report.failed
    );
    Ok(())
}

/// Roll over all expired budget periods
pub fn sweep(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let rolled = ctx.sweep_budgets(Utc::now())?;

    println!("✅ Swept budgets: {} agent(s) rolled over", rolled);
    Ok(())
}
