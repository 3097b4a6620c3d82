//! Application context - wires everything together
//!
//! Owns the ledger, trackers, stores and outbox, and implements the three
//! entry points the collaborators call:
//!
//! - `process_settlement` for at-least-once settlement notifications
//! - `authorize` for synchronous pre-spend approval
//! - role-gated manual operations (funding, provisioning, status resets)

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::json;

use payguard_alerts::{
    derive_alerts, AlertCandidate, AlertCondition, AlertSeverity, AlertStore,
};
use payguard_audit::{AuditRecord, AuditTrail};
use payguard_budget::{BudgetSnapshot, BudgetTracker};
use payguard_core::{Actor, AgentId, AgentStatus, Cents, OrgId, SettlementId};
use payguard_ledger::{BalanceLedger, SettlementOutcome, SpendEvent};
use payguard_outbox::{DrainReport, NotificationSink, Outbox};
use payguard_velocity::{StatusChanged, VelocityGuard, VelocityLimits};

use crate::config::GuardrailConfig;
use crate::error::GuardError;
use crate::journal::{GuardEvent, JournalStore};

/// Actor label for changes the guard itself initiates.
const GUARD_ACTOR: &str = "velocity-guard";

/// Outcome of processing one settlement through the pipeline.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub outcome: SettlementOutcome,
    pub status: AgentStatus,
    /// Absent on idempotent replays, which touch nothing.
    pub budget: Option<BudgetSnapshot>,
    pub status_change: Option<StatusChanged>,
    pub alerts_created: usize,
}

impl SettlementReport {
    pub fn is_replay(&self) -> bool {
        self.outcome.is_replay()
    }
}

/// Synchronous authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Approved,
    Declined { reason: DeclineReason },
}

impl AuthDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, AuthDecision::Approved)
    }
}

/// Why an authorization was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// Circuit breaker is red
    AgentFrozen,
    /// Requested amount exceeds the remaining monthly budget
    BudgetExhausted,
    /// Organization balance cannot cover the amount
    InsufficientBalance,
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeclineReason::AgentFrozen => write!(f, "agent is frozen"),
            DeclineReason::BudgetExhausted => write!(f, "monthly budget exhausted"),
            DeclineReason::InsufficientBalance => write!(f, "insufficient organization balance"),
        }
    }
}

/// Read view of one agent for the presentation collaborator.
#[derive(Debug, Clone)]
pub struct AgentView {
    pub status: AgentStatus,
    pub status_changed_at: DateTime<Utc>,
    pub budget: BudgetSnapshot,
}

/// Application context - wires together all components.
pub struct AppContext {
    pub ledger: BalanceLedger,
    pub budget: BudgetTracker,
    pub velocity: VelocityGuard,
    pub alerts: AlertStore,
    pub audit: Arc<AuditTrail>,
    pub outbox: Outbox,
    journal: Option<JournalStore>,
    config: GuardrailConfig,
    /// Which organization each agent spends against
    agent_orgs: RwLock<HashMap<AgentId, OrgId>>,
    /// Audit write failures by the context itself (status changes etc.)
    audit_failures: AtomicU64,
    /// Failures already converted into an AuditLag alert
    alerted_failures: AtomicU64,
}

impl AppContext {
    /// Open a file-backed context and rebuild state from the journal.
    pub fn open(data_path: impl AsRef<Path>, config: GuardrailConfig) -> Result<Self, GuardError> {
        let data_path = data_path.as_ref();
        std::fs::create_dir_all(data_path)?;

        let audit = Arc::new(AuditTrail::new(data_path.join("audit.jsonl"))?);
        let ledger = BalanceLedger::with_lock_wait(Arc::clone(&audit), config.lock_wait());
        let alerts = AlertStore::new(data_path.join("alerts.db"))?;
        let outbox = Outbox::new(data_path.join("outbox.db"), config.retry.clone())?;
        let journal = JournalStore::new(data_path.join("journal.jsonl"))?;

        let ctx = Self {
            ledger,
            budget: BudgetTracker::new(),
            velocity: VelocityGuard::new(),
            alerts,
            audit,
            outbox,
            journal: Some(journal),
            config,
            agent_orgs: RwLock::new(HashMap::new()),
            audit_failures: AtomicU64::new(0),
            alerted_failures: AtomicU64::new(0),
        };

        let replayed = ctx.replay()?;
        if replayed > 0 {
            tracing::info!(events = replayed, "journal replayed");
        }
        Ok(ctx)
    }

    /// Context with in-memory stores and no journal (for testing).
    pub fn in_memory(config: GuardrailConfig) -> Result<Self, GuardError> {
        let audit = Arc::new(AuditTrail::in_memory());
        let ledger = BalanceLedger::with_lock_wait(Arc::clone(&audit), config.lock_wait());

        Ok(Self {
            ledger,
            budget: BudgetTracker::new(),
            velocity: VelocityGuard::new(),
            alerts: AlertStore::in_memory()?,
            audit,
            outbox: Outbox::in_memory(config.retry.clone())?,
            journal: None,
            config,
            agent_orgs: RwLock::new(HashMap::new()),
            audit_failures: AtomicU64::new(0),
            alerted_failures: AtomicU64::new(0),
        })
    }

    // === Manual operations (owner/admin only) ===

    /// Register an organization with an opening balance.
    pub fn create_organization(
        &self,
        actor: &Actor,
        org_id: OrgId,
        opening_balance: Cents,
    ) -> Result<Cents, GuardError> {
        self.require_elevated(actor, "create_organization")?;

        let balance = self
            .ledger
            .create_organization(org_id.clone(), opening_balance, actor)?;
        self.journal(&GuardEvent::OrganizationCreated {
            org_id,
            opening_balance,
            timestamp: Utc::now(),
        })?;
        Ok(balance)
    }

    /// Credit an organization's prepaid balance.
    pub fn add_funds(
        &self,
        actor: &Actor,
        org_id: &OrgId,
        amount: Cents,
    ) -> Result<Cents, GuardError> {
        self.require_elevated(actor, "add_funds")?;

        let new_balance = self.ledger.add_funds(org_id, amount, actor)?;
        self.journal(&GuardEvent::FundsAdded {
            org_id: org_id.clone(),
            amount,
            new_balance,
            timestamp: Utc::now(),
        })?;
        self.surface_audit_lag(org_id)?;
        Ok(new_balance)
    }

    /// Manually debit an organization's prepaid balance.
    pub fn deduct_funds(
        &self,
        actor: &Actor,
        org_id: &OrgId,
        amount: Cents,
    ) -> Result<Cents, GuardError> {
        self.require_elevated(actor, "deduct_funds")?;

        let new_balance = self.ledger.deduct_funds(org_id, amount, actor)?;
        self.journal(&GuardEvent::FundsDeducted {
            org_id: org_id.clone(),
            amount,
            new_balance,
            timestamp: Utc::now(),
        })?;
        self.surface_audit_lag(org_id)?;
        Ok(new_balance)
    }

    /// Provision an agent: budget, velocity limits and the organization it
    /// spends against.
    #[allow(clippy::too_many_arguments)]
    pub fn register_agent(
        &self,
        actor: &Actor,
        agent_id: AgentId,
        org_id: OrgId,
        monthly_budget: Cents,
        reset_date: DateTime<Utc>,
        limits: VelocityLimits,
    ) -> Result<(), GuardError> {
        self.require_elevated(actor, "register_agent")?;

        if !self.ledger.has_organization(&org_id) {
            return Err(GuardError::Validation(format!(
                "unknown organization: {org_id}"
            )));
        }

        let now = Utc::now();
        self.budget
            .register_agent(agent_id.clone(), monthly_budget, reset_date)?;
        self.velocity.register_agent(agent_id.clone(), limits, now)?;
        self.agent_orgs
            .write()
            .map_err(|_| GuardError::Validation("agent registry poisoned".to_string()))?
            .insert(agent_id.clone(), org_id.clone());

        self.record_audit(AuditRecord::success(
            "register_agent",
            "agent",
            agent_id.as_str(),
            actor.audit_label(),
            org_id.clone(),
            json!(null),
            json!({
                "monthly_budget_cents": monthly_budget,
                "status": AgentStatus::Green,
            }),
        ));
        self.journal(&GuardEvent::AgentRegistered {
            agent_id,
            org_id,
            monthly_budget,
            reset_date,
            limits,
            timestamp: now,
        })?;
        Ok(())
    }

    /// Manually change an agent's circuit-breaker status. The only path
    /// that can bring a throttled or frozen agent back to green.
    pub fn reset_status(
        &self,
        actor: &Actor,
        agent_id: &AgentId,
        to: AgentStatus,
        reason: &str,
    ) -> Result<StatusChanged, GuardError> {
        let org_id = self.agent_org(agent_id)?;
        let change = self.velocity.reset_status(agent_id, to, actor, reason)?;
        self.handle_status_change(&org_id, &change, &actor.audit_label())?;
        self.surface_audit_lag(&org_id)?;
        Ok(change)
    }

    /// Close out an agent's budget period early.
    pub fn reset_budget_period(
        &self,
        actor: &Actor,
        agent_id: &AgentId,
    ) -> Result<BudgetSnapshot, GuardError> {
        self.require_elevated(actor, "reset_budget_period")?;

        let org_id = self.agent_org(agent_id)?;
        let now = Utc::now();
        let snapshot = self.budget.reset_period(agent_id, now)?;

        self.record_audit(AuditRecord::success(
            "reset_budget_period",
            "agent",
            agent_id.as_str(),
            actor.audit_label(),
            org_id,
            json!(null),
            json!({ "reset_date": snapshot.reset_date }),
        ));
        self.journal(&GuardEvent::PeriodReset {
            agent_id: agent_id.clone(),
            timestamp: now,
        })?;
        Ok(snapshot)
    }

    /// Roll over every agent whose budget period has ended.
    pub fn sweep_budgets(&self, now: DateTime<Utc>) -> Result<usize, GuardError> {
        Ok(self.budget.sweep(now)?)
    }

    // === Settlement pipeline ===

    /// Process a settlement notification from the payment network.
    ///
    /// Flow: ledger deduct (the idempotency gate - a duplicate
    /// `settlement_id` short-circuits before any other mutation) →
    /// velocity evaluation → budget accumulation → alert re-derivation →
    /// status-changed fan-out. The ledger's applied-settlement map is the
    /// uniqueness constraint guarding the whole pipeline, so a redelivered
    /// settlement can never double-count windows or budgets.
    pub fn process_settlement(&self, event: &SpendEvent) -> Result<SettlementReport, GuardError> {
        // Reject before touching state if the agent is unknown or tied to
        // a different organization
        let org_id = self.agent_org(&event.agent_id)?;
        if org_id != event.organization_id {
            return Err(GuardError::Validation(format!(
                "agent {} does not spend against organization {}",
                event.agent_id, event.organization_id
            )));
        }

        // 1. Deduct, or detect a duplicate delivery
        let outcome = self.ledger.apply_settlement(event)?;
        if let SettlementOutcome::AlreadyApplied { .. } = outcome {
            return Ok(SettlementReport {
                outcome,
                status: self.velocity.status(&event.agent_id)?,
                budget: None,
                status_change: None,
                alerts_created: 0,
            });
        }
        self.journal(&GuardEvent::SettlementApplied {
            event: event.clone(),
            new_balance: outcome.balance(),
            timestamp: Utc::now(),
        })?;

        // 2. Velocity windows and circuit breaker
        let evaluation =
            self.velocity
                .evaluate(&event.agent_id, event.amount_cents, event.occurred_at)?;
        if let Some(ref change) = evaluation.change {
            self.handle_status_change(&org_id, change, GUARD_ACTOR)?;
        }

        // 3. Budget accumulation
        let snapshot =
            self.budget
                .record_spend(&event.agent_id, event.amount_cents, event.occurred_at)?;

        // 4. Alert re-derivation (refreshes open alerts, creates new ones)
        let mut alerts_created = 0;
        for candidate in derive_alerts(&snapshot, evaluation.status, &self.config.thresholds) {
            if self.alerts.upsert(&org_id, &candidate, Utc::now())?.is_created() {
                alerts_created += 1;
            }
        }

        // 5. Audit lag check (audit of the deduct itself happened in the
        // ledger, under the organization lock)
        self.surface_audit_lag(&org_id)?;

        Ok(SettlementReport {
            outcome,
            status: evaluation.status,
            budget: Some(snapshot),
            status_change: evaluation.change,
            alerts_created,
        })
    }

    /// Synchronous pre-spend approval. Read-only: decides from the current
    /// circuit-breaker status, remaining budget and balance without taking
    /// any lock beyond the balance read, so it stays within the latency
    /// budget of an in-flight purchase.
    pub fn authorize(&self, agent_id: &AgentId, amount: Cents) -> Result<AuthDecision, GuardError> {
        let status = self.velocity.status(agent_id)?;
        if status.is_frozen() {
            return Ok(AuthDecision::Declined {
                reason: DeclineReason::AgentFrozen,
            });
        }

        let snapshot = self.budget.snapshot(agent_id, Utc::now())?;
        if snapshot.usage_percent.is_some() && snapshot.remaining < amount.value() {
            return Ok(AuthDecision::Declined {
                reason: DeclineReason::BudgetExhausted,
            });
        }

        let org_id = self.agent_org(agent_id)?;
        let balance = self.ledger.get_balance(&org_id)?;
        if balance < amount {
            return Ok(AuthDecision::Declined {
                reason: DeclineReason::InsufficientBalance,
            });
        }

        Ok(AuthDecision::Approved)
    }

    // === Read access for the presentation collaborator ===

    pub fn balance(&self, org_id: &OrgId) -> Result<Cents, GuardError> {
        Ok(self.ledger.get_balance(org_id)?)
    }

    pub fn agent_view(&self, agent_id: &AgentId) -> Result<AgentView, GuardError> {
        Ok(AgentView {
            status: self.velocity.status(agent_id)?,
            status_changed_at: self.velocity.status_changed_at(agent_id)?,
            budget: self.budget.snapshot(agent_id, Utc::now())?,
        })
    }

    pub fn open_alerts(&self, org_id: &OrgId) -> Result<Vec<payguard_alerts::Alert>, GuardError> {
        Ok(self.alerts.list_open(org_id)?)
    }

    /// Organization an agent spends against.
    pub fn agent_org(&self, agent_id: &AgentId) -> Result<OrgId, GuardError> {
        self.agent_orgs
            .read()
            .map_err(|_| GuardError::Validation("agent registry poisoned".to_string()))?
            .get(agent_id)
            .cloned()
            .ok_or_else(|| {
                GuardError::Velocity(payguard_velocity::VelocityError::UnknownAgent(
                    agent_id.clone(),
                ))
            })
    }

    /// Deliver pending status-changed notifications to the sink.
    pub async fn drain_notifications(
        &self,
        sink: &dyn NotificationSink,
    ) -> Result<DrainReport, GuardError> {
        Ok(self.outbox.drain(sink, Utc::now()).await?)
    }

    // === Internals ===

    fn require_elevated(&self, actor: &Actor, action: &str) -> Result<(), GuardError> {
        if actor.role.is_elevated() {
            Ok(())
        } else {
            Err(GuardError::Forbidden {
                action: action.to_string(),
            })
        }
    }

    /// Audit, journal and enqueue one status change.
    fn handle_status_change(
        &self,
        org_id: &OrgId,
        change: &StatusChanged,
        actor_label: &str,
    ) -> Result<(), GuardError> {
        self.record_audit(AuditRecord::success(
            "status_change",
            "agent",
            change.agent_id.as_str(),
            actor_label,
            org_id.clone(),
            json!({ "status": change.old_status }),
            json!({ "status": change.new_status, "reason": change.reason }),
        ));
        self.journal(&GuardEvent::StatusChanged {
            change: change.clone(),
        })?;
        self.outbox.enqueue(change)?;
        Ok(())
    }

    fn record_audit(&self, record: AuditRecord) {
        if let Err(err) = self.audit.append(&record) {
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(action = %record.action, error = %err, "audit write failed");
        }
    }

    fn journal(&self, event: &GuardEvent) -> Result<(), GuardError> {
        if let Some(ref journal) = self.journal {
            journal.append(event)?;
        }
        Ok(())
    }

    /// Total audit write failures across the ledger and the context.
    pub fn audit_write_failures(&self) -> u64 {
        self.ledger.audit_write_failures() + self.audit_failures.load(Ordering::Relaxed)
    }

    /// Turn unreported audit write failures into an open AuditLag alert.
    /// The failures are already logged; this makes them visible in the
    /// alert stream so reconciliation can be kicked off.
    fn surface_audit_lag(&self, org_id: &OrgId) -> Result<(), GuardError> {
        let total = self.audit_write_failures();
        let alerted = self.alerted_failures.load(Ordering::Relaxed);
        if total > alerted {
            self.alerts.upsert(
                org_id,
                &AlertCandidate {
                    condition: AlertCondition::AuditLag,
                    severity: AlertSeverity::Danger,
                    title: "Audit writes failing".to_string(),
                    message: format!(
                        "{total} audit record(s) could not be written; ledger state is authoritative, reconcile from the journal"
                    ),
                    agent_id: None,
                    transaction_id: None,
                },
                Utc::now(),
            )?;
            self.alerted_failures.store(total, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Rebuild in-memory state from the journal. Returns the number of
    /// events replayed.
    fn replay(&self) -> Result<usize, GuardError> {
        let Some(ref journal) = self.journal else {
            return Ok(0);
        };
        let events = journal.read_all()?;
        let count = events.len();

        // Accumulated per-organization state, restored into the ledger in
        // one shot at the end so no audit records are re-emitted.
        let mut orgs: HashMap<OrgId, (Cents, Vec<(SettlementId, Cents)>)> = HashMap::new();

        for event in events {
            match event {
                GuardEvent::OrganizationCreated {
                    org_id,
                    opening_balance,
                    ..
                } => {
                    orgs.insert(org_id, (opening_balance, Vec::new()));
                }
                GuardEvent::FundsAdded {
                    org_id,
                    new_balance,
                    ..
                }
                | GuardEvent::FundsDeducted {
                    org_id,
                    new_balance,
                    ..
                } => {
                    let entry = orgs
                        .get_mut(&org_id)
                        .ok_or_else(|| GuardError::Journal(format!("funds event for unknown {org_id}")))?;
                    entry.0 = new_balance;
                }
                GuardEvent::AgentRegistered {
                    agent_id,
                    org_id,
                    monthly_budget,
                    reset_date,
                    limits,
                    timestamp,
                } => {
                    self.budget
                        .register_agent(agent_id.clone(), monthly_budget, reset_date)?;
                    self.velocity
                        .register_agent(agent_id.clone(), limits, timestamp)?;
                    self.agent_orgs
                        .write()
                        .map_err(|_| GuardError::Journal("agent registry poisoned".to_string()))?
                        .insert(agent_id, org_id);
                }
                GuardEvent::SettlementApplied {
                    event,
                    new_balance,
                    ..
                } => {
                    let entry = orgs.get_mut(&event.organization_id).ok_or_else(|| {
                        GuardError::Journal(format!(
                            "settlement for unknown {}",
                            event.organization_id
                        ))
                    })?;
                    entry.0 = new_balance;
                    entry.1.push((event.settlement_id.clone(), new_balance));

                    self.budget
                        .record_spend(&event.agent_id, event.amount_cents, event.occurred_at)?;
                    // Rebuild the windows; escalation changes were
                    // journaled separately and re-apply below
                    self.velocity
                        .evaluate(&event.agent_id, event.amount_cents, event.occurred_at)?;
                }
                GuardEvent::StatusChanged { change } => {
                    self.velocity.restore_status(
                        &change.agent_id,
                        change.new_status,
                        change.changed_at,
                    )?;
                }
                GuardEvent::PeriodReset {
                    agent_id,
                    timestamp,
                } => {
                    self.budget.reset_period(&agent_id, timestamp)?;
                }
            }
        }

        for (org_id, (balance, applied)) in orgs {
            self.ledger.restore_organization(org_id, balance, applied)?;
        }

        Ok(count)
    }
}
