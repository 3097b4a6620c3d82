//! Balance ledger implementation
//!
//! The balance is never an ambient cached value: every mutation resolves
//! the organization's account, takes its lock with a bounded wait, and
//! applies the change while the lock is held. The audit record for a
//! mutation is captured under the same lock, so before/after snapshots can
//! never interleave with a concurrent writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Duration, Instant};

use payguard_audit::{AuditRecord, AuditTrail};
use payguard_core::{Actor, Cents, OrgId, SettlementId};
use serde_json::json;

use crate::error::LedgerError;
use crate::settlement::{SettlementOutcome, SpendEvent};

/// Default bound on how long a mutation waits for an organization's lock
/// before surfacing a retryable `LockTimeout`.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(250);

/// Actor label recorded for settlements, which arrive from the payment
/// network rather than from an authenticated user.
const NETWORK_ACTOR: &str = "payment-network";

/// Per-organization account state, guarded by its own mutex.
struct OrgAccount {
    balance: Cents,
    /// Applied settlements and the balance each one produced. This map IS
    /// the idempotency guard: a settlement id present here is never
    /// applied again.
    applied: HashMap<SettlementId, Cents>,
}

/// Per-organization balance ledger with atomic add/deduct.
pub struct BalanceLedger {
    accounts: RwLock<HashMap<OrgId, Arc<Mutex<OrgAccount>>>>,
    audit: Arc<AuditTrail>,
    lock_wait: Duration,
    audit_failures: AtomicU64,
}

impl BalanceLedger {
    pub fn new(audit: Arc<AuditTrail>) -> Self {
        Self::with_lock_wait(audit, DEFAULT_LOCK_WAIT)
    }

    pub fn with_lock_wait(audit: Arc<AuditTrail>, lock_wait: Duration) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            audit,
            lock_wait,
            audit_failures: AtomicU64::new(0),
        }
    }

    /// Register an organization at onboarding with an opening balance.
    pub fn create_organization(
        &self,
        org_id: OrgId,
        opening_balance: Cents,
        actor: &Actor,
    ) -> Result<Cents, LedgerError> {
        let mut accounts = self.accounts.write().map_err(|_| LedgerError::Poisoned)?;

        if accounts.contains_key(&org_id) {
            return Err(LedgerError::OrganizationExists(org_id));
        }

        accounts.insert(
            org_id.clone(),
            Arc::new(Mutex::new(OrgAccount {
                balance: opening_balance,
                applied: HashMap::new(),
            })),
        );
        drop(accounts);

        tracing::info!(org = %org_id, balance = %opening_balance, "organization created");
        self.record_audit(AuditRecord::success(
            "create_organization",
            "organization",
            org_id.as_str(),
            actor.audit_label(),
            org_id.clone(),
            json!(null),
            json!({ "balance_cents": opening_balance }),
        ));

        Ok(opening_balance)
    }

    /// Credit an organization's prepaid balance. Fails with `InvalidAmount`
    /// for a zero amount (negative amounts are unrepresentable in `Cents`).
    pub fn add_funds(
        &self,
        org_id: &OrgId,
        amount: Cents,
        actor: &Actor,
    ) -> Result<Cents, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let account = self.account(org_id)?;
        let mut guard = self.acquire(&account, org_id)?;

        let before = guard.balance;
        let after = before
            .checked_add(&amount)
            .ok_or_else(|| LedgerError::AmountOverflow(org_id.clone()))?;
        guard.balance = after;

        // Audited while the lock is held so the before/after snapshot can
        // never interleave with a concurrent writer
        self.record_audit(AuditRecord::success(
            "add_funds",
            "organization",
            org_id.as_str(),
            actor.audit_label(),
            org_id.clone(),
            json!({ "balance_cents": before }),
            json!({ "balance_cents": after }),
        ));
        drop(guard);

        tracing::info!(org = %org_id, amount = %amount, balance = %after, "funds added");
        Ok(after)
    }

    /// Debit an organization's prepaid balance. Fails with
    /// `InsufficientFunds` if the balance cannot cover the amount; the
    /// rejected attempt is still audited.
    pub fn deduct_funds(
        &self,
        org_id: &OrgId,
        amount: Cents,
        actor: &Actor,
    ) -> Result<Cents, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let account = self.account(org_id)?;
        let mut guard = self.acquire(&account, org_id)?;

        let before = guard.balance;
        match before.checked_sub(&amount) {
            Some(after) => {
                guard.balance = after;
                self.record_audit(AuditRecord::success(
                    "deduct_funds",
                    "organization",
                    org_id.as_str(),
                    actor.audit_label(),
                    org_id.clone(),
                    json!({ "balance_cents": before }),
                    json!({ "balance_cents": after }),
                ));
                drop(guard);

                tracing::info!(org = %org_id, amount = %amount, balance = %after, "funds deducted");
                Ok(after)
            }
            None => {
                let err = LedgerError::InsufficientFunds {
                    organization_id: org_id.clone(),
                    available: before,
                    requested: amount,
                };
                self.record_audit(AuditRecord::failure(
                    "deduct_funds",
                    "organization",
                    org_id.as_str(),
                    actor.audit_label(),
                    org_id.clone(),
                    json!({ "balance_cents": before }),
                    err.to_string(),
                ));
                drop(guard);

                tracing::warn!(org = %org_id, amount = %amount, balance = %before, "deduct rejected");
                Err(err)
            }
        }
    }

    /// Apply a settlement from the payment network.
    ///
    /// Idempotent on `settlement_id`: a duplicate delivery returns
    /// `AlreadyApplied` with the balance produced by the first application
    /// and does not mutate anything. The duplicate check and the deduction
    /// happen under the same organization lock, so two racing deliveries of
    /// the same settlement apply exactly once.
    pub fn apply_settlement(&self, event: &SpendEvent) -> Result<SettlementOutcome, LedgerError> {
        if event.amount_cents.is_zero() {
            return Err(LedgerError::InvalidAmount(event.amount_cents));
        }

        let org_id = &event.organization_id;
        let account = self.account(org_id)?;
        let mut guard = self.acquire(&account, org_id)?;

        if let Some(balance) = guard.applied.get(&event.settlement_id) {
            let balance = *balance;
            drop(guard);
            tracing::debug!(
                settlement = %event.settlement_id,
                org = %org_id,
                "duplicate settlement delivery ignored"
            );
            return Ok(SettlementOutcome::AlreadyApplied { balance });
        }

        let before = guard.balance;
        match before.checked_sub(&event.amount_cents) {
            Some(after) => {
                guard.balance = after;
                guard.applied.insert(event.settlement_id.clone(), after);
                self.record_audit(AuditRecord::success(
                    "apply_settlement",
                    "settlement",
                    event.settlement_id.as_str(),
                    NETWORK_ACTOR,
                    org_id.clone(),
                    json!({ "balance_cents": before }),
                    json!({ "balance_cents": after }),
                ));
                drop(guard);

                tracing::info!(
                    settlement = %event.settlement_id,
                    org = %org_id,
                    agent = %event.agent_id,
                    amount = %event.amount_cents,
                    balance = %after,
                    "settlement applied"
                );
                Ok(SettlementOutcome::Applied { new_balance: after })
            }
            None => {
                let err = LedgerError::InsufficientFunds {
                    organization_id: org_id.clone(),
                    available: before,
                    requested: event.amount_cents,
                };
                self.record_audit(AuditRecord::failure(
                    "apply_settlement",
                    "settlement",
                    event.settlement_id.as_str(),
                    NETWORK_ACTOR,
                    org_id.clone(),
                    json!({ "balance_cents": before }),
                    err.to_string(),
                ));
                drop(guard);

                tracing::warn!(
                    settlement = %event.settlement_id,
                    org = %org_id,
                    "settlement exceeds balance"
                );
                Err(err)
            }
        }
    }

    /// Current balance for an organization.
    pub fn get_balance(&self, org_id: &OrgId) -> Result<Cents, LedgerError> {
        let account = self.account(org_id)?;
        let guard = self.acquire(&account, org_id)?;
        Ok(guard.balance)
    }

    /// Whether the organization is known to the ledger.
    pub fn has_organization(&self, org_id: &OrgId) -> bool {
        self.accounts
            .read()
            .map(|accounts| accounts.contains_key(org_id))
            .unwrap_or(false)
    }

    /// Number of audit writes that failed since startup. Mutations are
    /// never rolled back on audit failure; the orchestrator watches this
    /// counter and raises a system alert when it grows.
    pub fn audit_write_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    /// Replay hook: reinstate a persisted account at startup without
    /// auditing. Overwrites any existing state for the organization.
    pub fn restore_organization(
        &self,
        org_id: OrgId,
        balance: Cents,
        applied: impl IntoIterator<Item = (SettlementId, Cents)>,
    ) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.write().map_err(|_| LedgerError::Poisoned)?;
        accounts.insert(
            org_id,
            Arc::new(Mutex::new(OrgAccount {
                balance,
                applied: applied.into_iter().collect(),
            })),
        );
        Ok(())
    }

    fn account(&self, org_id: &OrgId) -> Result<Arc<Mutex<OrgAccount>>, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| LedgerError::Poisoned)?;
        accounts
            .get(org_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownOrganization(org_id.clone()))
    }

    /// Acquire an organization's lock with a bounded wait. Surfaces a
    /// retryable `LockTimeout` instead of blocking indefinitely.
    fn acquire<'a>(
        &self,
        account: &'a Arc<Mutex<OrgAccount>>,
        org_id: &OrgId,
    ) -> Result<MutexGuard<'a, OrgAccount>, LedgerError> {
        let start = Instant::now();
        loop {
            match account.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(LedgerError::Poisoned),
                Err(TryLockError::WouldBlock) => {
                    if start.elapsed() >= self.lock_wait {
                        return Err(LedgerError::LockTimeout {
                            organization_id: org_id.clone(),
                            waited_ms: self.lock_wait.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_micros(500));
                }
            }
        }
    }

    fn record_audit(&self, record: AuditRecord) {
        if let Err(err) = self.audit.append(&record) {
            // The mutation stands; losing the audit line is surfaced, not
            // propagated (reconciliation is the compensating mechanism).
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(action = %record.action, error = %err, "audit write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payguard_core::{AgentId, Role};
    use std::sync::Barrier;

    fn cents(v: i64) -> Cents {
        Cents::new(v).unwrap()
    }

    fn org(name: &str) -> OrgId {
        OrgId::new(name).unwrap()
    }

    fn owner(org_id: &OrgId) -> Actor {
        Actor::new("u-1", org_id.clone(), Role::Owner)
    }

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Arc::new(AuditTrail::in_memory()))
    }

    fn settlement(id: &str, org_id: &OrgId, amount: i64) -> SpendEvent {
        SpendEvent::new(
            SettlementId::new(id).unwrap(),
            AgentId::new("agent-1").unwrap(),
            org_id.clone(),
            cents(amount),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn test_add_and_deduct() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);

        ledger
            .create_organization(org_id.clone(), Cents::ZERO, &actor)
            .unwrap();
        assert_eq!(ledger.add_funds(&org_id, cents(1000), &actor).unwrap(), cents(1000));
        assert_eq!(ledger.deduct_funds(&org_id, cents(400), &actor).unwrap(), cents(600));
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(600));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(100), &actor)
            .unwrap();

        assert!(matches!(
            ledger.add_funds(&org_id, Cents::ZERO, &actor),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.deduct_funds(&org_id, Cents::ZERO, &actor),
            Err(LedgerError::InvalidAmount(_))
        ));
        // Rejected before touching state
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(100));
    }

    #[test]
    fn test_overdraft_rejected() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(50), &actor)
            .unwrap();

        let result = ledger.deduct_funds(&org_id, cents(100), &actor);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { available, requested, .. })
                if available == cents(50) && requested == cents(100)
        ));
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(50));
    }

    #[test]
    fn test_unknown_organization() {
        let ledger = ledger();
        let org_id = org("nope");
        assert!(matches!(
            ledger.get_balance(&org_id),
            Err(LedgerError::UnknownOrganization(_))
        ));
    }

    #[test]
    fn test_duplicate_organization_rejected() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), Cents::ZERO, &actor)
            .unwrap();
        assert!(matches!(
            ledger.create_organization(org_id.clone(), Cents::ZERO, &actor),
            Err(LedgerError::OrganizationExists(_))
        ));
    }

    #[test]
    fn test_balance_equals_sum_of_successful_mutations() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), Cents::ZERO, &actor)
            .unwrap();

        let mut expected: i64 = 0;
        for (add, amount) in [
            (true, 500),
            (false, 200),
            (false, 400), // fails: would overdraft
            (true, 300),
            (false, 600),
        ] {
            if add {
                if ledger.add_funds(&org_id, cents(amount), &actor).is_ok() {
                    expected += amount;
                }
            } else if ledger.deduct_funds(&org_id, cents(amount), &actor).is_ok() {
                expected -= amount;
            }
        }

        assert!(expected >= 0);
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(expected));
    }

    #[test]
    fn test_concurrent_deducts_yield_one_success() {
        let ledger = Arc::new(ledger());
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(150), &actor)
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let org_id = org_id.clone();
            let actor = actor.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                ledger.deduct_funds(&org_id, cents(100), &actor)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(50));
    }

    #[test]
    fn test_settlement_idempotent_replay() {
        let ledger = ledger();
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(1000), &actor)
            .unwrap();

        let event = settlement("stl-1", &org_id, 300);

        let first = ledger.apply_settlement(&event).unwrap();
        assert_eq!(first, SettlementOutcome::Applied { new_balance: cents(700) });

        let second = ledger.apply_settlement(&event).unwrap();
        assert_eq!(second, SettlementOutcome::AlreadyApplied { balance: cents(700) });

        // The ledger mutated exactly once
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(700));
        assert_eq!(first.balance(), second.balance());
    }

    #[test]
    fn test_concurrent_same_settlement_applies_once() {
        let ledger = Arc::new(ledger());
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(1000), &actor)
            .unwrap();

        let event = settlement("stl-race", &org_id, 250);
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let event = event.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                ledger.apply_settlement(&event).unwrap()
            }));
        }

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let applied = outcomes.iter().filter(|o| !o.is_replay()).count();

        assert_eq!(applied, 1);
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(750));
        assert!(outcomes.iter().all(|o| o.balance() == cents(750)));
    }

    #[test]
    fn test_different_orgs_do_not_contend() {
        let ledger = Arc::new(ledger());
        let actor_a = owner(&org("org-a"));
        let actor_b = owner(&org("org-b"));
        ledger
            .create_organization(org("org-a"), cents(10_000), &actor_a)
            .unwrap();
        ledger
            .create_organization(org("org-b"), cents(10_000), &actor_b)
            .unwrap();

        let mut handles = Vec::new();
        for name in ["org-a", "org-b"] {
            let ledger = Arc::clone(&ledger);
            let org_id = org(name);
            let actor = owner(&org_id);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    ledger.deduct_funds(&org_id, cents(10), &actor).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.get_balance(&org("org-a")).unwrap(), cents(9_000));
        assert_eq!(ledger.get_balance(&org("org-b")).unwrap(), cents(9_000));
    }

    #[test]
    fn test_lock_timeout_is_retryable() {
        let audit = Arc::new(AuditTrail::in_memory());
        let ledger = BalanceLedger::with_lock_wait(audit, Duration::from_millis(20));
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(100), &actor)
            .unwrap();

        // Hold the org lock from another thread past the ledger's wait bound
        let account = ledger.account(&org_id).unwrap();
        let held = Arc::clone(&account);
        let handle = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            std::thread::sleep(Duration::from_millis(120));
        });
        // Give the holder a head start
        std::thread::sleep(Duration::from_millis(10));

        let result = ledger.deduct_funds(&org_id, cents(10), &actor);
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        assert!(result.unwrap_err().is_retryable());

        handle.join().unwrap();
        // Retry succeeds once the lock frees up
        assert_eq!(ledger.deduct_funds(&org_id, cents(10), &actor).unwrap(), cents(90));
    }

    #[test]
    fn test_every_mutation_is_audited() {
        let audit = Arc::new(AuditTrail::in_memory());
        let ledger = BalanceLedger::new(Arc::clone(&audit));
        let org_id = org("org-1");
        let actor = owner(&org_id);

        ledger
            .create_organization(org_id.clone(), Cents::ZERO, &actor)
            .unwrap();
        ledger.add_funds(&org_id, cents(500), &actor).unwrap();
        ledger.deduct_funds(&org_id, cents(200), &actor).unwrap();
        ledger
            .apply_settlement(&settlement("stl-1", &org_id, 100))
            .unwrap();
        // A rejected deduct is audited too, with error status
        let _ = ledger.deduct_funds(&org_id, cents(9_999), &actor);

        let records = audit.read_all().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records.iter().filter(|r| r.is_success()).count(), 4);

        let failed = records.last().unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.state_before, failed.state_after);

        // Re-reading yields identical records: nothing is altered in place
        let again = audit.read_all().unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
        let ids_again: Vec<_> = again.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_duplicate_settlement_not_audited_twice() {
        let audit = Arc::new(AuditTrail::in_memory());
        let ledger = BalanceLedger::new(Arc::clone(&audit));
        let org_id = org("org-1");
        let actor = owner(&org_id);
        ledger
            .create_organization(org_id.clone(), cents(500), &actor)
            .unwrap();

        let event = settlement("stl-1", &org_id, 100);
        ledger.apply_settlement(&event).unwrap();
        ledger.apply_settlement(&event).unwrap();

        // create + one applied settlement; the replay touched nothing
        assert_eq!(audit.len().unwrap(), 2);
    }

    #[test]
    fn test_restore_organization_reinstates_idempotency_guard() {
        let audit = Arc::new(AuditTrail::in_memory());
        let ledger = BalanceLedger::new(Arc::clone(&audit));
        let org_id = org("org-1");

        ledger
            .restore_organization(
                org_id.clone(),
                cents(700),
                vec![(SettlementId::new("stl-1").unwrap(), cents(700))],
            )
            .unwrap();

        // Restoring is not a mutation attempt
        assert_eq!(audit.len().unwrap(), 0);
        assert_eq!(ledger.get_balance(&org_id).unwrap(), cents(700));

        // The restored settlement still replays as a no-op
        let outcome = ledger
            .apply_settlement(&settlement("stl-1", &org_id, 300))
            .unwrap();
        assert_eq!(outcome, SettlementOutcome::AlreadyApplied { balance: cents(700) });
    }

    #[test]
    fn test_audit_failure_counter_starts_at_zero() {
        let ledger = ledger();
        assert_eq!(ledger.audit_write_failures(), 0);
    }
}
