//! Guardrail journal - append-only JSONL event log
//!
//! The journal is the source of truth for in-memory state: on startup the
//! context replays it to rebuild organization balances, agent budgets and
//! circuit-breaker statuses. Each line is one JSON-serialized `GuardEvent`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use payguard_core::{AgentId, Cents, OrgId};
use payguard_ledger::SpendEvent;
use payguard_velocity::{StatusChanged, VelocityLimits};
use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// Events appended to the guardrail journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GuardEvent {
    OrganizationCreated {
        org_id: OrgId,
        opening_balance: Cents,
        timestamp: DateTime<Utc>,
    },

    FundsAdded {
        org_id: OrgId,
        amount: Cents,
        new_balance: Cents,
        timestamp: DateTime<Utc>,
    },

    FundsDeducted {
        org_id: OrgId,
        amount: Cents,
        new_balance: Cents,
        timestamp: DateTime<Utc>,
    },

    AgentRegistered {
        agent_id: AgentId,
        org_id: OrgId,
        monthly_budget: Cents,
        reset_date: DateTime<Utc>,
        limits: VelocityLimits,
        timestamp: DateTime<Utc>,
    },

    SettlementApplied {
        event: SpendEvent,
        new_balance: Cents,
        timestamp: DateTime<Utc>,
    },

    StatusChanged {
        change: StatusChanged,
    },

    PeriodReset {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },
}

/// Append-only JSONL journal store.
pub struct JournalStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JournalStore {
    /// Open (or create) the journal at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append an event. Flushes per line.
    pub fn append(&self, event: &GuardEvent) -> Result<(), GuardError> {
        let json = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| GuardError::Journal("journal lock poisoned".to_string()))?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }

    /// Read every event in the journal, in append order.
    pub fn read_all(&self) -> Result<Vec<GuardEvent>, GuardError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: GuardEvent = serde_json::from_str(&line)?;
            events.push(event);
        }

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
