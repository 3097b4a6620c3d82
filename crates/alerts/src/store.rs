//! SQLite storage for alerts
//!
//! Alerts are never deleted. An open alert (no `resolved_at`) with the
//! same dedup key absorbs re-derivations as refreshes; once resolved, the
//! next crossing of the same condition creates a fresh record.

use chrono::{DateTime, Utc};
use payguard_core::{AgentId, OrgId};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::alert::{Alert, AlertCandidate, AlertCondition, AlertSeverity};
use crate::error::AlertError;

/// Result of persisting a derived candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First crossing: a new alert record was created.
    Created(String),
    /// An open alert for the same `(agent, condition)` existed and was
    /// refreshed in place.
    Refreshed(String),
}

impl UpsertOutcome {
    pub fn alert_id(&self) -> &str {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Refreshed(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}

/// SQLite-backed alert store
pub struct AlertStore {
    conn: Connection,
}

impl AlertStore {
    /// Create a new store with the given database path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AlertError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, AlertError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AlertError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                dedup_key TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                agent_id TEXT,
                condition TEXT NOT NULL,
                severity INTEGER NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                transaction_id TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                resolved_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // At most one OPEN alert per dedup key
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open_dedup
             ON alerts(dedup_key) WHERE resolved_at IS NULL",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_org ON alerts(organization_id)",
            [],
        )?;

        Ok(())
    }

    /// Persist a derived candidate: refresh the open alert for its dedup
    /// key if one exists, otherwise create a new record.
    pub fn upsert(
        &self,
        org_id: &OrgId,
        candidate: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, AlertError> {
        let dedup_key = candidate.dedup_key();

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM alerts WHERE dedup_key = ?1 AND resolved_at IS NULL",
                params![dedup_key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(AlertError::Database(other)),
            })?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE alerts SET message = ?1, updated_at = ?2 WHERE id = ?3",
                params![candidate.message, now.to_rfc3339(), id],
            )?;
            tracing::debug!(alert = %id, condition = candidate.condition.key(), "alert refreshed");
            return Ok(UpsertOutcome::Refreshed(id));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO alerts
             (id, dedup_key, organization_id, agent_id, condition, severity,
              title, message, transaction_id, is_read, resolved_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10, ?10)",
            params![
                id,
                dedup_key,
                org_id.as_str(),
                candidate.agent_id.as_ref().map(|a| a.as_str()),
                candidate.condition.key(),
                candidate.severity as i64,
                candidate.title,
                candidate.message,
                candidate.transaction_id,
                now.to_rfc3339(),
            ],
        )?;

        tracing::info!(
            alert = %id,
            condition = candidate.condition.key(),
            severity = candidate.severity.as_str(),
            "alert raised"
        );
        Ok(UpsertOutcome::Created(id))
    }

    /// Get an alert by id
    pub fn get(&self, id: &str) -> Result<Alert, AlertError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, dedup_key, organization_id, agent_id, condition, severity,
                    title, message, transaction_id, is_read, resolved_at, created_at, updated_at
             FROM alerts WHERE id = ?1",
        )?;

        stmt.query_row(params![id], row_to_alert).map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AlertError::NotFound(id.to_string()),
            other => AlertError::Database(other),
        })
    }

    /// Open (unresolved) alerts for an organization, most severe first,
    /// newest first within a severity.
    pub fn list_open(&self, org_id: &OrgId) -> Result<Vec<Alert>, AlertError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, dedup_key, organization_id, agent_id, condition, severity,
                    title, message, transaction_id, is_read, resolved_at, created_at, updated_at
             FROM alerts
             WHERE organization_id = ?1 AND resolved_at IS NULL
             ORDER BY severity DESC, created_at DESC",
        )?;

        let alerts = stmt
            .query_map(params![org_id.as_str()], row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Mark an alert as read. Read state does not affect de-duplication.
    pub fn mark_read(&self, id: &str) -> Result<(), AlertError> {
        let rows = self
            .conn
            .execute("UPDATE alerts SET is_read = 1 WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(AlertError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Resolve an alert. The record stays; a later crossing of the same
    /// condition creates a new one.
    pub fn resolve(&self, id: &str, at: DateTime<Utc>) -> Result<(), AlertError> {
        let rows = self.conn.execute(
            "UPDATE alerts SET resolved_at = ?1, updated_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
            params![at.to_rfc3339(), id],
        )?;
        if rows == 0 {
            return Err(AlertError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Number of open alerts for an organization.
    pub fn count_open(&self, org_id: &OrgId) -> Result<usize, AlertError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE organization_id = ?1 AND resolved_at IS NULL",
            params![org_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total number of alert records ever created (open and resolved).
    pub fn count_all(&self, org_id: &OrgId) -> Result<usize, AlertError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE organization_id = ?1",
            params![org_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let org_str: String = row.get(2)?;
    let agent_str: Option<String> = row.get(3)?;
    let condition_str: String = row.get(4)?;
    let severity_int: i64 = row.get(5)?;
    let resolved_str: Option<String> = row.get(10)?;
    let created_str: String = row.get(11)?;
    let updated_str: String = row.get(12)?;

    let invalid = |what: &str| {
        rusqlite::Error::InvalidColumnType(0, what.to_string(), rusqlite::types::Type::Text)
    };

    Ok(Alert {
        id: row.get(0)?,
        dedup_key: row.get(1)?,
        organization_id: OrgId::new(org_str).map_err(|_| invalid("organization_id"))?,
        agent_id: match agent_str {
            Some(s) => Some(AgentId::new(s).map_err(|_| invalid("agent_id"))?),
            None => None,
        },
        condition: AlertCondition::from_key(&condition_str).ok_or_else(|| invalid("condition"))?,
        severity: match severity_int {
            1 => AlertSeverity::Warning,
            2 => AlertSeverity::Danger,
            3 => AlertSeverity::Critical,
            _ => return Err(invalid("severity")),
        },
        title: row.get(6)?,
        message: row.get(7)?,
        transaction_id: row.get(8)?,
        is_read: row.get::<_, i64>(9)? != 0,
        resolved_at: match resolved_str {
            Some(s) => Some(parse_utc(&s).map_err(|_| invalid("resolved_at"))?),
            None => None,
        },
        created_at: parse_utc(&created_str).map_err(|_| invalid("created_at"))?,
        updated_at: parse_utc(&updated_str).map_err(|_| invalid("updated_at"))?,
    })
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
