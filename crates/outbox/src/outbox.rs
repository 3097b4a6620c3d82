//! Outbox queue implementation

use chrono::{DateTime, Duration, Utc};
use payguard_velocity::StatusChanged;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::OutboxError;
use crate::sink::NotificationSink;

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Retry behavior for the drain loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a row is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after the first failure; doubles per subsequent failure
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_secs() -> u64 {
    30
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have already
    /// failed.
    fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(10);
        Duration::seconds((self.base_backoff_secs << exponent) as i64)
    }
}

/// A persisted notification awaiting (or past) delivery.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub event: StatusChanged,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

/// SQLite-backed notification outbox.
pub struct Outbox {
    conn: Connection,
    policy: RetryPolicy,
}

impl Outbox {
    /// Create an outbox with the given database path
    pub fn new<P: AsRef<Path>>(path: P, policy: RetryPolicy) -> Result<Self, OutboxError> {
        let conn = Connection::open(path)?;
        let outbox = Self { conn, policy };
        outbox.init_schema()?;
        Ok(outbox)
    }

    /// Create an in-memory outbox (for testing)
    pub fn in_memory(policy: RetryPolicy) -> Result<Self, OutboxError> {
        let conn = Connection::open_in_memory()?;
        let outbox = Self { conn, policy };
        outbox.init_schema()?;
        Ok(outbox)
    }

    fn init_schema(&self) -> Result<(), OutboxError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS outbox (
                id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status, next_attempt_at)",
            [],
        )?;

        Ok(())
    }

    /// Enqueue a status-changed event for delivery. Called in the same
    /// flow that changed the status, so the event cannot be lost between
    /// the change and the queue.
    pub fn enqueue(&self, event: &StatusChanged) -> Result<String, OutboxError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        self.conn.execute(
            "INSERT INTO outbox (id, payload_json, status, attempts, next_attempt_at, last_error, created_at)
             VALUES (?1, ?2, 'pending', 0, ?3, NULL, ?3)",
            params![id, serde_json::to_string(event)?, now.to_rfc3339()],
        )?;

        tracing::debug!(entry = %id, agent = %event.agent_id, "notification enqueued");
        Ok(id)
    }

    /// Rows due for delivery at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload_json, status, attempts, next_attempt_at, last_error, created_at
             FROM outbox
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(finish_entry).collect()
    }

    /// Deliver every due row to the sink. Failures schedule a retry with
    /// exponential backoff until `max_attempts`, then mark the row failed.
    pub async fn drain(
        &self,
        sink: &dyn NotificationSink,
        now: DateTime<Utc>,
    ) -> Result<DrainReport, OutboxError> {
        let mut report = DrainReport::default();

        for entry in self.due(now)? {
            match sink.deliver(&entry.event).await {
                Ok(()) => {
                    self.conn.execute(
                        "UPDATE outbox SET status = 'delivered', attempts = ?1 WHERE id = ?2",
                        params![entry.attempts + 1, entry.id],
                    )?;
                    report.delivered += 1;
                }
                Err(err) => {
                    let attempts = entry.attempts + 1;
                    if attempts >= self.policy.max_attempts {
                        self.conn.execute(
                            "UPDATE outbox SET status = 'failed', attempts = ?1, last_error = ?2 WHERE id = ?3",
                            params![attempts, err.to_string(), entry.id],
                        )?;
                        tracing::error!(
                            entry = %entry.id,
                            sink = sink.name(),
                            attempts,
                            error = %err,
                            "notification delivery gave up"
                        );
                        report.failed += 1;
                    } else {
                        let next = now + self.policy.backoff(attempts);
                        self.conn.execute(
                            "UPDATE outbox
                             SET attempts = ?1, last_error = ?2, next_attempt_at = ?3
                             WHERE id = ?4",
                            params![attempts, err.to_string(), next.to_rfc3339(), entry.id],
                        )?;
                        tracing::warn!(
                            entry = %entry.id,
                            sink = sink.name(),
                            attempts,
                            error = %err,
                            "notification delivery failed, will retry"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Rows that exhausted their retries. These need operator attention;
    /// they are never deleted automatically.
    pub fn failed(&self) -> Result<Vec<OutboxEntry>, OutboxError> {
        self.list_by_status(DeliveryStatus::Failed)
    }

    /// Count rows in a given delivery state.
    pub fn count_by_status(&self, status: DeliveryStatus) -> Result<usize, OutboxError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload_json, status, attempts, next_attempt_at, last_error, created_at
             FROM outbox WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![status.as_str()], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(finish_entry).collect()
    }
}

type RawEntry = (String, String, String, u32, String, Option<String>, String);

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_entry(raw: RawEntry) -> Result<OutboxEntry, OutboxError> {
    let (id, payload_json, status_str, attempts, next_str, last_error, created_str) = raw;

    let event: StatusChanged = serde_json::from_str(&payload_json)?;
    let status = DeliveryStatus::from_str(&status_str)
        .ok_or_else(|| OutboxError::InvalidRow(format!("status {status_str}")))?;
    let next_attempt_at = parse_utc(&next_str)
        .map_err(|_| OutboxError::InvalidRow(format!("next_attempt_at {next_str}")))?;
    let created_at = parse_utc(&created_str)
        .map_err(|_| OutboxError::InvalidRow(format!("created_at {created_str}")))?;

    Ok(OutboxEntry {
        id,
        event,
        status,
        attempts,
        next_attempt_at,
        last_error,
        created_at,
    })
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
