//! Audit record types
//!
//! Records are append-only and immutable: there is no update API anywhere
//! in this crate.

use chrono::{DateTime, Utc};
use payguard_core::OrgId;
use serde::{Deserialize, Serialize};

/// Outcome of the audited mutation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

/// A single audited mutation attempt.
///
/// `state_before` / `state_after` are JSON snapshots captured by the caller
/// at the moment of mutation (e.g. `{"balance_cents": 1500}`). For failed
/// attempts the two snapshots are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub actor: String,
    pub organization_id: OrgId,
    pub state_before: serde_json::Value,
    pub state_after: serde_json::Value,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Record a successful mutation.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        actor: impl Into<String>,
        organization_id: OrgId,
        state_before: serde_json::Value,
        state_after: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            actor: actor.into(),
            organization_id,
            state_before,
            state_after,
            status: AuditStatus::Success,
            error_detail: None,
            created_at: Utc::now(),
        }
    }

    /// Record a rejected mutation attempt. State is unchanged, so only one
    /// snapshot is taken.
    pub fn failure(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        actor: impl Into<String>,
        organization_id: OrgId,
        state: serde_json::Value,
        error_detail: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            actor: actor.into(),
            organization_id,
            state_before: state.clone(),
            state_after: state,
            status: AuditStatus::Error,
            error_detail: Some(error_detail.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AuditStatus::Success
    }
}
