//! Caller capability model
//!
//! PayGuard does not issue sessions itself; the identity collaborator hands
//! us `{user_id, organization_id, role}` and we enforce capabilities from
//! that.

use crate::ids::OrgId;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Role of a caller within an organization.
///
/// Only `Owner` and `Admin` may invoke manual fund operations, status
/// changes or agent provisioning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl Role {
    /// Whether this role carries the elevated capability required for
    /// fund mutations, status changes and provisioning.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

/// An authenticated caller, as reported by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub organization_id: OrgId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, organization_id: OrgId, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id,
            role,
        }
    }

    /// Label used in audit records: `user_id (role)`.
    pub fn audit_label(&self) -> String {
        format!("{} ({})", self.user_id, self.role)
    }
}
