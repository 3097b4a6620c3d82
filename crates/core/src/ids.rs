//! Validated identifiers for organizations, agents and settlements
//!
//! Instead of raw strings, each identifier kind gets its own newtype so
//! they cannot be swapped at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Empty identifier")]
    Empty,

    #[error("Identifier too long (max 64 chars): {0}")]
    TooLong(String),
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a validated identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into().trim().to_string();
                if value.is_empty() {
                    return Err(IdError::Empty);
                }
                if value.len() > 64 {
                    return Err(IdError::TooLong(value));
                }
                Ok(Self(value))
            }

            /// Get the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id! {
    /// Identifier of a client organization
    OrgId
}

string_id! {
    /// Identifier of an autonomous agent cardholder
    AgentId
}

string_id! {
    /// Unique identifier of a settlement event, assigned by the payment
    /// network. Processing is idempotent on this value.
    SettlementId
}
