//! Guardrail configuration
//!
//! All thresholds are configurable via file, not hardcoded, so production
//! tuning needs no recompilation.

use payguard_alerts::AlertThresholds;
use payguard_outbox::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the guardrail subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Budget alert thresholds (75 / 90 / 100 percent by default)
    #[serde(default)]
    pub thresholds: AlertThresholds,

    /// Notification delivery retry policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Bound on waiting for an organization's balance lock
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

fn default_lock_wait_ms() -> u64 {
    250
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            retry: RetryPolicy::default(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

impl GuardrailConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}
