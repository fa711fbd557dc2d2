use crate::approval::ActionType;
use crate::recovery::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Applied when a pending task carries no `expires` key.
    #[serde(default = "default_ttl_hours")]
    pub default_ttl_hours: u64,
    #[serde(default = "default_expiry_every_cycles")]
    pub expiry_every_cycles: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before attempt N+1, in seconds. The last entry repeats.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
    /// Run the processor as an orchestrator-supervised process.
    #[serde(default = "default_true")]
    pub supervised: bool,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_expiry_every_cycles() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![0, 30, 60]
}

fn default_true() -> bool {
    true
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            default_ttl_hours: default_ttl_hours(),
            expiry_every_cycles: default_expiry_every_cycles(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            supervised: true,
        }
    }
}

impl ApprovalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.default_ttl_hours).unwrap_or(i64::MAX / 3_600))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_schedule(
            self.max_attempts,
            self.backoff_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_purge_interval_hours")]
    pub purge_interval_hours: u64,
}

fn default_retention_days() -> u32 {
    90
}

fn default_purge_interval_hours() -> u64 {
    24
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            purge_interval_hours: default_purge_interval_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive failures before an integration's circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_circuit_timeout_secs")]
    pub circuit_timeout_secs: u64,
    /// Timeout for any external call that does not set its own.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_auth_pause_secs")]
    pub auth_pause_secs: u64,
    /// Consecutive authentication failures before a standing alert is raised.
    #[serde(default = "default_auth_alert_threshold")]
    pub auth_alert_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_circuit_timeout_secs() -> u64 {
    60
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_auth_pause_secs() -> u64 {
    900
}

fn default_auth_alert_threshold() -> u32 {
    3
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            circuit_timeout_secs: default_circuit_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            auth_pause_secs: default_auth_pause_secs(),
            auth_alert_threshold: default_auth_alert_threshold(),
        }
    }
}

impl RecoveryConfig {
    pub fn circuit_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn auth_pause(&self) -> Duration {
        Duration::from_secs(self.auth_pause_secs)
    }
}

/// One executor binding: the external command that performs `action_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub action_type: ActionType,
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Circuit-breaker key; defaults to the action type.
    #[serde(default)]
    pub integration: Option<String>,
}

impl ExecutorConfig {
    pub fn integration_name(&self) -> String {
        self.integration
            .clone()
            .unwrap_or_else(|| self.action_type.to_string())
    }
}
