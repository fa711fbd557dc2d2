use crate::platform::supervisor::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Restart budget per rolling window.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,
    /// Consecutive heartbeat intervals a watcher may miss before it is killed.
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats: u32,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_initial_backoff_secs() -> u64 {
    2
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_window_secs() -> u64 {
    600
}

fn default_missed_heartbeats() -> u32 {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window_secs(),
            missed_heartbeats: default_missed_heartbeats(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
            self.max_restarts,
            Duration::from_secs(self.restart_window_secs),
        )
    }
}

/// Watchdog settings. Same policy shape as the orchestrator, coarser defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_watchdog_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_watchdog_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_watchdog_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_watchdog_window_secs")]
    pub restart_window_secs: u64,
    /// Override for the orchestrator launch command. Defaults to this binary.
    #[serde(default)]
    pub orchestrator_command: Option<Vec<String>>,
}

fn default_watchdog_interval_secs() -> u64 {
    180
}

fn default_watchdog_initial_backoff_secs() -> u64 {
    5
}

fn default_watchdog_max_backoff_secs() -> u64 {
    300
}

fn default_watchdog_max_restarts() -> u32 {
    3
}

fn default_watchdog_window_secs() -> u64 {
    1_800
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_watchdog_interval_secs(),
            initial_backoff_secs: default_watchdog_initial_backoff_secs(),
            max_backoff_secs: default_watchdog_max_backoff_secs(),
            max_restarts: default_watchdog_max_restarts(),
            restart_window_secs: default_watchdog_window_secs(),
            orchestrator_command: None,
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
            self.max_restarts,
            Duration::from_secs(self.restart_window_secs),
        )
    }
}
