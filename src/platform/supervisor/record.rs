use crate::utils::fs::{read_json, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessState {
    Running,
    /// Waiting out the restart backoff.
    Backoff,
    /// An earlier instance still holds the process lock; it was asked to exit.
    Reclaiming,
    Stopped,
    /// Restart budget spent; only an operator `start` revives it.
    Exhausted,
}

/// Supervisor bookkeeping for one process, as written to the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub command: Vec<String>,
    pub health_check_interval_secs: u64,
    pub state: ProcessState,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub last_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exit: Option<String>,
    #[serde(default)]
    pub restart_budget_remaining: u32,
    #[serde(default)]
    pub next_restart_at: Option<DateTime<Utc>>,
    /// Set by an operator stop; survives supervisor restarts.
    #[serde(default)]
    pub stopped: bool,
}

/// `state/<role>_state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorState {
    pub role: String,
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
    pub processes: Vec<ProcessRecord>,
}

impl SupervisorState {
    pub fn path_for(state_dir: &Path, role: &str) -> PathBuf {
        state_dir.join(format!("{role}_state.json"))
    }

    pub fn load(state_dir: &Path, role: &str) -> Result<Option<Self>> {
        read_json(&Self::path_for(state_dir, role))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path_for(state_dir, &self.role), self)
    }

    pub fn process(&self, name: &str) -> Option<&ProcessRecord> {
        self.processes.iter().find(|record| record.name == name)
    }
}
