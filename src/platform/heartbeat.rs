use crate::utils::fs::{read_json, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Liveness beacon written by a worker loop once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub name: String,
    pub pid: u32,
    pub at: DateTime<Utc>,
    pub cycle: u64,
}

pub fn heartbeat_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join("heartbeats").join(format!("{name}.json"))
}

#[derive(Debug, Clone)]
pub struct HeartbeatWriter {
    name: String,
    path: PathBuf,
    cycle: u64,
}

impl HeartbeatWriter {
    pub fn new(state_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: heartbeat_path(state_dir, name),
            cycle: 0,
        }
    }

    pub fn beat(&mut self) {
        self.cycle = self.cycle.saturating_add(1);
        let beat = Heartbeat {
            name: self.name.clone(),
            pid: std::process::id(),
            at: Utc::now(),
            cycle: self.cycle,
        };
        if let Err(error) = write_json_atomic(&self.path, &beat) {
            tracing::warn!(name = %self.name, error = %format!("{error:#}"), "failed to write heartbeat");
        }
    }
}

pub fn read_heartbeat(state_dir: &Path, name: &str) -> Result<Option<Heartbeat>> {
    read_json(&heartbeat_path(state_dir, name))
}
