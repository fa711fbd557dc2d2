use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    /// Lists a drop directory for new files.
    FileDrop,
    /// Runs an external client command that prints items as JSON.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub name: String,
    pub kind: WatcherKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Client command for `command` watchers.
    #[serde(default)]
    pub command: Vec<String>,
    /// Drop directory for `file_drop` watchers. Defaults to the vault `Inbox`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Task `type` written into created tasks. Defaults to the watcher name.
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default = "default_true")]
    pub heartbeat: bool,
    /// Circuit-breaker key; defaults to the watcher name.
    #[serde(default)]
    pub integration: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

impl WatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn task_type(&self) -> String {
        self.task_type.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn integration_name(&self) -> String {
        self.integration.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_high_keywords")]
    pub high_keywords: Vec<String>,
    #[serde(default = "default_low_keywords")]
    pub low_keywords: Vec<String>,
}

fn default_high_keywords() -> Vec<String> {
    ["urgent", "asap", "invoice", "payment", "overdue", "deadline"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_low_keywords() -> Vec<String> {
    ["newsletter", "unsubscribe", "digest", "no-reply"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            high_keywords: default_high_keywords(),
            low_keywords: default_low_keywords(),
        }
    }
}
