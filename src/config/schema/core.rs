use super::{
    ApprovalConfig, AuditConfig, ExecutorConfig, OrchestratorConfig, PriorityConfig,
    RecoveryConfig, WatchdogConfig, WatcherConfig, WatcherKind,
};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "OVERSEER_CONFIG";
const VAULT_ENV: &str = "OVERSEER_VAULT";
const LOG_ENV: &str = "OVERSEER_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Locks, heartbeats, de-dup sets, control requests - computed, not serialized
    #[serde(skip)]
    pub state_dir: PathBuf,

    /// Root of the queue directories. `~` is expanded.
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub priority: PriorityConfig,

    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,

    #[serde(default)]
    pub executors: Vec<ExecutorConfig>,
}

fn default_vault_dir() -> String {
    "~/.overseer/vault".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn overseer_home() -> PathBuf {
    UserDirs::new().map_or_else(
        || PathBuf::from(".overseer"),
        |u| u.home_dir().join(".overseer"),
    )
}

impl Default for Config {
    fn default() -> Self {
        let home = overseer_home();

        Self {
            config_path: home.join("config.toml"),
            state_dir: home.join("state"),
            vault_dir: default_vault_dir(),
            log_level: default_log_level(),
            orchestrator: OrchestratorConfig::default(),
            watchdog: WatchdogConfig::default(),
            approval: ApprovalConfig::default(),
            audit: AuditConfig::default(),
            recovery: RecoveryConfig::default(),
            priority: PriorityConfig::default(),
            watchers: Vec::new(),
            executors: Vec::new(),
        }
    }
}

impl Config {
    /// Load the config from `explicit`, `$OVERSEER_CONFIG`, or
    /// `~/.overseer/config.toml`, writing a default file when none exists.
    pub fn load_or_init(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var(CONFIG_ENV)
                .ok()
                .filter(|value| !value.is_empty())
                .map_or_else(|| overseer_home().join("config.toml"), PathBuf::from),
        };

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self::with_paths(Self::default(), &config_path);
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", config_path.display())))?;
        Ok(Self::with_paths(config, config_path))
    }

    fn with_paths(mut config: Self, config_path: &Path) -> Self {
        config.config_path = config_path.to_path_buf();
        config.state_dir = config_path
            .parent()
            .map_or_else(|| PathBuf::from("state"), |parent| parent.join("state"));
        config
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).with_context(|| {
            format!("Failed to write config file {}", self.config_path.display())
        })?;
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(vault) = std::env::var(VAULT_ENV)
            && !vault.is_empty()
        {
            self.vault_dir = vault;
        }

        if let Ok(level) = std::env::var(LOG_ENV)
            && !level.is_empty()
        {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut names = HashSet::new();
        for watcher in &self.watchers {
            if watcher.name.trim().is_empty() {
                return Err(ConfigError::Validation("watcher name must not be empty".into()));
            }
            if !names.insert(watcher.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate watcher name '{}'",
                    watcher.name
                )));
            }
            if watcher.kind == WatcherKind::Command && watcher.command.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "watcher '{}' is a command watcher without a command",
                    watcher.name
                )));
            }
            if watcher.interval_secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "watcher '{}' has a zero interval",
                    watcher.name
                )));
            }
        }

        if names.contains(crate::approval::PROCESS_NAME) {
            return Err(ConfigError::Validation(format!(
                "'{}' is reserved for the approval processor",
                crate::approval::PROCESS_NAME
            )));
        }

        let mut action_types = HashSet::new();
        for executor in &self.executors {
            if executor.command.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "executor for '{}' has no command",
                    executor.action_type
                )));
            }
            if !action_types.insert(executor.action_type) {
                return Err(ConfigError::Validation(format!(
                    "executor for '{}' is declared twice",
                    executor.action_type
                )));
            }
        }

        if self.approval.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "approval.max_attempts must be at least 1".into(),
            ));
        }
        if self.approval.backoff_secs.is_empty() {
            return Err(ConfigError::Validation(
                "approval.backoff_secs must not be empty".into(),
            ));
        }
        if self.approval.expiry_every_cycles == 0 {
            return Err(ConfigError::Validation(
                "approval.expiry_every_cycles must be at least 1".into(),
            ));
        }
        if self.recovery.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "recovery.failure_threshold must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn vault_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.vault_dir).into_owned())
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.vault_path().join("Logs")
    }

    pub fn watcher(&self, name: &str) -> std::result::Result<&WatcherConfig, ConfigError> {
        self.watchers
            .iter()
            .find(|watcher| watcher.name == name)
            .ok_or_else(|| ConfigError::UnknownWatcher(name.to_string()))
    }

    pub fn enabled_watchers(&self) -> impl Iterator<Item = &WatcherConfig> {
        self.watchers.iter().filter(|watcher| watcher.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ActionType;
    use tempfile::TempDir;

    fn watcher(name: &str) -> WatcherConfig {
        WatcherConfig {
            name: name.into(),
            kind: WatcherKind::Command,
            enabled: true,
            interval_secs: 60,
            command: vec!["fetch-mail".into()],
            path: None,
            timeout_secs: None,
            task_type: None,
            heartbeat: true,
            integration: None,
        }
    }

    #[test]
    fn load_or_init_writes_default_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        let config = Config::load_or_init(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config.state_dir, tmp.path().join("state"));
        assert_eq!(config.approval.max_attempts, 3);
        assert_eq!(config.approval.backoff_secs, vec![0, 30, 60]);
        assert_eq!(config.orchestrator.health_check_interval_secs, 60);
        assert_eq!(config.audit.retention_days, 90);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
vault_dir = "/srv/vault"

[approval]
max_attempts = 5

[[watchers]]
name = "gmail"
kind = "command"
command = ["gmail-fetch", "--json"]
interval_secs = 120

[[executors]]
action_type = "send_email"
command = ["send-mail"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.vault_path(), PathBuf::from("/srv/vault"));
        assert_eq!(config.approval.max_attempts, 5);
        assert_eq!(config.approval.poll_interval_secs, 10);
        assert_eq!(config.watchers[0].interval_secs, 120);
        assert!(config.watchers[0].heartbeat);
        assert_eq!(config.executors[0].action_type, ActionType::SendEmail);
        assert_eq!(config.watchdog.check_interval_secs, 180);
    }

    #[test]
    fn validate_rejects_duplicate_watchers() {
        let config = Config {
            watchers: vec![watcher("gmail"), watcher("gmail")],
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate watcher name"));
    }

    #[test]
    fn validate_rejects_command_watcher_without_command() {
        let mut broken = watcher("slack");
        broken.command.clear();
        let config = Config {
            watchers: vec![broken],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_reserved_process_name() {
        let config = Config {
            watchers: vec![watcher(crate::approval::PROCESS_NAME)],
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn validate_rejects_empty_backoff_schedule() {
        let mut config = Config::default();
        config.approval.backoff_secs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_watcher_is_reported() {
        let config = Config::default();
        assert!(matches!(
            config.watcher("missing"),
            Err(ConfigError::UnknownWatcher(name)) if name == "missing"
        ));
    }

    #[test]
    fn tilde_vault_dir_is_expanded() {
        let config = Config::default();
        assert!(!config.vault_path().to_string_lossy().starts_with('~'));
    }
}
