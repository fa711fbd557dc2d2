use crate::utils::fs::{read_json, write_json_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A standing alert, keyed by `(component, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub component: String,
    pub kind: String,
    pub message: String,
    pub first_raised: DateTime<Utc>,
    pub last_raised: DateTime<Utc>,
    pub occurrences: u32,
}

pub const RESTART_BUDGET_EXHAUSTED: &str = "restart_budget_exhausted";
pub const AUTHENTICATION_FAILING: &str = "authentication_failing";

/// Shared alert file (`state/alerts.json`), read-modify-written under an
/// exclusive lock so several processes can raise and clear alerts.
#[derive(Debug, Clone)]
pub struct AlertBoard {
    path: PathBuf,
}

impl AlertBoard {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("alerts.json"),
        }
    }

    fn lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        file.lock_exclusive()
            .context("failed to lock alert board")?;
        Ok(file)
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Vec<Alert>) -> T) -> Result<T> {
        let lock = self.lock()?;
        let mut alerts: Vec<Alert> = read_json(&self.path)?.unwrap_or_default();
        let result = apply(&mut alerts);
        write_json_atomic(&self.path, &alerts)?;
        FileExt::unlock(&lock).context("failed to unlock alert board")?;
        Ok(result)
    }

    pub fn raise(&self, component: &str, kind: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let now = Utc::now();
        tracing::error!(component, kind, %message, "alert raised");

        self.update(|alerts| {
            if let Some(existing) = alerts
                .iter_mut()
                .find(|alert| alert.component == component && alert.kind == kind)
            {
                existing.message = message;
                existing.last_raised = now;
                existing.occurrences = existing.occurrences.saturating_add(1);
            } else {
                alerts.push(Alert {
                    component: component.to_string(),
                    kind: kind.to_string(),
                    message,
                    first_raised: now,
                    last_raised: now,
                    occurrences: 1,
                });
            }
        })
    }

    /// Returns whether an alert was actually cleared.
    pub fn clear(&self, component: &str, kind: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let cleared = self.update(|alerts| {
            let before = alerts.len();
            alerts.retain(|alert| !(alert.component == component && alert.kind == kind));
            before != alerts.len()
        })?;
        if cleared {
            tracing::info!(component, kind, "alert cleared");
        }
        Ok(cleared)
    }

    pub fn list(&self) -> Result<Vec<Alert>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn raising_twice_counts_occurrences() {
        let tmp = TempDir::new().unwrap();
        let board = AlertBoard::new(tmp.path());

        board.raise("gmail", AUTHENTICATION_FAILING, "token revoked").unwrap();
        board.raise("gmail", AUTHENTICATION_FAILING, "still revoked").unwrap();
        board.raise("slack", RESTART_BUDGET_EXHAUSTED, "5 restarts in 600s").unwrap();

        let alerts = board.list().unwrap();
        assert_eq!(alerts.len(), 2);
        let gmail = alerts.iter().find(|a| a.component == "gmail").unwrap();
        assert_eq!(gmail.occurrences, 2);
        assert_eq!(gmail.message, "still revoked");
    }

    #[test]
    fn clear_removes_only_matching_alert() {
        let tmp = TempDir::new().unwrap();
        let board = AlertBoard::new(tmp.path());
        board.raise("gmail", AUTHENTICATION_FAILING, "revoked").unwrap();
        board.raise("gmail", RESTART_BUDGET_EXHAUSTED, "exhausted").unwrap();

        assert!(board.clear("gmail", AUTHENTICATION_FAILING).unwrap());
        assert!(!board.clear("gmail", AUTHENTICATION_FAILING).unwrap());
        assert_eq!(board.list().unwrap().len(), 1);
    }

    #[test]
    fn empty_board_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let board = AlertBoard::new(&tmp.path().join("state"));
        assert!(board.list().unwrap().is_empty());
        assert!(!board.clear("x", "y").unwrap());
    }
}
