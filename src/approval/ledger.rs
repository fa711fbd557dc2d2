use crate::utils::fs::{read_json, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Entries older than this are dropped on the next write.
const LEDGER_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub content_hash: String,
    pub executed_at: DateTime<Utc>,
    pub action_type: String,
}

/// Record of successfully executed tasks keyed by task id.
///
/// An approved file whose id and content hash are already here was executed
/// before (for example it was copied back into `Approved`) and is refused.
/// Failures are not recorded, so a fixed and re-approved task runs again.
#[derive(Debug)]
pub struct ExecutionLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl ExecutionLedger {
    pub fn path_for(state_dir: &Path) -> PathBuf {
        state_dir.join("executed.json")
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = read_json(&path)?.unwrap_or_default();
        Ok(Self { path, entries })
    }

    pub fn contains(&self, task_id: &str, content_hash: &str) -> bool {
        self.entries
            .get(task_id)
            .is_some_and(|entry| entry.content_hash == content_hash)
    }

    pub fn get(&self, task_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a successful execution and persist before returning.
    pub fn record(
        &mut self,
        task_id: &str,
        content_hash: &str,
        action_type: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<()> {
        let cutoff = executed_at - chrono::Duration::days(LEDGER_RETENTION_DAYS);
        self.entries.retain(|_, entry| entry.executed_at >= cutoff);
        self.entries.insert(
            task_id.to_string(),
            LedgerEntry {
                content_hash: content_hash.to_string(),
                executed_at,
                action_type: action_type.to_string(),
            },
        );
        write_json_atomic(&self.path, &self.entries)
    }
}
