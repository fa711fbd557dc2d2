use super::AuditEntry;
use super::scrub::{redact_parameters, scrub_text};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const PARTITION_SUFFIX: &str = ".jsonl";

/// Append-only action log partitioned by UTC day (`YYYY-MM-DD.jsonl`).
///
/// Each entry is serialised to one line and handed to a single `write` on an
/// `O_APPEND` handle, so lines from concurrent processes never interleave.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_dir: PathBuf,
    retention_days: u32,
}

impl AuditLogger {
    pub fn new(log_dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            log_dir: log_dir.into(),
            retention_days,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.audit_dir(), config.audit.retention_days)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir
            .join(format!("{}{PARTITION_SUFFIX}", date.format("%Y-%m-%d")))
    }

    pub fn log(&self, mut entry: AuditEntry) -> Result<()> {
        entry.parameters = redact_parameters(&entry.parameters);
        if let Some(error) = entry.error.as_mut() {
            *error = scrub_text(error).into_owned();
        }

        let mut line = serde_json::to_vec(&entry).context("failed to serialize audit entry")?;
        line.push(b'\n');

        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        let path = self.partition_path(entry.timestamp.date_naive());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", path.display()))?;

        tracing::debug!(
            action_type = %entry.action_type,
            actor = %entry.actor,
            target = %entry.target,
            result = %entry.result,
            "audit entry logged"
        );
        Ok(())
    }

    /// Log without propagating: audit failures must not break the caller's loop.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(error) = self.log(entry) {
            tracing::error!(error = %format!("{error:#}"), "failed to write audit entry");
        }
    }

    /// Entries of one day partition. Unparsable lines are skipped.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        let path = self.partition_path(date);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(error) => {
                    tracing::warn!(%error, path = %path.display(), "skipping unparsable audit line");
                    None
                }
            })
            .collect())
    }

    /// Delete whole day partitions older than the retention window.
    /// Returns how many partitions were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to list {}", self.log_dir.display()));
            }
        };

        let cutoff = now.date_naive() - chrono::Duration::days(i64::from(self.retention_days));
        let mut removed = 0;

        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|name| name.strip_suffix(PARTITION_SUFFIX))
            else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") else {
                continue;
            };
            if date < cutoff {
                fs::remove_file(entry.path())
                    .with_context(|| format!("failed to purge {}", entry.path().display()))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, retention_days = self.retention_days, "purged audit partitions");
        }
        Ok(removed)
    }
}
