use crate::utils::fs::{is_hidden, write_json_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operator request for a running supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: String,
    pub requested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub command: ControlCommand,
}

/// Request directory (`state/control/<role>/`) drained by the supervisor on
/// every control tick. Each request is its own file, consumed exactly once.
#[derive(Debug, Clone)]
pub struct ControlDir {
    dir: PathBuf,
}

impl ControlDir {
    pub fn new(state_dir: &Path, role: &str) -> Self {
        Self {
            dir: state_dir.join("control").join(role),
        }
    }

    pub fn request(&self, command: ControlCommand) -> Result<ControlRequest> {
        let request = ControlRequest {
            id: uuid::Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
            command,
        };
        let file_name = format!(
            "{}-{}.json",
            request.requested_at.format("%Y%m%dT%H%M%S%.9f"),
            request.id
        );
        write_json_atomic(&self.dir.join(file_name), &request)?;
        Ok(request)
    }

    /// Remove and return pending requests, oldest first. Unparsable request
    /// files are discarded with a warning.
    pub fn drain(&self) -> Result<Vec<ControlRequest>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to list {}", self.dir.display()));
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| !is_hidden(path))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut requests = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = std::fs::read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|data| serde_json::from_slice::<ControlRequest>(&data).map_err(Into::into));
            if let Err(error) = std::fs::remove_file(&path) {
                // Another drainer took it.
                if error.kind() == std::io::ErrorKind::NotFound {
                    continue;
                }
                tracing::warn!(path = %path.display(), %error, "failed to consume control request");
                continue;
            }
            match parsed {
                Ok(request) => requests.push(request),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %format!("{error:#}"), "discarding malformed control request");
                }
            }
        }
        Ok(requests)
    }
}
