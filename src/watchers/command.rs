use super::traits::{Source, WatchItem};
use crate::error::IntegrationError;
use crate::recovery::ErrorCategory;
use crate::utils::command::{run_command, status_error};
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Runs an external client program (mail, chat, accounting) that prints the
/// items currently visible to it, as a JSON array or as JSON lines.
///
/// Exit status 75 is transient, 77 is an authentication failure and 65 a
/// data error; other failures are classified from stderr.
pub struct CommandSource {
    name: String,
    integration: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(
        name: impl Into<String>,
        integration: impl Into<String>,
        argv: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            integration: integration.into(),
            argv,
            timeout,
        }
    }
}

/// Parse client output: empty, a JSON array, or one JSON object per line.
pub fn parse_items(stdout: &[u8]) -> Result<Vec<WatchItem>> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

impl Source for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<WatchItem>>> + Send + 'a>> {
        Box::pin(async move {
            let output = run_command(&self.integration, &self.argv, None, self.timeout).await?;
            if !output.status.success() {
                return Err(anyhow::Error::new(status_error(&self.integration, &output)));
            }
            parse_items(&output.stdout).map_err(|error| {
                anyhow::Error::new(IntegrationError::new(
                    &self.integration,
                    ErrorCategory::Data,
                    format!("unparsable client output: {error}"),
                )
                .with_code("invalid_output"))
            })
        })
    }
}
