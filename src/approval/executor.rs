use super::ActionType;
use crate::config::ExecutorConfig;
use crate::error::{IntegrationError, RoutingError};
use crate::recovery::{ErrorCategory, category_for_code, classify};
use crate::utils::command::{run_command, status_error};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// What an executor is asked to do. Sent to command executors as JSON on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub task_id: String,
    pub action_type: ActionType,
    pub parameters: serde_json::Value,
    pub body: String,
}

/// Reply of the perform-action contract: `{success, message, error_code}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_code: None,
        }
    }

    pub fn failed(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_code: Some(code.into()),
        }
    }

    /// A reported failure becomes an [`IntegrationError`] whose category comes
    /// from the error code, or from the message when no code was given.
    pub fn into_result(self, integration: &str) -> Result<String> {
        if self.success {
            return Ok(self.message);
        }
        let category = match self.error_code.as_deref() {
            Some(code) => category_for_code(code),
            None => classify(&anyhow::anyhow!("{}", self.message)),
        };
        let mut error = IntegrationError::new(integration, category, self.message);
        if let Some(code) = self.error_code {
            error = error.with_code(code);
        }
        Err(error.into())
    }
}

/// Performs one action type against an external system.
pub trait Executor: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Circuit-breaker key.
    fn integration(&self) -> &str;

    /// Upper bound for a single attempt.
    fn timeout(&self) -> Duration;

    fn perform<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutcome>> + Send + 'a>>;
}

/// Runs the configured command with the request on stdin and parses the
/// reply from stdout.
pub struct CommandExecutor {
    action_type: ActionType,
    integration: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(
        action_type: ActionType,
        integration: impl Into<String>,
        argv: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            action_type,
            integration: integration.into(),
            argv,
            timeout,
        }
    }

    pub fn from_config(config: &ExecutorConfig, default_timeout: Duration) -> Self {
        Self::new(
            config.action_type,
            config.integration_name(),
            config.command.clone(),
            config
                .timeout_secs
                .map_or(default_timeout, |secs| Duration::from_secs(secs.max(1))),
        )
    }
}

impl Executor for CommandExecutor {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    fn integration(&self) -> &str {
        &self.integration
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn perform<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ActionOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(request)?;
            let output =
                run_command(&self.integration, &self.argv, Some(&payload), self.timeout).await?;

            let reply = serde_json::from_slice::<ActionOutcome>(output.stdout.trim_ascii());
            if !output.status.success() {
                // A declined action may exit non-zero and still explain itself.
                return match reply {
                    Ok(outcome) if !outcome.success => Ok(outcome),
                    _ => Err(anyhow::Error::new(status_error(&self.integration, &output))),
                };
            }
            reply.map_err(|error| {
                anyhow::Error::new(
                    IntegrationError::new(
                        &self.integration,
                        ErrorCategory::Data,
                        format!("unparsable executor reply: {error}"),
                    )
                    .with_code("invalid_output"),
                )
            })
        })
    }
}

/// Typed routing table from action type to executor.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor`, replacing any previous one for its action type.
    pub fn register(&mut self, executor: Box<dyn Executor>) {
        let action_type = executor.action_type();
        if self
            .executors
            .insert(action_type, Arc::from(executor))
            .is_some()
        {
            tracing::warn!(%action_type, "executor replaced");
        }
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn Executor>> {
        self.executors.get(&action_type).cloned()
    }

    /// Route a raw `action_type` value from a task file.
    pub fn resolve(&self, raw: Option<&str>) -> Result<(ActionType, Arc<dyn Executor>), RoutingError> {
        let raw = raw.map(str::trim).filter(|raw| !raw.is_empty());
        let Some(raw) = raw else {
            return Err(RoutingError::MissingActionType);
        };
        let action_type =
            ActionType::from_str(raw).map_err(|_| RoutingError::Unregistered(raw.to_string()))?;
        self.get(action_type)
            .map(|executor| (action_type, executor))
            .ok_or_else(|| RoutingError::Unregistered(raw.to_string()))
    }

    pub fn action_types(&self) -> Vec<ActionType> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort();
        types
    }
}
