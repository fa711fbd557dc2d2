use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One immutable line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    /// `human`, `approval-processor`, `orchestrator`, `watchdog` or a watcher name.
    pub actor: String,
    pub target: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<String>,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action_type: impl Into<String>,
        actor: impl Into<String>,
        target: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action_type: action_type.into(),
            actor: actor.into(),
            target: target.into(),
            parameters: Value::Null,
            approval_status: None,
            result: result.into(),
            duration_ms: None,
            error: None,
            before_state: None,
            after_state: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn approval_status(mut self, status: impl Into<String>) -> Self {
        self.approval_status = Some(status.into());
        self
    }

    pub fn duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn transition(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before_state = Some(before.into());
        self.after_state = Some(after.into());
        self
    }
}
