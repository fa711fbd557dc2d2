use crate::recovery::ErrorCategory;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `overseer`.
///
/// Each subsystem defines its own error variant. The recovery classifier
/// downcasts to these to pick a strategy; application flow keeps using
/// `anyhow::Result` for context chains.
#[derive(Debug, Error)]
pub enum OverseerError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Task queues ─────────────────────────────────────────────────────
    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    // ── External integrations ───────────────────────────────────────────
    #[error("integration: {0}")]
    Integration(#[from] IntegrationError),

    // ── Process supervision ─────────────────────────────────────────────
    #[error("supervisor: {0}")]
    Supervisor(#[from] SupervisorError),

    // ── Executor routing ────────────────────────────────────────────────
    #[error("routing: {0}")]
    Routing(#[from] RoutingError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown watcher: {0}")]
    UnknownWatcher(String),
}

// ─── Queue errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    /// The source file vanished before the rename; another actor moved it.
    #[error("task {name} is no longer in {queue} (already moved)")]
    AlreadyMoved { queue: String, name: String },

    #[error("task {name} already exists in {queue}")]
    AlreadyExists { queue: String, name: String },

    #[error("task {name} in {queue} is malformed: {message}")]
    Malformed {
        queue: String,
        name: String,
        message: String,
    },

    #[error("io on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ─── Integration errors ──────────────────────────────────────────────────────

/// Failure reported by an external collaborator (watcher source or executor).
///
/// `category` is authoritative for the recovery classifier; `code` carries
/// the collaborator's machine-readable error code when one was reported.
#[derive(Debug, Error)]
#[error("{integration} failed ({category}): {message}")]
pub struct IntegrationError {
    pub integration: String,
    pub category: ErrorCategory,
    pub code: Option<String>,
    pub message: String,
}

impl IntegrationError {
    pub fn new(
        integration: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            integration: integration.into(),
            category,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn timeout(integration: impl Into<String>, after: std::time::Duration) -> Self {
        Self::new(
            integration,
            ErrorCategory::Transient,
            format!("timed out after {}s", after.as_secs()),
        )
        .with_code("timeout")
    }
}

// ─── Supervisor errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("another {role} instance is already running (pid {pid})")]
    AlreadyRunning { role: String, pid: String },

    #[error("unknown process: {0}")]
    UnknownProcess(String),

    #[error("failed to launch {name}: {message}")]
    Launch { name: String, message: String },

    #[error("{role} is not running")]
    NotRunning { role: String },
}

// ─── Routing errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no executor registered for action type '{0}'")]
    Unregistered(String),

    #[error("task has no action_type")]
    MissingActionType,
}
