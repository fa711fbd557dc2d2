//! Failure classification, retry scheduling and per-integration circuit
//! breakers shared by watchers and executors.

mod circuit_breaker;
mod classify;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitRegistry, CircuitSnapshot,
    CircuitState,
};
pub use classify::{category_for_code, classify};
pub use retry::{RetryError, RetryOutcome, RetryPolicy, retry_with_policy};

use serde::{Deserialize, Serialize};

/// Failure taxonomy. Every caught error maps to exactly one category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Network timeout, rate limit, temporary unavailability.
    Transient,
    /// Expired or revoked credential.
    Authentication,
    /// Upstream content is contradictory or malformed at the semantic level.
    Logic,
    /// Corrupt or missing required fields.
    Data,
    /// Unexpected crash or resource exhaustion.
    System,
}

/// What the owning loop does with a failure of a given category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    PauseAndAlert,
    Quarantine,
    RestartWorker,
}

impl ErrorCategory {
    pub fn action(self) -> RecoveryAction {
        match self {
            Self::Transient => RecoveryAction::Retry,
            Self::Authentication => RecoveryAction::PauseAndAlert,
            Self::Logic | Self::Data => RecoveryAction::Quarantine,
            Self::System => RecoveryAction::RestartWorker,
        }
    }

    pub fn is_retryable(self) -> bool {
        self == Self::Transient
    }
}
