//! Per-integration circuit breaker.
//!
//! ```text
//! closed ──(failure_threshold consecutive failures)──▶ open
//!   ▲                                                   │ timeout
//!   │ trial succeeds                                    ▼
//!   └──────────────────────────────────────────────── half_open
//!                     trial fails ⇒ open again, cooldown restarts
//! ```
//!
//! In `half_open` exactly one trial call is admitted; every other caller is
//! rejected until the trial reports back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is admitted.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::RecoveryConfig> for CircuitBreakerConfig {
    fn from(config: &crate::config::RecoveryConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            timeout: config.circuit_timeout(),
        }
    }
}

/// Returned when the breaker rejects a call without invoking it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit for {integration} is open (retry in {}s)", retry_in.as_secs())]
pub struct CircuitOpen {
    pub integration: String,
    pub retry_in: Duration,
}

/// Point-in-time view for status output and audit entries.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub integration: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    integration: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(integration: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            integration: integration.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn integration(&self) -> &str {
        &self.integration
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current state, promoting `open` to `half_open` once the cooldown elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.promote(&mut inner);
        inner.state
    }

    fn promote(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|opened| opened.elapsed() >= self.config.timeout)
        {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            tracing::info!(integration = %self.integration, "circuit half-open");
        }
    }

    /// Ask permission to make one call. In `half_open` only the first caller
    /// is admitted; the admitted caller must report back with
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.lock();
        self.promote(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(())
            }
            CircuitState::HalfOpen => Err(self.rejection(Duration::ZERO)),
            CircuitState::Open => {
                let remaining = inner
                    .opened_at
                    .map(|opened| self.config.timeout.saturating_sub(opened.elapsed()))
                    .unwrap_or(self.config.timeout);
                Err(self.rejection(remaining))
            }
        }
    }

    fn rejection(&self, retry_in: Duration) -> CircuitOpen {
        CircuitOpen {
            integration: self.integration.clone(),
            retry_in,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(integration = %self.integration, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Utc::now());

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
            tracing::warn!(
                integration = %self.integration,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.timeout.as_secs(),
                "circuit opened"
            );
        }
    }

    /// Run `op` through the breaker. A rejected call never invokes `op`.
    pub async fn call<T, F, Fut>(&self, op: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.lock();
        self.promote(&mut inner);
        CircuitSnapshot {
            integration: self.integration.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            timeout_secs: self.config.timeout.as_secs(),
            last_failure: inner.last_failure,
        }
    }
}

/// Lazily populated breakers keyed by integration name. Lives for the
/// lifetime of the owning process.
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, integration: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(integration.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(integration, self.config.clone()))
                }),
        )
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut snapshots: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.integration.cmp(&b.integration));
        snapshots
    }
}
