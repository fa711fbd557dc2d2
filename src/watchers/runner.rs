use super::base::BaseWatcher;
use crate::audit::{AUTHENTICATION_FAILING, AlertBoard, AuditEntry, AuditLogger};
use crate::error::IntegrationError;
use crate::platform::heartbeat::HeartbeatWriter;
use crate::recovery::{CircuitBreaker, ErrorCategory, RecoveryAction, classify};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a watcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    /// Cancelled; in-flight work finished and state flushed.
    Graceful,
    /// A `system` failure; the supervisor should restart the process.
    RestartRequested,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub interval: Duration,
    pub call_timeout: Duration,
    pub auth_pause: Duration,
    pub auth_alert_threshold: u32,
}

/// Outcome of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { created: usize },
    Paused,
    CircuitOpen,
    Failed(ErrorCategory),
}

/// The watcher loop: poll, create tasks, classify and contain failures.
pub struct WatcherRuntime {
    watcher: BaseWatcher,
    settings: WatcherSettings,
    breaker: Arc<CircuitBreaker>,
    audit: AuditLogger,
    alerts: AlertBoard,
    heartbeat: Option<HeartbeatWriter>,
    auth_failures: u32,
    paused_until: Option<Instant>,
    auth_alert_raised: bool,
}

impl WatcherRuntime {
    pub fn new(
        watcher: BaseWatcher,
        settings: WatcherSettings,
        breaker: Arc<CircuitBreaker>,
        audit: AuditLogger,
        alerts: AlertBoard,
        heartbeat: Option<HeartbeatWriter>,
    ) -> Self {
        Self {
            watcher,
            settings,
            breaker,
            audit,
            alerts,
            heartbeat,
            auth_failures: 0,
            paused_until: None,
            auth_alert_raised: false,
        }
    }

    pub fn paused_until(&self) -> Option<Instant> {
        self.paused_until
    }

    /// Run until cancelled or until a `system` failure asks for a restart.
    /// The first poll happens immediately so a restarted watcher catches up.
    pub async fn run(mut self, cancel: CancellationToken) -> WatcherExit {
        tracing::info!(
            watcher = %self.watcher.name(),
            interval_secs = self.settings.interval.as_secs(),
            "watcher started"
        );

        let exit = loop {
            if let CycleOutcome::Failed(ErrorCategory::System) = self.run_cycle(&cancel).await {
                break WatcherExit::RestartRequested;
            }

            tokio::select! {
                () = cancel.cancelled() => break WatcherExit::Graceful,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        };

        if let Err(error) = self.watcher.flush() {
            tracing::warn!(watcher = %self.watcher.name(), error = %format!("{error:#}"), "failed to flush de-dup set");
        }
        tracing::info!(watcher = %self.watcher.name(), ?exit, "watcher stopped");
        exit
    }

    /// One iteration. Every error is caught here, classified, logged and
    /// acted on; only a `system` failure is reported upward.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.beat();
        }

        if let Some(until) = self.paused_until {
            if Instant::now() < until {
                tracing::debug!(watcher = %self.watcher.name(), "paused after authentication failure");
                return CycleOutcome::Paused;
            }
            self.paused_until = None;
        }

        if let Err(open) = self.breaker.try_acquire() {
            tracing::debug!(watcher = %self.watcher.name(), %open, "skipping poll");
            return CycleOutcome::CircuitOpen;
        }

        let fetched = match tokio::time::timeout(
            self.settings.call_timeout,
            self.watcher.check_for_updates(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::timeout(
                self.watcher.source_name(),
                self.settings.call_timeout,
            )
            .into()),
        };

        let items = match fetched {
            Ok(items) => {
                self.breaker.record_success();
                self.on_source_recovered();
                items
            }
            Err(error) => return CycleOutcome::Failed(self.handle_failure(&error, true)),
        };

        let mut created = 0;
        for item in &items {
            // Stop between items; the in-flight item always completes.
            if cancel.is_cancelled() {
                break;
            }
            match self.watcher.create_action_file(item) {
                Ok(Some(_)) => created += 1,
                Ok(None) => {}
                Err(error) => {
                    let category = self.handle_failure(&error, false);
                    if category == ErrorCategory::System {
                        return CycleOutcome::Failed(category);
                    }
                }
            }
        }
        CycleOutcome::Completed { created }
    }

    fn on_source_recovered(&mut self) {
        self.auth_failures = 0;
        if self.auth_alert_raised {
            match self.alerts.clear(self.watcher.name(), AUTHENTICATION_FAILING) {
                Ok(_) => self.auth_alert_raised = false,
                Err(error) => tracing::warn!(error = %format!("{error:#}"), "failed to clear alert"),
            }
        }
    }

    fn handle_failure(&mut self, error: &anyhow::Error, from_source: bool) -> ErrorCategory {
        let category = classify(error);
        let action = category.action();
        let name = self.watcher.name().to_string();

        if from_source {
            match category {
                // The source answered; the fault is in what it returned.
                ErrorCategory::Logic | ErrorCategory::Data => self.breaker.record_success(),
                _ => self.breaker.record_failure(),
            }
        }

        let result = match action {
            RecoveryAction::Retry => "retry_next_cycle",
            RecoveryAction::PauseAndAlert => {
                self.auth_failures = self.auth_failures.saturating_add(1);
                self.paused_until = Some(Instant::now() + self.settings.auth_pause);
                if self.auth_failures >= self.settings.auth_alert_threshold.max(1) {
                    let message = format!(
                        "{} consecutive authentication failures: {error:#}",
                        self.auth_failures
                    );
                    match self.alerts.raise(&name, AUTHENTICATION_FAILING, message) {
                        Ok(()) => self.auth_alert_raised = true,
                        Err(alert_error) => {
                            tracing::warn!(error = %format!("{alert_error:#}"), "failed to raise alert");
                        }
                    }
                }
                "paused"
            }
            RecoveryAction::Quarantine => "skipped",
            RecoveryAction::RestartWorker => "restart_requested",
        };

        match category {
            ErrorCategory::Transient => {
                tracing::warn!(watcher = %name, %category, error = %format!("{error:#}"), "watcher iteration failed");
            }
            _ => {
                tracing::error!(watcher = %name, %category, error = %format!("{error:#}"), "watcher iteration failed");
            }
        }

        self.audit.record(
            AuditEntry::new("watcher_error", &name, &name, result)
                .parameters(serde_json::json!({ "category": category.to_string() }))
                .error(format!("{error:#}")),
        );
        category
    }
}
