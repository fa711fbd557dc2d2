use super::executor::{ActionRequest, Executor, ExecutorRegistry};
use super::expiry::{deadline, format_waited};
use super::ledger::ExecutionLedger;
use super::{ActionType, PROCESS_NAME};
use crate::audit::{ACTOR_HUMAN, AUTHENTICATION_FAILING, AlertBoard, AuditEntry, AuditLogger};
use crate::config::Config;
use crate::error::{IntegrationError, QueueError};
use crate::platform::heartbeat::HeartbeatWriter;
use crate::queue::{DirectoryPoller, Queue, Task, TaskStore, is_task_file, task_id};
use crate::recovery::{
    CircuitRegistry, CircuitState, ErrorCategory, RetryError, RetryOutcome, RetryPolicy,
    retry_with_policy,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ApprovalSettings {
    pub poll_interval: Duration,
    /// Run the expiry job on every Nth cycle.
    pub expiry_every_cycles: u64,
    pub default_ttl: chrono::Duration,
    pub retry: RetryPolicy,
    pub auth_pause: Duration,
}

impl ApprovalSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.approval.poll_interval(),
            expiry_every_cycles: config.approval.expiry_every_cycles.max(1),
            default_ttl: config.approval.default_ttl(),
            retry: config.approval.retry_policy(),
            auth_pause: config.recovery.auth_pause(),
        }
    }
}

/// How the processor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorExit {
    Graceful,
    /// A `system` failure; the supervisor should restart the process.
    RestartRequested,
}

/// What happened to one approved task in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done { attempts: u32 },
    Failed { reason: String },
    /// Left in `Approved` for a later cycle.
    Deferred,
    /// Executor paused after an authentication failure; left in `Approved`.
    Paused,
    /// Another actor moved the file first.
    AlreadyMoved,
    /// Shutdown interrupted the retry schedule; left in `Approved`.
    Cancelled,
    RestartRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub approved_detected: usize,
    pub rejected_detected: usize,
    pub expired: usize,
    pub done: usize,
    pub failed: usize,
    pub deferred: usize,
    pub restart_requested: bool,
}

impl CycleReport {
    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Done { .. } => self.done += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
            TaskOutcome::Deferred | TaskOutcome::Paused | TaskOutcome::Cancelled => {
                self.deferred += 1;
            }
            TaskOutcome::AlreadyMoved => {}
            TaskOutcome::RestartRequested => self.restart_requested = true,
        }
    }
}

/// An `Approved` file the processor has seen but not yet moved out.
#[derive(Debug, Clone)]
struct PendingApproval {
    content_hash: String,
    /// Content changed after detection; wait one cycle before executing.
    edited: bool,
}

/// Polls `Approved` and `Rejected`, executes approved actions and expires
/// stale requests. Owns every move out of `Approved`.
pub struct ApprovalProcessor {
    store: TaskStore,
    registry: ExecutorRegistry,
    breakers: CircuitRegistry,
    audit: AuditLogger,
    alerts: AlertBoard,
    ledger: ExecutionLedger,
    settings: ApprovalSettings,
    heartbeat: Option<HeartbeatWriter>,
    approved: DirectoryPoller,
    rejected: DirectoryPoller,
    pending: BTreeMap<String, PendingApproval>,
    paused: HashMap<ActionType, Instant>,
    auth_alerts: HashSet<ActionType>,
    cycle: u64,
}

impl ApprovalProcessor {
    pub fn new(
        store: TaskStore,
        registry: ExecutorRegistry,
        breakers: CircuitRegistry,
        audit: AuditLogger,
        alerts: AlertBoard,
        ledger: ExecutionLedger,
        settings: ApprovalSettings,
    ) -> Self {
        let approved = DirectoryPoller::new(store.queue_dir(Queue::Approved));
        let rejected = DirectoryPoller::new(store.queue_dir(Queue::Rejected));
        Self {
            store,
            registry,
            breakers,
            audit,
            alerts,
            ledger,
            settings,
            heartbeat: None,
            approved,
            rejected,
            pending: BTreeMap::new(),
            paused: HashMap::new(),
            auth_alerts: HashSet::new(),
            cycle: 0,
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatWriter) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn registered_action_types(&self) -> Vec<ActionType> {
        self.registry.action_types()
    }

    pub fn breakers(&self) -> &CircuitRegistry {
        &self.breakers
    }

    /// Poll until cancelled or until a `system` failure asks for a restart.
    pub async fn run(&mut self, cancel: CancellationToken) -> ProcessorExit {
        tracing::info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            executors = ?self.registry.action_types(),
            "approval processor started"
        );

        let exit = loop {
            let report = self.run_cycle(&cancel).await;
            if report.restart_requested {
                break ProcessorExit::RestartRequested;
            }

            tokio::select! {
                () = cancel.cancelled() => break ProcessorExit::Graceful,
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        };

        tracing::info!(?exit, "approval processor stopped");
        exit
    }

    /// One poll cycle: expiry (every Nth cycle), rejections, approvals.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        self.cycle = self.cycle.saturating_add(1);
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.beat();
        }

        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        if self.cycle % self.settings.expiry_every_cycles == 0 {
            match self.expire_pending(Utc::now()) {
                Ok(expired) => report.expired = expired,
                Err(error) => tracing::warn!(error = %format!("{error:#}"), "expiry scan failed"),
            }
        }

        match self.detect_rejected() {
            Ok(count) => report.rejected_detected = count,
            Err(error) => tracing::warn!(error = %format!("{error:#}"), "failed to scan Rejected"),
        }

        match self.detect_approved() {
            Ok(count) => report.approved_detected = count,
            Err(error) => tracing::warn!(error = %format!("{error:#}"), "failed to scan Approved"),
        }

        let names: Vec<String> = self.pending.keys().cloned().collect();
        for name in names {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(heartbeat) = self.heartbeat.as_mut() {
                heartbeat.beat();
            }
            let outcome = self.process_approved(&name, cancel).await;
            tracing::debug!(task = %name, ?outcome, "approved task processed");
            report.record(&outcome);
            if outcome == TaskOutcome::RestartRequested {
                break;
            }
        }

        report
    }

    /// Move every overdue `Pending_Approval` task into `Expired`.
    pub fn expire_pending(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for name in self.store.list(Queue::PendingApproval)? {
            let task = match self.store.read(Queue::PendingApproval, &name) {
                Ok(task) => task,
                Err(QueueError::AlreadyMoved { .. }) => continue,
                Err(error) => {
                    tracing::warn!(task = %name, %error, "skipping unreadable pending task");
                    continue;
                }
            };

            let modified = std::fs::metadata(self.store.path(Queue::PendingApproval, &name))
                .and_then(|metadata| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            let Some(expires_at) = deadline(&task.meta, self.settings.default_ttl, modified) else {
                continue;
            };
            if now <= expires_at {
                continue;
            }

            let waiting_since = task.meta.created.or(modified).unwrap_or(expires_at);
            let waited = format_waited(now - waiting_since);
            let annotation = waited.clone();
            match self
                .store
                .transition(Queue::PendingApproval, Queue::Expired, &name, move |meta| {
                    meta.expired_at = Some(now);
                    meta.waited = Some(annotation);
                }) {
                Ok(moved) => {
                    expired += 1;
                    tracing::info!(task = %moved, %waited, "approval request expired");
                    self.audit.record(
                        AuditEntry::new("expire", PROCESS_NAME, &moved, "expired")
                            .at(now)
                            .approval_status("expired")
                            .parameters(serde_json::json!({ "waited": waited }))
                            .transition(Queue::PendingApproval.to_string(), Queue::Expired.to_string()),
                    );
                }
                // A human decided while we were looking.
                Err(QueueError::AlreadyMoved { .. }) => {}
                Err(error) => {
                    tracing::warn!(task = %name, %error, "failed to expire task");
                }
            }
        }
        Ok(expired)
    }

    fn detect_rejected(&mut self) -> Result<usize> {
        let diff = self.rejected.poll()?;
        let mut detected = 0;
        for name in diff.added.iter().filter(|name| is_task_file(name)) {
            detected += 1;
            tracing::info!(task = %name, "rejection detected");
            self.audit.record(
                AuditEntry::new("reject", ACTOR_HUMAN, name, "rejected")
                    .approval_status("rejected")
                    .transition(Queue::PendingApproval.to_string(), Queue::Rejected.to_string()),
            );
        }
        Ok(detected)
    }

    fn detect_approved(&mut self) -> Result<usize> {
        let diff = self.approved.poll()?;
        for name in &diff.removed {
            self.pending.remove(name);
        }

        let mut detected = 0;
        let touched = diff.added.iter().chain(diff.changed.iter());
        for name in touched.filter(|name| is_task_file(name)) {
            let hash = match self.store.content_hash(Queue::Approved, name) {
                Ok(hash) => hash,
                Err(QueueError::AlreadyMoved { .. }) => continue,
                Err(error) => {
                    tracing::warn!(task = %name, %error, "failed to hash approved task");
                    self.approved.forget(name);
                    continue;
                }
            };

            if let Some(entry) = self.pending.get_mut(name) {
                if entry.content_hash != hash {
                    tracing::info!(task = %name, "approved task edited, deferring");
                    entry.content_hash = hash;
                    entry.edited = true;
                }
                continue;
            }

            detected += 1;
            tracing::info!(task = %name, "approval detected");
            self.audit.record(
                AuditEntry::new("approve", ACTOR_HUMAN, name, "approved")
                    .approval_status("approved")
                    .transition(Queue::PendingApproval.to_string(), Queue::Approved.to_string()),
            );
            self.pending.insert(
                name.clone(),
                PendingApproval {
                    content_hash: hash,
                    edited: false,
                },
            );
        }
        Ok(detected)
    }

    /// Route and execute one detected approval, then move it to its
    /// terminal queue or leave it for a later cycle.
    async fn process_approved(&mut self, name: &str, cancel: &CancellationToken) -> TaskOutcome {
        let started = Instant::now();
        let Some(entry) = self.pending.get_mut(name) else {
            return TaskOutcome::AlreadyMoved;
        };
        if entry.edited {
            entry.edited = false;
            return TaskOutcome::Deferred;
        }
        let detected_hash = entry.content_hash.clone();

        let hash = match self.store.content_hash(Queue::Approved, name) {
            Ok(hash) => hash,
            Err(QueueError::AlreadyMoved { .. }) => {
                self.pending.remove(name);
                return TaskOutcome::AlreadyMoved;
            }
            Err(error) => {
                tracing::warn!(task = %name, %error, "failed to re-hash approved task");
                return TaskOutcome::Deferred;
            }
        };
        if hash != detected_hash {
            tracing::info!(task = %name, "approved task changed before execution, deferring");
            if let Some(entry) = self.pending.get_mut(name) {
                entry.content_hash = hash;
            }
            return TaskOutcome::Deferred;
        }

        let task = match self.store.read(Queue::Approved, name) {
            Ok(task) => task,
            Err(QueueError::AlreadyMoved { .. }) => {
                self.pending.remove(name);
                return TaskOutcome::AlreadyMoved;
            }
            Err(error @ QueueError::Malformed { .. }) => {
                return self.fail(
                    name,
                    "unknown",
                    Failure::new(format!("unparsable task file: {error}"), ErrorCategory::Data),
                    started,
                );
            }
            Err(error) => {
                tracing::warn!(task = %name, %error, "failed to read approved task");
                return TaskOutcome::Deferred;
            }
        };
        let action_label = task.meta.action_type.clone().unwrap_or_else(|| "unknown".into());

        let id = task_id(name).to_string();
        if self.ledger.contains(&id, &hash) {
            return self.fail(
                name,
                &action_label,
                Failure::new(
                    "duplicate: this task was already executed with identical content",
                    ErrorCategory::Logic,
                ),
                started,
            );
        }

        let (action_type, executor) =
            match self.registry.resolve(task.meta.action_type.as_deref()) {
                Ok(route) => route,
                Err(error) => {
                    return self.fail(
                        name,
                        &action_label,
                        Failure::new(error.to_string(), ErrorCategory::Data),
                        started,
                    );
                }
            };

        if let Some(until) = self.paused.get(&action_type).copied() {
            if Instant::now() < until {
                tracing::debug!(task = %name, %action_type, "executor paused, deferring");
                return TaskOutcome::Deferred;
            }
            self.paused.remove(&action_type);
        }

        let breaker = self.breakers.get(executor.integration());
        if breaker.state() == CircuitState::Open {
            tracing::debug!(task = %name, integration = %executor.integration(), "circuit open, deferring");
            return TaskOutcome::Deferred;
        }

        let request = request_for(&id, action_type, &task);
        let executor: &dyn Executor = executor.as_ref();
        let request = &request;
        let result = retry_with_policy(&self.settings.retry, cancel, Some(breaker.as_ref()), |attempt| {
            async move {
                tracing::info!(task = %request.task_id, %action_type, attempt, "executing approved action");
                match tokio::time::timeout(executor.timeout(), executor.perform(request)).await {
                    Ok(reply) => {
                        reply.and_then(|outcome| outcome.into_result(executor.integration()))
                    }
                    Err(_) => Err(anyhow::Error::new(IntegrationError::timeout(
                        executor.integration(),
                        executor.timeout(),
                    ))),
                }
            }
        })
        .await;

        match result {
            Ok(RetryOutcome { value, attempts }) => {
                self.complete(name, &id, &hash, action_type, &task, value, attempts, started)
            }
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!(task = %name, attempts, "execution interrupted by shutdown");
                TaskOutcome::Cancelled
            }
            Err(RetryError::Exhausted {
                attempts,
                category,
                last_error,
            }) => self.fail(
                name,
                &action_label,
                Failure::new(
                    format!("gave up after {attempts} attempts ({category}): {last_error:#}"),
                    category,
                )
                .after(attempts, &last_error),
                started,
            ),
            Err(RetryError::NonRetryable {
                attempts,
                category,
                last_error,
            }) => match category {
                ErrorCategory::Authentication => {
                    self.pause_executor(name, action_type, &last_error, started)
                }
                ErrorCategory::System => {
                    tracing::error!(task = %name, error = %format!("{last_error:#}"), "system failure, requesting restart");
                    self.audit.record(
                        AuditEntry::new(action_type.to_string(), PROCESS_NAME, name, "restart_requested")
                            .approval_status("approved")
                            .duration(started.elapsed())
                            .error(format!("{last_error:#}")),
                    );
                    TaskOutcome::RestartRequested
                }
                ErrorCategory::Logic | ErrorCategory::Data | ErrorCategory::Transient => self.fail(
                    name,
                    &action_label,
                    Failure::new(
                        format!("{category} error, quarantined: {last_error:#}"),
                        category,
                    )
                    .after(attempts, &last_error),
                    started,
                ),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &mut self,
        name: &str,
        id: &str,
        hash: &str,
        action_type: ActionType,
        task: &Task,
        result: String,
        attempts: u32,
        started: Instant,
    ) -> TaskOutcome {
        let now = Utc::now();
        let annotation = result.clone();
        let moved = match self
            .store
            .transition(Queue::Approved, Queue::Done, name, move |meta| {
                meta.completed_at = Some(now);
                meta.attempts = Some(attempts);
                meta.result = Some(annotation);
            }) {
            Ok(moved) => moved,
            Err(QueueError::AlreadyMoved { .. }) => {
                // Executed, but someone moved the file meanwhile; still record it.
                tracing::warn!(task = %name, "executed task vanished from Approved");
                name.to_string()
            }
            Err(error) => {
                tracing::error!(task = %name, %error, "executed task could not be moved to Done");
                name.to_string()
            }
        };
        self.forget(name);

        if let Err(error) = self.ledger.record(id, hash, &action_type.to_string(), now) {
            tracing::warn!(task = %name, error = %format!("{error:#}"), "failed to update execution ledger");
        }
        self.on_executor_recovered(action_type);

        tracing::info!(task = %moved, %action_type, attempts, "approved action completed");
        self.audit.record(
            AuditEntry::new(action_type.to_string(), PROCESS_NAME, &moved, "success")
                .parameters(task.meta.action_parameters.clone().unwrap_or_default())
                .approval_status("approved")
                .duration(started.elapsed())
                .transition(Queue::Approved.to_string(), Queue::Done.to_string()),
        );
        TaskOutcome::Done { attempts }
    }

    fn fail(
        &mut self,
        name: &str,
        action_label: &str,
        failure: Failure,
        started: Instant,
    ) -> TaskOutcome {
        let Failure {
            reason,
            category,
            attempts,
            last_error,
        } = failure;
        let annotation = (reason.clone(), last_error.clone());
        let moved = match self
            .store
            .transition(Queue::Approved, Queue::Failed, name, move |meta| {
                let (reason, last_error) = annotation;
                meta.failure_reason = Some(reason);
                meta.last_error = last_error;
                meta.attempts = attempts;
            }) {
            Ok(moved) => moved,
            Err(QueueError::AlreadyMoved { .. }) => {
                self.forget(name);
                return TaskOutcome::AlreadyMoved;
            }
            Err(error) => {
                tracing::error!(task = %name, %error, "failed task could not be moved to Failed");
                return TaskOutcome::Deferred;
            }
        };
        self.forget(name);

        tracing::warn!(task = %moved, %category, %reason, "approved action failed");
        self.audit.record(
            AuditEntry::new(action_label, PROCESS_NAME, &moved, "failed")
                .parameters(serde_json::json!({ "category": category.to_string() }))
                .approval_status("approved")
                .duration(started.elapsed())
                .error(reason.clone())
                .transition(Queue::Approved.to_string(), Queue::Failed.to_string()),
        );
        TaskOutcome::Failed { reason }
    }

    fn pause_executor(
        &mut self,
        name: &str,
        action_type: ActionType,
        error: &anyhow::Error,
        started: Instant,
    ) -> TaskOutcome {
        let pause = self.settings.auth_pause;
        self.paused.insert(action_type, Instant::now() + pause);
        tracing::error!(
            task = %name,
            %action_type,
            pause_secs = pause.as_secs(),
            error = %format!("{error:#}"),
            "executor credentials rejected, pausing"
        );

        let component = executor_component(action_type);
        match self.alerts.raise(
            &component,
            AUTHENTICATION_FAILING,
            format!("{action_type} executor rejected its credentials: {error:#}"),
        ) {
            Ok(()) => {
                self.auth_alerts.insert(action_type);
            }
            Err(alert_error) => {
                tracing::warn!(error = %format!("{alert_error:#}"), "failed to raise alert");
            }
        }

        self.audit.record(
            AuditEntry::new(action_type.to_string(), PROCESS_NAME, name, "paused")
                .approval_status("approved")
                .duration(started.elapsed())
                .error(format!("{error:#}")),
        );
        TaskOutcome::Paused
    }

    /// Stop tracking `name`; a file of that name appearing in `Approved`
    /// later is a new arrival.
    fn forget(&mut self, name: &str) {
        self.pending.remove(name);
        self.approved.forget(name);
    }

    fn on_executor_recovered(&mut self, action_type: ActionType) {
        if !self.auth_alerts.remove(&action_type) {
            return;
        }
        if let Err(error) = self
            .alerts
            .clear(&executor_component(action_type), AUTHENTICATION_FAILING)
        {
            tracing::warn!(error = %format!("{error:#}"), "failed to clear alert");
        }
    }
}

/// Why an approved task is being quarantined.
struct Failure {
    reason: String,
    category: ErrorCategory,
    attempts: Option<u32>,
    last_error: Option<String>,
}

impl Failure {
    fn new(reason: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            reason: reason.into(),
            category,
            attempts: None,
            last_error: None,
        }
    }

    fn after(mut self, attempts: u32, last_error: &anyhow::Error) -> Self {
        self.attempts = Some(attempts);
        self.last_error = Some(format!("{last_error:#}"));
        self
    }
}

fn executor_component(action_type: ActionType) -> String {
    format!("{PROCESS_NAME}/{action_type}")
}

fn request_for(id: &str, action_type: ActionType, task: &Task) -> ActionRequest {
    ActionRequest {
        task_id: id.to_string(),
        action_type,
        parameters: task
            .meta
            .action_parameters
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        body: task.body.clone(),
    }
}
