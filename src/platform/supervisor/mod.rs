//! Keeps child processes alive: liveness and heartbeat checks, capped
//! exponential backoff, a rolling restart budget and operator control.
//! The orchestrator supervises watchers and the approval processor with it;
//! the watchdog supervises the orchestrator.

mod launcher;
mod policy;
mod record;

pub use launcher::{ChildExit, CommandLauncher, ManagedChild, ProcessLauncher};
pub use policy::{RestartBudget, RestartPolicy};
pub use record::{ProcessRecord, ProcessState, SupervisorState};

use crate::audit::{ACTOR_HUMAN, AlertBoard, AuditEntry, AuditLogger, RESTART_BUDGET_EXHAUSTED};
use crate::error::SupervisorError;
use crate::platform::control::{ControlCommand, ControlDir, ControlRequest};
use crate::platform::heartbeat::{HeartbeatWriter, read_heartbeat};
use crate::platform::lock::holder_pid;
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const EXIT_POLL: Duration = Duration::from_millis(100);

/// What to run and how to judge its health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub command: Vec<String>,
    pub health_check_interval: Duration,
    /// Expected beat period; `None` disables the heartbeat check.
    pub heartbeat_interval: Option<Duration>,
    /// Single-instance lock the child takes. A live holder found at launch
    /// is an orphan of an earlier supervisor and is stopped first.
    pub lock_path: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, health_check_interval: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            health_check_interval,
            heartbeat_interval: None,
            lock_path: None,
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub policy: RestartPolicy,
    /// Beat periods a heartbeat-enabled process may miss before it is killed.
    pub missed_heartbeats: u32,
    pub shutdown_grace: Duration,
    /// Period of control-request draining, liveness checks and state writes.
    pub control_tick: Duration,
}

struct Managed {
    spec: ProcessSpec,
    record: ProcessRecord,
    child: Option<Box<dyn ManagedChild>>,
    budget: RestartBudget,
    restart_at: Option<Instant>,
    started_at: Option<Instant>,
    next_health_check: Instant,
    /// Stale lock holder being stopped, and when it was first signalled.
    reclaim: Option<(u32, Instant)>,
}

impl Managed {
    fn launch(&mut self, launcher: &dyn ProcessLauncher) -> Result<()> {
        let child = launcher.launch(&self.spec)?;
        let now = Instant::now();
        self.record.pid = child.id();
        self.record.state = ProcessState::Running;
        self.record.last_start = Some(Utc::now());
        self.record.next_restart_at = None;
        self.child = Some(child);
        self.reclaim = None;
        self.started_at = Some(now);
        self.restart_at = None;
        self.next_health_check = now + self.spec.health_check_interval;
        Ok(())
    }

    fn mark_down(&mut self, state: ProcessState, last_exit: Option<String>) {
        self.child = None;
        self.record.pid = None;
        self.record.state = state;
        self.started_at = None;
        if last_exit.is_some() {
            self.record.last_exit = last_exit;
        }
    }
}

/// Supervises a fixed set of processes for one role (`orchestrator` or
/// `watchdog`).
pub struct Supervisor {
    role: String,
    state_dir: PathBuf,
    settings: SupervisorSettings,
    launcher: Box<dyn ProcessLauncher>,
    audit: AuditLogger,
    alerts: AlertBoard,
    previous: Option<SupervisorState>,
    processes: BTreeMap<String, Managed>,
    heartbeat: Option<HeartbeatWriter>,
}

impl Supervisor {
    pub fn new(
        role: impl Into<String>,
        state_dir: &Path,
        settings: SupervisorSettings,
        launcher: Box<dyn ProcessLauncher>,
        audit: AuditLogger,
        alerts: AlertBoard,
    ) -> Self {
        let role = role.into();
        let previous = match SupervisorState::load(state_dir, &role) {
            Ok(previous) => previous,
            Err(error) => {
                tracing::warn!(%role, error = %format!("{error:#}"), "ignoring unreadable supervisor state");
                None
            }
        };
        Self {
            role,
            state_dir: state_dir.to_path_buf(),
            settings,
            launcher,
            audit,
            alerts,
            previous,
            processes: BTreeMap::new(),
            heartbeat: None,
        }
    }

    /// Beat on every control tick so a supervisor of this supervisor can
    /// tell a hung loop from a live one.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatWriter) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Register a process. An operator stop recorded by a previous run of
    /// this supervisor is kept.
    pub fn add(&mut self, spec: ProcessSpec) {
        let stopped = self
            .previous
            .as_ref()
            .and_then(|state| state.process(&spec.name))
            .is_some_and(|record| record.stopped);
        if stopped {
            tracing::info!(role = %self.role, process = %spec.name, "keeping operator stop from previous run");
        }

        let record = ProcessRecord {
            name: spec.name.clone(),
            command: spec.command.clone(),
            health_check_interval_secs: spec.health_check_interval.as_secs(),
            state: ProcessState::Stopped,
            pid: None,
            consecutive_failures: 0,
            restart_count: 0,
            last_start: None,
            last_exit: None,
            restart_budget_remaining: self.settings.policy.max_restarts,
            next_restart_at: None,
            stopped,
        };
        let managed = Managed {
            budget: self.settings.policy.budget(),
            next_health_check: Instant::now() + spec.health_check_interval,
            spec,
            record,
            child: None,
            restart_at: None,
            started_at: None,
            reclaim: None,
        };
        self.processes.insert(managed.spec.name.clone(), managed);
    }

    pub fn status(&self) -> Vec<ProcessRecord> {
        self.processes
            .values()
            .map(|managed| managed.record.clone())
            .collect()
    }

    pub fn record(&self, name: &str) -> Option<&ProcessRecord> {
        self.processes.get(name).map(|managed| &managed.record)
    }

    /// Launch every process without an operator stop.
    pub fn start_all(&mut self) {
        let names: Vec<String> = self
            .processes
            .iter()
            .filter(|(_, managed)| !managed.record.stopped && managed.child.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            self.launch(&name);
        }
    }

    fn managed(&mut self, name: &str) -> Result<&mut Managed, SupervisorError> {
        self.processes
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))
    }

    fn launch(&mut self, name: &str) {
        if self.reclaim_lock(name) {
            return;
        }
        let Some(managed) = self.processes.get_mut(name) else {
            return;
        };
        match managed.launch(self.launcher.as_ref()) {
            Ok(()) => {
                tracing::info!(role = %self.role, process = %name, pid = ?managed.record.pid, "process started");
                self.audit.record(
                    AuditEntry::new("process_start", &self.role, name, "running")
                        .parameters(serde_json::json!({
                            "pid": managed.record.pid,
                            "restart_count": managed.record.restart_count,
                        })),
                );
            }
            Err(error) => {
                tracing::error!(role = %self.role, process = %name, error = %format!("{error:#}"), "process failed to start");
                self.on_failure(name, format!("launch failed: {error:#}"));
            }
        }
    }

    /// Stop a live holder of the process lock left behind by an earlier
    /// supervisor: SIGTERM first, SIGKILL once the grace period passed.
    /// Returns `true` while the lock is still held; the launch is retried on
    /// the next control tick and nothing is charged to the restart budget.
    fn reclaim_lock(&mut self, name: &str) -> bool {
        let now = Instant::now();
        let grace = self.settings.shutdown_grace;
        let retry = self.settings.control_tick;
        let Some(managed) = self.processes.get_mut(name) else {
            return false;
        };
        let Some(pid) = managed.spec.lock_path.as_deref().and_then(|path| holder_pid(path)) else {
            managed.reclaim = None;
            return false;
        };

        let (force, first) = match managed.reclaim {
            Some((stale, since)) if stale == pid => {
                (now.saturating_duration_since(since) >= grace, false)
            }
            _ => {
                managed.reclaim = Some((pid, now));
                (false, true)
            }
        };
        if first || force {
            tracing::warn!(role = %self.role, process = %name, pid, force, "stale instance holds the process lock, stopping it");
            if let Err(error) = self.launcher.signal_stale(pid, force) {
                tracing::warn!(process = %name, pid, error = %format!("{error:#}"), "failed to signal stale instance");
            }
        }
        if first {
            self.audit.record(
                AuditEntry::new("process_reclaim", &self.role, name, "stale_instance_signalled")
                    .parameters(serde_json::json!({ "stale_pid": pid })),
            );
        }

        managed.mark_down(
            ProcessState::Reclaiming,
            Some(format!("waiting for stale pid {pid} to release its lock")),
        );
        managed.restart_at = Some(now + retry);
        managed.record.next_restart_at = None;
        true
    }

    /// Operator start: clears the stop flag and the exhausted state.
    pub fn start(&mut self, name: &str) -> Result<()> {
        let role = self.role.clone();
        let managed = self.managed(name)?;
        managed.record.stopped = false;
        if managed.child.is_some() {
            tracing::info!(%role, process = %name, "process already running");
            return Ok(());
        }
        managed.budget.reset();
        managed.record.consecutive_failures = 0;
        managed.restart_at = None;
        self.launch(name);
        Ok(())
    }

    /// Operator stop: SIGTERM, wait out the grace period, then kill. The
    /// process is not restarted until an operator starts it again.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let grace = self.settings.shutdown_grace;
        let managed = self.managed(name)?;
        managed.record.stopped = true;
        managed.restart_at = None;
        managed.reclaim = None;
        managed.record.next_restart_at = None;
        let exit = match managed.child.take() {
            Some(mut child) => terminate_gracefully(&mut child, grace).await,
            None => None,
        };
        managed.mark_down(
            ProcessState::Stopped,
            Some(exit.map_or_else(|| "stopped by operator".to_string(), |exit| exit.to_string())),
        );

        tracing::info!(role = %self.role, process = %name, "process stopped by operator");
        self.audit.record(
            AuditEntry::new("process_stop", ACTOR_HUMAN, name, "stopped")
                .transition(ProcessState::Running.to_string(), ProcessState::Stopped.to_string()),
        );
        Ok(())
    }

    /// Operator restart: stop the running child, then start it again.
    pub async fn restart(&mut self, name: &str) -> Result<()> {
        let grace = self.settings.shutdown_grace;
        let managed = self.managed(name)?;
        if let Some(mut child) = managed.child.take() {
            terminate_gracefully(&mut child, grace).await;
        }
        managed.mark_down(ProcessState::Stopped, Some("restarted by operator".into()));
        managed.record.restart_count = managed.record.restart_count.saturating_add(1);

        self.audit
            .record(AuditEntry::new("process_restart", ACTOR_HUMAN, name, "restarting"));
        self.start(name)
    }

    /// Liveness and heartbeat checks plus due restarts. Called every control
    /// tick; heartbeat staleness is evaluated once per health-check interval.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let names: Vec<String> = self.processes.keys().cloned().collect();
        for name in names {
            self.check(&name, now);
        }
    }

    fn check(&mut self, name: &str, now: Instant) {
        let missed = self.settings.missed_heartbeats;
        let Some(managed) = self.processes.get_mut(name) else {
            return;
        };

        if let Some(child) = managed.child.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    self.on_exit(name, exit);
                    return;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(process = %name, error = %format!("{error:#}"), "liveness check failed");
                }
            }

            if now < managed.next_health_check {
                return;
            }
            managed.next_health_check = now + managed.spec.health_check_interval;

            if let Some(reason) = heartbeat_problem(&self.state_dir, managed, missed, now) {
                tracing::warn!(process = %name, %reason, "process hung, killing");
                if let Some(child) = managed.child.as_mut()
                    && let Err(error) = child.kill()
                {
                    tracing::warn!(process = %name, error = %format!("{error:#}"), "failed to kill hung process");
                }
                self.on_failure(name, reason);
                return;
            }

            // Healthy for a full interval: the crash streak is over.
            if managed
                .started_at
                .is_some_and(|started| now.saturating_duration_since(started) >= managed.spec.health_check_interval)
            {
                managed.record.consecutive_failures = 0;
            }
            return;
        }

        if managed.record.state == ProcessState::Reclaiming
            && managed.restart_at.is_some_and(|at| now >= at)
        {
            self.launch(name);
            return;
        }

        if managed.record.state == ProcessState::Backoff
            && managed.restart_at.is_some_and(|at| now >= at)
        {
            managed.record.restart_count = managed.record.restart_count.saturating_add(1);
            tracing::info!(
                role = %self.role,
                process = %name,
                restart_count = managed.record.restart_count,
                "restarting process"
            );
            self.launch(name);
        }
    }

    fn on_exit(&mut self, name: &str, exit: ChildExit) {
        if !exit.is_graceful() {
            self.on_failure(name, exit.to_string());
            return;
        }
        let Some(managed) = self.processes.get_mut(name) else {
            return;
        };
        managed.mark_down(ProcessState::Stopped, Some(exit.to_string()));
        tracing::info!(role = %self.role, process = %name, "process exited gracefully");
        self.audit.record(
            AuditEntry::new("process_exit", &self.role, name, "graceful")
                .transition(ProcessState::Running.to_string(), ProcessState::Stopped.to_string()),
        );
    }

    /// Schedule a restart after backoff, or mark the process exhausted and
    /// raise an alert once the window's budget is spent.
    fn on_failure(&mut self, name: &str, reason: String) {
        let now = Instant::now();
        let policy = self.settings.policy.clone();
        let Some(managed) = self.processes.get_mut(name) else {
            return;
        };
        let before = managed.record.state;
        managed.record.consecutive_failures = managed.record.consecutive_failures.saturating_add(1);

        if managed.budget.try_charge(now) {
            let delay = policy.backoff_for(managed.record.consecutive_failures);
            managed.mark_down(ProcessState::Backoff, Some(reason.clone()));
            managed.restart_at = Some(now + delay);
            managed.record.next_restart_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay));
            managed.record.restart_budget_remaining = managed.budget.remaining(now);

            tracing::warn!(
                role = %self.role,
                process = %name,
                %reason,
                delay_secs = delay.as_secs(),
                failures = managed.record.consecutive_failures,
                "process failed, restart scheduled"
            );
            self.audit.record(
                AuditEntry::new("process_failure", &self.role, name, "restart_scheduled")
                    .parameters(serde_json::json!({
                        "delay_secs": delay.as_secs(),
                        "consecutive_failures": managed.record.consecutive_failures,
                        "restart_budget_remaining": managed.record.restart_budget_remaining,
                    }))
                    .error(reason)
                    .transition(before.to_string(), ProcessState::Backoff.to_string()),
            );
            return;
        }

        managed.mark_down(ProcessState::Exhausted, Some(reason.clone()));
        managed.restart_at = None;
        managed.record.next_restart_at = None;
        managed.record.restart_budget_remaining = 0;

        let message = format!(
            "{name} exhausted its restart budget ({} restarts per {}s); last failure: {reason}",
            policy.max_restarts,
            policy.window.as_secs()
        );
        tracing::error!(role = %self.role, process = %name, %message, "restart budget exhausted");
        self.audit.record(
            AuditEntry::new("alert", &self.role, name, RESTART_BUDGET_EXHAUSTED)
                .error(message.clone())
                .transition(before.to_string(), ProcessState::Exhausted.to_string()),
        );
        if let Err(error) = self.alerts.raise(name, RESTART_BUDGET_EXHAUSTED, message) {
            tracing::warn!(error = %format!("{error:#}"), "failed to raise alert");
        }
    }

    /// Apply one operator request. Returns `true` for a shutdown request.
    pub async fn apply_control(&mut self, request: ControlRequest) -> bool {
        tracing::info!(role = %self.role, command = ?request.command, "control request");
        let result = match &request.command {
            ControlCommand::Start { name } => self.start(name),
            ControlCommand::Stop { name } => self.stop(name).await,
            ControlCommand::Restart { name } => self.restart(name).await,
            ControlCommand::Shutdown => return true,
        };
        if let Err(error) = result {
            tracing::warn!(role = %self.role, error = %format!("{error:#}"), "control request failed");
        }
        false
    }

    pub fn write_state(&mut self) {
        let now = Instant::now();
        for managed in self.processes.values_mut() {
            if managed.record.state != ProcessState::Exhausted {
                managed.record.restart_budget_remaining = managed.budget.remaining(now);
            }
        }
        let state = SupervisorState {
            role: self.role.clone(),
            pid: std::process::id(),
            updated_at: Utc::now(),
            processes: self.status(),
        };
        if let Err(error) = state.save(&self.state_dir) {
            tracing::warn!(role = %self.role, error = %format!("{error:#}"), "failed to write supervisor state");
        }
    }

    /// SIGTERM every child, wait up to the grace period, then kill the rest.
    /// Operator stop flags are kept for the next run.
    pub async fn shutdown(&mut self) {
        let grace = self.settings.shutdown_grace;
        let mut running: Vec<(String, Box<dyn ManagedChild>)> = Vec::new();
        for (name, managed) in &mut self.processes {
            managed.restart_at = None;
            if let Some(mut child) = managed.child.take() {
                if let Err(error) = child.terminate() {
                    tracing::warn!(process = %name, error = %format!("{error:#}"), "failed to signal process");
                }
                running.push((name.clone(), child));
            }
            managed.mark_down(ProcessState::Stopped, None);
        }

        let deadline = Instant::now() + grace;
        while !running.is_empty() && Instant::now() < deadline {
            running.retain_mut(|(name, child)| match child.try_wait() {
                Ok(Some(exit)) => {
                    tracing::info!(process = %name, %exit, "process stopped");
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            });
            if !running.is_empty() {
                tokio::time::sleep(EXIT_POLL).await;
            }
        }

        for (name, mut child) in running {
            tracing::warn!(process = %name, grace_secs = grace.as_secs(), "process ignored SIGTERM, killing");
            if let Err(error) = child.kill() {
                tracing::warn!(process = %name, error = %format!("{error:#}"), "failed to kill process");
            }
        }
        self.write_state();
        tracing::info!(role = %self.role, "supervisor stopped");
    }

    /// Start everything, then tick until cancelled or asked to shut down.
    pub async fn run(&mut self, control: &ControlDir, cancel: CancellationToken) {
        self.start_all();
        self.write_state();

        let mut ticker = tokio::time::interval(self.settings.control_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'supervise: loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match control.drain() {
                Ok(requests) => {
                    for request in requests {
                        if self.apply_control(request).await {
                            break 'supervise;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %format!("{error:#}"), "failed to read control requests");
                }
            }

            self.tick();
            self.write_state();
            if let Some(heartbeat) = self.heartbeat.as_mut() {
                heartbeat.beat();
            }
        }

        self.shutdown().await;
    }
}

/// SIGTERM, poll for exit until `grace` elapses, then kill.
async fn terminate_gracefully(child: &mut Box<dyn ManagedChild>, grace: Duration) -> Option<ChildExit> {
    if let Err(error) = child.terminate() {
        tracing::warn!(error = %format!("{error:#}"), "failed to signal process");
    }
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(exit)) => return Some(exit),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "failed to poll process");
                break;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
    if let Err(error) = child.kill() {
        tracing::warn!(error = %format!("{error:#}"), "failed to kill process");
    }
    None
}

/// Why a heartbeat-enabled process counts as hung, if it does.
fn heartbeat_problem(state_dir: &Path, managed: &Managed, missed: u32, now: Instant) -> Option<String> {
    let interval = managed.spec.heartbeat_interval?;
    let started = managed.started_at?;
    let last_start = managed.record.last_start?;
    let allowed = interval.saturating_mul(missed.max(1));
    let since_start = now.saturating_duration_since(started);

    let silent = match read_heartbeat(state_dir, &managed.spec.name) {
        Ok(Some(beat)) if beat.at >= last_start => (Utc::now() - beat.at)
            .to_std()
            .unwrap_or_default()
            .min(since_start),
        Ok(_) => since_start,
        Err(error) => {
            tracing::warn!(process = %managed.spec.name, error = %format!("{error:#}"), "unreadable heartbeat");
            return None;
        }
    };

    (silent > allowed).then(|| format!("no heartbeat for {}s", silent.as_secs()))
}
