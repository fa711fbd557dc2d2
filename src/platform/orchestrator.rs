//! The orchestrator: supervises every enabled watcher and the approval
//! processor as child processes, and purges expired audit partitions.

use super::control::ControlDir;
use super::heartbeat::HeartbeatWriter;
use super::lock::InstanceLock;
use super::supervisor::{CommandLauncher, ProcessLauncher, ProcessSpec, Supervisor, SupervisorSettings};
use super::{lock_path, self_command};
use crate::approval;
use crate::audit::{AlertBoard, AuditLogger};
use crate::config::Config;
use crate::queue::TaskStore;
use crate::watchers::{self, watcher_timeout};
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ROLE: &str = "orchestrator";

const CONTROL_TICK: Duration = Duration::from_secs(1);
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Children the orchestrator keeps alive, in launch order.
pub fn process_specs(config: &Config) -> Vec<ProcessSpec> {
    let interval = config.orchestrator.health_check_interval();
    let mut specs: Vec<ProcessSpec> = config
        .enabled_watchers()
        .map(|watcher| {
            let spec = ProcessSpec::new(
                &watcher.name,
                self_command(&config.config_path, &["watcher", "run", &watcher.name]),
                interval,
            )
            .with_lock(watchers::lock_path(&config.state_dir, &watcher.name));
            if watcher.heartbeat {
                // Beats once per cycle; a cycle is one bounded fetch plus the sleep.
                spec.with_heartbeat(watcher.interval() + watcher_timeout(config, watcher))
            } else {
                spec
            }
        })
        .collect();

    if config.approval.supervised {
        specs.push(
            ProcessSpec::new(
                approval::PROCESS_NAME,
                self_command(&config.config_path, &["approvals", "run"]),
                interval,
            )
            .with_heartbeat(approval_beat_period(config))
            .with_lock(approval::lock_path(&config.state_dir)),
        );
    }
    specs
}

/// Longest gap between approval-processor beats: one poll sleep plus a full
/// retry span for a single task.
pub fn approval_beat_period(config: &Config) -> Duration {
    let policy = config.approval.retry_policy();
    let backoff: Duration = (1..=policy.max_attempts)
        .map(|attempt| policy.delay_before(attempt))
        .sum();
    let default_timeout = config.recovery.call_timeout();
    let call_timeout = config
        .executors
        .iter()
        .filter_map(|executor| executor.timeout_secs)
        .map(Duration::from_secs)
        .fold(default_timeout, Duration::max);
    config.approval.poll_interval() + backoff + call_timeout.saturating_mul(policy.max_attempts)
}

pub fn settings(config: &Config) -> SupervisorSettings {
    SupervisorSettings {
        policy: config.orchestrator.restart_policy(),
        missed_heartbeats: config.orchestrator.missed_heartbeats,
        shutdown_grace: Duration::from_secs(config.orchestrator.shutdown_grace_secs),
        control_tick: CONTROL_TICK,
    }
}

/// Supervisor with every child registered but nothing launched yet.
pub fn build_supervisor(config: &Config, launcher: Box<dyn ProcessLauncher>) -> Supervisor {
    let mut supervisor = Supervisor::new(
        ROLE,
        &config.state_dir,
        settings(config),
        launcher,
        AuditLogger::from_config(config),
        AlertBoard::new(&config.state_dir),
    );
    for spec in process_specs(config) {
        supervisor.add(spec);
    }
    supervisor
}

/// Run the orchestrator in this process until cancelled or asked to shut
/// down. Children are stopped before this returns.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<()> {
    let _lock = InstanceLock::acquire(&lock_path(&config.state_dir, ROLE), ROLE)?;
    TaskStore::new(config.vault_path()).ensure_layout()?;

    let mut supervisor = build_supervisor(
        config,
        Box::new(CommandLauncher::for_state_dir(&config.state_dir)),
    )
    .with_heartbeat(HeartbeatWriter::new(&config.state_dir, ROLE));
    let names: Vec<String> = supervisor.status().into_iter().map(|record| record.name).collect();
    tracing::info!(pid = std::process::id(), processes = ?names, "orchestrator started");

    let purge_cancel = cancel.child_token();
    let purge = spawn_audit_purge(
        AuditLogger::from_config(config),
        Duration::from_secs(config.audit.purge_interval_hours.saturating_mul(3_600)),
        purge_cancel.clone(),
    );

    supervisor
        .run(&ControlDir::new(&config.state_dir, ROLE), cancel)
        .await;

    purge_cancel.cancel();
    if let Err(error) = purge.await {
        tracing::warn!(%error, "audit purge task ended abnormally");
    }
    Ok(())
}

/// Purge once at startup, then every `interval` until cancelled.
pub fn spawn_audit_purge(
    audit: AuditLogger,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_PURGE_INTERVAL);
    tokio::spawn(async move {
        loop {
            if let Err(error) = audit.purge_expired(Utc::now()) {
                tracing::warn!(error = %format!("{error:#}"), "audit purge failed");
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
    })
}
