//! The watchdog: one level above the orchestrator, with the same restart
//! policy shape at a coarser interval.

use super::control::ControlDir;
use super::lock::{InstanceLock, holder_pid};
use super::supervisor::{CommandLauncher, ProcessLauncher, ProcessSpec, Supervisor, SupervisorSettings};
use super::{lock_path, orchestrator, self_command};
use crate::audit::{AlertBoard, AuditLogger};
use crate::config::Config;
use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ROLE: &str = "watchdog";

const CONTROL_TICK: Duration = Duration::from_secs(1);

/// The orchestrator as the watchdog's only child. The orchestrator beats on
/// every control tick, so a beat gap of a whole check interval means it hung.
pub fn orchestrator_spec(config: &Config) -> ProcessSpec {
    let command = config
        .watchdog
        .orchestrator_command
        .clone()
        .filter(|command| !command.is_empty())
        .unwrap_or_else(|| self_command(&config.config_path, &["orchestrator", "run"]));
    let interval = config.watchdog.check_interval();
    ProcessSpec::new(orchestrator::ROLE, command, interval)
        .with_heartbeat(interval)
        .with_lock(lock_path(&config.state_dir, orchestrator::ROLE))
}

pub fn settings(config: &Config) -> SupervisorSettings {
    SupervisorSettings {
        policy: config.watchdog.restart_policy(),
        missed_heartbeats: config.orchestrator.missed_heartbeats,
        shutdown_grace: Duration::from_secs(config.orchestrator.shutdown_grace_secs)
            .saturating_mul(2),
        control_tick: CONTROL_TICK,
    }
}

pub fn build_supervisor(config: &Config, launcher: Box<dyn ProcessLauncher>) -> Supervisor {
    let mut supervisor = Supervisor::new(
        ROLE,
        &config.state_dir,
        settings(config),
        launcher,
        AuditLogger::from_config(config),
        AlertBoard::new(&config.state_dir),
    );
    supervisor.add(orchestrator_spec(config));
    supervisor
}

/// Run the watchdog in this process until cancelled or asked to shut down.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<()> {
    let _lock = InstanceLock::acquire(&lock_path(&config.state_dir, ROLE), ROLE)?;

    if let Some(pid) = holder_pid(&lock_path(&config.state_dir, orchestrator::ROLE)) {
        tracing::warn!(
            pid,
            "an orchestrator is already running outside the watchdog; it will be asked to stop and replaced"
        );
    }

    let mut supervisor = build_supervisor(
        config,
        Box::new(CommandLauncher::for_state_dir(&config.state_dir)),
    );
    tracing::info!(
        pid = std::process::id(),
        check_interval_secs = config.watchdog.check_interval().as_secs(),
        "watchdog started"
    );
    supervisor
        .run(&ControlDir::new(&config.state_dir, ROLE), cancel)
        .await;
    Ok(())
}
