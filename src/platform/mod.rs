//! Process-level plumbing: supervision, single-instance locks, heartbeats,
//! operator control files and shutdown signals.

pub mod control;
pub mod heartbeat;
pub mod lock;
pub mod orchestrator;
pub mod signal;
pub mod supervisor;
pub mod watchdog;

use std::path::{Path, PathBuf};

/// `state/<role>.lock`.
pub fn lock_path(state_dir: &Path, role: &str) -> PathBuf {
    state_dir.join(format!("{role}.lock"))
}

/// Arguments that point a child invocation at the same config file.
pub(crate) fn self_command(config_path: &Path, args: &[&str]) -> Vec<String> {
    let exe = std::env::current_exe()
        .map_or_else(|_| "overseer".to_string(), |path| path.display().to_string());
    let mut command = vec![exe];
    command.extend(args.iter().map(|arg| (*arg).to_string()));
    command.push("--config".into());
    command.push(config_path.display().to_string());
    command
}

/// Queue an operator request for the running `role` supervisor.
pub fn request_control(
    state_dir: &Path,
    role: &str,
    command: control::ControlCommand,
) -> anyhow::Result<control::ControlRequest> {
    let Some(pid) = lock::holder_pid(&lock_path(state_dir, role)) else {
        return Err(crate::error::SupervisorError::NotRunning {
            role: role.to_string(),
        }
        .into());
    };
    let request = control::ControlDir::new(state_dir, role).request(command)?;
    tracing::info!(role, pid, command = ?request.command, "control request queued");
    Ok(request)
}
