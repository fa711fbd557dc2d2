use crate::audit::AlertBoard;
use crate::config::Config;
use crate::platform::lock::holder_pid;
use crate::platform::supervisor::SupervisorState;
use crate::platform::{lock_path, orchestrator, watchdog};
use crate::queue::{Queue, TaskStore};
use std::fmt::Write as _;
use std::path::Path;

pub fn render_status(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "◆ overseer {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Config   {}", config.config_path.display());
    let _ = writeln!(out, "Vault    {}", config.vault_path().display());
    let _ = writeln!(out, "State    {}", config.state_dir.display());
    let _ = writeln!(out);

    let _ = writeln!(out, "Queues");
    let store = TaskStore::new(config.vault_path());
    for queue in Queue::all() {
        match store.list(queue) {
            Ok(names) => {
                let _ = writeln!(out, "  {:<18} {}", queue.dir_name(), names.len());
            }
            Err(error) => {
                let _ = writeln!(out, "  {:<18} unreadable ({error})", queue.dir_name());
            }
        }
    }
    let _ = writeln!(out);

    render_supervisor(&mut out, &config.state_dir, watchdog::ROLE);
    render_supervisor(&mut out, &config.state_dir, orchestrator::ROLE);

    let _ = writeln!(out, "Alerts");
    match AlertBoard::new(&config.state_dir).list() {
        Ok(alerts) if alerts.is_empty() => {
            let _ = writeln!(out, "  none");
        }
        Ok(alerts) => {
            for alert in alerts {
                let _ = writeln!(
                    out,
                    "  [{}] {}: {} (x{}, since {})",
                    alert.kind,
                    alert.component,
                    alert.message,
                    alert.occurrences,
                    alert.first_raised.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
        Err(error) => {
            let _ = writeln!(out, "  unreadable ({error:#})");
        }
    }
    out
}

fn render_supervisor(out: &mut String, state_dir: &Path, role: &str) {
    let running = holder_pid(&lock_path(state_dir, role));
    match running {
        Some(pid) => {
            let _ = writeln!(out, "{role}: running (pid {pid})");
        }
        None => {
            let _ = writeln!(out, "{role}: not running");
        }
    }

    match SupervisorState::load(state_dir, role) {
        Ok(Some(state)) => {
            for record in &state.processes {
                let pid = record
                    .pid
                    .map_or_else(|| "-".to_string(), |pid| pid.to_string());
                let _ = write!(
                    out,
                    "  {:<22} {:<10} pid {:<8} restarts {:<4} budget {}",
                    record.name,
                    record.state.to_string(),
                    pid,
                    record.restart_count,
                    record.restart_budget_remaining
                );
                if record.stopped {
                    let _ = write!(out, "  (stopped by operator)");
                }
                if let Some(last_exit) = &record.last_exit {
                    let _ = write!(out, "  last exit: {last_exit}");
                }
                let _ = writeln!(out);
            }
            if running.is_none() {
                let _ = writeln!(
                    out,
                    "  (last written {})",
                    state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        Ok(None) => {}
        Err(error) => {
            let _ = writeln!(out, "  state unreadable ({error:#})");
        }
    }
    let _ = writeln!(out);
}
