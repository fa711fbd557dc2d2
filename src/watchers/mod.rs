//! Watchers: poll an external source, turn new events into `Needs_Action`
//! tasks, and contain the source's failures.

mod base;
mod command;
mod dedup;
mod factory;
mod file_drop;
mod priority;
mod runner;
mod traits;

pub use base::{BaseWatcher, stable_id, task_file_name};
pub use command::{CommandSource, parse_items};
pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupStore};
pub use factory::{build_source, build_watcher, watcher_timeout};
pub use file_drop::FileDropSource;
pub use priority::PriorityRules;
pub use runner::{CycleOutcome, WatcherExit, WatcherRuntime, WatcherSettings};
pub use traits::{Source, WatchItem};

use crate::audit::{AlertBoard, AuditLogger};
use crate::config::Config;
use crate::platform::heartbeat::HeartbeatWriter;
use crate::platform::lock::InstanceLock;
use crate::recovery::{CircuitBreakerConfig, CircuitRegistry};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Lock file held by the running instance of watcher `name`.
pub fn lock_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join("locks").join(format!("watcher-{name}.lock"))
}

/// Run the named watcher in this process until cancelled.
pub async fn run(config: &Config, name: &str, cancel: CancellationToken) -> Result<WatcherExit> {
    let watcher_config = config.watcher(name)?;
    if !watcher_config.enabled {
        tracing::warn!(watcher = name, "running a watcher that is disabled in config");
    }

    let _lock = InstanceLock::acquire(&lock_path(&config.state_dir, name), &format!("watcher {name}"))?;

    let watcher = build_watcher(config, watcher_config)?;
    let circuits = CircuitRegistry::new(CircuitBreakerConfig::from(&config.recovery));
    let runtime = WatcherRuntime::new(
        watcher,
        WatcherSettings {
            interval: watcher_config.interval(),
            call_timeout: watcher_timeout(config, watcher_config),
            auth_pause: config.recovery.auth_pause(),
            auth_alert_threshold: config.recovery.auth_alert_threshold,
        },
        circuits.get(&watcher_config.integration_name()),
        AuditLogger::from_config(config),
        AlertBoard::new(&config.state_dir),
        watcher_config
            .heartbeat
            .then(|| HeartbeatWriter::new(&config.state_dir, name)),
    );

    Ok(runtime.run(cancel).await)
}
