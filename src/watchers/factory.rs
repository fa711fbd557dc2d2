use super::base::BaseWatcher;
use super::command::CommandSource;
use super::dedup::{DEFAULT_DEDUP_CAPACITY, DedupStore};
use super::file_drop::FileDropSource;
use super::priority::PriorityRules;
use super::traits::Source;
use crate::config::{Config, WatcherConfig, WatcherKind};
use crate::queue::{Queue, TaskStore};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

pub fn build_source(config: &Config, watcher: &WatcherConfig) -> Box<dyn Source> {
    match watcher.kind {
        WatcherKind::FileDrop => {
            let dir = watcher.path.as_deref().map_or_else(
                || config.vault_path().join(Queue::Inbox.dir_name()),
                |path| PathBuf::from(shellexpand::tilde(path).into_owned()),
            );
            Box::new(FileDropSource::new(&watcher.name, dir))
        }
        WatcherKind::Command => Box::new(CommandSource::new(
            &watcher.name,
            watcher.integration_name(),
            watcher.command.clone(),
            watcher_timeout(config, watcher),
        )),
    }
}

pub fn watcher_timeout(config: &Config, watcher: &WatcherConfig) -> Duration {
    watcher
        .timeout_secs
        .map_or_else(|| config.recovery.call_timeout(), |secs| Duration::from_secs(secs.max(1)))
}

/// Assemble a ready-to-run watcher: source, vault store and the persisted
/// de-dup set under `state/dedup/<name>.json`.
pub fn build_watcher(config: &Config, watcher: &WatcherConfig) -> Result<BaseWatcher> {
    let store = TaskStore::new(config.vault_path());
    store.ensure_layout()?;
    let dedup = DedupStore::load(
        DedupStore::path_for(&config.state_dir, &watcher.name),
        DEFAULT_DEDUP_CAPACITY,
    )?;

    Ok(BaseWatcher::new(
        &watcher.name,
        watcher.task_type(),
        build_source(config, watcher),
        store,
        dedup,
        PriorityRules::from(&config.priority),
    ))
}
