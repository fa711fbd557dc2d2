#![allow(dead_code)]

use chrono::{DateTime, Utc};
use overseer::config::Config;
use overseer::queue::{Queue, Task, TaskMeta, TaskStore};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Config rooted in a temp dir: vault, state and audit log all inside it.
pub fn config_in(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.config_path = tmp.path().join("config.toml");
    config.state_dir = tmp.path().join("state");
    config.vault_dir = tmp.path().join("vault").display().to_string();
    config
}

pub fn store_for(config: &Config) -> TaskStore {
    let store = TaskStore::new(config.vault_path());
    store.ensure_layout().unwrap();
    store
}

pub fn approval_task(action_type: &str, expires: Option<DateTime<Utc>>) -> Task {
    Task::new(
        TaskMeta {
            task_type: Some("email_reply".into()),
            created: Some(Utc::now()),
            action_type: Some(action_type.into()),
            action_parameters: Some(serde_json::json!({
                "to": "client@example.com",
                "subject": "Re: invoice",
            })),
            expires,
            ..TaskMeta::default()
        },
        "Thanks, the invoice is attached.\n",
    )
}

/// Which queue(s) currently hold each task name.
pub fn queue_census(store: &TaskStore) -> BTreeMap<String, Vec<Queue>> {
    let mut census: BTreeMap<String, Vec<Queue>> = BTreeMap::new();
    for queue in Queue::all() {
        for name in store.list(queue).unwrap() {
            census.entry(name).or_default().push(queue);
        }
    }
    census
}
