use super::dedup::DedupStore;
use super::priority::PriorityRules;
use super::traits::{Source, WatchItem};
use crate::error::QueueError;
use crate::queue::{Queue, Task, TaskMeta, TaskStore};
use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;

const MAX_ID_CHARS: usize = 64;

/// Task file name for an item: `<TYPE>_<stable-id>.md`.
pub fn task_file_name(task_type: &str, item: &WatchItem) -> String {
    let prefix: String = task_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{prefix}_{}.md", stable_id(item))
}

/// The source-native id when it is filename-safe, otherwise a hash of it
/// (or of source and timestamp when the source gave no id).
pub fn stable_id(item: &WatchItem) -> String {
    let raw = item.id.trim();
    let safe = !raw.is_empty()
        && raw.len() <= MAX_ID_CHARS
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if safe {
        return raw.to_string();
    }

    let mut hasher = Sha256::new();
    if raw.is_empty() {
        hasher.update(item.source.as_bytes());
        hasher.update(b"\0");
        hasher.update(
            item.received_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(b"\0");
        hasher.update(item.subject.as_bytes());
    } else {
        hasher.update(raw.as_bytes());
    }
    hex::encode(&hasher.finalize()[..12])
}

/// Shared watcher behaviour over any [`Source`]: de-duplicated fetching and
/// atomic task creation into `Needs_Action`.
pub struct BaseWatcher {
    name: String,
    task_type: String,
    source: Box<dyn Source>,
    store: TaskStore,
    dedup: DedupStore,
    rules: PriorityRules,
}

impl BaseWatcher {
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        source: Box<dyn Source>,
        store: TaskStore,
        dedup: DedupStore,
        rules: PriorityRules,
    ) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            source,
            store,
            dedup,
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// New items only: anything whose stable id is already in the de-dup set
    /// is dropped, as are repeats within one batch.
    pub async fn check_for_updates(&mut self) -> Result<Vec<WatchItem>> {
        let items = self.source.fetch().await?;
        let fetched = items.len();

        let mut batch = HashSet::new();
        let fresh: Vec<WatchItem> = items
            .into_iter()
            .filter(|item| {
                let id = stable_id(item);
                !self.dedup.contains(&id) && batch.insert(id)
            })
            .collect();

        tracing::debug!(watcher = %self.name, fetched, new = fresh.len(), "checked for updates");
        Ok(fresh)
    }

    /// Write `item` as a new task in `Needs_Action` and record its id.
    /// Returns `None` when a task of the same name already exists in any
    /// queue; the id is still recorded so it is not offered again.
    pub fn create_action_file(&mut self, item: &WatchItem) -> Result<Option<PathBuf>> {
        let id = stable_id(item);
        let name = task_file_name(&self.task_type, item);

        if let Some(queue) = self.store.locate(&name) {
            tracing::debug!(watcher = %self.name, task = %name, %queue, "task already exists");
            self.dedup.insert(&id)?;
            return Ok(None);
        }

        let summary = format!("{} {}", item.subject, item.body);
        let mut meta = TaskMeta {
            task_type: Some(self.task_type.clone()),
            source: Some(if item.source.is_empty() {
                self.source.name().to_string()
            } else {
                item.source.clone()
            }),
            created: Some(Utc::now()),
            priority: Some(self.rules.classify(&summary)),
            status: Some(Queue::NeedsAction.status_label().to_string()),
            ..TaskMeta::default()
        };
        meta.extra.insert("source_id".into(), serde_yaml::Value::String(id.clone()));
        if !item.subject.is_empty() {
            meta.extra.insert(
                "subject".into(),
                serde_yaml::Value::String(item.subject.clone()),
            );
        }
        if let Some(received) = item.received_at {
            meta.extra.insert(
                "received_at".into(),
                serde_yaml::Value::String(received.to_rfc3339()),
            );
        }

        let task = Task::new(meta, render_body(item));
        let created = match self.store.create(Queue::NeedsAction, &name, &task) {
            Ok(path) => Some(path),
            Err(QueueError::AlreadyExists { .. }) => None,
            Err(error) => return Err(error.into()),
        };

        self.dedup.insert(&id)?;
        if let Some(path) = &created {
            tracing::info!(watcher = %self.name, task = %name, path = %path.display(), "task created");
        }
        Ok(created)
    }

    pub fn flush(&self) -> Result<()> {
        self.dedup.persist()
    }
}

fn render_body(item: &WatchItem) -> String {
    let mut body = String::new();
    if !item.subject.is_empty() {
        body.push_str("# ");
        body.push_str(item.subject.trim());
        body.push_str("\n\n");
    }
    if !item.source.is_empty() {
        body.push_str("**From:** ");
        body.push_str(&item.source);
        body.push_str("\n\n");
    }
    body.push_str(item.body.trim_end());
    body.push('\n');
    body
}
