use overseer::queue::{Queue, TaskStore};
use overseer::watchers::{BaseWatcher, DedupStore, PriorityRules, Source, WatchItem};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Reports whatever the test last put in the shared window.
#[derive(Clone, Default)]
struct WindowSource(Arc<Mutex<Vec<WatchItem>>>);

impl WindowSource {
    fn show(&self, ids: impl IntoIterator<Item = u32>) {
        *self.0.lock().unwrap() = ids
            .into_iter()
            .map(|id| WatchItem {
                id: format!("msg-{id}"),
                source: "client@example.com".into(),
                subject: format!("message {id}"),
                body: "hello".into(),
                ..WatchItem::default()
            })
            .collect();
    }
}

impl Source for WindowSource {
    fn name(&self) -> &str {
        "window"
    }

    fn fetch<'a>(&'a self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<WatchItem>>> + Send + 'a>> {
        let items = self.0.lock().unwrap().clone();
        Box::pin(async move { Ok::<_, anyhow::Error>(items) })
    }
}

fn watcher(tmp: &Path, source: &WindowSource) -> BaseWatcher {
    let store = TaskStore::new(tmp.join("vault"));
    store.ensure_layout().unwrap();
    BaseWatcher::new(
        "gmail",
        "email",
        Box::new(source.clone()),
        store,
        DedupStore::load(DedupStore::path_for(&tmp.join("state"), "gmail"), 1_000).unwrap(),
        PriorityRules::default(),
    )
}

async fn poll(watcher: &mut BaseWatcher) -> usize {
    let mut created = 0;
    for item in watcher.check_for_updates().await.unwrap() {
        if watcher.create_action_file(&item).unwrap().is_some() {
            created += 1;
        }
    }
    created
}

#[tokio::test]
async fn overlapping_windows_across_restarts_create_one_task_per_id() {
    let tmp = TempDir::new().unwrap();
    let source = WindowSource::default();

    source.show(1..=5);
    let mut first = watcher(tmp.path(), &source);
    assert_eq!(poll(&mut first).await, 5);
    assert_eq!(poll(&mut first).await, 0);
    drop(first);

    source.show(3..=8);
    let mut second = watcher(tmp.path(), &source);
    assert_eq!(poll(&mut second).await, 3);
    drop(second);

    source.show(1..=10);
    let mut third = watcher(tmp.path(), &source);
    assert_eq!(poll(&mut third).await, 2);

    let store = TaskStore::new(tmp.path().join("vault"));
    let mut names = store.list(Queue::NeedsAction).unwrap();
    names.sort();
    assert_eq!(names.len(), 10);
    assert!(names.contains(&"EMAIL_msg-7.md".to_string()));
}

#[tokio::test]
async fn lost_dedup_state_does_not_resurrect_processed_tasks() {
    let tmp = TempDir::new().unwrap();
    let source = WindowSource::default();
    source.show([1, 2]);

    let mut first = watcher(tmp.path(), &source);
    assert_eq!(poll(&mut first).await, 2);
    drop(first);

    // The task moved on through the pipeline, then the de-dup file vanished.
    let store = TaskStore::new(tmp.path().join("vault"));
    store
        .move_task(Queue::NeedsAction, Queue::Done, "EMAIL_msg-1.md")
        .unwrap();
    std::fs::remove_file(DedupStore::path_for(&tmp.path().join("state"), "gmail")).unwrap();

    let mut second = watcher(tmp.path(), &source);
    assert_eq!(poll(&mut second).await, 0);
    assert_eq!(store.list(Queue::NeedsAction).unwrap(), vec!["EMAIL_msg-2.md"]);
    assert_eq!(store.list(Queue::Done).unwrap(), vec!["EMAIL_msg-1.md"]);

    // Both ids are known again after the rescan.
    assert!(second.check_for_updates().await.unwrap().is_empty());
}
