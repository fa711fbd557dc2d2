use crate::fixtures::{config_in, store_for};
use overseer::config::{WatcherConfig, WatcherKind};
use overseer::platform::heartbeat::heartbeat_path;
use overseer::platform::lock::holder_pid;
use overseer::queue::{Queue, Task};
use overseer::watchers::{self, WatcherExit};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn drop_watcher(dir: &std::path::Path) -> WatcherConfig {
    WatcherConfig {
        name: "drop".into(),
        kind: WatcherKind::FileDrop,
        enabled: true,
        interval_secs: 1,
        command: Vec::new(),
        path: Some(dir.display().to_string()),
        timeout_secs: Some(5),
        task_type: Some("file_drop".into()),
        heartbeat: true,
        integration: None,
    }
}

#[tokio::test]
async fn dropped_files_become_tasks_once() {
    let tmp = TempDir::new().unwrap();
    let drop_dir = tmp.path().join("drop");
    std::fs::create_dir_all(&drop_dir).unwrap();
    std::fs::write(drop_dir.join("contract.txt"), "URGENT: sign by Friday").unwrap();
    std::fs::write(drop_dir.join("notes.md"), "meeting notes").unwrap();

    let mut config = config_in(&tmp);
    config.watchers = vec![drop_watcher(&drop_dir)];
    let store = store_for(&config);

    let cancel = CancellationToken::new();
    let run = {
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { watchers::run(&config, "drop", cancel).await })
    };

    let mut waited = Duration::ZERO;
    while store.list(Queue::NeedsAction).unwrap().len() < 2 {
        assert!(waited < Duration::from_secs(10), "watcher never produced tasks");
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    // Let a few more cycles pass over the same files.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    cancel.cancel();

    let exit = run.await.unwrap().unwrap();
    assert_eq!(exit, WatcherExit::Graceful);

    let names = store.list(Queue::NeedsAction).unwrap();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|name| name.starts_with("FILE_DROP_")));

    let contract = names
        .iter()
        .map(|name| store.read(Queue::NeedsAction, name).unwrap())
        .find(|task: &Task| task.body.contains("contract.txt"))
        .expect("contract task");
    assert_eq!(contract.meta.task_type.as_deref(), Some("file_drop"));
    assert!(heartbeat_path(&config.state_dir, "drop").exists());
}

#[tokio::test]
async fn second_instance_of_a_watcher_is_refused() {
    let tmp = TempDir::new().unwrap();
    let drop_dir = tmp.path().join("drop");
    let mut config = config_in(&tmp);
    config.watchers = vec![drop_watcher(&drop_dir)];
    store_for(&config);

    let cancel = CancellationToken::new();
    let first = {
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { watchers::run(&config, "drop", cancel).await })
    };
    let lock = config.state_dir.join("locks").join("watcher-drop.lock");
    let mut waited = Duration::ZERO;
    while holder_pid(&lock).is_none() {
        assert!(waited < Duration::from_secs(10), "first watcher never took its lock");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    tokio_test::assert_err!(watchers::run(&config, "drop", CancellationToken::new()).await);

    cancel.cancel();
    assert_eq!(first.await.unwrap().unwrap(), WatcherExit::Graceful);
}

#[tokio::test]
async fn unknown_watcher_name_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    tokio_test::assert_err!(watchers::run(&config, "ghost", CancellationToken::new()).await);
}
