use crate::fake_launcher::FakeLauncher;
use crate::{HEALTH_INTERVAL, supervisor};
use overseer::audit::{AlertBoard, AuditLogger};
use overseer::platform::lock::InstanceLock;
use overseer::platform::supervisor::{ProcessSpec, ProcessState};
use overseer::watchers;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn locked_gmail(state_dir: &Path) -> ProcessSpec {
    ProcessSpec::new("gmail", vec!["overseer".into()], HEALTH_INTERVAL)
        .with_lock(watchers::lock_path(state_dir, "gmail"))
}

/// An orphan from a killed supervisor still holds the watcher lock.
fn orphan(state_dir: &Path, launcher: &FakeLauncher, stubborn: bool) {
    let lock = InstanceLock::acquire(&watchers::lock_path(state_dir, "gmail"), "watcher gmail")
        .unwrap();
    launcher.hold_stale(lock, stubborn);
}

#[tokio::test(start_paused = true)]
async fn stale_holder_is_stopped_before_launch() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    orphan(tmp.path(), &launcher, false);
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(locked_gmail(tmp.path()));
    sup.start_all();

    assert_eq!(launcher.launches("gmail"), 0);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Reclaiming);
    assert_eq!(launcher.stale_signals(), vec![(std::process::id(), false)]);

    tokio::time::advance(Duration::from_secs(1)).await;
    sup.tick();

    let record = sup.record("gmail").unwrap();
    assert_eq!(launcher.launches("gmail"), 1);
    assert_eq!(record.state, ProcessState::Running);
    assert_eq!(record.consecutive_failures, 0);
    assert_eq!(record.restart_count, 0);
    assert_eq!(record.restart_budget_remaining, 3);
    assert_eq!(launcher.stale_signals().len(), 1);
    assert!(AlertBoard::new(tmp.path()).list().unwrap().is_empty());

    let audit = AuditLogger::new(tmp.path().join("audit"), 90)
        .read_day(Utc::now().date_naive())
        .unwrap();
    assert!(
        audit
            .iter()
            .any(|entry| entry.action_type == "process_reclaim" && entry.target == "gmail")
    );
}

#[tokio::test(start_paused = true)]
async fn stubborn_holder_is_killed_after_grace() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    orphan(tmp.path(), &launcher, true);
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(locked_gmail(tmp.path()));
    sup.start_all();

    // Still inside the 5s grace: no second signal, no launch.
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(1)).await;
        sup.tick();
    }
    assert_eq!(launcher.launches("gmail"), 0);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Reclaiming);
    assert_eq!(launcher.stale_signals(), vec![(std::process::id(), false)]);

    tokio::time::advance(Duration::from_secs(1)).await;
    sup.tick();
    assert_eq!(
        launcher.stale_signals(),
        vec![(std::process::id(), false), (std::process::id(), true)]
    );

    tokio::time::advance(Duration::from_secs(1)).await;
    sup.tick();
    let record = sup.record("gmail").unwrap();
    assert_eq!(launcher.launches("gmail"), 1);
    assert_eq!(record.state, ProcessState::Running);
    assert_eq!(record.restart_budget_remaining, 3);
    assert!(AlertBoard::new(tmp.path()).list().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn free_lock_launches_immediately() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(locked_gmail(tmp.path()));
    sup.start_all();

    assert_eq!(launcher.launches("gmail"), 1);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Running);
    assert!(launcher.stale_signals().is_empty());
}
