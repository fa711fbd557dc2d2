use crate::fake_launcher::FakeLauncher;
use crate::{HEALTH_INTERVAL, supervisor};
use chrono::Utc;
use overseer::audit::{AlertBoard, AuditLogger, RESTART_BUDGET_EXHAUSTED};
use overseer::platform::supervisor::{ChildExit, ProcessSpec, ProcessState, Supervisor};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn gmail() -> ProcessSpec {
    ProcessSpec::new("gmail", vec!["overseer".into(), "watcher".into()], HEALTH_INTERVAL)
}

/// Tick once per second until `done` holds or `limit` passes.
async fn tick_until(
    sup: &mut Supervisor,
    limit: Duration,
    mut done: impl FnMut(&Supervisor) -> bool,
) -> Duration {
    let started = Instant::now();
    loop {
        sup.tick();
        if done(&*sup) {
            return started.elapsed();
        }
        assert!(started.elapsed() < limit, "condition not reached within {limit:?}");
        tokio::time::advance(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn killed_process_restarts_within_one_health_interval() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(gmail());
    sup.start_all();
    assert_eq!(launcher.launches("gmail"), 1);

    launcher.crash("gmail");
    let took = tick_until(&mut sup, HEALTH_INTERVAL, |sup| {
        sup.record("gmail").unwrap().state == ProcessState::Running
            && sup.record("gmail").unwrap().restart_count == 1
    })
    .await;

    assert!(took < HEALTH_INTERVAL);
    assert_eq!(launcher.launches("gmail"), 2);
    let record = sup.record("gmail").unwrap();
    assert_eq!(record.consecutive_failures, 1);
    assert!(record.pid.is_some());
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_consecutive_crashes() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(gmail());
    sup.start_all();

    let mut waits = Vec::new();
    for restart in 1..=3 {
        launcher.crash("gmail");
        let took = tick_until(&mut sup, HEALTH_INTERVAL, |sup| {
            sup.record("gmail").unwrap().restart_count == restart
        })
        .await;
        waits.push(took.as_secs());
    }
    assert_eq!(waits, vec![2, 4, 8]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_stops_restarts_and_raises_alert() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(gmail());
    sup.start_all();

    for restart in 1..=3 {
        launcher.crash("gmail");
        tick_until(&mut sup, HEALTH_INTERVAL, |sup| {
            sup.record("gmail").unwrap().restart_count == restart
        })
        .await;
    }

    // Fourth crash inside the window: budget of 3 is spent.
    launcher.crash("gmail");
    sup.tick();
    let record = sup.record("gmail").unwrap();
    assert_eq!(record.state, ProcessState::Exhausted);
    assert_eq!(record.restart_budget_remaining, 0);

    tokio::time::advance(Duration::from_secs(300)).await;
    sup.tick();
    assert_eq!(launcher.launches("gmail"), 4);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Exhausted);

    let alerts = AlertBoard::new(tmp.path()).list().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].component, "gmail");
    assert_eq!(alerts[0].kind, RESTART_BUDGET_EXHAUSTED);

    let audit = AuditLogger::new(tmp.path().join("audit"), 90)
        .read_day(Utc::now().date_naive())
        .unwrap();
    assert!(
        audit
            .iter()
            .any(|entry| entry.action_type == "alert" && entry.result == RESTART_BUDGET_EXHAUSTED)
    );

    // An operator start revives it with a fresh budget.
    sup.start("gmail").unwrap();
    assert_eq!(launcher.launches("gmail"), 5);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Running);
}

#[tokio::test(start_paused = true)]
async fn graceful_exit_is_not_restarted() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(gmail());
    sup.start_all();

    launcher.exit("gmail", ChildExit::Success);
    sup.tick();
    tokio::time::advance(Duration::from_secs(120)).await;
    sup.tick();

    assert_eq!(launcher.launches("gmail"), 1);
    let record = sup.record("gmail").unwrap();
    assert_eq!(record.state, ProcessState::Stopped);
    assert_eq!(record.restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn restart_requested_exit_counts_as_failure() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(gmail());
    sup.start_all();

    launcher.exit("gmail", ChildExit::Failed(70));
    sup.tick();
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Backoff);
    assert_eq!(
        sup.record("gmail").unwrap().last_exit.as_deref(),
        Some("exited with status 70")
    );
}
