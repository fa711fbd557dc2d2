use crate::fake_launcher::FakeLauncher;
use crate::{HEALTH_INTERVAL, supervisor};
use overseer::platform::control::{ControlCommand, ControlDir};
use overseer::platform::supervisor::{ProcessSpec, ProcessState, SupervisorState};
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn spec(name: &str) -> ProcessSpec {
    ProcessSpec::new(name, vec!["overseer".into(), "watcher".into(), "run".into(), name.into()], HEALTH_INTERVAL)
}

#[tokio::test(start_paused = true)]
async fn operator_stop_survives_supervisor_restart() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(spec("gmail"));
    sup.add(spec("files"));

    let control = ControlDir::new(tmp.path(), "orchestrator");
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        sup.run(&control, run_cancel).await;
        sup
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    ControlDir::new(tmp.path(), "orchestrator")
        .request(ControlCommand::Stop {
            name: "gmail".into(),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    let sup = handle.await.unwrap();

    let gmail = sup.record("gmail").unwrap();
    assert!(gmail.stopped);
    assert_eq!(gmail.state, ProcessState::Stopped);
    assert!(launcher.terminations().contains(&"gmail".to_string()));

    let state = SupervisorState::load(tmp.path(), "orchestrator")
        .unwrap()
        .unwrap();
    assert!(state.process("gmail").unwrap().stopped);
    assert!(!state.process("files").unwrap().stopped);

    // A fresh supervisor keeps the operator's decision.
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(spec("gmail"));
    sup.add(spec("files"));
    sup.start_all();
    assert_eq!(launcher.launches("gmail"), 1);
    assert_eq!(launcher.launches("files"), 2);

    sup.start("gmail").unwrap();
    assert_eq!(launcher.launches("gmail"), 2);
    assert!(!sup.record("gmail").unwrap().stopped);
}

#[tokio::test(start_paused = true)]
async fn shutdown_request_stops_children_and_returns() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(spec("gmail"));

    let control = ControlDir::new(tmp.path(), "orchestrator");
    control.request(ControlCommand::Shutdown).unwrap();
    tokio::time::timeout(
        Duration::from_secs(30),
        sup.run(&control, CancellationToken::new()),
    )
    .await
    .expect("supervisor ignored the shutdown request");

    assert_eq!(launcher.terminations(), vec!["gmail".to_string()]);
    assert_eq!(sup.record("gmail").unwrap().state, ProcessState::Stopped);
    // Shutdown is not an operator stop.
    assert!(!sup.record("gmail").unwrap().stopped);
}

#[tokio::test(start_paused = true)]
async fn operator_restart_is_counted_but_not_charged() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(spec("gmail"));
    sup.start_all();

    sup.restart("gmail").await.unwrap();
    sup.write_state();

    let record = sup.record("gmail").unwrap();
    assert_eq!(launcher.launches("gmail"), 2);
    assert_eq!(record.restart_count, 1);
    assert_eq!(record.state, ProcessState::Running);
    assert_eq!(record.restart_budget_remaining, 3);
}

#[tokio::test(start_paused = true)]
async fn unknown_process_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(spec("gmail"));

    assert_err!(sup.start("ghost"));
    assert_err!(sup.stop("ghost").await);
    assert_ok!(sup.stop("gmail").await);
}
