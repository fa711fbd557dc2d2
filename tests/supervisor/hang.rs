use crate::fake_launcher::FakeLauncher;
use crate::{HEALTH_INTERVAL, supervisor};
use overseer::platform::heartbeat::HeartbeatWriter;
use overseer::platform::supervisor::{ProcessSpec, ProcessState};
use std::time::Duration;
use tempfile::TempDir;

const BEAT: Duration = Duration::from_secs(10);

fn beating(name: &str) -> ProcessSpec {
    ProcessSpec::new(name, vec!["overseer".into()], HEALTH_INTERVAL).with_heartbeat(BEAT)
}

#[tokio::test(start_paused = true)]
async fn silent_process_is_killed_and_rescheduled() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(beating("gmail"));
    sup.start_all();

    tokio::time::advance(HEALTH_INTERVAL).await;
    sup.tick();

    let record = sup.record("gmail").unwrap();
    assert_eq!(record.state, ProcessState::Backoff);
    assert!(record.last_exit.as_deref().unwrap().contains("no heartbeat"));
    assert_eq!(record.consecutive_failures, 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    sup.tick();
    assert_eq!(launcher.launches("gmail"), 2);
}

#[tokio::test(start_paused = true)]
async fn fresh_heartbeat_keeps_process_running() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(beating("gmail"));
    sup.start_all();

    let mut heartbeat = HeartbeatWriter::new(tmp.path(), "gmail");
    heartbeat.beat();
    tokio::time::advance(HEALTH_INTERVAL).await;
    sup.tick();

    let record = sup.record("gmail").unwrap();
    assert_eq!(record.state, ProcessState::Running);
    assert_eq!(launcher.launches("gmail"), 1);
}

#[tokio::test(start_paused = true)]
async fn processes_without_heartbeat_are_never_judged_hung() {
    let tmp = TempDir::new().unwrap();
    let launcher = FakeLauncher::new();
    let mut sup = supervisor(tmp.path(), &launcher);
    sup.add(ProcessSpec::new("files", vec!["overseer".into()], HEALTH_INTERVAL));
    sup.start_all();

    for _ in 0..5 {
        tokio::time::advance(HEALTH_INTERVAL).await;
        sup.tick();
    }
    assert_eq!(sup.record("files").unwrap().state, ProcessState::Running);
    assert_eq!(launcher.launches("files"), 1);
}
