use crate::fixtures::{approval_task, config_in, store_for};
use chrono::Utc;
use overseer::approval::{self, ActionType, ExecutionLedger};
use overseer::audit::AuditLogger;
use overseer::config::ExecutorConfig;
use overseer::queue::Queue;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn sh_executor(action_type: ActionType, script: String) -> ExecutorConfig {
    ExecutorConfig {
        action_type,
        command: vec!["sh".into(), "-c".into(), script],
        timeout_secs: Some(10),
        integration: Some("mail".into()),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn approved_email_runs_through_command_executor() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    let capture = tmp.path().join("request.json");
    config.executors.push(sh_executor(
        ActionType::SendEmail,
        format!(
            "cat > '{}'; echo '{{\"success\": true, \"message\": \"queued as 250-ok\"}}'",
            capture.display()
        ),
    ));
    let store = store_for(&config);
    store
        .create(Queue::PendingApproval, "EMAIL_REPLY_1.md", &approval_task("send_email", None))
        .unwrap();

    // The human decision is a plain rename.
    store
        .move_task(Queue::PendingApproval, Queue::Approved, "EMAIL_REPLY_1.md")
        .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.approved_detected, 1);
    assert_eq!(report.done, 1);

    let done = store.read(Queue::Done, "EMAIL_REPLY_1.md").unwrap();
    assert_eq!(done.meta.status.as_deref(), Some("done"));
    assert_eq!(done.meta.result.as_deref(), Some("queued as 250-ok"));
    assert!(!store.contains(Queue::Approved, "EMAIL_REPLY_1.md"));

    let request: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&capture).unwrap()).unwrap();
    assert_eq!(request["task_id"], "EMAIL_REPLY_1");
    assert_eq!(request["action_type"], "send_email");
    assert_eq!(request["parameters"]["to"], "client@example.com");

    let entries = AuditLogger::from_config(&config)
        .read_day(Utc::now().date_naive())
        .unwrap();
    let results: Vec<(&str, &str)> = entries
        .iter()
        .map(|entry| (entry.action_type.as_str(), entry.result.as_str()))
        .collect();
    assert_eq!(results, [("approve", "approved"), ("send_email", "success")]);
    assert_eq!(entries[1].before_state.as_deref(), Some("Approved"));
    assert_eq!(entries[1].after_state.as_deref(), Some("Done"));

    let ledger = ExecutionLedger::load(ExecutionLedger::path_for(&config.state_dir)).unwrap();
    assert!(ledger.get("EMAIL_REPLY_1").is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn declined_action_lands_in_failed_with_reason() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.executors.push(sh_executor(
        ActionType::CreateInvoice,
        "cat > /dev/null; echo '{\"success\": false, \"message\": \"customer not found\", \"error_code\": \"not_found\"}'; exit 3".into(),
    ));
    let store = store_for(&config);
    store
        .create(Queue::Approved, "INVOICE_7.md", &approval_task("create_invoice", None))
        .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);

    let failed = store.read(Queue::Failed, "INVOICE_7.md").unwrap();
    let reason = failed.meta.failure_reason.unwrap();
    assert!(reason.contains("customer not found"), "{reason}");
    // Data errors are quarantined after one attempt.
    assert_eq!(failed.meta.attempts, Some(1));
}

#[tokio::test]
async fn rejection_is_audited_and_left_in_place() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = store_for(&config);
    store
        .create(Queue::PendingApproval, "POST_3.md", &approval_task("post_social", None))
        .unwrap();
    store
        .move_task(Queue::PendingApproval, Queue::Rejected, "POST_3.md")
        .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.rejected_detected, 1);
    assert!(store.contains(Queue::Rejected, "POST_3.md"));

    // A second cycle does not report the same rejection again.
    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.rejected_detected, 0);

    let entries = AuditLogger::from_config(&config)
        .read_day(Utc::now().date_naive())
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor, "human");
    assert_eq!(entries[0].approval_status.as_deref(), Some("rejected"));
}

#[tokio::test]
async fn unregistered_action_type_fails_without_executing() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = store_for(&config);
    store
        .create(Queue::Approved, "PAYMENT_9.md", &approval_task("record_payment", None))
        .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);

    let failed = store.read(Queue::Failed, "PAYMENT_9.md").unwrap();
    assert!(
        failed
            .meta
            .failure_reason
            .unwrap()
            .contains("record_payment")
    );
}
