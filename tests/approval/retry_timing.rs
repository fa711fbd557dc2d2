use crate::fixtures::{approval_task, config_in, store_for};
use overseer::approval::{
    ActionOutcome, ActionRequest, ActionType, ApprovalProcessor, ApprovalSettings, ExecutionLedger,
    Executor, ExecutorRegistry,
};
use overseer::audit::{AlertBoard, AuditLogger};
use overseer::error::IntegrationError;
use overseer::queue::Queue;
use overseer::recovery::{CircuitBreakerConfig, CircuitRegistry, ErrorCategory};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Always fails transiently and records the paused-clock offset of each call.
struct FlakyExecutor {
    epoch: Instant,
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl Executor for FlakyExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::SendMessage
    }

    fn integration(&self) -> &str {
        "whatsapp"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn perform<'a>(
        &'a self,
        _request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionOutcome>> + Send + 'a>> {
        self.calls.lock().unwrap().push(self.epoch.elapsed());
        Box::pin(async move {
            Err(anyhow::Error::new(IntegrationError::new(
                "whatsapp",
                ErrorCategory::Transient,
                "503 service unavailable",
            )))
        })
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_follow_configured_schedule_then_fail() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.approval.max_attempts = 4;
    config.approval.backoff_secs = vec![0, 5, 20, 45];
    config.recovery.failure_threshold = 10;
    let store = store_for(&config);
    store
        .create(Queue::Approved, "MESSAGE_5.md", &approval_task("send_message", None))
        .unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ExecutorRegistry::new();
    registry.register(Box::new(FlakyExecutor {
        epoch: Instant::now(),
        calls: Arc::clone(&calls),
    }));
    let mut processor = ApprovalProcessor::new(
        store.clone(),
        registry,
        CircuitRegistry::new(CircuitBreakerConfig::from(&config.recovery)),
        AuditLogger::from_config(&config),
        AlertBoard::new(&config.state_dir),
        ExecutionLedger::load(ExecutionLedger::path_for(&config.state_dir)).unwrap(),
        ApprovalSettings::from_config(&config),
    );

    let report = processor.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);

    let offsets: Vec<u64> = calls.lock().unwrap().iter().map(Duration::as_secs).collect();
    assert_eq!(offsets, vec![0, 5, 25, 70]);

    let failed = store.read(Queue::Failed, "MESSAGE_5.md").unwrap();
    assert_eq!(failed.meta.attempts, Some(4));
    assert!(failed.meta.failure_reason.unwrap().contains("4 attempts"));
    assert!(failed.meta.last_error.unwrap().contains("503"));
    assert!(!store.contains(Queue::Approved, "MESSAGE_5.md"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_retry_leaves_task_approved() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = store_for(&config);
    store
        .create(Queue::Approved, "MESSAGE_6.md", &approval_task("send_message", None))
        .unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ExecutorRegistry::new();
    registry.register(Box::new(FlakyExecutor {
        epoch: Instant::now(),
        calls: Arc::clone(&calls),
    }));
    let mut processor = ApprovalProcessor::new(
        store.clone(),
        registry,
        CircuitRegistry::new(CircuitBreakerConfig::from(&config.recovery)),
        AuditLogger::from_config(&config),
        AlertBoard::new(&config.state_dir),
        ExecutionLedger::load(ExecutionLedger::path_for(&config.state_dir)).unwrap(),
        ApprovalSettings::from_config(&config),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let report = processor.run_cycle(&cancel).await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(store.contains(Queue::Approved, "MESSAGE_6.md"));
}
