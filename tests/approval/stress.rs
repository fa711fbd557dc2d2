use crate::fixtures::{approval_task, config_in, queue_census, store_for};
use overseer::approval::{
    ActionOutcome, ActionRequest, ActionType, ApprovalProcessor, ApprovalSettings, ExecutionLedger,
    Executor, ExecutorRegistry, ProcessorExit,
};
use overseer::audit::{AlertBoard, AuditLogger};
use overseer::queue::Queue;
use overseer::recovery::{CircuitBreakerConfig, CircuitRegistry, RetryPolicy};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TASKS: usize = 40;

struct InstantExecutor;

impl Executor for InstantExecutor {
    fn action_type(&self) -> ActionType {
        ActionType::SendEmail
    }

    fn integration(&self) -> &str {
        "gmail"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn perform<'a>(
        &'a self,
        request: &'a ActionRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionOutcome>> + Send + 'a>> {
        let message = format!("sent {}", request.task_id);
        Box::pin(async move { Ok(ActionOutcome::ok(message)) })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_task_ends_in_exactly_one_queue_under_racing_decisions() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = store_for(&config);
    let names: Vec<String> = (0..TASKS).map(|i| format!("EMAIL_{i:03}.md")).collect();
    for name in &names {
        store
            .create(Queue::PendingApproval, name, &approval_task("send_email", None))
            .unwrap();
    }

    let mut registry = ExecutorRegistry::new();
    registry.register(Box::new(InstantExecutor));
    let mut processor = ApprovalProcessor::new(
        store.clone(),
        registry,
        CircuitRegistry::new(CircuitBreakerConfig::default()),
        AuditLogger::from_config(&config),
        AlertBoard::new(&config.state_dir),
        ExecutionLedger::load(ExecutionLedger::path_for(&config.state_dir)).unwrap(),
        ApprovalSettings {
            poll_interval: Duration::from_millis(20),
            expiry_every_cycles: 1_000,
            default_ttl: chrono::Duration::hours(24),
            retry: RetryPolicy::from_schedule(1, vec![Duration::ZERO]),
            auth_pause: Duration::from_secs(60),
        },
    );

    let cancel = CancellationToken::new();
    let processor_cancel = cancel.clone();
    let processor_task = tokio::spawn(async move { processor.run(processor_cancel).await });

    // Three deciders race for every task: approve, reject and expire.
    let barrier = Arc::new(Barrier::new(3));
    let deciders: Vec<_> = [Queue::Approved, Queue::Rejected, Queue::Expired]
        .into_iter()
        .map(|target| {
            let store = store.clone();
            let names = names.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut won = 0;
                for name in &names {
                    if store.move_task(Queue::PendingApproval, target, name).is_ok() {
                        won += 1;
                    }
                }
                won
            })
        })
        .collect();
    let wins: usize = deciders.into_iter().map(|thread| thread.join().unwrap()).sum();
    assert_eq!(wins, TASKS, "each task is decided exactly once");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !store.list(Queue::Approved).unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "approved backlog not drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    assert_eq!(processor_task.await.unwrap(), ProcessorExit::Graceful);

    let census = queue_census(&store);
    assert_eq!(census.len(), TASKS);
    for (name, queues) in &census {
        assert_eq!(queues.len(), 1, "{name} is in {queues:?}");
        assert!(
            matches!(queues[0], Queue::Done | Queue::Rejected | Queue::Expired),
            "{name} ended in {}",
            queues[0]
        );
    }
    assert!(store.list(Queue::Failed).unwrap().is_empty());
}
