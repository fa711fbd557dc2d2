use crate::fixtures::{approval_task, config_in, store_for};
use chrono::{Duration, Utc};
use overseer::approval;
use overseer::queue::Queue;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn overdue_request_expires_on_the_expiry_cycle_and_not_before() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.approval.expiry_every_cycles = 3;
    let store = store_for(&config);

    let mut overdue = approval_task("send_email", Some(Utc::now() - Duration::minutes(5)));
    overdue.meta.created = Some(Utc::now() - Duration::hours(26) - Duration::minutes(15));
    store
        .create(Queue::PendingApproval, "EMAIL_OLD.md", &overdue)
        .unwrap();
    store
        .create(
            Queue::PendingApproval,
            "EMAIL_FRESH.md",
            &approval_task("send_email", Some(Utc::now() + Duration::hours(4))),
        )
        .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let report = processor.run_cycle(&cancel).await;
        assert_eq!(report.expired, 0);
        assert!(store.contains(Queue::PendingApproval, "EMAIL_OLD.md"));
    }

    let report = processor.run_cycle(&cancel).await;
    assert_eq!(report.cycle, 3);
    assert_eq!(report.expired, 1);

    let expired = store.read(Queue::Expired, "EMAIL_OLD.md").unwrap();
    assert_eq!(expired.meta.status.as_deref(), Some("expired"));
    assert!(expired.meta.expired_at.is_some());
    assert_eq!(expired.meta.waited.as_deref(), Some("26h 15m"));
    assert!(store.contains(Queue::PendingApproval, "EMAIL_FRESH.md"));
}

#[tokio::test]
async fn default_ttl_applies_without_expires_key() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.approval.default_ttl_hours = 24;
    let store = store_for(&config);

    let mut stale = approval_task("post_social", None);
    stale.meta.created = Some(Utc::now() - Duration::hours(30));
    store
        .create(Queue::PendingApproval, "POST_OLD.md", &stale)
        .unwrap();
    let mut recent = approval_task("post_social", None);
    recent.meta.created = Some(Utc::now() - Duration::hours(2));
    store
        .create(Queue::PendingApproval, "POST_NEW.md", &recent)
        .unwrap();
    std::fs::write(
        store.path(Queue::PendingApproval, "BROKEN.md"),
        "no front matter here\n",
    )
    .unwrap();

    let mut processor = approval::build_processor(&config).unwrap();
    assert_eq!(processor.expire_pending(Utc::now()).unwrap(), 1);

    assert!(store.contains(Queue::Expired, "POST_OLD.md"));
    assert!(store.contains(Queue::PendingApproval, "POST_NEW.md"));
    // Unparsable files are skipped, never moved.
    assert!(store.contains(Queue::PendingApproval, "BROKEN.md"));
}
