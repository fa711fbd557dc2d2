//! The approval state machine: detects human decisions in `Approved` and
//! `Rejected`, runs executors for approved actions, and expires stale
//! requests in `Pending_Approval`.

mod executor;
mod expiry;
mod ledger;
mod processor;

pub use executor::{
    ActionOutcome, ActionRequest, CommandExecutor, Executor, ExecutorRegistry,
};
pub use expiry::{deadline, format_waited};
pub use ledger::{ExecutionLedger, LedgerEntry};
pub use processor::{
    ApprovalProcessor, ApprovalSettings, CycleReport, ProcessorExit, TaskOutcome,
};

use crate::audit::{AlertBoard, AuditLogger};
use crate::config::Config;
use crate::platform::heartbeat::HeartbeatWriter;
use crate::platform::lock::InstanceLock;
use crate::queue::TaskStore;
use crate::recovery::{CircuitBreakerConfig, CircuitRegistry};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Process name of the approval processor under the orchestrator, and its
/// audit actor.
pub const PROCESS_NAME: &str = "approval-processor";

/// The closed set of actions an approved task may request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    SendMessage,
    PostSocial,
    CreateInvoice,
    RecordPayment,
}

/// Build the processor from config: command executors, vault store, audit
/// log, alert board and the execution ledger.
pub fn build_processor(config: &Config) -> Result<ApprovalProcessor> {
    let store = TaskStore::new(config.vault_path());
    store.ensure_layout()?;

    let mut registry = ExecutorRegistry::new();
    for executor in &config.executors {
        registry.register(Box::new(CommandExecutor::from_config(
            executor,
            config.recovery.call_timeout(),
        )));
    }

    let ledger = ExecutionLedger::load(ExecutionLedger::path_for(&config.state_dir))?;
    let settings = ApprovalSettings::from_config(config);

    Ok(ApprovalProcessor::new(
        store,
        registry,
        CircuitRegistry::new(CircuitBreakerConfig::from(&config.recovery)),
        AuditLogger::from_config(config),
        AlertBoard::new(&config.state_dir),
        ledger,
        settings,
    )
    .with_heartbeat(HeartbeatWriter::new(&config.state_dir, PROCESS_NAME)))
}

/// Lock file held by the running approval processor.
pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join("locks").join(format!("{PROCESS_NAME}.lock"))
}

/// Run the approval processor in this process until cancelled.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<ProcessorExit> {
    let _lock = InstanceLock::acquire(&lock_path(&config.state_dir), PROCESS_NAME)?;
    let mut processor = build_processor(config)?;
    if processor.registered_action_types().is_empty() {
        tracing::warn!("no executors configured; approved tasks will fail as unregistered");
    }
    Ok(processor.run(cancel).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn action_types_use_snake_case() {
        assert_eq!(ActionType::CreateInvoice.to_string(), "create_invoice");
        assert_eq!(
            ActionType::from_str("record_payment").unwrap(),
            ActionType::RecordPayment
        );
        assert!(ActionType::from_str("fax_document").is_err());
    }
}
