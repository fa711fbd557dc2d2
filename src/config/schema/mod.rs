mod approval;
mod core;
mod supervision;
mod watchers;

pub use approval::{ApprovalConfig, AuditConfig, ExecutorConfig, RecoveryConfig};
pub use core::Config;
pub use supervision::{OrchestratorConfig, WatchdogConfig};
pub use watchers::{PriorityConfig, WatcherConfig, WatcherKind};
