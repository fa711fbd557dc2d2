pub mod schema;

pub use schema::{
    ApprovalConfig, AuditConfig, Config, ExecutorConfig, OrchestratorConfig, PriorityConfig,
    RecoveryConfig, WatchdogConfig, WatcherConfig, WatcherKind,
};
