//! Command-line surface.

mod subcommands;

pub use subcommands::{
    ApprovalCommands, AuditCommands, OrchestratorCommands, WatchdogCommands, WatcherCommands,
};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `overseer` - supervised watchers and a file-based approval queue.
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(version)]
#[command(about = "Supervised watchers and a file-based human approval queue.", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $OVERSEER_CONFIG or ~/.overseer/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the process orchestrator
    Orchestrator {
        #[command(subcommand)]
        orchestrator_command: OrchestratorCommands,
    },

    /// Manage the watchdog that keeps the orchestrator alive
    Watchdog {
        #[command(subcommand)]
        watchdog_command: WatchdogCommands,
    },

    /// Run or control a single watcher
    Watcher {
        #[command(subcommand)]
        watcher_command: WatcherCommands,
    },

    /// Run the approval processor or its expiry job
    Approvals {
        #[command(subcommand)]
        approval_command: ApprovalCommands,
    },

    /// Inspect or purge the audit log
    Audit {
        #[command(subcommand)]
        audit_command: AuditCommands,
    },

    /// Show queues, supervised processes and standing alerts
    Status,
}
