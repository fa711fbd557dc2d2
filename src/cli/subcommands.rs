use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCommands {
    /// Supervise every enabled watcher and the approval processor
    Run,
    /// Ask the running orchestrator to stop its children and exit
    Stop,
    /// Show the orchestrator's last recorded process table
    Status,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum WatchdogCommands {
    /// Supervise the orchestrator
    Run,
    /// Ask the running watchdog to stop the orchestrator and exit
    Stop,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum WatcherCommands {
    /// Run one watcher in the foreground
    Run { name: String },
    /// Start a watcher under the running orchestrator (clears an operator stop)
    Start { name: String },
    /// Stop a watcher under the running orchestrator until started again
    Stop { name: String },
    /// Restart a watcher under the running orchestrator
    Restart { name: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCommands {
    /// Run the approval processor in the foreground
    Run,
    /// Move every overdue Pending_Approval task to Expired, once
    Expire,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AuditCommands {
    /// Delete day partitions older than the retention window
    Purge,
    /// Print one day's audit entries as JSON lines
    Show {
        /// UTC day (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },
}
