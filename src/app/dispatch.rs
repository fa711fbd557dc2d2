use crate::app::status::render_status;
use crate::approval::{self, ProcessorExit};
use crate::audit::AuditLogger;
use crate::cli::{
    ApprovalCommands, AuditCommands, Cli, Commands, OrchestratorCommands, WatchdogCommands,
    WatcherCommands,
};
use crate::config::Config;
use crate::error::ConfigError;
use crate::platform::control::ControlCommand;
use crate::platform::signal::cancel_on_shutdown_signal;
use crate::platform::supervisor::SupervisorState;
use crate::platform::{orchestrator, request_control, watchdog};
use crate::watchers::{self, WatcherExit};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Clean shutdown.
pub const EXIT_OK: u8 = 0;
/// Startup failure, e.g. another instance holds the lock.
pub const EXIT_STARTUP_FAILURE: u8 = 1;
/// A worker asks its supervisor for a fresh process (`EX_SOFTWARE`).
pub const EXIT_RESTART_REQUESTED: u8 = 70;
/// Configuration could not be loaded or is invalid (`EX_CONFIG`).
pub const EXIT_CONFIG: u8 = 78;

/// How a command finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    RestartRequested,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Clean => EXIT_OK,
            Self::RestartRequested => EXIT_RESTART_REQUESTED,
        }
    }
}

/// Exit status for a failed command: configuration problems anywhere in
/// the chain map to `EX_CONFIG`, everything else to 1.
pub fn exit_code_for_error(error: &anyhow::Error) -> u8 {
    if error
        .chain()
        .any(|cause| cause.downcast_ref::<ConfigError>().is_some())
    {
        EXIT_CONFIG
    } else {
        EXIT_STARTUP_FAILURE
    }
}

pub async fn dispatch(cli: Cli, config: Config) -> ExitCode {
    match run_command(cli.command, &config).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "command failed");
            ExitCode::from(exit_code_for_error(&error))
        }
    }
}

async fn run_command(command: Commands, config: &Config) -> Result<Outcome> {
    match command {
        Commands::Orchestrator {
            orchestrator_command,
        } => match orchestrator_command {
            OrchestratorCommands::Run => {
                orchestrator::run(config, shutdown_token()).await?;
                Ok(Outcome::Clean)
            }
            OrchestratorCommands::Stop => {
                request_control(&config.state_dir, orchestrator::ROLE, ControlCommand::Shutdown)?;
                println!("Shutdown requested; the orchestrator stops its children and exits.");
                Ok(Outcome::Clean)
            }
            OrchestratorCommands::Status => {
                print_supervisor_state(config, orchestrator::ROLE)?;
                Ok(Outcome::Clean)
            }
        },

        Commands::Watchdog { watchdog_command } => match watchdog_command {
            WatchdogCommands::Run => {
                watchdog::run(config, shutdown_token()).await?;
                Ok(Outcome::Clean)
            }
            WatchdogCommands::Stop => {
                request_control(&config.state_dir, watchdog::ROLE, ControlCommand::Shutdown)?;
                println!("Shutdown requested; the watchdog stops the orchestrator and exits.");
                Ok(Outcome::Clean)
            }
        },

        Commands::Watcher { watcher_command } => match watcher_command {
            WatcherCommands::Run { name } => {
                match watchers::run(config, &name, shutdown_token()).await? {
                    WatcherExit::Graceful => Ok(Outcome::Clean),
                    WatcherExit::RestartRequested => Ok(Outcome::RestartRequested),
                }
            }
            WatcherCommands::Start { name } => {
                control_process(config, ControlCommand::Start { name })
            }
            WatcherCommands::Stop { name } => {
                control_process(config, ControlCommand::Stop { name })
            }
            WatcherCommands::Restart { name } => {
                control_process(config, ControlCommand::Restart { name })
            }
        },

        Commands::Approvals { approval_command } => match approval_command {
            ApprovalCommands::Run => match approval::run(config, shutdown_token()).await? {
                ProcessorExit::Graceful => Ok(Outcome::Clean),
                ProcessorExit::RestartRequested => Ok(Outcome::RestartRequested),
            },
            ApprovalCommands::Expire => {
                let mut processor = approval::build_processor(config)?;
                let expired = processor.expire_pending(Utc::now())?;
                println!("Expired {expired} pending approval(s).");
                Ok(Outcome::Clean)
            }
        },

        Commands::Audit { audit_command } => {
            let audit = AuditLogger::from_config(config);
            match audit_command {
                AuditCommands::Purge => {
                    let removed = audit.purge_expired(Utc::now())?;
                    println!(
                        "Removed {removed} partition(s) older than {} days.",
                        config.audit.retention_days
                    );
                }
                AuditCommands::Show { date } => {
                    let date = match date {
                        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                            .with_context(|| format!("invalid date '{raw}', expected YYYY-MM-DD"))?,
                        None => Utc::now().date_naive(),
                    };
                    for entry in audit.read_day(date)? {
                        println!("{}", serde_json::to_string(&entry)?);
                    }
                }
            }
            Ok(Outcome::Clean)
        }

        Commands::Status => {
            println!("{}", render_status(config));
            Ok(Outcome::Clean)
        }
    }
}

fn shutdown_token() -> CancellationToken {
    cancel_on_shutdown_signal(CancellationToken::new())
}

/// Forward a start/stop/restart to the running orchestrator. Watchers must
/// exist in config; the approval processor is addressed by its process name.
fn control_process(config: &Config, command: ControlCommand) -> Result<Outcome> {
    let name = match &command {
        ControlCommand::Start { name }
        | ControlCommand::Stop { name }
        | ControlCommand::Restart { name } => name.as_str(),
        ControlCommand::Shutdown => "",
    };
    if name != approval::PROCESS_NAME {
        config.watcher(name)?;
    }
    let request = request_control(&config.state_dir, orchestrator::ROLE, command)?;
    println!("Queued {:?} (request {}).", request.command, request.id);
    Ok(Outcome::Clean)
}

fn print_supervisor_state(config: &Config, role: &str) -> Result<()> {
    let Some(state) = SupervisorState::load(&config.state_dir, role)? else {
        println!("No {role} state recorded yet.");
        return Ok(());
    };
    println!(
        "{role} pid {} (updated {})",
        state.pid,
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for record in &state.processes {
        println!(
            "  {:<22} {:<10} restarts {:<4} failures {:<3} budget {}{}",
            record.name,
            record.state.to_string(),
            record.restart_count,
            record.consecutive_failures,
            record.restart_budget_remaining,
            if record.stopped { "  (stopped)" } else { "" }
        );
    }
    Ok(())
}
