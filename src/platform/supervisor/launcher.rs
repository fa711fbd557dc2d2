use super::ProcessSpec;
use crate::error::SupervisorError;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Status 0: a graceful exit, never auto-restarted.
    Success,
    Failed(i32),
    Signalled,
}

impl ChildExit {
    pub fn is_graceful(self) -> bool {
        self == Self::Success
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Success,
            Some(code) => Self::Failed(code),
            None => Self::Signalled,
        }
    }
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exited with status 0"),
            Self::Failed(code) => write!(f, "exited with status {code}"),
            Self::Signalled => write!(f, "killed by signal"),
        }
    }
}

/// A running child as the supervisor sees it. Every method is non-blocking.
pub trait ManagedChild: Send {
    fn id(&self) -> Option<u32>;

    /// `Some` once the child has exited; reaps it.
    fn try_wait(&mut self) -> Result<Option<ChildExit>>;

    /// Ask the child to stop (SIGTERM).
    fn terminate(&mut self) -> Result<()>;

    /// Stop the child unconditionally.
    fn kill(&mut self) -> Result<()>;
}

/// Starts supervised processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedChild>>;

    /// Signal a process this launcher did not start (an orphan still holding
    /// a child's lock): SIGTERM, or SIGKILL when `force`.
    fn signal_stale(&self, pid: u32, force: bool) -> Result<()>;
}

/// Spawns `spec.command` with stdout and stderr appended to
/// `<log_dir>/<name>.log`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    log_dir: PathBuf,
}

impl CommandLauncher {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn for_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("logs"))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedChild>> {
        let Some((program, args)) = spec.command.split_first() else {
            return Err(SupervisorError::Launch {
                name: spec.name.clone(),
                message: "empty command".into(),
            }
            .into());
        };

        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("failed to create {}", self.log_dir.display()))?;
        let log_path = self.log_path(&spec.name);
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        let stderr = stdout
            .try_clone()
            .with_context(|| format!("failed to open {}", log_path.display()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        // The child gets SIGTERM when the launching thread dies, so a killed
        // or aborted supervisor leaves no orphans. Launches happen on runtime
        // threads that live as long as the supervisor.
        #[cfg(target_os = "linux")]
        // SAFETY: prctl is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGTERM)
                    .map_err(std::io::Error::from)
            });
        }

        let child = command.spawn().map_err(|error| SupervisorError::Launch {
            name: spec.name.clone(),
            message: error.to_string(),
        })?;

        Ok(Box::new(CommandChild { child }))
    }

    #[cfg(unix)]
    fn signal_stale(&self, pid: u32, force: bool) -> Result<()> {
        use nix::sys::signal::Signal;

        if pid == std::process::id() {
            anyhow::bail!("refusing to signal the supervisor itself (pid {pid})");
        }
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        send_signal(pid, signal)
    }

    #[cfg(not(unix))]
    fn signal_stale(&self, pid: u32, _force: bool) -> Result<()> {
        anyhow::bail!("cannot signal stale pid {pid} on this platform")
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).context("pid out of range")?;
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(anyhow::Error::new(errno).context(format!("failed to send {signal}"))),
    }
}

struct CommandChild {
    child: tokio::process::Child,
}

impl ManagedChild for CommandChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        Ok(self.child.try_wait()?.map(ChildExit::from))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited and reaped.
            Err(error) if error.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
