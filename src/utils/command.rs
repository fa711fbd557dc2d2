//! Bounded invocation of external collaborator commands.

use crate::error::IntegrationError;
use crate::recovery::{ErrorCategory, classify};
use anyhow::Result;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// `EX_DATAERR` from sysexits.h.
pub const EXIT_DATA: i32 = 65;
/// `EX_TEMPFAIL`.
pub const EXIT_TRANSIENT: i32 = 75;
/// `EX_NOPERM`.
pub const EXIT_AUTH: i32 = 77;

const MAX_STDERR_CHARS: usize = 2_000;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `argv` with an optional stdin payload, killing it after `timeout`.
///
/// A timeout becomes a transient [`IntegrationError`]; a missing or
/// non-executable program is a `system` failure.
pub async fn run_command(
    integration: &str,
    argv: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(IntegrationError::new(integration, ErrorCategory::Data, "empty command").into());
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let run = async {
        let mut child = cmd.spawn()?;
        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            match pipe.write_all(payload).await {
                Ok(()) => {}
                // The program may exit without reading its input.
                Err(error) if error.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(error) => return Err(error),
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(timeout, run).await {
        Err(_) => Err(IntegrationError::timeout(integration, timeout).into()),
        Ok(Err(error))
            if matches!(
                error.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            Err(IntegrationError::new(
                integration,
                ErrorCategory::System,
                format!("cannot execute '{program}': {error}"),
            )
            .into())
        }
        Ok(Err(error)) => Err(anyhow::Error::new(error).context(format!("running '{program}'"))),
        Ok(Ok(output)) => Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: truncate(String::from_utf8_lossy(&output.stderr).trim()),
        }),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_STDERR_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_STDERR_CHARS).collect();
    format!("{cut}...")
}

/// Category for a non-zero exit: sysexits codes first, then stderr text.
pub fn failure_category(status: ExitStatus, stderr: &str) -> ErrorCategory {
    match status.code() {
        Some(EXIT_TRANSIENT) => ErrorCategory::Transient,
        Some(EXIT_AUTH) => ErrorCategory::Authentication,
        Some(EXIT_DATA) => ErrorCategory::Data,
        // Killed by a signal.
        None => ErrorCategory::Transient,
        Some(_) => classify(&anyhow::anyhow!("{stderr}")),
    }
}

/// Turn a failed run into an [`IntegrationError`].
pub fn status_error(integration: &str, output: &CommandOutput) -> IntegrationError {
    let category = failure_category(output.status, &output.stderr);
    let message = if output.stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {}", output.status, output.stderr)
    };
    IntegrationError::new(integration, category, message)
}
