//! Shell command execution for workflow steps.
//!
//! Steps run through `sh -c` with captured stdout/stderr, an optional
//! timeout, and cancellation wired to the run's token. Killed processes are
//! reaped via `kill_on_drop`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Captured result of a completed step command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from step command execution.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command interrupted by cancellation")]
    Interrupted,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run a step command under `sh -c`, capturing output.
///
/// `env` is injected on top of the inherited environment; secret values
/// arrive here already wrapped by the executor and are redacted from the
/// captured output before anything is persisted. A `None` timeout lets the
/// command run until completion or cancellation.
pub async fn run_command(
    command: &str,
    env: &HashMap<String, String>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, StepError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = cmd.spawn()?;
    let output = child.wait_with_output();

    let output = match timeout {
        Some(limit) => tokio::select! {
            res = tokio::time::timeout(limit, output) => match res {
                Ok(out) => out?,
                Err(_) => return Err(StepError::Timeout(limit)),
            },
            _ = cancel.cancelled() => return Err(StepError::Interrupted),
        },
        None => tokio::select! {
            out = output => out?,
            _ = cancel.cancelled() => return Err(StepError::Interrupted),
        },
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
