//! Bounded execution of external tools.
//!
//! Every tool the cold path and the sync loop invoke goes through
//! [`run_bounded`]: output is captured, the child is killed when the
//! deadline passes, and a non-zero exit becomes [`InitError::CommandFailed`].

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::InitError;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args..` to completion within `limit`.
pub async fn run_bounded(
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<CommandOutput, InitError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    run_command(program, cmd, limit).await
}

/// Run a prepared command to completion within `limit`.
///
/// The child is killed if the future is dropped, so callers may also cancel
/// from outside (e.g. an enclosing restore deadline).
pub async fn run_command(
    program: &str,
    mut cmd: Command,
    limit: Duration,
) -> Result<CommandOutput, InitError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, timeout_secs = limit.as_secs(), "running command");

    let child = cmd.spawn().map_err(|source| InitError::SpawnFailed {
        program: program.to_string(),
        source,
    })?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(InitError::Timeout {
                operation: program.to_string(),
                after: limit,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(InitError::CommandFailed {
            program: program.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_bounded("sh", &args(&["-c", "echo hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let err = run_bounded(
            "sh",
            &args(&["-c", "echo broken >&2; exit 4"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        match err {
            InitError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_bounded("sleep", &args(&["30"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "timeout");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_bounded("/nonexistent/harbor-tool", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "spawn_failed");
    }
}
