//! Shell executor — bounded `sh -c` invocations for the IPC backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::{CaptureError, Result};

/// Result of one shell invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Bounded command execution. Every call must honor the per-call timeout;
/// a stalled osascript or control-socket command must never wedge a poller
/// tick for longer than that.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn exec(&self, command_line: &str) -> Result<ExecOutcome>;
}

/// Tokio-backed executor: spawns `sh -c`, races the timeout, SIGKILLs the
/// child on expiry.
pub struct TokioShell {
    timeout_ms: u64,
}

impl TokioShell {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

#[async_trait]
impl ShellExecutor for TokioShell {
    async fn exec(&self, command_line: &str) -> Result<ExecOutcome> {
        debug!(command = command_line, "shell exec");

        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::ShellSpawn(e.to_string()))?;

        // `wait_with_output` takes the child by value, so drive it on a
        // spawned task and keep the PID for the kill-on-timeout path.
        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), rx).await {
            Ok(Ok(Ok(output))) => Ok(ExecOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Ok(Ok(Err(e))) => Err(CaptureError::Io(e)),
            Ok(Err(_recv)) => Err(CaptureError::ShellSpawn(
                "wait task panicked unexpectedly".to_string(),
            )),
            Err(_elapsed) => {
                if let Some(raw_pid) = pid {
                    #[cfg(unix)]
                    // Safety: raw_pid is our direct child, still running.
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                }
                Err(CaptureError::Timeout {
                    ms: self.timeout_ms,
                })
            }
        }
    }
}

/// Quote `s` for safe embedding inside a single-quoted shell word.
pub(crate) fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }
}
