//! Host command execution
//!
//! Every `ip`, `wg` and `iptables` call made by the command backend goes
//! through a [`CommandRunner`], so tests can substitute an in-memory host.

use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs external programs on behalf of the command backend
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` and return its trimmed stdout.
    async fn run(&self, cancel: &CancellationToken, program: &str, args: &[&str]) -> Result<String>;

    /// Same as [`CommandRunner::run`], feeding `input` on stdin.
    async fn run_with_input(
        &self,
        cancel: &CancellationToken,
        input: &str,
        program: &str,
        args: &[&str],
    ) -> Result<String>;
}

/// `program arg arg ...` as printed in logs and errors
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runner backed by `tokio::process`
///
/// Children are killed when the caller's token is cancelled or when the
/// per-command timeout elapses.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        input: Option<&str>,
        program: &str,
        args: &[&str],
    ) -> Result<String> {
        let line = command_line(program, args);
        debug!(command = %line, "Running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::Command {
            command: line.clone(),
            message: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes the pipe so the child sees EOF
        }

        // Dropping the wait future drops the child, which kill_on_drop terminates
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(command = %line, "Command cancelled");
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(Error::Command {
                        command: line,
                        message: format!("timed out after {}s", self.timeout.as_secs()),
                    });
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = [stderr, stdout]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::Command {
            command: line,
            message: if detail.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, detail)
            },
        })
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, cancel: &CancellationToken, program: &str, args: &[&str]) -> Result<String> {
        self.exec(cancel, None, program, args).await
    }

    async fn run_with_input(
        &self,
        cancel: &CancellationToken,
        input: &str,
        program: &str,
        args: &[&str],
    ) -> Result<String> {
        self.exec(cancel, Some(input), program, args).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = TokioCommandRunner::default();
        let cancel = CancellationToken::new();
        let out = runner.run(&cancel, "echo", &["hello", "world"]).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_run_with_input_feeds_stdin() {
        let runner = TokioCommandRunner::default();
        let cancel = CancellationToken::new();
        let out = runner.run_with_input(&cancel, "secret\n", "cat", &[]).await.unwrap();
        assert_eq!(out, "secret");
    }

    #[tokio::test]
    async fn test_failure_carries_command_and_output() {
        let runner = TokioCommandRunner::default();
        let cancel = CancellationToken::new();
        let err = runner
            .run(&cancel, "sh", &["-c", "echo 'Device \"wg9\" does not exist.' >&2; exit 1"])
            .await
            .unwrap_err();
        match err {
            Error::Command { command, message } => {
                assert!(command.starts_with("sh -c"));
                assert!(message.contains("does not exist"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_child() {
        let runner = TokioCommandRunner::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = runner.run(&cancel, "sleep", &["10"]).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = TokioCommandRunner::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let err = runner.run(&cancel, "sleep", &["10"]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
