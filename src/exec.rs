//! Bounded External Command Execution
//!
//! Runs an out-of-process command and races it against a timer. If the timer
//! wins, the child is killed and reaped before the caller sees the timeout, so
//! a command that was given up on can never complete later and mutate state
//! behind the caller's back.

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default bound for device mapping and cluster CLI commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured output of a successful command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// A command with a hard completion deadline
#[derive(Debug, Clone)]
pub struct BoundedCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl BoundedCommand {
    /// Create a command with the default timeout
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line as it appears in logs and errors
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion or until the timeout elapses, whichever comes first
    pub async fn run(&self) -> Result<CommandOutput> {
        let command_line = self.display();
        let started = Instant::now();

        debug!("Running command: {}", command_line);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: command_line.clone(),
                reason: format!("spawn failed: {}", e),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            Error::Internal(format!("stdout not captured for {}", command_line))
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            Error::Internal(format!("stderr not captured for {}", command_line))
        })?;

        let completion = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (status, read_out, read_err) = tokio::join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
            );
            read_out?;
            read_err?;
            Ok::<_, std::io::Error>((status?, out, err))
        };

        let outcome = tokio::time::timeout(self.timeout, completion).await;

        match outcome {
            Ok(Ok((status, out, err))) => {
                let stdout = String::from_utf8_lossy(&out).into_owned();
                let stderr = String::from_utf8_lossy(&err).into_owned();
                let elapsed = started.elapsed();

                if status.success() {
                    debug!("Command finished in {:?}: {}", elapsed, command_line);
                    Ok(CommandOutput {
                        stdout,
                        stderr,
                        elapsed,
                    })
                } else {
                    Err(Error::CommandFailed {
                        command: command_line,
                        reason: format!("{}: {}", status, stderr.trim()),
                    })
                }
            }
            Ok(Err(e)) => Err(Error::CommandFailed {
                command: command_line,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "Command timed out after {:?}, killing: {}",
                    self.timeout, command_line
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command {}: {}", command_line, e);
                }
                Err(Error::CommandTimeout {
                    command: command_line,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> BoundedCommand {
        BoundedCommand::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = sh("echo /dev/rbd0").run().await.unwrap();
        assert_eq!(output.stdout, "/dev/rbd0\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let err = sh("echo 'rbd: map failed' >&2; exit 3").run().await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { ref reason, .. } if reason.contains("rbd: map failed"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = BoundedCommand::new("/nonexistent/ebs-gateway-test-binary")
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandFailed { ref reason, .. } if reason.starts_with("spawn failed"));
    }

    #[tokio::test]
    async fn test_timeout_does_not_hang() {
        let started = Instant::now();
        let err = sh("sleep 10")
            .timeout(Duration::from_millis(200))
            .run()
            .await
            .unwrap_err();

        assert_matches!(err, Error::CommandTimeout { timeout, .. } if timeout == Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timed_out_command_cannot_complete_later() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("mapped");
        let script = format!("sleep 1 && touch {}", marker.display());

        let err = sh(&script)
            .timeout(Duration::from_millis(100))
            .run()
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandTimeout { .. });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[test]
    fn test_display() {
        let cmd = BoundedCommand::new("rbd").args(["map", "vol1", "-p", "rbd"]);
        assert_eq!(cmd.display(), "rbd map vol1 -p rbd");
    }
}
