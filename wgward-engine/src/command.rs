//! External command execution
//!
//! Every control-plane action goes through the [`CommandRunner`] seam so the
//! manager can be exercised in tests without touching `wg` or `iptables`.
//! The system implementation enforces a uniform contract: exit code zero
//! yields trimmed stdout; anything else is an error carrying the captured
//! stderr.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Seam for invoking external control-plane tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and return its trimmed stdout
    async fn run(&self, command: &str, args: &[&str], stdin: Option<&str>) -> Result<String>;
}

/// Runner backed by real processes
///
/// Each invocation is bounded by a timeout; a hung tool is killed rather
/// than allowed to stall the caller indefinitely.
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner with the given per-invocation deadline
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let display = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        log::debug!("running `{}`", display);

        let mut child = Command::new(command)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Stdin is written and closed before stdout is read; tools like
        // `wg pubkey` block until their input ends.
        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
                handle.write_all(b"\n").await?;
            }
        }

        // On expiry the future is dropped and kill_on_drop reaps the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(display.clone()))??;

        if !output.status.success() {
            return Err(Error::Command {
                command: display,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
