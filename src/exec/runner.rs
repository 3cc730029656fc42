//! Shell command execution with a hard timeout

use crate::error::CommandFailure;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Executes shell commands and returns their standard output
///
/// Implementations must never panic on command failure; every outcome is
/// reported through [`CommandFailure`]. No retries happen at this layer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through a shell, bounded by `timeout`
    async fn run(&self, command: &str, timeout: Duration) -> Result<Vec<u8>, CommandFailure>;
}

/// Runs commands through `sh -c`
///
/// The child is started in its own process group so that a timeout kills the
/// whole pipeline (`ssh`, `timeout`, heredoc readers), not just the shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    shell: Option<String>,
}

impl ShellRunner {
    /// Create a runner using `/bin/sh`
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: Some(shell.into()),
        }
    }

    fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<Vec<u8>, CommandFailure> {
        tracing::debug!("Running command: \"{}\"", command);

        let mut cmd = Command::new(self.shell());
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| CommandFailure::Spawn(e.to_string()))?;
        let pid = child.id();

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CommandFailure::Spawn(e.to_string())),
            Err(_) => {
                kill_group(pid);
                tracing::debug!("Command timed out after {:?}: \"{}\"", timeout, command);
                return Err(CommandFailure::TimedOut);
            }
        };

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::debug!(
                "Command failed with exit code {}, output \"{}\", and stderr \"{}\"",
                code,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(CommandFailure::NonZeroExit(code));
        }

        Ok(output.stdout)
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        // The group may already be gone
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
