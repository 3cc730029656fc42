//! Server targets and the command lines issued against them
//!
//! A remote command carries two independent timeout layers:
//!
//! ```text
//! ssh -o "ConnectTimeout=30" user@gpu01 timeout 50 nvidia-smi -q -x
//!        ^ connection setup                 ^ remote execution
//! ```
//!
//! The runner budget for the whole invocation is the sum of both, so a
//! stalled connection and a hung remote command are each bounded.

use std::fmt;
use std::time::Duration;

/// Addresses that name the machine running the probe
pub const LOCAL_ADDRESSES: [&str; 4] = [".", "localhost", "127.0.0.1", "::1"];

/// Default SSH connect timeout in seconds
pub const DEFAULT_SSH_TIMEOUT: u64 = 30;

/// Default remote command timeout in seconds
pub const DEFAULT_CMD_TIMEOUT: u64 = 50;

/// Accelerator status query
pub const NVIDIASMI_CMD: &str = "nvidia-smi -q -x";

/// Where a target's commands run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Commands run on this machine without wrapping
    Local,
    /// Commands run over SSH
    Remote,
}

/// Per-command time limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// SSH `ConnectTimeout` in seconds
    pub connect_secs: u64,
    /// Remote `timeout` wrapper (and local budget) in seconds
    pub command_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: DEFAULT_SSH_TIMEOUT,
            command_secs: DEFAULT_CMD_TIMEOUT,
        }
    }
}

/// A resolved server to probe
///
/// Immutable for the duration of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Label used in the report (address as given, or `user@host` when remote)
    name: String,
    /// Bare host without login prefix
    host: String,
    /// `ssh` destination argument
    login: String,
    kind: TargetKind,
    timeouts: Timeouts,
}

impl Target {
    /// Classify `server` and apply an optional SSH login override
    ///
    /// `server` may itself carry a `user@` prefix; `ssh_user` replaces it.
    pub fn resolve(server: &str, ssh_user: Option<&str>, timeouts: Timeouts) -> Self {
        let server = server.trim();
        let (embedded_user, host) = match server.split_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, server),
        };

        let kind = if LOCAL_ADDRESSES.contains(&host) {
            TargetKind::Local
        } else {
            TargetKind::Remote
        };

        let login = match ssh_user.or(embedded_user) {
            Some(user) if !user.is_empty() => format!("{}@{}", user, host),
            _ => host.to_string(),
        };

        let name = match kind {
            TargetKind::Local => server.to_string(),
            TargetKind::Remote => login.clone(),
        };

        Self {
            name,
            host: host.to_string(),
            login,
            kind,
            timeouts,
        }
    }

    /// Report label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host part of the address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SSH destination (`user@host` or `host`)
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Local or remote
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Whether this target is the local machine
    pub fn is_local(&self) -> bool {
        self.kind == TargetKind::Local
    }

    /// Timeouts baked into this target's commands
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Wall-clock budget for one command, connection setup included
    pub fn budget(&self) -> Duration {
        match self.kind {
            TargetKind::Local => Duration::from_secs(self.timeouts.command_secs),
            TargetKind::Remote => Duration::from_secs(
                self.timeouts.connect_secs + self.timeouts.command_secs,
            ),
        }
    }

    /// `nvidia-smi -q -x`
    pub fn inventory_command(&self) -> String {
        self.wrap(NVIDIASMI_CMD)
    }

    /// `ps` for a batch of PIDs, printing `<pid> <user>` per line
    pub fn process_listing_command(&self, pids: &[String]) -> String {
        self.wrap(&format!(
            "ps -o pid= -o ruser= -p {}",
            shell_quote(&pids.join(","))
        ))
    }

    /// Batched account lookup, one output line per user in request order
    ///
    /// The script travels on stdin through a heredoc so the user list is
    /// parsed once by the remote shell only.
    pub fn name_lookup_command(&self, users: &[String]) -> String {
        let quoted: Vec<String> = users.iter().map(|u| shell_quote(u)).collect();
        let script = format!(
            "for u in {}; do\n\
             \x20 name=$(getent passwd \"$u\" | cut -d: -f5)\n\
             \x20 if [ -n \"$name\" ]; then printf '%s\\n' \"$name\"; else echo Unknown; fi\n\
             done\n",
            quoted.join(" ")
        );
        format!("{} <<'EOF'\n{}EOF\n", self.wrap("sh -s"), script)
    }

    /// `taskset -cp <cpus> <pid>`
    pub fn pin_command(&self, cpu_list: &str, pid: &str) -> String {
        self.wrap(&format!(
            "taskset -cp {} {}",
            shell_quote(cpu_list),
            shell_quote(pid)
        ))
    }

    fn wrap(&self, inner: &str) -> String {
        match self.kind {
            TargetKind::Local => inner.to_string(),
            TargetKind::Remote => format!(
                "ssh -o \"ConnectTimeout={}\" {} timeout {} {}",
                self.timeouts.connect_secs,
                shell_quote(&self.login),
                self.timeouts.command_secs,
                inner
            ),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Quote `s` for a POSIX shell, leaving plain words untouched
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:@/=+".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
