//! Configuration settings for GpuFleet
//!
//! Defines the CLI arguments and the runtime configuration derived from them.

use crate::error::FleetError;
use crate::exec::{Target, Timeouts, DEFAULT_CMD_TIMEOUT, DEFAULT_SSH_TIMEOUT};
use crate::report::{default_parallelism, ReportMode, ReportOptions};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default server list file name, next to the executable
pub const DEFAULT_SERVER_FILE: &str = "servers.txt";

/// Default CPU affinity file name, next to the executable
pub const DEFAULT_TASKSET_FILE: &str = "cpu_affinities.json";

/// Default pause between passes in daemon mode
pub const DEFAULT_INTERVAL: &str = "15s";

/// GpuFleet - check the state of GPU servers
#[derive(Parser, Debug, Clone)]
#[command(name = "gpufleet")]
#[command(author = "GpuFleet Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Check state of GPU servers")]
#[command(long_about = r#"
Check which GPUs are free across a fleet of servers, and who is using the rest.

Servers are probed over SSH (use an SSH key so no password is asked for each
connection). The addresses ".", "localhost" and "127.0.0.1" are probed locally.

Examples:
  gpufleet                          # Free GPUs on every server in servers.txt
  gpufleet -l gpu01 gpu02           # Full listing for two servers
  gpufleet -f -u alice              # GPUs used by alice, with real names
  gpufleet -d -t                    # Loop, pinning GPU jobs to their CPUs
"#)]
pub struct CliArgs {
    /// Be verbose
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Show used GPUs
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Loop, re-probing the fleet after each pass
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Pause between passes in daemon mode (e.g. 15s, 1m)
    #[arg(long, default_value = DEFAULT_INTERVAL, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub interval: Duration,

    /// Use taskset to set CPU-GPU affinities
    #[arg(short = 't', long)]
    pub taskset: bool,

    /// Attempt to resolve user names to real names
    #[arg(short = 'f', long)]
    pub finger: bool,

    /// Show only GPUs used by current user
    #[arg(short = 'm', long)]
    pub me: bool,

    /// Show only GPUs used by a user
    #[arg(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,

    /// Username to use to connect with SSH
    #[arg(short = 's', long, value_name = "USER")]
    pub ssh_user: Option<String>,

    /// Timeout in seconds after which SSH stops trying to connect
    #[arg(long, default_value_t = DEFAULT_SSH_TIMEOUT, value_name = "SECS")]
    pub ssh_timeout: u64,

    /// Timeout in seconds after which remote commands are interrupted
    #[arg(long, default_value_t = DEFAULT_CMD_TIMEOUT, value_name = "SECS")]
    pub cmd_timeout: u64,

    /// File with addresses of servers to check
    #[arg(long, value_name = "PATH", env = "GPUFLEET_SERVER_FILE")]
    pub server_file: Option<PathBuf>,

    /// File with CPU affinities, used with --taskset
    #[arg(long, value_name = "PATH", env = "GPUFLEET_TASKSET_FILE")]
    pub taskset_file: Option<PathBuf>,

    /// Number of servers probed at the same time (0 = auto)
    #[arg(short = 'j', long, default_value = "0", value_name = "NUM")]
    pub parallel: usize,

    /// Servers to probe (overrides the server file)
    #[arg(value_name = "SERVERS")]
    pub servers: Vec<String>,
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Servers given on the command line
    pub servers: Vec<String>,
    /// Server list used when no server is given
    pub server_file: PathBuf,
    /// Affinity file, read only when pinning is enabled
    pub taskset_file: PathBuf,
    /// SSH login override
    pub ssh_user: Option<String>,
    /// Command timeouts
    pub timeouts: Timeouts,
    /// Rendering options
    pub report: ReportOptions,
    /// Enforce CPU affinity
    pub taskset: bool,
    /// Loop forever
    pub daemon: bool,
    /// Pause between passes
    pub interval: Duration,
    /// Fan-out width
    pub parallelism: usize,
    /// Debug logging
    pub verbose: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            server_file: default_file(DEFAULT_SERVER_FILE),
            taskset_file: default_file(DEFAULT_TASKSET_FILE),
            ssh_user: None,
            timeouts: Timeouts::default(),
            report: ReportOptions::default(),
            taskset: false,
            daemon: false,
            interval: Duration::from_secs(15),
            parallelism: default_parallelism(),
            verbose: false,
        }
    }
}

impl MonitorConfig {
    /// Create config from CLI arguments
    ///
    /// `--me` filters by the SSH user when one is given, otherwise by the
    /// local user. A user filter, name translation and pinning all imply the
    /// full listing.
    pub fn from_cli(args: &CliArgs) -> Result<Self, FleetError> {
        let mut config = Self::default();

        config.servers = args
            .servers
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(path) = &args.server_file {
            config.server_file = path.clone();
        }
        if let Some(path) = &args.taskset_file {
            config.taskset_file = path.clone();
        }

        config.ssh_user = args.ssh_user.clone().filter(|u| !u.is_empty());
        config.timeouts = Timeouts {
            connect_secs: args.ssh_timeout,
            command_secs: args.cmd_timeout,
        };
        if args.cmd_timeout == 0 {
            return Err(FleetError::Invalid(
                "--cmd-timeout must be at least 1 second".to_string(),
            ));
        }

        let filter_user = if args.me {
            match &config.ssh_user {
                Some(user) => Some(user.clone()),
                None => Some(current_username().ok_or_else(|| {
                    FleetError::Invalid("could not determine the current user".to_string())
                })?),
            }
        } else {
            args.user.clone()
        };

        let listing = args.list || args.finger || args.taskset || filter_user.is_some();
        config.report = ReportOptions {
            mode: if listing {
                ReportMode::Listing
            } else {
                ReportMode::FreeOnly
            },
            filter_user,
            translate_names: args.finger,
        };

        config.taskset = args.taskset;
        config.daemon = args.daemon;
        config.interval = args.interval;
        if args.parallel > 0 {
            config.parallelism = args.parallel;
        }
        config.verbose = args.verbose;

        Ok(config)
    }

    /// Resolve server addresses into probe targets
    pub fn targets(&self, servers: &[String]) -> Vec<Target> {
        servers
            .iter()
            .map(|s| Target::resolve(s, self.ssh_user.as_deref(), self.timeouts))
            .collect()
    }
}

/// `name` in the directory holding the running executable
pub fn default_file(name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.canonicalize().ok())
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

/// Login name of the user running the probe
pub fn current_username() -> Option<String> {
    #[cfg(unix)]
    {
        use nix::unistd::{getuid, User};
        if let Ok(Some(user)) = User::from_uid(getuid()) {
            return Some(user.name);
        }
    }
    std::env::var("USER").ok().filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> MonitorConfig {
        let mut argv = vec!["gpufleet"];
        argv.extend_from_slice(args);
        MonitorConfig::from_cli(&CliArgs::parse_from(argv)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.report.mode, ReportMode::FreeOnly);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.interval, Duration::from_secs(15));
        assert!(config.server_file.ends_with(DEFAULT_SERVER_FILE));
        assert!(config.taskset_file.ends_with(DEFAULT_TASKSET_FILE));
        assert!(config.parallelism >= 1);
        assert!(!config.taskset);
    }

    #[test]
    fn test_user_and_finger_imply_listing() {
        assert_eq!(parse(&["-u", "alice"]).report.mode, ReportMode::Listing);
        assert_eq!(parse(&["-f"]).report.mode, ReportMode::Listing);
        assert_eq!(parse(&["-t"]).report.mode, ReportMode::Listing);
        assert!(parse(&["-f"]).report.translate_names);
    }

    #[test]
    fn test_me_prefers_ssh_user() {
        let config = parse(&["-m", "-s", "svc"]);
        assert_eq!(config.report.filter_user.as_deref(), Some("svc"));
        assert_eq!(config.ssh_user.as_deref(), Some("svc"));
    }

    #[test]
    fn test_timeouts_and_interval() {
        let config = parse(&["--ssh-timeout", "3", "--cmd-timeout", "7", "--interval", "1m", "-j", "4"]);
        assert_eq!(config.timeouts.connect_secs, 3);
        assert_eq!(config.timeouts.command_secs, 7);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.parallelism, 4);
    }

    #[test]
    fn test_zero_command_timeout_rejected() {
        let args = CliArgs::parse_from(["gpufleet", "--cmd-timeout", "0"]);
        assert!(MonitorConfig::from_cli(&args).is_err());
    }

    #[test]
    fn test_targets_apply_ssh_user() {
        let config = parse(&["-s", "ops", "gpu01", "localhost"]);
        let targets = config.targets(&config.servers);
        assert_eq!(targets[0].name(), "ops@gpu01");
        assert!(targets[1].is_local());
    }
}
