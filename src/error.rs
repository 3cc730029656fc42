//! Error types for GpuFleet
//!
//! Failures are grouped by the stage that produces them. Transport failures
//! never panic; they travel as typed results up to the reporter, which decides
//! whether a server is unreachable or merely degraded.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single shell command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// Wall-clock budget exhausted; the child was killed
    #[error("command timed out")]
    TimedOut,

    /// Command exited with a non-zero status (-1 when killed by a signal)
    #[error("command exited with status {0}")]
    NonZeroExit(i32),

    /// The shell could not be started at all
    #[error("failed to spawn command: {0}")]
    Spawn(String),
}

/// Failure to parse `nvidia-smi -q -x` output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Document is not well-formed or lacks the expected root
    #[error("malformed accelerator status document: {0}")]
    Malformed(String),
}

/// Failure to map process IDs to their owners
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationFailure {
    /// The process listing could not be obtained
    #[error("process listing failed: {0}")]
    Unreachable(#[source] CommandFailure),
}

/// Failure to map usernames to display names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// The remote name lookup could not be run
    #[error("name lookup failed: {0}")]
    Unreachable(#[source] CommandFailure),
}

/// Failure to pin one process to its CPU set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AffinityFailure {
    /// `taskset` could not be run
    #[error("taskset failed: {0}")]
    Command(#[from] CommandFailure),

    /// PID is not numeric and cannot be pinned
    #[error("invalid process id '{0}'")]
    InvalidPid(String),

    /// Empty CPU set in the configuration
    #[error("empty CPU set")]
    EmptyCpuSet,

    /// The affinity syscall was rejected
    #[error("sched_setaffinity failed: {0}")]
    Os(String),
}

/// Failure to load the server list or the affinity file
#[derive(Error, Debug)]
pub enum ConfigLoadFailure {
    /// File could not be read
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is invalid
    #[error("could not parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
}

impl ConfigLoadFailure {
    /// Create a read error with path context
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error with path context
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Path of the file that failed to load
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

/// Reason a server ended up unreachable for one pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// `nvidia-smi` could not be run
    #[error("error running nvidia-smi: {0}")]
    Inventory(#[from] CommandFailure),

    /// `nvidia-smi` output could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// `ps` could not be run
    #[error(transparent)]
    Owners(#[from] CorrelationFailure),
}

/// Top-level error for a whole run
#[derive(Error, Debug)]
pub enum FleetError {
    /// Configuration file could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigLoadFailure),

    /// Nothing to probe after loading the server list
    #[error("no GPU servers to connect to; put addresses in the server file or pass them as arguments")]
    NoServers,

    /// Invalid combination of settings
    #[error("configuration error: {0}")]
    Invalid(String),

    /// Runtime could not be created
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result type alias for GpuFleet operations
pub type Result<T> = std::result::Result<T, FleetError>;
