//! Process to owner correlation

use crate::error::{CommandFailure, CorrelationFailure};
use crate::exec::{CommandRunner, Target};
use std::collections::HashMap;
use std::fmt;

/// Exit status of `ps` when none of the requested PIDs exist
const PS_NOTHING_SELECTED: i32 = 1;

/// Owner of one occupying process
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Owner {
    /// OS username owning the process
    User(String),
    /// Process vanished before the listing, or its PID could not be looked up
    Unknown,
}

impl Owner {
    /// Username, if known
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::User(name) => Some(name),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => f.write_str(name),
            Self::Unknown => f.write_str("(unknown)"),
        }
    }
}

/// PID to owning user, scoped to one server's probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerMap {
    owners: HashMap<String, String>,
}

impl OwnerMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `pid` as owned by `user`
    pub fn insert(&mut self, pid: impl Into<String>, user: impl Into<String>) {
        self.owners.insert(pid.into(), user.into());
    }

    /// Owner of `pid`, or [`Owner::Unknown`] if it was not listed
    pub fn owner(&self, pid: &str) -> Owner {
        self.owners
            .get(pid)
            .map(|u| Owner::User(u.clone()))
            .unwrap_or(Owner::Unknown)
    }

    /// Number of resolved PIDs
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// No PID resolved
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Parse `ps -o pid= -o ruser=` output
pub fn parse_process_listing(output: &str) -> OwnerMap {
    let mut map = OwnerMap::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(pid), Some(user), None) => map.insert(pid, user),
            _ => tracing::warn!("Ignoring unexpected ps output line: \"{}\"", line),
        }
    }
    map
}

/// Whether a PID can be handed to `ps -p`
pub(crate) fn is_numeric_pid(pid: &str) -> bool {
    !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit())
}

/// Look up the owners of `pids` with a single batched listing
///
/// Issues no command when there is nothing to look up. PIDs that are gone by
/// the time `ps` runs map to [`Owner::Unknown`].
pub async fn correlate_owners(
    runner: &dyn CommandRunner,
    target: &Target,
    pids: &[String],
) -> Result<OwnerMap, CorrelationFailure> {
    let mut batch: Vec<String> = pids
        .iter()
        .filter(|p| {
            let ok = is_numeric_pid(p);
            if !ok {
                tracing::debug!("{}: skipping non-numeric PID '{}'", target, p);
            }
            ok
        })
        .cloned()
        .collect();
    batch.sort();
    batch.dedup();

    if batch.is_empty() {
        return Ok(OwnerMap::new());
    }

    let command = target.process_listing_command(&batch);
    match runner.run(&command, target.budget()).await {
        Ok(raw) => Ok(parse_process_listing(&String::from_utf8_lossy(&raw))),
        Err(CommandFailure::NonZeroExit(PS_NOTHING_SELECTED)) => {
            tracing::debug!("{}: none of {} PIDs still exist", target, batch.len());
            Ok(OwnerMap::new())
        }
        Err(e) => Err(CorrelationFailure::Unreachable(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::exec::Timeouts;

    fn remote() -> Target {
        Target::resolve("gpu01", None, Timeouts::default())
    }

    #[test]
    fn test_parse_listing() {
        let map = parse_process_listing("  100 alice\n  101 bob\n\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map.owner("100"), Owner::User("alice".into()));
        assert_eq!(map.owner("101"), Owner::User("bob".into()));
        assert_eq!(map.owner("102"), Owner::Unknown);
    }

    #[test]
    fn test_parse_listing_skips_garbage() {
        let map = parse_process_listing("100 alice\nnot a valid line\n102\n");
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_no_pids_no_command() {
        let runner = ScriptedRunner::new();
        let map = correlate_owners(&runner, &remote(), &[]).await.unwrap();
        assert!(map.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_batched_call() {
        let runner = ScriptedRunner::new().on("ps -o", "100 alice\n101 bob\n");
        let pids: Vec<String> = vec!["100".into(), "101".into(), "100".into(), "102".into()];
        let map = correlate_owners(&runner, &remote(), &pids).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("ps -o pid= -o ruser= -p 100,101,102"));
        assert_eq!(map.owner("100"), Owner::User("alice".into()));
        assert_eq!(map.owner("102"), Owner::Unknown);
    }

    #[tokio::test]
    async fn test_all_processes_exited() {
        let runner = ScriptedRunner::new().fail("ps -o", CommandFailure::NonZeroExit(1));
        let map = correlate_owners(&runner, &remote(), &["100".into()])
            .await
            .unwrap();
        assert_eq!(map.owner("100"), Owner::Unknown);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let runner = ScriptedRunner::new().fail("ps -o", CommandFailure::NonZeroExit(255));
        let err = correlate_owners(&runner, &remote(), &["100".into()])
            .await
            .unwrap_err();
        assert_eq!(err, CorrelationFailure::Unreachable(CommandFailure::NonZeroExit(255)));

        let runner = ScriptedRunner::new().fail("ps -o", CommandFailure::TimedOut);
        assert!(correlate_owners(&runner, &remote(), &["100".into()]).await.is_err());
    }

    #[tokio::test]
    async fn test_non_numeric_pids_are_not_sent() {
        let runner = ScriptedRunner::new();
        let map = correlate_owners(&runner, &remote(), &["N/A".into()])
            .await
            .unwrap();
        assert_eq!(map.owner("N/A"), Owner::Unknown);
        assert!(runner.calls().is_empty());
    }
}
