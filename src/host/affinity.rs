//! CPU affinity enforcement for GPU processes
//!
//! Pins each process holding a GPU to the CPUs configured for that GPU, so
//! jobs stay on the socket closest to their device. Enforcement is best
//! effort: failures are logged by the caller and never change the report.

use crate::error::AffinityFailure;
use crate::exec::{CommandRunner, Target};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Ordered, deduplicated set of CPU ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<usize>")]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    /// CPU ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Number of CPUs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No CPU configured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `taskset -c` list form, e.g. `0,1,8`
    pub fn to_list_string(&self) -> String {
        self.0
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl From<Vec<usize>> for CpuSet {
    fn from(cpus: Vec<usize>) -> Self {
        Self(cpus.into_iter().collect())
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_list_string())
    }
}

/// CPU sets for the devices of one server, keyed by device index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinityPlan {
    devices: BTreeMap<String, CpuSet>,
}

impl AffinityPlan {
    /// Build a plan from `(device index, cpus)` pairs
    pub fn new(devices: impl IntoIterator<Item = (String, CpuSet)>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }

    /// CPUs configured for device `index`, if any
    pub fn cpus_for(&self, index: usize) -> Option<&CpuSet> {
        self.devices.get(&index.to_string())
    }

    /// Number of configured devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// No device configured
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Affinity plans for the whole fleet, keyed by server address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinityConfig {
    servers: HashMap<String, AffinityPlan>,
}

impl AffinityConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the plan for `server`
    pub fn insert(&mut self, server: impl Into<String>, plan: AffinityPlan) {
        self.servers.insert(server.into(), plan);
    }

    /// Plan for a target
    ///
    /// Looked up by report name first (`user@host` when an SSH user is in
    /// play), then by the bare host.
    pub fn plan_for(&self, target: &Target) -> Option<&AffinityPlan> {
        self.servers
            .get(target.name())
            .or_else(|| self.servers.get(target.login()))
            .or_else(|| self.servers.get(target.host()))
    }

    /// Number of configured servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// No server configured
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Pin `pid` on a remote host with `taskset`
pub async fn pin_remote(
    runner: &dyn CommandRunner,
    target: &Target,
    pid: &str,
    cpus: &CpuSet,
) -> Result<(), AffinityFailure> {
    check_request(pid, cpus)?;
    let command = target.pin_command(&cpus.to_list_string(), pid);
    runner.run(&command, target.budget()).await?;
    Ok(())
}

/// Pin `pid` on this machine with `sched_setaffinity`
pub fn pin_local(pid: &str, cpus: &CpuSet) -> Result<(), AffinityFailure> {
    check_request(pid, cpus)?;
    let pid: i32 = pid
        .parse()
        .map_err(|_| AffinityFailure::InvalidPid(pid.to_string()))?;
    set_process_affinity(pid, cpus)
}

fn check_request(pid: &str, cpus: &CpuSet) -> Result<(), AffinityFailure> {
    if cpus.is_empty() {
        return Err(AffinityFailure::EmptyCpuSet);
    }
    if !super::owners::is_numeric_pid(pid) {
        return Err(AffinityFailure::InvalidPid(pid.to_string()));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_process_affinity(pid: i32, cpus: &CpuSet) -> Result<(), AffinityFailure> {
    use std::mem::MaybeUninit;

    let result = unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
        libc::CPU_ZERO(&mut set);
        for cpu in cpus.iter() {
            libc::CPU_SET(cpu, &mut set);
        }

        libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if result == 0 {
        Ok(())
    } else {
        Err(AffinityFailure::Os(std::io::Error::last_os_error().to_string()))
    }
}

#[cfg(not(target_os = "linux"))]
fn set_process_affinity(_pid: i32, _cpus: &CpuSet) -> Result<(), AffinityFailure> {
    Err(AffinityFailure::Os(
        "process affinity is not supported on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandFailure;
    use crate::exec::testing::ScriptedRunner;
    use crate::exec::Timeouts;

    #[test]
    fn test_cpu_set_is_ordered_and_deduplicated() {
        let cpus = CpuSet::from(vec![3, 1, 1, 2]);
        assert_eq!(cpus.len(), 3);
        assert_eq!(cpus.to_list_string(), "1,2,3");
    }

    #[test]
    fn test_plan_lookup_by_name_then_host() {
        let mut config = AffinityConfig::new();
        config.insert(
            "gpu01",
            AffinityPlan::new([("0".to_string(), CpuSet::from(vec![0, 1]))]),
        );

        let target = Target::resolve("gpu01", Some("alice"), Timeouts::default());
        let plan = config.plan_for(&target).unwrap();
        assert_eq!(plan.cpus_for(0).unwrap().to_list_string(), "0,1");
        assert!(plan.cpus_for(1).is_none());

        let other = Target::resolve("gpu02", None, Timeouts::default());
        assert!(config.plan_for(&other).is_none());
    }

    #[tokio::test]
    async fn test_pin_remote_issues_taskset() {
        let target = Target::resolve("gpu01", None, Timeouts::default());
        let runner = ScriptedRunner::new().on("taskset", "");
        pin_remote(&runner, &target, "100", &CpuSet::from(vec![1, 0]))
            .await
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("taskset -cp 0,1 100"));
    }

    #[tokio::test]
    async fn test_pin_remote_failure_is_typed() {
        let target = Target::resolve("gpu01", None, Timeouts::default());
        let runner = ScriptedRunner::new().fail("taskset", CommandFailure::NonZeroExit(1));
        let err = pin_remote(&runner, &target, "100", &CpuSet::from(vec![0]))
            .await
            .unwrap_err();
        assert_eq!(err, AffinityFailure::Command(CommandFailure::NonZeroExit(1)));
    }

    #[test]
    fn test_pin_local_rejects_bad_requests() {
        assert_eq!(
            pin_local("N/A", &CpuSet::from(vec![0])),
            Err(AffinityFailure::InvalidPid("N/A".into()))
        );
        assert_eq!(
            pin_local("1", &CpuSet::default()),
            Err(AffinityFailure::EmptyCpuSet)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_local_own_process() {
        // Pinning ourselves to every CPU we may already run on is always allowed.
        let mut current = unsafe { std::mem::zeroed::<libc::cpu_set_t>() };
        let rc = unsafe {
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut current)
        };
        assert_eq!(rc, 0);
        let cpus: CpuSet = (0..libc::CPU_SETSIZE as usize)
            .filter(|&c| unsafe { libc::CPU_ISSET(c, &current) })
            .collect();

        let pid = std::process::id().to_string();
        assert_eq!(pin_local(&pid, &cpus), Ok(()));
    }
}
