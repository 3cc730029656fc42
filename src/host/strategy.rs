//! Per-target probe capabilities
//!
//! Local and remote hosts differ only in how commands are wrapped, how names
//! are resolved and how processes are pinned. The difference is chosen once
//! per server by [`connect`]; the reporter only talks to [`GpuHost`].

use super::affinity::{pin_local, pin_remote, CpuSet};
use super::names::{resolve_names_local, resolve_names_remote, NameMap};
use super::owners::{correlate_owners, OwnerMap};
use crate::error::{AffinityFailure, CorrelationFailure, ProbeFailure, ResolutionFailure};
use crate::exec::{CommandRunner, Target};
use crate::gpu::{parse_inventory_bytes, DeviceRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Capabilities needed to report on one server
#[async_trait]
pub trait GpuHost: Send + Sync {
    /// The server this host probes
    fn target(&self) -> &Target;

    /// Fetch and parse the accelerator inventory
    async fn probe(&self) -> Result<Vec<DeviceRecord>, ProbeFailure>;

    /// Map occupying PIDs to their owners
    async fn correlate_owners(&self, pids: &[String]) -> Result<OwnerMap, CorrelationFailure>;

    /// Map usernames to display names
    async fn resolve_names(&self, users: &[String]) -> Result<NameMap, ResolutionFailure>;

    /// Pin one process of device `device_index` to `cpus`
    async fn enforce_affinity(
        &self,
        device_index: usize,
        pid: &str,
        cpus: &CpuSet,
    ) -> Result<(), AffinityFailure>;
}

/// Select the capability set for `target`
pub fn connect(target: Target, runner: Arc<dyn CommandRunner>) -> Box<dyn GpuHost> {
    if target.is_local() {
        Box::new(LocalHost { target, runner })
    } else {
        Box::new(RemoteHost { target, runner })
    }
}

async fn probe_inventory(
    runner: &dyn CommandRunner,
    target: &Target,
) -> Result<Vec<DeviceRecord>, ProbeFailure> {
    let raw = runner
        .run(&target.inventory_command(), target.budget())
        .await?;
    Ok(parse_inventory_bytes(&raw)?)
}

/// The machine running the probe
pub struct LocalHost {
    target: Target,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl GpuHost for LocalHost {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn probe(&self) -> Result<Vec<DeviceRecord>, ProbeFailure> {
        probe_inventory(self.runner.as_ref(), &self.target).await
    }

    async fn correlate_owners(&self, pids: &[String]) -> Result<OwnerMap, CorrelationFailure> {
        correlate_owners(self.runner.as_ref(), &self.target, pids).await
    }

    async fn resolve_names(&self, users: &[String]) -> Result<NameMap, ResolutionFailure> {
        Ok(resolve_names_local(users))
    }

    async fn enforce_affinity(
        &self,
        device_index: usize,
        pid: &str,
        cpus: &CpuSet,
    ) -> Result<(), AffinityFailure> {
        tracing::debug!("Pinning local PID {} (GPU {}) to CPUs {}", pid, device_index, cpus);
        pin_local(pid, cpus)
    }
}

/// A server reached over SSH
pub struct RemoteHost {
    target: Target,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait]
impl GpuHost for RemoteHost {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn probe(&self) -> Result<Vec<DeviceRecord>, ProbeFailure> {
        probe_inventory(self.runner.as_ref(), &self.target).await
    }

    async fn correlate_owners(&self, pids: &[String]) -> Result<OwnerMap, CorrelationFailure> {
        correlate_owners(self.runner.as_ref(), &self.target, pids).await
    }

    async fn resolve_names(&self, users: &[String]) -> Result<NameMap, ResolutionFailure> {
        resolve_names_remote(self.runner.as_ref(), &self.target, users).await
    }

    async fn enforce_affinity(
        &self,
        device_index: usize,
        pid: &str,
        cpus: &CpuSet,
    ) -> Result<(), AffinityFailure> {
        tracing::debug!(
            "Pinning PID {} (GPU {}) on {} to CPUs {}",
            pid,
            device_index,
            self.target,
            cpus
        );
        pin_remote(self.runner.as_ref(), &self.target, pid, cpus).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandFailure, ParseError};
    use crate::exec::testing::ScriptedRunner;
    use crate::exec::Timeouts;
    use crate::host::UNKNOWN_NAME;

    const ONE_GPU: &str = "<nvidia_smi_log><gpu><product_name>T4</product_name>\
        <processes><process_info><pid>42</pid></process_info></processes></gpu></nvidia_smi_log>";

    #[tokio::test]
    async fn test_remote_probe_wraps_with_ssh() {
        let runner = Arc::new(ScriptedRunner::new().on("nvidia-smi", ONE_GPU));
        let host = connect(
            Target::resolve("gpu01", None, Timeouts::default()),
            runner.clone(),
        );
        let devices = host.probe().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].pids, vec!["42"]);
        assert!(runner.calls()[0].starts_with("ssh -o \"ConnectTimeout=30\" gpu01"));
    }

    #[tokio::test]
    async fn test_local_probe_is_unwrapped() {
        let runner = Arc::new(ScriptedRunner::new().on("nvidia-smi", ONE_GPU));
        let host = connect(Target::resolve(".", None, Timeouts::default()), runner.clone());
        host.probe().await.unwrap();
        assert_eq!(runner.calls(), vec!["nvidia-smi -q -x".to_string()]);
    }

    #[test]
    fn test_local_names_use_account_database() {
        let runner = Arc::new(ScriptedRunner::new());
        let host = connect(Target::resolve(".", None, Timeouts::default()), runner.clone());
        let users = vec!["no-such-user-gpufleet".to_string()];
        let names = tokio_test::block_on(host.resolve_names(&users)).unwrap();
        assert_eq!(names.display_name("no-such-user-gpufleet"), UNKNOWN_NAME);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let runner = Arc::new(ScriptedRunner::new().fail("nvidia-smi", CommandFailure::TimedOut));
        let host = connect(Target::resolve("gpu01", None, Timeouts::default()), runner);
        assert_eq!(
            host.probe().await.unwrap_err(),
            ProbeFailure::Inventory(CommandFailure::TimedOut)
        );

        let runner = Arc::new(ScriptedRunner::new().on("nvidia-smi", "<gpu>"));
        let host = connect(Target::resolve("gpu01", None, Timeouts::default()), runner);
        assert!(matches!(
            host.probe().await.unwrap_err(),
            ProbeFailure::Parse(ParseError::Malformed(_))
        ));
    }
}
