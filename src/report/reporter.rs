//! Fleet-wide probe orchestration
//!
//! Each server runs through
//! `Probing -> [CorrelatingOwners] -> [ResolvingNames] -> [EnforcingAffinity] -> Rendered`
//! or drops to `Unreachable`. Servers are probed concurrently with a bounded
//! fan-out; results come back in input order.

use super::render::{device_lines, free_lines, ServerReport};
use crate::error::ProbeFailure;
use crate::exec::{CommandRunner, Target};
use crate::gpu::{all_pids, DeviceRecord};
use crate::host::{connect, AffinityConfig, AffinityPlan, GpuHost, NameMap, OwnerMap};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which devices a report shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMode {
    /// Only free devices, no owner lookup
    #[default]
    FreeOnly,
    /// Every device with its occupants
    Listing,
}

/// Rendering options shared by every server in a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Free-only or full listing
    pub mode: ReportMode,
    /// Show only devices held by this user
    pub filter_user: Option<String>,
    /// Resolve usernames to display names
    pub translate_names: bool,
}

/// Runs one pass over the fleet
#[derive(Clone)]
pub struct FleetReporter {
    runner: Arc<dyn CommandRunner>,
    options: Arc<ReportOptions>,
    affinity: Option<Arc<AffinityConfig>>,
    parallelism: usize,
}

impl FleetReporter {
    /// Create a reporter with affinity enforcement disabled
    pub fn new(runner: Arc<dyn CommandRunner>, options: ReportOptions) -> Self {
        Self {
            runner,
            options: Arc::new(options),
            affinity: None,
            parallelism: default_parallelism(),
        }
    }

    /// Enable affinity enforcement with `config`
    pub fn with_affinity(mut self, config: AffinityConfig) -> Self {
        self.affinity = Some(Arc::new(config));
        self
    }

    /// Number of servers probed at the same time
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Probe every target and return one report per target, in input order
    pub async fn run_pass(&self, targets: &[Target]) -> Vec<ServerReport> {
        stream::iter(targets.iter().cloned())
            .map(|target| {
                let server = target.name().to_string();
                let reporter = self.clone();
                let task = tokio::spawn(async move { reporter.report_target(target).await });
                async move {
                    task.await.unwrap_or_else(|e| {
                        tracing::error!("Probe task for {} failed: {}", server, e);
                        ServerReport::Unreachable {
                            server,
                            reason: format!("probe task failed: {}", e),
                        }
                    })
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await
    }

    /// Probe a single target
    pub async fn report_target(&self, target: Target) -> ServerReport {
        let host = connect(target, Arc::clone(&self.runner));
        self.report_host(host.as_ref()).await
    }

    /// Run the per-server state machine against `host`
    pub async fn report_host(&self, host: &dyn GpuHost) -> ServerReport {
        let server = host.target().name().to_string();

        match self.probe_server(host).await {
            Ok(report) => report,
            Err(failure) => {
                tracing::error!("Could not reach {}: {}", server, failure);
                ServerReport::Unreachable {
                    server,
                    reason: failure.to_string(),
                }
            }
        }
    }

    async fn probe_server(&self, host: &dyn GpuHost) -> Result<ServerReport, ProbeFailure> {
        let server = host.target().name().to_string();

        // Probing
        let devices = host.probe().await?;
        tracing::debug!("{}: {} GPUs", server, devices.len());

        let listing = self.options.mode == ReportMode::Listing;

        // CorrelatingOwners
        let pids = all_pids(&devices);
        let owners = if listing && !pids.is_empty() {
            host.correlate_owners(&pids).await?
        } else {
            OwnerMap::new()
        };

        // ResolvingNames
        let names = if listing && self.options.translate_names {
            Some(self.resolve_names(host, &devices, &owners).await)
        } else {
            None
        };

        // EnforcingAffinity
        if let Some(plan) = self
            .affinity
            .as_deref()
            .and_then(|config| config.plan_for(host.target()))
        {
            enforce_affinity(host, &devices, plan).await;
        }

        // Rendered
        Ok(if listing {
            ServerReport::Devices {
                server,
                lines: device_lines(
                    &devices,
                    &owners,
                    names.as_ref(),
                    self.options.filter_user.as_deref(),
                ),
            }
        } else {
            ServerReport::FreeDevices {
                server,
                devices: free_lines(&devices),
            }
        })
    }

    async fn resolve_names(
        &self,
        host: &dyn GpuHost,
        devices: &[DeviceRecord],
        owners: &OwnerMap,
    ) -> NameMap {
        let users: Vec<String> = devices
            .iter()
            .flat_map(|d| d.pids.iter())
            .filter_map(|pid| owners.owner(pid).username().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if users.is_empty() {
            return NameMap::new();
        }

        match host.resolve_names(&users).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(
                    "{}: {}; showing names as unknown",
                    host.target(),
                    e
                );
                NameMap::new()
            }
        }
    }
}

/// Pin each unique (device, PID) pair that has a configured CPU set
///
/// Failures are logged and otherwise ignored.
async fn enforce_affinity(host: &dyn GpuHost, devices: &[DeviceRecord], plan: &AffinityPlan) {
    let mut pinned = BTreeSet::new();
    for device in devices {
        let Some(cpus) = plan.cpus_for(device.index) else {
            continue;
        };
        for pid in &device.pids {
            if !pinned.insert((device.index, pid.as_str())) {
                continue;
            }
            if let Err(e) = host.enforce_affinity(device.index, pid, cpus).await {
                tracing::warn!(
                    "{}: could not pin PID {} of GPU {} to CPUs {}: {}",
                    host.target(),
                    pid,
                    device.index,
                    cpus,
                    e
                );
            }
        }
    }
}

/// Fan-out width used when none is configured
pub fn default_parallelism() -> usize {
    (num_cpus::get() * 2).clamp(1, 16)
}
