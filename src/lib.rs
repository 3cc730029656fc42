//! # GpuFleet - GPU occupancy across a fleet of servers
//!
//! GpuFleet answers "which GPUs are free, and who holds the others?" for a
//! set of shared GPU servers. Each server is probed locally or over SSH with
//! `nvidia-smi -q -x`; occupying processes are mapped to their owners with
//! `ps`, optionally to real names, and optionally pinned to the CPUs closest
//! to their GPU.
//!
//! ## Features
//!
//! - **Bounded fan-out**: servers are probed concurrently, output stays in input order
//! - **Two timeout layers**: SSH connect timeout plus remote `timeout` wrapper
//! - **Owner correlation**: one batched `ps` call per server
//! - **Real names**: local account database or one batched remote lookup
//! - **CPU pinning**: per-GPU CPU sets from a JSON file
//!
//! ## Quick Start
//!
//! ```no_run
//! use gpufleet::exec::{ShellRunner, Target, Timeouts};
//! use gpufleet::report::{FleetReporter, ReportMode, ReportOptions};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let options = ReportOptions {
//!     mode: ReportMode::Listing,
//!     ..Default::default()
//! };
//! let reporter = FleetReporter::new(Arc::new(ShellRunner::new()), options);
//!
//! let targets = vec![
//!     Target::resolve("localhost", None, Timeouts::default()),
//!     Target::resolve("gpu01", Some("alice"), Timeouts::default()),
//! ];
//! for report in reporter.run_pass(&targets).await {
//!     println!("{}", report);
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod exec;
pub mod gpu;
pub mod host;
pub mod report;

// Re-export commonly used types
pub use config::{CliArgs, MonitorConfig};
pub use error::{FleetError, Result};
pub use report::{FleetReporter, ReportOptions, ServerReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use gpufleet::prelude::*;
    //! ```

    pub use crate::config::{load_affinity_config, load_server_list, CliArgs, MonitorConfig};
    pub use crate::error::{FleetError, Result};
    pub use crate::exec::{CommandRunner, ShellRunner, Target, Timeouts};
    pub use crate::gpu::{parse_inventory, DeviceRecord};
    pub use crate::host::{AffinityConfig, CpuSet, GpuHost, NameMap, OwnerMap};
    pub use crate::report::{FleetReporter, ReportMode, ReportOptions, ServerReport};
}
