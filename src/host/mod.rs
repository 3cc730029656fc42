//! Per-server probe steps
//!
//! - Owner correlation (`ps`)
//! - Display name resolution (account database or `getent` over SSH)
//! - CPU affinity enforcement (`sched_setaffinity` or `taskset` over SSH)
//! - The [`GpuHost`] capability set tying them to a target

pub mod affinity;
pub mod names;
pub mod owners;
mod strategy;

pub use affinity::{AffinityConfig, AffinityPlan, CpuSet};
pub use names::{NameMap, UNKNOWN_NAME};
pub use owners::{Owner, OwnerMap};
pub use strategy::{connect, GpuHost, LocalHost, RemoteHost};
