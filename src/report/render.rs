//! Per-server status rendering

use crate::gpu::DeviceRecord;
use crate::host::{NameMap, Owner, OwnerMap};
use std::collections::BTreeSet;
use std::fmt;

/// What a device line says about occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// No process holds the device
    Free,
    /// Sorted, deduplicated occupant labels
    UsedBy(Vec<String>),
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("Free"),
            Self::UsedBy(occupants) => write!(f, "Used by {}", occupants.join(", ")),
        }
    }
}

/// One rendered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLine {
    /// Device index on its host
    pub index: usize,
    /// Product name
    pub model: String,
    /// Occupancy
    pub status: DeviceStatus,
}

/// Outcome of one server for one pass
///
/// Printed as a single block so servers never interleave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReport {
    /// Probe or owner lookup failed
    Unreachable {
        /// Server label
        server: String,
        /// Failure description
        reason: String,
    },
    /// Free-only mode: the devices nobody holds
    FreeDevices {
        /// Server label
        server: String,
        /// Free devices
        devices: Vec<DeviceLine>,
    },
    /// Listing mode: every device that survived filtering
    Devices {
        /// Server label
        server: String,
        /// Device lines
        lines: Vec<DeviceLine>,
    },
}

impl ServerReport {
    /// Server label
    pub fn server(&self) -> &str {
        match self {
            Self::Unreachable { server, .. }
            | Self::FreeDevices { server, .. }
            | Self::Devices { server, .. } => server,
        }
    }

    /// Whether the server could not be probed
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl fmt::Display for ServerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { server, reason } => {
                write!(f, "Server {}: unreachable ({})", server, reason)
            }
            Self::FreeDevices { server, devices } if devices.is_empty() => {
                write!(f, "Server {}: No free GPUs :(", server)
            }
            Self::FreeDevices { server, devices } => {
                write!(f, "Server {}:", server)?;
                for device in devices {
                    write!(f, "\n\tGPU {}, {}", device.index, device.model)?;
                }
                Ok(())
            }
            Self::Devices { server, lines } => {
                write!(f, "Server {}:", server)?;
                for line in lines {
                    write!(f, "\n\tGPU {} ({}): {}", line.index, line.model, line.status)?;
                }
                Ok(())
            }
        }
    }
}

/// Devices with no occupant
pub fn free_lines(devices: &[DeviceRecord]) -> Vec<DeviceLine> {
    devices
        .iter()
        .filter(|d| d.is_free())
        .map(|d| DeviceLine {
            index: d.index,
            model: d.model.clone(),
            status: DeviceStatus::Free,
        })
        .collect()
}

/// Owners of the processes on one device
pub fn device_owners(device: &DeviceRecord, owners: &OwnerMap) -> BTreeSet<Owner> {
    device.pids.iter().map(|pid| owners.owner(pid)).collect()
}

/// Every device with its occupants
///
/// With `filter_user`, only devices held by that user are kept; free devices
/// never match a filter. With `names`, occupants render as `user (Name)`.
pub fn device_lines(
    devices: &[DeviceRecord],
    owners: &OwnerMap,
    names: Option<&NameMap>,
    filter_user: Option<&str>,
) -> Vec<DeviceLine> {
    devices
        .iter()
        .filter_map(|device| {
            let occupants = device_owners(device, owners);
            if let Some(user) = filter_user {
                if !occupants.contains(&Owner::User(user.to_string())) {
                    return None;
                }
            }

            let status = if device.is_free() {
                DeviceStatus::Free
            } else {
                DeviceStatus::UsedBy(
                    occupants
                        .iter()
                        .map(|owner| occupant_label(owner, names))
                        .collect(),
                )
            };

            Some(DeviceLine {
                index: device.index,
                model: device.model.clone(),
                status,
            })
        })
        .collect()
}

fn occupant_label(owner: &Owner, names: Option<&NameMap>) -> String {
    match (owner, names) {
        (Owner::User(user), Some(names)) => format!("{} ({})", user, names.display_name(user)),
        _ => owner.to_string(),
    }
}
