//! Parser for the `nvidia-smi -q -x` document
//!
//! Only the fields the reporter needs are modelled; everything else in the
//! document is ignored.

use crate::error::ParseError;
use quick_xml::de::from_str;
use serde::Deserialize;

/// Model shown when a device has no `product_name`
pub const UNKNOWN_MODEL: &str = "Unknown";

// Root `<nvidia_smi_log>` element.
#[derive(Debug, Deserialize)]
struct NvidiaSmiLog {
    #[serde(rename = "gpu", default)]
    gpus: Vec<GpuXml>,
}

// One `<gpu>` node.
#[derive(Debug, Deserialize)]
struct GpuXml {
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    processes: Vec<ProcessesXml>,
}

// A `<processes>` group.
#[derive(Debug, Default, Deserialize)]
struct ProcessesXml {
    #[serde(rename = "process_info", default)]
    process_info: Vec<ProcessInfoXml>,
}

#[derive(Debug, Deserialize)]
struct ProcessInfoXml {
    #[serde(default)]
    pid: Option<String>,
}

/// One accelerator as seen by a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Position in the probe output, starting at 0
    pub index: usize,
    /// Product name
    pub model: String,
    /// Process IDs occupying the device, in document order
    pub pids: Vec<String>,
}

impl DeviceRecord {
    /// No process holds this device
    pub fn is_free(&self) -> bool {
        self.pids.is_empty()
    }
}

/// Parse an accelerator status document
///
/// Indices follow document order and ignore any id carried by the data.
/// Only the first `<processes>` group of each device is read. Duplicate PIDs
/// are kept as reported.
pub fn parse_inventory(xml: &str) -> Result<Vec<DeviceRecord>, ParseError> {
    let log: NvidiaSmiLog = from_str(xml).map_err(|e| ParseError::Malformed(e.to_string()))?;

    Ok(log
        .gpus
        .into_iter()
        .enumerate()
        .map(|(index, gpu)| {
            let model = gpu
                .product_name
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| UNKNOWN_MODEL.to_string());

            let pids = gpu
                .processes
                .into_iter()
                .next()
                .map(|group| {
                    group
                        .process_info
                        .into_iter()
                        .filter_map(|p| p.pid)
                        .map(|pid| pid.trim().to_string())
                        .filter(|pid| !pid.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            DeviceRecord { index, model, pids }
        })
        .collect())
}

/// Parse raw command output, rejecting invalid UTF-8
pub fn parse_inventory_bytes(raw: &[u8]) -> Result<Vec<DeviceRecord>, ParseError> {
    let xml = std::str::from_utf8(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
    parse_inventory(xml)
}

/// All PIDs across devices, in device order
pub fn all_pids(devices: &[DeviceRecord]) -> Vec<String> {
    devices.iter().flat_map(|d| d.pids.iter().cloned()).collect()
}
