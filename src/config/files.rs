//! Server list and CPU affinity file loading

use crate::error::ConfigLoadFailure;
use crate::host::{AffinityConfig, AffinityPlan, CpuSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Read a newline-separated server list, skipping blank lines
pub fn load_server_list(path: &Path) -> Result<Vec<String>, ConfigLoadFailure> {
    tracing::debug!("Using server file {}", path.display());
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigLoadFailure::read(path, e))?;
    Ok(parse_server_list(&content))
}

/// Parse server list content
pub fn parse_server_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

// Per-server entry; both the flat and the wrapped layout are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerAffinityFile {
    Wrapped { affinities: BTreeMap<String, CpuSet> },
    Flat(BTreeMap<String, CpuSet>),
}

/// Read the CPU affinity file
///
/// ```json
/// { "gpu01": { "0": [0, 1, 2, 3], "1": [4, 5, 6, 7] },
///   "gpu02": { "affinities": { "0": [0, 1] } } }
/// ```
pub fn load_affinity_config(path: &Path) -> Result<AffinityConfig, ConfigLoadFailure> {
    tracing::debug!("Using taskset file {}", path.display());
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigLoadFailure::read(path, e))?;
    parse_affinity_config(&content).map_err(|e| ConfigLoadFailure::parse(path, e))
}

/// Parse affinity file content
pub fn parse_affinity_config(content: &str) -> Result<AffinityConfig, String> {
    let servers: BTreeMap<String, ServerAffinityFile> =
        serde_json::from_str(content).map_err(|e| e.to_string())?;

    let mut config = AffinityConfig::new();
    for (server, entry) in servers {
        let devices = match entry {
            ServerAffinityFile::Wrapped { affinities } => affinities,
            ServerAffinityFile::Flat(devices) => devices,
        };
        for index in devices.keys() {
            if index.parse::<usize>().is_err() {
                return Err(format!(
                    "server '{}': device key '{}' is not a GPU index",
                    server, index
                ));
            }
        }
        config.insert(server, AffinityPlan::new(devices));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Target, Timeouts};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_server_list_skips_blank_lines() {
        let servers = parse_server_list("gpu01\n\n  gpu02  \n\t\nalice@gpu03\n");
        assert_eq!(servers, vec!["gpu01", "gpu02", "alice@gpu03"]);
    }

    #[test]
    fn test_load_server_list_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gpu01\n\ngpu02").unwrap();
        let servers = load_server_list(file.path()).unwrap();
        assert_eq!(servers, vec!["gpu01", "gpu02"]);
    }

    #[test]
    fn test_missing_server_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.txt");
        let err = load_server_list(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadFailure::Read { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn test_affinity_layouts() {
        let config = parse_affinity_config(
            r#"{
                "gpu01": { "0": [0, 1], "1": [3, 2] },
                "gpu02": { "affinities": { "0": [8] } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.len(), 2);

        let gpu01 = Target::resolve("gpu01", None, Timeouts::default());
        let plan = config.plan_for(&gpu01).unwrap();
        assert_eq!(plan.cpus_for(1).unwrap().to_list_string(), "2,3");

        let gpu02 = Target::resolve("gpu02", None, Timeouts::default());
        let plan = config.plan_for(&gpu02).unwrap();
        assert_eq!(plan.cpus_for(0).unwrap().to_list_string(), "8");
    }

    #[test]
    fn test_affinity_rejects_bad_index() {
        assert!(parse_affinity_config(r#"{ "gpu01": { "first": [0] } }"#).is_err());
        assert!(parse_affinity_config(r#"{ "gpu01": [0, 1] }"#).is_err());
        assert!(parse_affinity_config("not json").is_err());
    }

    #[test]
    fn test_load_affinity_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "gpu01": {{ "0": [0, 1] }} }}"#).unwrap();
        let config = load_affinity_config(file.path()).unwrap();
        assert_eq!(config.len(), 1);

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, "{{").unwrap();
        assert!(matches!(
            load_affinity_config(bad.path()).unwrap_err(),
            ConfigLoadFailure::Parse { .. }
        ));
    }
}
