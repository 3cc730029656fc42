//! Username to display name resolution

use crate::error::ResolutionFailure;
use crate::exec::{CommandRunner, Target};
use std::collections::HashMap;

/// Display name used for any user that could not be resolved
pub const UNKNOWN_NAME: &str = "Unknown";

/// Username to display name, scoped to one server's probe
///
/// Lookups never fail: missing users read as [`UNKNOWN_NAME`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    names: HashMap<String, String>,
}

impl NameMap {
    /// Empty map; every lookup yields the sentinel
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a display name
    pub fn insert(&mut self, user: impl Into<String>, name: impl Into<String>) {
        self.names.insert(user.into(), name.into());
    }

    /// Display name for `user`
    pub fn display_name(&self, user: &str) -> &str {
        self.names
            .get(user)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_NAME)
    }

    /// Number of resolved users
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// No user resolved
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Full name out of a GECOS field (`Full Name,Room,Phone,...`)
///
/// Empty results collapse to `None` so the caller falls back to the sentinel.
pub fn display_name_from_gecos(gecos: &str) -> Option<String> {
    let name = gecos.split(',').next().unwrap_or_default().trim();
    if name.is_empty() || name == UNKNOWN_NAME {
        None
    } else {
        Some(name.to_string())
    }
}

/// Pair each requested user with its output line, in order
pub fn parse_name_lookup(users: &[String], output: &str) -> NameMap {
    let mut map = NameMap::new();
    for (user, line) in users.iter().zip(output.lines()) {
        if let Some(name) = display_name_from_gecos(line) {
            map.insert(user.clone(), name);
        }
    }
    map
}

/// Resolve `users` through the remote batched lookup
pub async fn resolve_names_remote(
    runner: &dyn CommandRunner,
    target: &Target,
    users: &[String],
) -> Result<NameMap, ResolutionFailure> {
    if users.is_empty() {
        return Ok(NameMap::new());
    }

    let command = target.name_lookup_command(users);
    let raw = runner
        .run(&command, target.budget())
        .await
        .map_err(ResolutionFailure::Unreachable)?;
    Ok(parse_name_lookup(users, &String::from_utf8_lossy(&raw)))
}

/// Resolve `users` from this machine's account database
///
/// Unknown accounts are left out of the map.
#[cfg(unix)]
pub fn resolve_names_local(users: &[String]) -> NameMap {
    use nix::unistd::User;

    let mut map = NameMap::new();
    for user in users {
        match User::from_name(user) {
            Ok(Some(account)) => {
                let gecos = account.gecos.to_string_lossy();
                if let Some(name) = display_name_from_gecos(&gecos) {
                    map.insert(user.clone(), name);
                }
            }
            Ok(None) => tracing::debug!("No local account for '{}'", user),
            Err(e) => tracing::debug!("Account lookup for '{}' failed: {}", user, e),
        }
    }
    map
}

#[cfg(not(unix))]
pub fn resolve_names_local(_users: &[String]) -> NameMap {
    NameMap::new()
}
