//! Host directory and shared lookups used during resolution.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

/// Context key selecting the filesystem metadata server generation.
pub const MDS_VERSION_KEY: &str = "mds_version";

const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while loading the host inventory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostsError {
    /// Raised when the inventory is not valid YAML of the expected shape.
    #[error("failed to parse host inventory: {0}")]
    Parse(String),
    /// Raised when a host identifier appears twice.
    #[error("host {host} is declared more than once")]
    Duplicate {
        /// Repeated host identifier.
        host: String,
    },
    /// Raised when an entry has an empty host identifier.
    #[error("host inventory entry {index} is missing a host identifier")]
    MissingHost {
        /// Zero-based position in the inventory.
        index: usize,
    },
}

/// One machine from the host inventory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct HostEntry {
    /// Identifier referenced by topology documents.
    pub host: String,
    /// Resolvable hostname or address.
    pub hostname: String,
    /// Login user; falls back to the executor default when absent.
    #[serde(default)]
    pub user: Option<String>,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Deserialize)]
struct Inventory {
    #[serde(default)]
    hosts: Vec<HostEntry>,
}

/// Maps host identifiers to their entries and carries cross-cutting facts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Context {
    hosts: BTreeMap<String, HostEntry>,
    values: BTreeMap<String, String>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a host inventory document.
    ///
    /// An empty document yields an empty context.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError`] when the YAML is malformed or an entry is
    /// duplicated or incomplete.
    pub fn from_inventory(document: &str) -> Result<Self, HostsError> {
        let mut context = Self::new();
        if document.trim().is_empty() {
            return Ok(context);
        }

        let inventory: Inventory =
            serde_yaml::from_str(document).map_err(|err| HostsError::Parse(err.to_string()))?;
        for (index, entry) in inventory.hosts.into_iter().enumerate() {
            if entry.host.trim().is_empty() {
                return Err(HostsError::MissingHost { index });
            }
            context.add_host(entry)?;
        }
        Ok(context)
    }

    /// Adds one host entry.
    ///
    /// # Errors
    ///
    /// Returns [`HostsError::Duplicate`] when the host is already known.
    pub fn add_host(&mut self, entry: HostEntry) -> Result<(), HostsError> {
        if self.hosts.contains_key(&entry.host) {
            return Err(HostsError::Duplicate { host: entry.host });
        }
        self.hosts.insert(entry.host.clone(), entry);
        Ok(())
    }

    /// Returns the hostname for `host`, or `host` itself when the inventory
    /// does not mention it.
    #[must_use]
    pub fn hostname<'a>(&'a self, host: &'a str) -> &'a str {
        self.hosts
            .get(host)
            .map_or(host, |entry| entry.hostname.as_str())
    }

    /// Returns the inventory entry for `host`.
    #[must_use]
    pub fn host(&self, host: &str) -> Option<&HostEntry> {
        self.hosts.get(host)
    }

    /// Stores a shared fact.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Looks up a shared fact.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = "
hosts:
  - host: host1
    hostname: 10.0.0.1
    user: dingo
  - host: host2
    hostname: 10.0.0.2
    ssh_port: 2222
";

    #[test]
    fn inventory_maps_hosts_to_hostnames() {
        let context = Context::from_inventory(INVENTORY)
            .unwrap_or_else(|err| panic!("parse inventory: {err}"));

        assert_eq!(context.hostname("host1"), "10.0.0.1");
        assert_eq!(context.hostname("unknown"), "unknown");
        let entry = context.host("host2").expect("host2 should be present");
        assert_eq!(entry.ssh_port, 2222);
        assert_eq!(entry.user, None);
        assert_eq!(
            context.host("host1").map(|entry| entry.ssh_port),
            Some(DEFAULT_SSH_PORT)
        );
    }

    #[test]
    fn inventory_rejects_duplicates() {
        let document = "
hosts:
  - { host: host1, hostname: a }
  - { host: host1, hostname: b }
";
        let err = Context::from_inventory(document).expect_err("duplicate host");
        assert_eq!(
            err,
            HostsError::Duplicate {
                host: String::from("host1")
            }
        );
    }

    #[test]
    fn empty_inventory_is_allowed() {
        let context = Context::from_inventory("  \n").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(context, Context::new());
    }

    #[test]
    fn lookup_returns_shared_values() {
        let mut context = Context::new();
        context.set(MDS_VERSION_KEY, "v1");
        assert_eq!(context.lookup(MDS_VERSION_KEY), Some("v1"));
        assert_eq!(context.lookup("absent"), None);
    }
}
