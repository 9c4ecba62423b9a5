//! Product kinds, service roles, and the metadata server generation.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::context::{Context, MDS_VERSION_KEY};

/// Raised when a kind, role, or version name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown {what}: {value}")]
pub struct UnknownName {
    /// Category being parsed.
    pub what: &'static str,
    /// Text that failed to parse.
    pub value: String,
}

/// Product family a topology deploys.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Kind {
    /// Distributed filesystem.
    #[serde(rename = "dingofs")]
    Filesystem,
    /// Distributed key-value and vector store.
    #[serde(rename = "dingo-store")]
    Store,
}

impl Kind {
    /// Name used in documents and container names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "dingofs",
            Self::Store => "dingo-store",
        }
    }

    /// Roles a topology of this kind may declare.
    #[must_use]
    pub const fn roles(self, version: MdsVersion) -> &'static [Role] {
        match (self, version) {
            (Self::Filesystem, MdsVersion::V1) => {
                &[Role::Etcd, Role::Mds, Role::Metaserver, Role::Proxy]
            }
            (Self::Filesystem, MdsVersion::V2) => {
                &[Role::Coordinator, Role::Store, Role::Mds, Role::Proxy]
            }
            (Self::Store, _) => &[
                Role::Coordinator,
                Role::Store,
                Role::Index,
                Role::Document,
                Role::Executor,
            ],
        }
    }
}

impl FromStr for Kind {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dingofs" => Ok(Self::Filesystem),
            "dingo-store" => Ok(Self::Store),
            other => Err(UnknownName {
                what: "kind",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation of the filesystem metadata service.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MdsVersion {
    /// etcd-backed metadata service with metaservers.
    V1,
    /// Metadata service backed by the store family.
    #[default]
    V2,
}

impl MdsVersion {
    /// Reads the version selector from `context`, defaulting to
    /// [`MdsVersion::V2`] when absent.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownName`] for unrecognised selector values.
    pub fn from_context(context: &Context) -> Result<Self, UnknownName> {
        context
            .lookup(MDS_VERSION_KEY)
            .map_or(Ok(Self::default()), str::parse)
    }

    /// Name used in documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl FromStr for MdsVersion {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(UnknownName {
                what: "mds version",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for MdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of deployed service.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Consensus key-value store used by v1 metadata services.
    Etcd,
    /// Filesystem metadata server.
    Mds,
    /// v1 metadata partition server.
    Metaserver,
    /// Store cluster coordinator.
    Coordinator,
    /// Store data node.
    Store,
    /// Vector index node.
    Index,
    /// Document index node.
    Document,
    /// SQL executor.
    Executor,
    /// Filesystem gateway proxy.
    Proxy,
}

impl Role {
    /// Every deploy role in section order.
    pub const ALL: [Self; 9] = [
        Self::Etcd,
        Self::Mds,
        Self::Metaserver,
        Self::Coordinator,
        Self::Store,
        Self::Index,
        Self::Document,
        Self::Executor,
        Self::Proxy,
    ];

    /// Name used in documents, variables and container names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Etcd => "etcd",
            Self::Mds => "mds",
            Self::Metaserver => "metaserver",
            Self::Coordinator => "coordinator",
            Self::Store => "store",
            Self::Index => "index",
            Self::Document => "document",
            Self::Executor => "executor",
            Self::Proxy => "proxy",
        }
    }

    /// Whether monitoring treats this role as part of the storage plane.
    #[must_use]
    pub const fn is_primary_storage(self) -> bool {
        !matches!(self, Self::Executor | Self::Proxy)
    }

    /// Whether the role replicates through its own raft groups.
    #[must_use]
    pub const fn uses_raft(self) -> bool {
        matches!(
            self,
            Self::Coordinator | Self::Store | Self::Index | Self::Document
        )
    }

    /// First listen port assigned on a host.
    #[must_use]
    pub const fn base_port(self) -> u16 {
        match self {
            Self::Etcd => 2380,
            Self::Mds => 6700,
            Self::Metaserver => 6800,
            Self::Coordinator => 22001,
            Self::Store => 20001,
            Self::Index => 21001,
            Self::Document => 23001,
            Self::Executor => 8765,
            Self::Proxy => 10000,
        }
    }

    /// Topology section holding this role's services.
    #[must_use]
    pub fn section(self) -> String {
        format!("{}_services", self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownName {
                what: "role",
                value: value.to_owned(),
            })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(MdsVersion::V1, Role::Etcd, true)]
    #[case(MdsVersion::V1, Role::Coordinator, false)]
    #[case(MdsVersion::V2, Role::Coordinator, true)]
    #[case(MdsVersion::V2, Role::Metaserver, false)]
    fn filesystem_roles_follow_version(
        #[case] version: MdsVersion,
        #[case] role: Role,
        #[case] allowed: bool,
    ) {
        assert_eq!(Kind::Filesystem.roles(version).contains(&role), allowed);
    }

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("chunkserver".parse::<Role>().is_err());
    }

    #[test]
    fn version_defaults_to_v2() {
        let mut context = Context::new();
        assert_eq!(MdsVersion::from_context(&context), Ok(MdsVersion::V2));
        context.set(MDS_VERSION_KEY, "v1");
        assert_eq!(MdsVersion::from_context(&context), Ok(MdsVersion::V1));
        context.set(MDS_VERSION_KEY, "v3");
        assert!(MdsVersion::from_context(&context).is_err());
    }
}
