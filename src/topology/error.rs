//! Errors raised while resolving a topology document.

use thiserror::Error;

use crate::item::{ResolveError, ValueError};
use crate::variables::VariableError;

use super::{Kind, MdsVersion, Role, UnknownName};

/// Errors raised while parsing or resolving a topology.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyError {
    /// Raised when the document has no content.
    #[error("topology document is empty")]
    Empty,
    /// Raised when the document is not valid YAML.
    #[error("failed to parse topology: {0}")]
    Parse(String),
    /// Raised when a document that must describe services describes none.
    #[error("topology declares no services")]
    NoServices,
    /// Raised for unrecognised kind, role or version names.
    #[error(transparent)]
    UnknownName(#[from] UnknownName),
    /// Raised when a role section does not belong to the topology's kind.
    #[error("role {role} is not supported by {kind} with mds {version}")]
    UnsupportedRole {
        /// Topology kind.
        kind: Kind,
        /// Offending role.
        role: Role,
        /// Active metadata server generation.
        version: MdsVersion,
    },
    /// Raised when a config value has an unsupported shape.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Raised when a section is missing or malformed.
    #[error("invalid {section}: {message}")]
    InvalidSection {
        /// Section or field path.
        section: String,
        /// What is wrong with it.
        message: String,
    },
    /// Raised when a placeholder cannot be rendered.
    #[error("failed to render {key} for {service}: {source}")]
    Variable {
        /// Service id, or the section when no id exists yet.
        service: String,
        /// Config key being rendered.
        key: String,
        /// Underlying rendering error.
        #[source]
        source: VariableError,
    },
    /// Raised when an item value cannot be resolved.
    #[error("failed to resolve service {id}: {source}")]
    Resolve {
        /// Service id.
        id: String,
        /// Underlying resolution error.
        #[source]
        source: ResolveError,
    },
    /// Raised when two services hash to the same id.
    #[error("service id {id} is assigned twice")]
    DuplicateId {
        /// Colliding id.
        id: String,
    },
}

impl TopologyError {
    pub(crate) fn invalid(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSection {
            section: section.into(),
            message: message.into(),
        }
    }
}
