//! Errors raised while resolving a monitor document.

use thiserror::Error;

use crate::item::{ResolveError, ValueError};
use crate::topology::UnknownName;
use crate::variables::VariableError;

/// Errors raised while parsing or resolving monitoring services.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MonitorError {
    /// Raised when the monitor document is missing or blank.
    #[error("monitor document is empty")]
    EmptyTopology,
    /// Raised when the monitor document is not valid YAML.
    #[error("failed to parse monitor document: {0}")]
    Parse(String),
    /// Raised when there are no storage services to monitor.
    #[error("topology declares no services to monitor")]
    NoServices,
    /// Raised for unrecognised monitor role names.
    #[error(transparent)]
    UnknownName(#[from] UnknownName),
    /// Raised when a config value has an unsupported shape.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Raised when a section is malformed.
    #[error("invalid {section}: {message}")]
    InvalidSection {
        /// Section or field path.
        section: String,
        /// What is wrong with it.
        message: String,
    },
    /// Raised when the sync agent has no data directory to write into.
    #[error("monitor_sync on {host} requires data_dir")]
    MissingDataDir {
        /// Host the sync agent would run on.
        host: String,
    },
    /// Raised when a placeholder cannot be rendered.
    #[error("failed to render {key} for {id}: {source}")]
    Variable {
        /// Monitor service id.
        id: String,
        /// Config key being rendered.
        key: String,
        /// Underlying rendering error.
        #[source]
        source: VariableError,
    },
    /// Raised when a monitor or storage value cannot be resolved.
    #[error("failed to resolve service {id}: {source}")]
    Resolve {
        /// Service id.
        id: String,
        /// Underlying resolution error.
        #[source]
        source: ResolveError,
    },
    /// Raised when scrape targets cannot be serialised.
    #[error("failed to encode scrape targets: {0}")]
    Targets(String),
}

impl MonitorError {
    pub(crate) fn invalid(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSection {
            section: section.into(),
            message: message.into(),
        }
    }

    pub(crate) fn resolve(id: &str, source: ResolveError) -> Self {
        Self::Resolve {
            id: id.to_owned(),
            source,
        }
    }
}
