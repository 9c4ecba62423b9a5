//! Monitoring services derived from a topology and a monitor document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::context::Context;
use crate::item::{Configured, ItemSet, ResolveError, Resolver, Value};
use crate::topology::{Kind, UnknownName};
use crate::variables::Variables;

mod error;
mod items;
mod parse;

pub use error::MonitorError;
pub use items::MonitorItems;
pub use parse::{ScrapeTarget, parse_monitor, scrape_targets};

/// Auxiliary monitoring role.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorRole {
    /// Agent propagating cluster config into the monitoring stack.
    MonitorSync,
    /// Host metrics exporter.
    NodeExporter,
    /// Metrics collector.
    Prometheus,
    /// Dashboard.
    Grafana,
}

impl MonitorRole {
    /// Every monitor role in startup order.
    pub const ALL: [Self; 4] = [
        Self::MonitorSync,
        Self::NodeExporter,
        Self::Prometheus,
        Self::Grafana,
    ];

    /// Name used in documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MonitorSync => "monitor_sync",
            Self::NodeExporter => "node_exporter",
            Self::Prometheus => "prometheus",
            Self::Grafana => "grafana",
        }
    }

    /// Startup position; lower starts first.
    #[must_use]
    pub const fn order(self) -> u8 {
        match self {
            Self::MonitorSync => 0,
            Self::NodeExporter => 1,
            Self::Prometheus => 2,
            Self::Grafana => 3,
        }
    }

    /// Upstream image.
    #[must_use]
    pub const fn image(self) -> &'static str {
        match self {
            Self::MonitorSync => "dingodatabase/dingo-monitor-sync:latest",
            Self::NodeExporter => "prom/node-exporter:latest",
            Self::Prometheus => "prom/prometheus:latest",
            Self::Grafana => "grafana/grafana:latest",
        }
    }

    /// Port the role listens on unless configured.
    #[must_use]
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::MonitorSync => None,
            Self::NodeExporter => Some(9100),
            Self::Prometheus => Some(9090),
            Self::Grafana => Some(3000),
        }
    }

    /// Container directory the host data directory is mounted on.
    #[must_use]
    pub const fn container_data_dir(self) -> Option<&'static str> {
        match self {
            Self::MonitorSync => Some("/dingo-monitor/data"),
            Self::NodeExporter => None,
            Self::Prometheus => Some("/prometheus"),
            Self::Grafana => Some("/var/lib/grafana"),
        }
    }
}

impl FromStr for MonitorRole {
    type Err = UnknownName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownName {
                what: "monitor role",
                value: value.to_owned(),
            })
    }
}

impl fmt::Display for MonitorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitoring service on one host.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    kind: Kind,
    id: String,
    role: MonitorRole,
    host: String,
    hostname: String,
    host_sequence: usize,
    config: BTreeMap<String, Value>,
    variables: Variables,
    context: Arc<Context>,
    items: Arc<MonitorItems>,
}

/// Serialisable summary of a monitoring service.
#[derive(Clone, Debug, Serialize)]
pub struct MonitorView {
    /// Stable service id.
    pub id: String,
    /// Product family being monitored.
    pub kind: Kind,
    /// Monitor role.
    pub role: MonitorRole,
    /// Host identifier.
    pub host: String,
    /// Resolved hostname.
    pub hostname: String,
    /// Position of the host within the role's list.
    pub host_sequence: usize,
    /// Startup position.
    pub order: u8,
    /// Name of the service container.
    pub container_name: String,
    /// Resolved non-excluded values.
    pub config: BTreeMap<String, String>,
}

impl Configured for MonitorConfig {
    fn item_set(&self) -> &ItemSet<Self> {
        self.items.item_set()
    }

    fn raw_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

impl MonitorConfig {
    /// Product family being monitored.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Stable id derived from role, host and sequence.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Monitor role.
    #[must_use]
    pub const fn role(&self) -> MonitorRole {
        self.role
    }

    /// Host identifier.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Hostname resolved through the context.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Position of the host within the role's list.
    #[must_use]
    pub const fn host_sequence(&self) -> usize {
        self.host_sequence
    }

    /// Startup position; lower starts first.
    #[must_use]
    pub const fn order(&self) -> u8 {
        self.role.order()
    }

    /// Rendered raw config including derived wiring keys.
    #[must_use]
    pub const fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    /// Variables available to this instance.
    #[must_use]
    pub const fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Item registry backing the accessors.
    #[must_use]
    pub fn items(&self) -> &MonitorItems {
        &self.items
    }

    /// Starts a resolution chain for this instance.
    #[must_use]
    pub const fn resolver(&self) -> Resolver<'_, Self> {
        Resolver::new(self)
    }

    /// Container image.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn container_image(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.container_image)
    }

    /// Listen port; zero for roles that do not listen.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value is not a valid port.
    pub fn listen_port(&self) -> Result<u16, ResolveError> {
        self.resolver().port(self.items.listen_port)
    }

    /// Host data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn data_dir(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.data_dir)
    }

    /// Host log directory.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn log_dir(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.log_dir)
    }

    /// Metrics retention period.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn retention_time(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.retention_time)
    }

    /// Metrics retention size.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn retention_size(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.retention_size)
    }

    /// Dashboard admin user.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn username(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.username)
    }

    /// Dashboard admin password.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn password(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.password)
    }

    /// Scrape targets as JSON; empty for roles other than the collector.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn targets(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.targets)
    }

    /// Collector address used as the dashboard data source.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn prometheus_addr(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.prometheus_addr)
    }

    /// Collector port used as the dashboard data source.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value is not a valid port.
    pub fn prometheus_listen_port(&self) -> Result<u16, ResolveError> {
        self.resolver().port(self.items.prometheus_listen_port)
    }

    /// Id of the storage service whose config the sync agent follows.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value has the wrong type.
    pub fn origin_config_id(&self) -> Result<String, ResolveError> {
        self.resolver().string(self.items.origin_config_id)
    }

    /// Name of the service container.
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("{}-{}-{}", self.kind, self.role.as_str().replace('_', "-"), self.id)
    }

    /// Builds a serialisable summary.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when an item fails to resolve.
    pub fn view(&self) -> Result<MonitorView, ResolveError> {
        let resolver = self.resolver();
        let mut config = BTreeMap::new();
        for (handle, item) in self.item_set().entries() {
            if item.excluded() {
                continue;
            }
            if let Some(value) = resolver.value(handle)?
                && !value.is_zero()
            {
                config.insert(item.key().to_owned(), value.to_string());
            }
        }
        Ok(MonitorView {
            id: self.id.clone(),
            kind: self.kind,
            role: self.role,
            host: self.host.clone(),
            hostname: self.hostname.clone(),
            host_sequence: self.host_sequence,
            order: self.order(),
            container_name: self.container_name(),
            config,
        })
    }
}
