//! Recognised keys for monitoring services.

use crate::item::{
    ItemDefault, ItemHandle, ItemSet, ResolveError, Resolver, Scope, Value, ValueKind,
};

use super::{MonitorConfig, MonitorRole};

const DEFAULT_RETENTION_TIME: &str = "15d";
const DEFAULT_RETENTION_SIZE: &str = "256GB";
const DEFAULT_GRAFANA_USER: &str = "admin";

type Computed = Result<Option<Value>, ResolveError>;

/// Item registry for [`MonitorConfig`].
#[derive(Debug)]
pub struct MonitorItems {
    set: ItemSet<MonitorConfig>,
    pub(crate) container_image: ItemHandle,
    pub(crate) listen_port: ItemHandle,
    pub(crate) data_dir: ItemHandle,
    pub(crate) log_dir: ItemHandle,
    pub(crate) retention_time: ItemHandle,
    pub(crate) retention_size: ItemHandle,
    pub(crate) username: ItemHandle,
    pub(crate) password: ItemHandle,
    pub(crate) targets: ItemHandle,
    pub(crate) prometheus_addr: ItemHandle,
    pub(crate) prometheus_listen_port: ItemHandle,
    pub(crate) origin_config_id: ItemHandle,
}

impl MonitorItems {
    /// Registers every monitor item.
    #[must_use]
    pub fn new() -> Self {
        let mut set = ItemSet::new();
        let scope = Scope::Monitor;

        let container_image = set.register(
            scope,
            "container_image",
            ValueKind::String,
            true,
            ItemDefault::computed("upstream image of the role", default_image),
        );
        let listen_port = set.register(
            scope,
            "listen_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("well-known port of the role", default_listen_port),
        );
        let data_dir = set.register(scope, "data_dir", ValueKind::String, true, ItemDefault::None);
        let log_dir = set.register(scope, "log_dir", ValueKind::String, true, ItemDefault::None);
        let retention_time = set.register(
            scope,
            "retention.time",
            ValueKind::String,
            false,
            ItemDefault::literal(DEFAULT_RETENTION_TIME),
        );
        let retention_size = set.register(
            scope,
            "retention.size",
            ValueKind::String,
            false,
            ItemDefault::literal(DEFAULT_RETENTION_SIZE),
        );
        let username = set.register(
            scope,
            "username",
            ValueKind::String,
            false,
            ItemDefault::computed("admin for grafana", default_grafana_credential),
        );
        let password = set.register(
            scope,
            "password",
            ValueKind::String,
            false,
            ItemDefault::computed("admin for grafana", default_grafana_credential),
        );
        let targets = set.register(scope, "targets", ValueKind::String, false, ItemDefault::None);
        let prometheus_addr = set.register(
            scope,
            "prometheus.addr",
            ValueKind::String,
            false,
            ItemDefault::None,
        );
        let prometheus_listen_port = set.register(
            scope,
            "prometheus.listen_port",
            ValueKind::Int,
            false,
            ItemDefault::None,
        );
        let origin_config_id = set.register(
            scope,
            "origin_config_id",
            ValueKind::String,
            false,
            ItemDefault::None,
        );

        Self {
            set,
            container_image,
            listen_port,
            data_dir,
            log_dir,
            retention_time,
            retention_size,
            username,
            password,
            targets,
            prometheus_addr,
            prometheus_listen_port,
            origin_config_id,
        }
    }

    /// Underlying item set, in registration order.
    #[must_use]
    pub const fn item_set(&self) -> &ItemSet<MonitorConfig> {
        &self.set
    }
}

impl Default for MonitorItems {
    fn default() -> Self {
        Self::new()
    }
}

fn default_image(resolver: &Resolver<'_, MonitorConfig>) -> Computed {
    Ok(Some(Value::from(resolver.instance().role().image())))
}

fn default_listen_port(resolver: &Resolver<'_, MonitorConfig>) -> Computed {
    Ok(resolver
        .instance()
        .role()
        .default_port()
        .map(|port| Value::Int(i64::from(port))))
}

fn default_grafana_credential(resolver: &Resolver<'_, MonitorConfig>) -> Computed {
    Ok((resolver.instance().role() == MonitorRole::Grafana)
        .then(|| Value::from(DEFAULT_GRAFANA_USER)))
}
