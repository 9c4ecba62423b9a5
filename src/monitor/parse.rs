//! Builds monitoring services and wires them to the storage topology.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tracing::debug;

use crate::context::Context;
use crate::item::{Configured, Value, scalar_key};
use crate::topology::{DeployConfig, Role, short_id};
use crate::variables::Variables;

use super::{MonitorConfig, MonitorError, MonitorItems, MonitorRole};

const GLOBAL_KEY: &str = "global";
const CONFIG_KEY: &str = "config";
const DEPLOY_KEY: &str = "deploy";
const CLUSTER_PREFIX: &str = "cluster_";

type ConfigMap = BTreeMap<String, Value>;

/// Labels attached to one scrape job.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TargetLabels {
    /// Job name; the role being scraped.
    pub job: String,
}

/// One scrape job of the metrics collector.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ScrapeTarget {
    /// Job labels.
    pub labels: TargetLabels,
    /// `address:port` endpoints.
    pub targets: Vec<String>,
}

struct Section {
    role: MonitorRole,
    config: ConfigMap,
    hosts: Vec<String>,
}

/// Groups every storage listen address by role, in topology order.
///
/// # Errors
///
/// Returns [`MonitorError::Resolve`] when a listen address fails to resolve.
pub fn scrape_targets(services: &[DeployConfig]) -> Result<Vec<ScrapeTarget>, MonitorError> {
    let mut grouped: Vec<(Role, Vec<String>)> = Vec::new();
    for service in services.iter().filter(|svc| svc.role().is_primary_storage()) {
        let ip = service
            .listen_ip()
            .map_err(|err| MonitorError::resolve(service.id(), err))?;
        let port = service
            .listen_port()
            .map_err(|err| MonitorError::resolve(service.id(), err))?;
        let endpoint = format!("{ip}:{port}");
        match grouped.iter_mut().find(|(role, _)| *role == service.role()) {
            Some((_, endpoints)) => {
                if !endpoints.contains(&endpoint) {
                    endpoints.push(endpoint);
                }
            }
            None => grouped.push((service.role(), vec![endpoint])),
        }
    }
    Ok(grouped
        .into_iter()
        .map(|(role, targets)| ScrapeTarget {
            labels: TargetLabels {
                job: role.as_str().to_owned(),
            },
            targets,
        })
        .collect())
}

/// Parses a monitor document against resolved storage `services`.
///
/// Roles without a `deploy` list run on every host that carries a primary
/// storage role. The result is ordered by startup order, then host.
///
/// # Errors
///
/// Returns [`MonitorError`] when the document is empty or malformed, there
/// is nothing to monitor, a value fails to resolve, or the sync agent has no
/// data directory.
pub fn parse_monitor(
    document: &str,
    services: &[DeployConfig],
    context: &Context,
    items: &Arc<MonitorItems>,
) -> Result<Vec<MonitorConfig>, MonitorError> {
    if document.trim().is_empty() {
        return Err(MonitorError::EmptyTopology);
    }
    let root: serde_yaml::Value =
        serde_yaml::from_str(document).map_err(|err| MonitorError::Parse(err.to_string()))?;
    let root_map = match &root {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Err(MonitorError::EmptyTopology),
        _ => return Err(MonitorError::invalid("monitor", "expected a mapping")),
    };
    let first = services.first().ok_or(MonitorError::NoServices)?;

    let global = match root_map.get(GLOBAL_KEY) {
        Some(node) => decode_config(GLOBAL_KEY, node)?,
        None => ConfigMap::new(),
    };
    let default_hosts = storage_hosts(services);
    let mut sections = read_sections(root_map, &default_hosts)?;
    sections.sort_by_key(|section| section.role.order());

    let shared = Arc::new(context.clone());
    let mut monitors = Vec::new();
    for section in &sections {
        for (host_sequence, host) in section.hosts.iter().enumerate() {
            let mut config = global.clone();
            config.extend(section.config.clone());
            let mut monitor = MonitorConfig {
                kind: first.kind(),
                id: short_id(&format!("{}_{host}_{host_sequence}", section.role)),
                role: section.role,
                host: host.clone(),
                hostname: shared.hostname(host).to_owned(),
                host_sequence,
                config,
                variables: Variables::new(),
                context: Arc::clone(&shared),
                items: Arc::clone(items),
            };
            monitor.variables = monitor_variables(&monitor, first);
            monitor.config = render_config(&monitor)?;
            monitors.push(monitor);
        }
    }

    wire(&mut monitors, services)?;
    debug!(monitors = monitors.len(), "resolved monitor services");
    Ok(monitors)
}

fn storage_hosts(services: &[DeployConfig]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for service in services.iter().filter(|svc| svc.role().is_primary_storage()) {
        if !hosts.iter().any(|host| host == service.host()) {
            hosts.push(service.host().to_owned());
        }
    }
    hosts
}

fn read_sections(root: &Mapping, default_hosts: &[String]) -> Result<Vec<Section>, MonitorError> {
    let mut sections = Vec::new();
    for (raw_key, node) in root {
        let name = scalar_key("monitor", raw_key)?;
        if name == GLOBAL_KEY {
            continue;
        }
        let role: MonitorRole = name.parse()?;
        let mapping = match node {
            serde_yaml::Value::Mapping(mapping) => Some(mapping),
            serde_yaml::Value::Null => None,
            _ => return Err(MonitorError::invalid(name, "expected a mapping")),
        };
        let config = match mapping.and_then(|map| map.get(CONFIG_KEY)) {
            Some(config_node) => decode_config(&format!("{name}.{CONFIG_KEY}"), config_node)?,
            None => ConfigMap::new(),
        };
        let declared = match mapping.and_then(|map| map.get(DEPLOY_KEY)) {
            Some(hosts_node) => read_hosts(&format!("{name}.{DEPLOY_KEY}"), hosts_node)?,
            None => Vec::new(),
        };
        let hosts = if declared.is_empty() {
            default_hosts.to_vec()
        } else {
            declared
        };
        sections.push(Section {
            role,
            config,
            hosts,
        });
    }
    Ok(sections)
}

fn read_hosts(section: &str, node: &serde_yaml::Value) -> Result<Vec<String>, MonitorError> {
    match node {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(list) => list
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .filter(|host| !host.trim().is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| MonitorError::invalid(section, "hosts must be strings"))
            })
            .collect(),
        _ => Err(MonitorError::invalid(section, "expected a list of hosts")),
    }
}

fn decode_config(section: &str, node: &serde_yaml::Value) -> Result<ConfigMap, MonitorError> {
    let mut config = ConfigMap::new();
    let mapping = match node {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(config),
        _ => return Err(MonitorError::invalid(section, "expected a mapping")),
    };
    for (raw_key, raw_value) in mapping {
        let key = scalar_key(section, raw_key)?;
        let value = Value::from_yaml(&key, raw_value)?;
        config.insert(key, value);
    }
    Ok(config)
}

fn monitor_variables(monitor: &MonitorConfig, storage: &DeployConfig) -> Variables {
    let mut variables = Variables::new();
    for (name, value) in storage
        .variables()
        .iter()
        .filter(|(name, _)| name.starts_with(CLUSTER_PREFIX))
    {
        variables.set(name, value);
    }
    variables.set("service_id", monitor.id.clone());
    variables.set("service_role", monitor.role.as_str());
    variables.set("service_host", monitor.host.clone());
    variables.set("service_hostname", monitor.hostname.clone());
    variables.set("service_host_sequence", monitor.host_sequence.to_string());
    variables
}

fn render_config(monitor: &MonitorConfig) -> Result<ConfigMap, MonitorError> {
    let mut rendered = ConfigMap::new();
    for (key, value) in &monitor.config {
        let expanded = render_value(monitor, key, value)?;
        let normalised = match monitor.item_set().find(key) {
            Some(item) => item
                .coerce(expanded)
                .map_err(|err| MonitorError::resolve(&monitor.id, err))?,
            None => expanded,
        };
        rendered.insert(key.clone(), normalised);
    }
    Ok(rendered)
}

fn render_value(monitor: &MonitorConfig, key: &str, value: &Value) -> Result<Value, MonitorError> {
    match value {
        Value::String(template) => monitor
            .variables
            .render(template)
            .map(Value::String)
            .map_err(|source| MonitorError::Variable {
                id: monitor.id.clone(),
                key: key.to_owned(),
                source,
            }),
        Value::Map(map) => {
            let mut nested = BTreeMap::new();
            for (name, inner) in map {
                let path = format!("{key}.{name}");
                nested.insert(name.clone(), render_value(monitor, &path, inner)?);
            }
            Ok(Value::Map(nested))
        }
        other => Ok(other.clone()),
    }
}

fn wire(monitors: &mut [MonitorConfig], services: &[DeployConfig]) -> Result<(), MonitorError> {
    let mut targets = scrape_targets(services)?;
    let mut exporters = Vec::new();
    for exporter in monitors
        .iter()
        .filter(|monitor| monitor.role == MonitorRole::NodeExporter)
    {
        let port = exporter
            .listen_port()
            .map_err(|err| MonitorError::resolve(&exporter.id, err))?;
        exporters.push(format!("{}:{port}", exporter.hostname));
    }
    if !exporters.is_empty() {
        targets.push(ScrapeTarget {
            labels: TargetLabels {
                job: MonitorRole::NodeExporter.as_str().to_owned(),
            },
            targets: exporters,
        });
    }
    let encoded =
        serde_json::to_string(&targets).map_err(|err| MonitorError::Targets(err.to_string()))?;

    let collector = monitors
        .iter()
        .find(|monitor| monitor.role == MonitorRole::Prometheus)
        .map(|prometheus| {
            prometheus
                .listen_port()
                .map(|port| (prometheus.hostname.clone(), port))
                .map_err(|err| MonitorError::resolve(&prometheus.id, err))
        })
        .transpose()?;
    let origin = services
        .iter()
        .find(|svc| svc.role().is_primary_storage())
        .map(|svc| svc.id().to_owned());

    for monitor in monitors.iter_mut() {
        match monitor.role {
            MonitorRole::Prometheus => {
                monitor
                    .config
                    .insert(String::from("targets"), Value::String(encoded.clone()));
            }
            MonitorRole::Grafana => {
                if let Some((addr, port)) = &collector {
                    monitor
                        .config
                        .insert(String::from("prometheus.addr"), Value::String(addr.clone()));
                    monitor.config.insert(
                        String::from("prometheus.listen_port"),
                        Value::Int(i64::from(*port)),
                    );
                }
            }
            MonitorRole::MonitorSync => {
                let data_dir = monitor
                    .data_dir()
                    .map_err(|err| MonitorError::resolve(&monitor.id, err))?;
                if data_dir.is_empty() {
                    return Err(MonitorError::MissingDataDir {
                        host: monitor.host.clone(),
                    });
                }
                if let Some(id) = &origin {
                    monitor
                        .config
                        .insert(String::from("origin_config_id"), Value::String(id.clone()));
                }
            }
            MonitorRole::NodeExporter => {}
        }
    }
    Ok(())
}
