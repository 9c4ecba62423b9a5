//! Expands a topology document into resolved [`DeployConfig`] instances.
//!
//! Resolution runs in two passes. The first renders `listen.*` keys with
//! the identity variables of each instance so every address is known. The
//! cluster variables built from those addresses are then added and every
//! remaining string value is rendered.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_yaml::Mapping;
use tracing::debug;

use crate::context::{Context, MDS_VERSION_KEY};
use crate::item::{Configured, Value, scalar_key};
use crate::variables::Variables;

use super::{DeployConfig, DeployItems, Kind, MdsVersion, Role, TopologyError};

const KIND_KEY: &str = "kind";
const GLOBAL_KEY: &str = "global";
const VARIABLE_KEY: &str = "variable";
const CONFIG_KEY: &str = "config";
const DEPLOY_KEY: &str = "deploy";
const HOST_KEY: &str = "host";
const INSTANCES_KEY: &str = "instances";
const SECTION_SUFFIX: &str = "_services";
const LISTEN_PREFIX: &str = "listen.";
const ID_LEN: usize = 12;

const SERVICE_VARIABLES: [(&str, &str); 8] = [
    ("service_id", "id of the service"),
    ("service_role", "role of the service"),
    ("service_host", "host identifier of the service"),
    ("service_hostname", "hostname of the service host"),
    ("service_host_sequence", "position of the host entry in its section"),
    ("service_instances_sequence", "position of the instance on its host"),
    ("service_addr", "listen address of the service"),
    ("service_port", "listen port of the service"),
];

type ConfigMap = BTreeMap<String, Value>;

struct Section {
    role: Role,
    config: ConfigMap,
    entries: Vec<Entry>,
}

struct Entry {
    host: String,
    instances: usize,
    config: ConfigMap,
}

/// Derives the stable id of one service instance.
#[must_use]
pub fn service_id(role: Role, host: &str, host_sequence: usize, instances_sequence: usize) -> String {
    short_id(&format!("{role}_{host}_{host_sequence}_{instances_sequence}"))
}

/// Truncated blake3 digest of `seed`, used for every service id.
pub(crate) fn short_id(seed: &str) -> String {
    let digest = blake3::hash(seed.as_bytes()).to_hex();
    digest.as_str().get(..ID_LEN).unwrap_or_default().to_owned()
}

/// Parses and resolves a topology document.
///
/// `context` supplies hostnames; the document's `global.mds_version` is
/// recorded in a copy of it that every instance shares.
///
/// # Errors
///
/// Returns [`TopologyError`] when the document is empty or malformed, names
/// a role the kind does not support, references an unknown variable, or
/// holds a value of the wrong type.
pub fn parse_topology(
    document: &str,
    context: &Context,
    items: &Arc<DeployItems>,
) -> Result<Vec<DeployConfig>, TopologyError> {
    if document.trim().is_empty() {
        return Err(TopologyError::Empty);
    }
    let root: serde_yaml::Value =
        serde_yaml::from_str(document).map_err(|err| TopologyError::Parse(err.to_string()))?;
    let Some(root_map) = root.as_mapping() else {
        return Err(TopologyError::invalid("topology", "expected a mapping"));
    };

    let kind: Kind = root_map
        .get(KIND_KEY)
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| TopologyError::invalid(KIND_KEY, "a kind is required"))?
        .parse()?;

    let mut shared = context.clone();
    let mut user_vars = Variables::new();
    let global = match root_map.get(GLOBAL_KEY) {
        Some(node) => read_global(node, &mut shared, &mut user_vars)?,
        None => ConfigMap::new(),
    };
    let version = MdsVersion::from_context(&shared)?;
    let sections = read_sections(root_map, kind, version)?;
    let shared_context = Arc::new(shared);

    let mut services = expand(
        kind,
        version,
        &global,
        &sections,
        &user_vars,
        &shared_context,
        items,
    )?;
    render_listen_keys(&mut services)?;
    add_cluster_variables(&mut services)?;
    render_remaining(&mut services)?;
    check_unique_ids(&services)?;

    debug!(
        kind = %kind,
        version = %version,
        services = services.len(),
        "resolved topology"
    );
    Ok(services)
}

fn read_global(
    node: &serde_yaml::Value,
    context: &mut Context,
    user_vars: &mut Variables,
) -> Result<ConfigMap, TopologyError> {
    let mut config = ConfigMap::new();
    let Some(mapping) = mapping_or_empty(GLOBAL_KEY, node)? else {
        return Ok(config);
    };
    for (raw_key, raw_value) in mapping {
        let key = scalar_key(GLOBAL_KEY, raw_key)?;
        match key.as_str() {
            VARIABLE_KEY => read_user_variables(raw_value, user_vars)?,
            MDS_VERSION_KEY => {
                let version = Value::from_yaml(MDS_VERSION_KEY, raw_value)?;
                context.set(MDS_VERSION_KEY, version.to_string());
            }
            _ => {
                let value = Value::from_yaml(&key, raw_value)?;
                config.insert(key, value);
            }
        }
    }
    Ok(config)
}

fn read_user_variables(
    node: &serde_yaml::Value,
    user_vars: &mut Variables,
) -> Result<(), TopologyError> {
    let section = "global.variable";
    let Some(mapping) = mapping_or_empty(section, node)? else {
        return Ok(());
    };
    for (raw_key, raw_value) in mapping {
        let name = scalar_key(section, raw_key)?;
        let value = Value::from_yaml(&format!("{section}.{name}"), raw_value)?;
        user_vars.register(name.clone(), "user variable");
        user_vars.set(name, value.to_string());
    }
    Ok(())
}

fn read_sections(
    root: &Mapping,
    kind: Kind,
    version: MdsVersion,
) -> Result<Vec<Section>, TopologyError> {
    let mut sections = Vec::new();
    for (raw_key, node) in root {
        let name = scalar_key("topology", raw_key)?;
        if name == KIND_KEY || name == GLOBAL_KEY {
            continue;
        }
        let Some(role_name) = name.strip_suffix(SECTION_SUFFIX) else {
            return Err(TopologyError::invalid(name, "unknown top-level section"));
        };
        let role: Role = role_name.parse()?;
        if !kind.roles(version).contains(&role) {
            return Err(TopologyError::UnsupportedRole {
                kind,
                role,
                version,
            });
        }
        sections.push(read_section(&name, role, node)?);
    }
    Ok(sections)
}

fn read_section(name: &str, role: Role, node: &serde_yaml::Value) -> Result<Section, TopologyError> {
    let Some(mapping) = mapping_or_empty(name, node)? else {
        return Ok(Section {
            role,
            config: ConfigMap::new(),
            entries: Vec::new(),
        });
    };
    let config = match mapping.get(CONFIG_KEY) {
        Some(config_node) => decode_config(&format!("{name}.{CONFIG_KEY}"), config_node)?,
        None => ConfigMap::new(),
    };
    let entries = match mapping.get(DEPLOY_KEY) {
        Some(serde_yaml::Value::Sequence(list)) => list
            .iter()
            .enumerate()
            .map(|(index, entry)| read_entry(&format!("{name}.{DEPLOY_KEY}[{index}]"), entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(serde_yaml::Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(TopologyError::invalid(
                format!("{name}.{DEPLOY_KEY}"),
                "expected a list of hosts",
            ));
        }
    };
    Ok(Section {
        role,
        config,
        entries,
    })
}

fn read_entry(path: &str, node: &serde_yaml::Value) -> Result<Entry, TopologyError> {
    let Some(mapping) = node.as_mapping() else {
        return Err(TopologyError::invalid(path, "expected a mapping"));
    };
    let host = mapping
        .get(HOST_KEY)
        .and_then(serde_yaml::Value::as_str)
        .filter(|host| !host.trim().is_empty())
        .ok_or_else(|| TopologyError::invalid(path, "a host is required"))?
        .to_owned();
    let instances = match mapping.get(INSTANCES_KEY) {
        None => 1,
        Some(count) => count
            .as_u64()
            .and_then(|number| usize::try_from(number).ok())
            .filter(|number| *number > 0)
            .ok_or_else(|| {
                TopologyError::invalid(
                    format!("{path}.{INSTANCES_KEY}"),
                    "expected a positive integer",
                )
            })?,
    };
    let config = match mapping.get(CONFIG_KEY) {
        Some(config_node) => decode_config(&format!("{path}.{CONFIG_KEY}"), config_node)?,
        None => ConfigMap::new(),
    };
    Ok(Entry {
        host,
        instances,
        config,
    })
}

fn mapping_or_empty<'a>(
    section: &str,
    node: &'a serde_yaml::Value,
) -> Result<Option<&'a Mapping>, TopologyError> {
    match node {
        serde_yaml::Value::Mapping(mapping) => Ok(Some(mapping)),
        serde_yaml::Value::Null => Ok(None),
        _ => Err(TopologyError::invalid(section, "expected a mapping")),
    }
}

fn decode_config(section: &str, node: &serde_yaml::Value) -> Result<ConfigMap, TopologyError> {
    let mut config = ConfigMap::new();
    let Some(mapping) = mapping_or_empty(section, node)? else {
        return Ok(config);
    };
    for (raw_key, raw_value) in mapping {
        let key = scalar_key(section, raw_key)?;
        let value = Value::from_yaml(&key, raw_value)?;
        config.insert(key, value);
    }
    Ok(config)
}

fn expand(
    kind: Kind,
    version: MdsVersion,
    global: &ConfigMap,
    sections: &[Section],
    user_vars: &Variables,
    context: &Arc<Context>,
    items: &Arc<DeployItems>,
) -> Result<Vec<DeployConfig>, TopologyError> {
    let mut services = Vec::new();
    for section in sections {
        for (host_sequence, entry) in section.entries.iter().enumerate() {
            let host = user_vars
                .render(&entry.host)
                .map_err(|source| TopologyError::Variable {
                    service: section.role.section(),
                    key: String::from(HOST_KEY),
                    source,
                })?;
            let hostname = context.hostname(&host).to_owned();
            let parent_id = service_id(section.role, &host, host_sequence, 0);

            for instances_sequence in 0..entry.instances {
                let mut config = global.clone();
                config.extend(section.config.clone());
                config.extend(entry.config.clone());

                let id = service_id(section.role, &host, host_sequence, instances_sequence);
                let mut variables = Variables::new();
                for (name, description) in SERVICE_VARIABLES {
                    variables.register(name, description);
                }
                variables.extend_from(user_vars);
                variables.set("service_id", id.clone());
                variables.set("service_role", section.role.as_str());
                variables.set("service_host", host.clone());
                variables.set("service_hostname", hostname.clone());
                variables.set("service_host_sequence", host_sequence.to_string());
                variables.set("service_instances_sequence", instances_sequence.to_string());

                services.push(DeployConfig {
                    kind,
                    version,
                    id,
                    parent_id: parent_id.clone(),
                    role: section.role,
                    host: host.clone(),
                    hostname: hostname.clone(),
                    instances: entry.instances,
                    host_sequence,
                    instances_sequence,
                    config,
                    variables,
                    context: Arc::clone(context),
                    items: Arc::clone(items),
                });
            }
        }
    }
    Ok(services)
}

fn render_listen_keys(services: &mut [DeployConfig]) -> Result<(), TopologyError> {
    for service in services.iter_mut() {
        let rendered = render_map(service, |key| key.starts_with(LISTEN_PREFIX))?;
        service.config.extend(rendered);
        let addr = resolve(service, DeployConfig::listen_ip)?;
        let port = resolve(service, DeployConfig::listen_port)?;
        service.variables.set("service_addr", addr);
        service.variables.set("service_port", port.to_string());
    }
    Ok(())
}

fn add_cluster_variables(services: &mut [DeployConfig]) -> Result<(), TopologyError> {
    let mut cluster = Variables::new();
    let mut addrs: BTreeMap<Role, Vec<String>> = BTreeMap::new();
    let mut peers: BTreeMap<Role, Vec<String>> = BTreeMap::new();
    for service in services.iter() {
        let ip = resolve(service, DeployConfig::listen_ip)?;
        let port = resolve(service, DeployConfig::listen_port)?;
        addrs
            .entry(service.role)
            .or_default()
            .push(format!("{ip}:{port}"));
        if service.role.uses_raft() {
            let raft_port = resolve(service, DeployConfig::listen_raft_port)?;
            peers
                .entry(service.role)
                .or_default()
                .push(format!("{ip}:{raft_port}"));
        }
    }
    for (role, list) in &addrs {
        let name = format!("cluster_{role}_addr");
        cluster.register(name.clone(), format!("listen addresses of every {role}"));
        cluster.set(name, list.join(","));
    }
    for (role, list) in &peers {
        let name = format!("cluster_{role}_peers");
        cluster.register(name.clone(), format!("raft peers of every {role}"));
        cluster.set(name, list.join(","));
    }
    for service in services.iter_mut() {
        service.variables.extend_from(&cluster);
    }
    Ok(())
}

fn render_remaining(services: &mut [DeployConfig]) -> Result<(), TopologyError> {
    for service in services.iter_mut() {
        let rendered = render_map(service, |key| !key.starts_with(LISTEN_PREFIX))?;
        service.config.extend(rendered);
    }
    Ok(())
}

/// Renders the selected raw values and coerces registered keys.
fn render_map(
    service: &DeployConfig,
    select: impl Fn(&str) -> bool,
) -> Result<ConfigMap, TopologyError> {
    let mut rendered = ConfigMap::new();
    for (key, value) in service.config.iter().filter(|(key, _)| select(key)) {
        let expanded = render_value(service, key, value)?;
        let normalised = match service.item_set().find(key) {
            Some(item) => item
                .coerce(expanded)
                .map_err(|source| TopologyError::Resolve {
                    id: service.id.clone(),
                    source,
                })?,
            None => expanded,
        };
        rendered.insert(key.clone(), normalised);
    }
    Ok(rendered)
}

fn render_value(service: &DeployConfig, key: &str, value: &Value) -> Result<Value, TopologyError> {
    match value {
        Value::String(template) => service
            .variables
            .render(template)
            .map(Value::String)
            .map_err(|source| TopologyError::Variable {
                service: service.id.clone(),
                key: key.to_owned(),
                source,
            }),
        Value::Map(map) => {
            let mut nested = BTreeMap::new();
            for (name, inner) in map {
                let path = format!("{key}.{name}");
                nested.insert(name.clone(), render_value(service, &path, inner)?);
            }
            Ok(Value::Map(nested))
        }
        other => Ok(other.clone()),
    }
}

fn resolve<T>(
    service: &DeployConfig,
    accessor: fn(&DeployConfig) -> Result<T, crate::item::ResolveError>,
) -> Result<T, TopologyError> {
    accessor(service).map_err(|source| TopologyError::Resolve {
        id: service.id.clone(),
        source,
    })
}

fn check_unique_ids(services: &[DeployConfig]) -> Result<(), TopologyError> {
    let mut seen = HashSet::new();
    for service in services {
        if !seen.insert(service.id.as_str()) {
            return Err(TopologyError::DuplicateId {
                id: service.id.clone(),
            });
        }
    }
    Ok(())
}
