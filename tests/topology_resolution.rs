//! Integration tests for resolving topology documents into services.

#[path = "common/documents.rs"]
mod documents;

use std::collections::HashSet;
use std::sync::Arc;

use rstest::{fixture, rstest};
use stratadm::{Context, DeployConfig, DeployItems, Role, TopologyError, parse_topology};

use documents::{FILESYSTEM_TOPOLOGY, INVENTORY};

#[fixture]
fn items() -> Arc<DeployItems> {
    Arc::new(DeployItems::new())
}

fn resolve(document: &str, context: &Context, items: &Arc<DeployItems>) -> Vec<DeployConfig> {
    parse_topology(document, context, items).unwrap_or_else(|err| panic!("topology: {err}"))
}

#[rstest]
fn every_host_entry_becomes_a_service(items: Arc<DeployItems>) {
    let services = resolve(FILESYSTEM_TOPOLOGY, &Context::new(), &items);

    let roles: Vec<_> = services.iter().map(DeployConfig::role).collect();
    assert_eq!(
        roles,
        [
            Role::Etcd,
            Role::Etcd,
            Role::Etcd,
            Role::Mds,
            Role::Mds,
            Role::Metaserver
        ]
    );
    let ids: HashSet<_> = services.iter().map(DeployConfig::id).collect();
    assert_eq!(ids.len(), services.len());
}

#[rstest]
fn resolution_is_deterministic(items: Arc<DeployItems>) {
    let first = resolve(FILESYSTEM_TOPOLOGY, &Context::new(), &items);
    let second = resolve(FILESYSTEM_TOPOLOGY, &Context::new(), &items);

    let first_ids: Vec<_> = first.iter().map(DeployConfig::id).collect();
    let second_ids: Vec<_> = second.iter().map(DeployConfig::id).collect();
    assert_eq!(first_ids, second_ids);
}

#[rstest]
fn variables_render_in_config_values(items: Arc<DeployItems>) {
    let services = resolve(FILESYSTEM_TOPOLOGY, &Context::new(), &items);
    let mds = services
        .iter()
        .find(|service| service.role() == Role::Mds)
        .expect("mds service");

    assert_eq!(mds.log_dir().as_deref(), Ok("/opt/dingo/logs/mds"));
    let config = mds.service_config().unwrap_or_else(|err| panic!("config: {err}"));
    assert_eq!(
        config.get("mds.etcd.addr").map(String::as_str),
        Some("h1:2380,h2:2380,h3:2380")
    );
}

#[rstest]
fn inventory_supplies_listen_addresses(items: Arc<DeployItems>) {
    let context = Context::from_inventory(INVENTORY).unwrap_or_else(|err| panic!("hosts: {err}"));
    let services = resolve(FILESYSTEM_TOPOLOGY, &context, &items);
    let metaserver = services.last().expect("metaserver");

    assert_eq!(metaserver.hostname(), "10.0.0.3");
    assert_eq!(metaserver.listen_ip().as_deref(), Ok("10.0.0.3"));
    assert_eq!(metaserver.listen_port(), Ok(6800));
    assert_eq!(metaserver.data_dir().as_deref(), Ok("/data/metaserver"));
}

#[rstest]
fn deploy_config_overrides_role_and_global(items: Arc<DeployItems>) {
    let services = resolve(
        "
kind: dingofs
global:
  mds_version: v1
  listen.port: 7000
mds_services:
  config:
    listen.port: 7100
  deploy:
    - host: h1
    - host: h2
      config:
        listen.port: 7200
",
        &Context::new(),
        &items,
    );

    let ports: Vec<_> = services
        .iter()
        .map(|service| {
            service
                .listen_port()
                .unwrap_or_else(|err| panic!("port: {err}"))
        })
        .collect();
    assert_eq!(ports, [7100, 7200]);
}

#[rstest]
fn roles_outside_the_kind_are_rejected(items: Arc<DeployItems>) {
    let err = parse_topology(
        "
kind: dingofs
global:
  mds_version: v1
coordinator_services:
  deploy:
    - host: h1
",
        &Context::new(),
        &items,
    )
    .expect_err("coordinator needs mds v2");

    assert!(
        matches!(
            err,
            TopologyError::UnsupportedRole {
                role: Role::Coordinator,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}

#[rstest]
fn unknown_variables_name_the_key(items: Arc<DeployItems>) {
    let err = parse_topology(
        "
kind: dingofs
global:
  mds_version: v1
mds_services:
  deploy:
    - host: h1
      config:
        data_dir: ${nowhere}/mds
",
        &Context::new(),
        &items,
    )
    .expect_err("unknown variable");

    let TopologyError::Variable { key, .. } = err else {
        panic!("expected a variable error, got {err}");
    };
    assert_eq!(key, "data_dir");
}

#[rstest]
#[case::blank("")]
#[case::whitespace("   \n")]
fn blank_documents_are_empty(items: Arc<DeployItems>, #[case] document: &str) {
    assert_eq!(
        parse_topology(document, &Context::new(), &items).err(),
        Some(TopologyError::Empty)
    );
}
