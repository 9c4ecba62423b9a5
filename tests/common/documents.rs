//! Topology, monitor and inventory documents shared by integration tests.

/// Filesystem cluster with three etcd members, two mds and one metaserver.
pub const FILESYSTEM_TOPOLOGY: &str = "
kind: dingofs
global:
  mds_version: v1
  variable:
    home: /opt/dingo
  log_dir: ${home}/logs/${service_role}
etcd_services:
  deploy:
    - host: h1
    - host: h2
    - host: h3
mds_services:
  config:
    mds.etcd.addr: ${cluster_etcd_addr}
  deploy:
    - host: h1
    - host: h2
metaserver_services:
  deploy:
    - host: h3
      config:
        data_dir: /data/metaserver
";

/// Inventory mapping the hosts of [`FILESYSTEM_TOPOLOGY`] to addresses.
pub const INVENTORY: &str = "
hosts:
  - host: h1
    hostname: 10.0.0.1
    user: dingo
  - host: h2
    hostname: 10.0.0.2
  - host: h3
    hostname: 10.0.0.3
    ssh_port: 2222
";

/// Two mds hosts only, for monitoring scenarios.
pub const MDS_PAIR_TOPOLOGY: &str = "
kind: dingofs
global:
  mds_version: v1
mds_services:
  deploy:
    - host: h1
    - host: h2
";

/// Full monitoring stack on the first host.
pub const MONITOR: &str = "
prometheus:
  config:
    data_dir: /data/prometheus
  deploy: [h1]
grafana:
  config:
    data_dir: /data/grafana
  deploy: [h1]
node_exporter: {}
";
