//! Container shape of monitor services.

use camino::Utf8Path;
use shell_escape::unix::escape;

use super::Service;
use crate::context::Context;
use crate::item::ResolveError;
use crate::monitor::{MonitorConfig, MonitorRole};
use crate::task::steps::{ContainerSpec, Mount};

const RESTART_POLICY: &str = "always";
const TARGETS_FILE: &str = "targets.json";
const PROMETHEUS_CONFIG_FILE: &str = "prometheus.yml";
const GRAFANA_PROVISIONING_DIR: &str = "provisioning";

const fn container_log_dir(role: MonitorRole) -> Option<&'static str> {
    match role {
        MonitorRole::MonitorSync => Some("/dingo-monitor/logs"),
        MonitorRole::Grafana => Some("/var/log/grafana"),
        MonitorRole::NodeExporter | MonitorRole::Prometheus => None,
    }
}

fn write_file_command(path: &Utf8Path, contents: &str) -> String {
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("/"));
    format!(
        "mkdir -p {} && printf '%s' {} > {}",
        escape(dir.as_str().into()),
        escape(contents.into()),
        escape(path.as_str().into())
    )
}

fn prometheus_config(container_data_dir: &str) -> String {
    format!(
        "global:\n  scrape_interval: 15s\nscrape_configs:\n  - job_name: stratadm\n    file_sd_configs:\n      - files: ['{container_data_dir}/{TARGETS_FILE}']\n"
    )
}

fn grafana_datasource(addr: &str, port: u16) -> String {
    format!(
        "apiVersion: 1\ndatasources:\n  - name: prometheus\n    type: prometheus\n    access: proxy\n    url: http://{addr}:{port}\n    isDefault: true\n"
    )
}

impl MonitorConfig {
    fn mount_pairs(&self) -> Result<Vec<(String, String)>, ResolveError> {
        let role = self.role();
        let mut pairs = Vec::new();
        if let Some(container) = role.container_data_dir() {
            pairs.push((self.data_dir()?, container.to_owned()));
        }
        if let Some(container) = container_log_dir(role) {
            pairs.push((self.log_dir()?, container.to_owned()));
        }
        pairs.retain(|(host, _)| !host.trim().is_empty());
        Ok(pairs)
    }

    fn role_args(&self) -> Result<Vec<String>, ResolveError> {
        let listen = format!("--web.listen-address=:{}", self.listen_port()?);
        Ok(match self.role() {
            MonitorRole::NodeExporter => vec![listen],
            MonitorRole::Prometheus => {
                let data = MonitorRole::Prometheus
                    .container_data_dir()
                    .unwrap_or_default();
                vec![
                    format!("--config.file={data}/{PROMETHEUS_CONFIG_FILE}"),
                    format!("--storage.tsdb.path={data}"),
                    format!("--storage.tsdb.retention.time={}", self.retention_time()?),
                    format!("--storage.tsdb.retention.size={}", self.retention_size()?),
                    listen,
                ]
            }
            MonitorRole::MonitorSync | MonitorRole::Grafana => Vec::new(),
        })
    }

    fn role_envs(&self) -> Result<Vec<String>, ResolveError> {
        Ok(match self.role() {
            MonitorRole::Grafana => {
                let provisioning = MonitorRole::Grafana
                    .container_data_dir()
                    .map(|dir| format!("{dir}/{GRAFANA_PROVISIONING_DIR}"))
                    .unwrap_or_default();
                vec![
                    format!("GF_SECURITY_ADMIN_USER={}", self.username()?),
                    format!("GF_SECURITY_ADMIN_PASSWORD={}", self.password()?),
                    format!("GF_SERVER_HTTP_PORT={}", self.listen_port()?),
                    format!("GF_PATHS_PROVISIONING={provisioning}"),
                ]
            }
            MonitorRole::MonitorSync => {
                vec![format!("ORIGIN_CONFIG_ID={}", self.origin_config_id()?)]
            }
            MonitorRole::NodeExporter | MonitorRole::Prometheus => Vec::new(),
        })
    }
}

impl Service for MonitorConfig {
    fn service_id(&self) -> &str {
        self.id()
    }

    fn host(&self) -> &str {
        Self::host(self)
    }

    fn context(&self) -> &Context {
        Self::context(self)
    }

    fn container_spec(&self) -> Result<ContainerSpec, ResolveError> {
        let mounts = self
            .mount_pairs()?
            .into_iter()
            .map(|(host, container)| Mount { host, container })
            .collect();
        Ok(ContainerSpec {
            name: self.container_name(),
            image: self.container_image()?,
            mounts,
            envs: self.role_envs()?,
            restart_policy: RESTART_POLICY.to_owned(),
            entrypoint: None,
            args: self.role_args()?,
        })
    }

    fn host_dirs(&self) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .mount_pairs()?
            .into_iter()
            .map(|(host, _)| host)
            .collect())
    }

    fn prepare_commands(&self) -> Result<Vec<(String, String)>, ResolveError> {
        let data_dir = self.data_dir()?;
        if data_dir.trim().is_empty() {
            return Ok(Vec::new());
        }
        let host_dir = Utf8Path::new(&data_dir);
        Ok(match self.role() {
            MonitorRole::Prometheus => {
                let container_dir = MonitorRole::Prometheus
                    .container_data_dir()
                    .unwrap_or_default();
                vec![
                    (
                        String::from("write scrape targets"),
                        write_file_command(&host_dir.join(TARGETS_FILE), &self.targets()?),
                    ),
                    (
                        String::from("write prometheus config"),
                        write_file_command(
                            &host_dir.join(PROMETHEUS_CONFIG_FILE),
                            &prometheus_config(container_dir),
                        ),
                    ),
                ]
            }
            MonitorRole::Grafana => {
                let path = host_dir
                    .join(GRAFANA_PROVISIONING_DIR)
                    .join("datasources")
                    .join("prometheus.yaml");
                let datasource =
                    grafana_datasource(&self.prometheus_addr()?, self.prometheus_listen_port()?);
                vec![(
                    String::from("write grafana datasource"),
                    write_file_command(&path, &datasource),
                )]
            }
            MonitorRole::MonitorSync | MonitorRole::NodeExporter => Vec::new(),
        })
    }
}
