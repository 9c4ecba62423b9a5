//! Container-internal path layout for each service role.
//!
//! [`layout`] is a pure function of kind, role and metadata server version,
//! so repeated resolution of the same topology always yields identical
//! paths and file synchronisation stays idempotent.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::topology::{Kind, MdsVersion, Role};

const FILESYSTEM_ROOT: &str = "/dingofs";
const STORE_ROOT: &str = "/opt/dingo-store";
const EXECUTOR_ROOT: &str = "/opt/dingo-executor";
const CONF_SRC_DIR: &str = "conf";
const CORE_SYSTEM_DIR: &str = "/core";
const COORDINATOR_LIST: &str = "coor_list";

/// One config file copied from the image template into the service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConfFile {
    /// Bare file name.
    pub name: String,
    /// Template shipped in the image.
    pub source_path: Utf8PathBuf,
    /// Path the service reads. Equal to `source_path` when the service
    /// reads the template in place.
    pub target_path: Utf8PathBuf,
}

/// Derived paths for one service; recomputed on every access.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Layout {
    /// Product root inside the container.
    pub project_root: Utf8PathBuf,
    /// Directory holding config templates.
    pub conf_src_dir: Utf8PathBuf,
    /// Root of this service's files.
    pub service_root_dir: Utf8PathBuf,
    /// Directory holding the service binary.
    pub service_bin_dir: Utf8PathBuf,
    /// Service entry point.
    pub service_binary_path: Utf8PathBuf,
    /// Directory the service reads config from.
    pub service_conf_dir: Utf8PathBuf,
    /// Log directory; host log dirs are mounted here.
    pub service_log_dir: Utf8PathBuf,
    /// Data directory; host data dirs are mounted here.
    pub service_data_dir: Utf8PathBuf,
    /// Raft log and snapshot directory for raft roles.
    pub service_raft_dir: Option<Utf8PathBuf>,
    /// Document index directory.
    pub service_document_dir: Option<Utf8PathBuf>,
    /// Vector index directory.
    pub service_vector_dir: Option<Utf8PathBuf>,
    /// Config files to synchronise, in order.
    pub service_conf_files: Vec<ConfFile>,
    /// Admin tool binary.
    pub tools_binary_path: Utf8PathBuf,
    /// Admin tool config template.
    pub tools_conf_src_path: Utf8PathBuf,
    /// Path the admin tool reads its config from.
    pub tools_conf_system_path: Utf8PathBuf,
    /// Directory receiving core dumps.
    pub core_system_dir: Utf8PathBuf,
}

/// Derives the layout of `role` in a `kind` deployment.
#[must_use]
pub fn layout(kind: Kind, role: Role, version: MdsVersion) -> Layout {
    let project_root = Utf8PathBuf::from(project_root(role));
    let conf_src_dir = project_root.join(CONF_SRC_DIR);
    let dirs = service_dirs(&project_root, role, version);
    let service_conf_files = conf_file_names(role, version)
        .iter()
        .map(|entry| conf_file(entry, &conf_src_dir, &dirs.conf))
        .collect();
    let data = dirs.data.clone();
    let (tools_binary_path, tools_conf_src_path, tools_conf_system_path) = tools_paths(kind);

    Layout {
        project_root,
        conf_src_dir,
        service_root_dir: dirs.root,
        service_bin_dir: dirs.bin,
        service_binary_path: dirs.binary,
        service_conf_dir: dirs.conf,
        service_log_dir: dirs.log,
        service_data_dir: dirs.data,
        service_raft_dir: role.uses_raft().then(|| data.join("raft")),
        service_document_dir: (role == Role::Document).then(|| data.join("document")),
        service_vector_dir: (role == Role::Index).then(|| data.join("vector")),
        service_conf_files,
        tools_binary_path,
        tools_conf_src_path,
        tools_conf_system_path,
        core_system_dir: Utf8PathBuf::from(CORE_SYSTEM_DIR),
    }
}

const fn project_root(role: Role) -> &'static str {
    match role {
        Role::Coordinator | Role::Store | Role::Index | Role::Document => STORE_ROOT,
        Role::Executor => EXECUTOR_ROOT,
        Role::Etcd | Role::Mds | Role::Metaserver | Role::Proxy => FILESYSTEM_ROOT,
    }
}

struct ServiceDirs {
    root: Utf8PathBuf,
    bin: Utf8PathBuf,
    binary: Utf8PathBuf,
    conf: Utf8PathBuf,
    log: Utf8PathBuf,
    data: Utf8PathBuf,
}

fn service_dirs(project_root: &Utf8Path, role: Role, version: MdsVersion) -> ServiceDirs {
    match role {
        Role::Coordinator | Role::Store | Role::Index | Role::Document => {
            let root = project_root.join("dist").join(role.as_str());
            let bin = project_root.join("build").join("bin");
            ServiceDirs {
                binary: bin.join("dingodb_server"),
                conf: root.join("conf"),
                log: root.join("log"),
                data: root.join("data"),
                bin,
                root,
            }
        }
        Role::Executor => {
            let bin = project_root.join("bin");
            ServiceDirs {
                binary: bin.join("start-executor.sh"),
                conf: project_root.join("conf"),
                log: project_root.join("log"),
                data: project_root.join("data"),
                bin,
                root: project_root.to_path_buf(),
            }
        }
        Role::Etcd | Role::Mds | Role::Metaserver | Role::Proxy => {
            let root = project_root.join(role.as_str());
            let bin = root.join("sbin");
            let binary = match (role, version) {
                (Role::Etcd, _) => String::from("etcd"),
                (Role::Mds, MdsVersion::V2) => String::from("dingo-mdsv2"),
                _ => format!("dingo-{role}"),
            };
            ServiceDirs {
                binary: bin.join(binary),
                conf: root.join("conf"),
                log: root.join("logs"),
                data: root.join("data"),
                bin,
                root,
            }
        }
    }
}

/// How a config file's target is chosen.
#[derive(Clone, Copy)]
enum Target {
    ServiceConf,
    InPlace,
}

fn conf_file_names(role: Role, version: MdsVersion) -> Vec<(&'static str, Target)> {
    use Target::{InPlace, ServiceConf};

    match (role, version) {
        (Role::Etcd, _) => vec![("etcd.conf", ServiceConf)],
        (Role::Mds, MdsVersion::V1) => vec![("mds.conf", ServiceConf)],
        (Role::Mds, MdsVersion::V2) => {
            vec![("mds.conf", ServiceConf), (COORDINATOR_LIST, ServiceConf)]
        }
        (Role::Metaserver, _) => vec![("metaserver.conf", ServiceConf)],
        (Role::Proxy, MdsVersion::V1) => {
            vec![("proxy.conf", ServiceConf), ("client.conf", ServiceConf)]
        }
        (Role::Proxy, MdsVersion::V2) => {
            vec![("proxy.conf", ServiceConf), ("client.conf", InPlace)]
        }
        (Role::Coordinator, _) => vec![
            ("coordinator.yaml", ServiceConf),
            (COORDINATOR_LIST, ServiceConf),
        ],
        (Role::Store, _) => vec![("store.yaml", ServiceConf), (COORDINATOR_LIST, ServiceConf)],
        (Role::Index, _) => vec![("index.yaml", ServiceConf), (COORDINATOR_LIST, ServiceConf)],
        (Role::Document, _) => vec![
            ("document.yaml", ServiceConf),
            (COORDINATOR_LIST, ServiceConf),
        ],
        (Role::Executor, _) => vec![
            ("executor.yaml", ServiceConf),
            ("logback-executor.xml", ServiceConf),
        ],
    }
}

fn conf_file(
    (name, target): &(&'static str, Target),
    conf_src_dir: &Utf8Path,
    service_conf_dir: &Utf8Path,
) -> ConfFile {
    let source_path = conf_src_dir.join(name);
    let target_path = match target {
        Target::ServiceConf => service_conf_dir.join(name),
        Target::InPlace => source_path.clone(),
    };
    ConfFile {
        name: (*name).to_owned(),
        source_path,
        target_path,
    }
}

fn tools_paths(kind: Kind) -> (Utf8PathBuf, Utf8PathBuf, Utf8PathBuf) {
    match kind {
        Kind::Filesystem => {
            let root = Utf8Path::new(FILESYSTEM_ROOT);
            (
                root.join("tools").join("sbin").join("dingo"),
                root.join(CONF_SRC_DIR).join("dingo.yaml"),
                Utf8PathBuf::from("/etc/dingo/dingo.yaml"),
            )
        }
        Kind::Store => {
            let root = Utf8Path::new(STORE_ROOT);
            (
                root.join("build").join("bin").join("dingodb_client"),
                root.join(CONF_SRC_DIR).join("client.yaml"),
                Utf8PathBuf::from("/etc/dingo-store/client.yaml"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(layout: &Layout) -> Vec<&str> {
        layout
            .service_conf_files
            .iter()
            .map(|file| file.name.as_str())
            .collect()
    }

    #[test]
    fn layout_is_deterministic() {
        for role in Role::ALL {
            for version in [MdsVersion::V1, MdsVersion::V2] {
                for kind in [Kind::Filesystem, Kind::Store] {
                    assert_eq!(layout(kind, role, version), layout(kind, role, version));
                }
            }
        }
    }

    #[test]
    fn filesystem_mds_paths() {
        let mds = layout(Kind::Filesystem, Role::Mds, MdsVersion::V1);
        assert_eq!(mds.service_root_dir, "/dingofs/mds");
        assert_eq!(mds.service_binary_path, "/dingofs/mds/sbin/dingo-mds");
        assert_eq!(mds.service_log_dir, "/dingofs/mds/logs");
        assert_eq!(mds.service_raft_dir, None);
        assert_eq!(mds.tools_binary_path, "/dingofs/tools/sbin/dingo");
    }

    #[rstest]
    #[case(MdsVersion::V1, vec!["mds.conf"])]
    #[case(MdsVersion::V2, vec!["mds.conf", "coor_list"])]
    fn mds_conf_files_follow_version(#[case] version: MdsVersion, #[case] expected: Vec<&str>) {
        let mds = layout(Kind::Filesystem, Role::Mds, version);
        assert_eq!(names(&mds), expected);
    }

    #[test]
    fn proxy_client_conf_is_read_in_place_for_v2() {
        let v1 = layout(Kind::Filesystem, Role::Proxy, MdsVersion::V1);
        let v2 = layout(Kind::Filesystem, Role::Proxy, MdsVersion::V2);
        let client_v1 = v1.service_conf_files.get(1).expect("client.conf for v1");
        let client_v2 = v2.service_conf_files.get(1).expect("client.conf for v2");

        assert_eq!(client_v1.target_path, "/dingofs/proxy/conf/client.conf");
        assert_eq!(client_v2.target_path, client_v2.source_path);
        assert_eq!(client_v2.source_path, "/dingofs/conf/client.conf");
    }

    #[test]
    fn store_roles_use_store_root_and_raft_dirs() {
        let index = layout(Kind::Store, Role::Index, MdsVersion::V2);
        assert_eq!(index.service_root_dir, "/opt/dingo-store/dist/index");
        assert_eq!(
            index.service_binary_path,
            "/opt/dingo-store/build/bin/dingodb_server"
        );
        assert_eq!(
            index.service_raft_dir.as_deref(),
            Some(Utf8Path::new("/opt/dingo-store/dist/index/data/raft"))
        );
        assert_eq!(
            index.service_vector_dir.as_deref(),
            Some(Utf8Path::new("/opt/dingo-store/dist/index/data/vector"))
        );
        assert_eq!(index.service_document_dir, None);
        assert_eq!(
            index.tools_conf_system_path,
            "/etc/dingo-store/client.yaml"
        );
    }

    #[test]
    fn executor_uses_executor_root() {
        let executor = layout(Kind::Store, Role::Executor, MdsVersion::V2);
        assert_eq!(executor.project_root, "/opt/dingo-executor");
        assert_eq!(executor.service_root_dir, executor.project_root);
        assert_eq!(
            names(&executor),
            vec!["executor.yaml", "logback-executor.xml"]
        );
    }
}
