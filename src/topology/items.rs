//! Recognised keys for deployed services.

use crate::item::{
    ItemDefault, ItemHandle, ItemSet, ResolveError, Resolver, Scope, Value, ValueKind,
};
use crate::layout::layout;

use super::{DeployConfig, Kind, Role};

const FILESYSTEM_IMAGE: &str = "dingodatabase/dingofs:latest";
const STORE_IMAGE: &str = "dingodatabase/dingo-store:latest";
const EXECUTOR_IMAGE: &str = "dingodatabase/dingo:latest";
const DEFAULT_RESTART_POLICY: &str = "always";
const RAFT_PORT_OFFSET: i64 = 100;
const ETCD_CLIENT_PORT: i64 = 2379;
const MDS_DUMMY_PORT: i64 = 7700;
const METASERVER_COPYSETS: i64 = 100;

type Computed = Result<Option<Value>, ResolveError>;

/// Item registry for [`DeployConfig`] plus handles for every typed accessor.
#[derive(Debug)]
pub struct DeployItems {
    set: ItemSet<DeployConfig>,
    pub(crate) prefix: ItemHandle,
    pub(crate) container_image: ItemHandle,
    pub(crate) log_dir: ItemHandle,
    pub(crate) data_dir: ItemHandle,
    pub(crate) raft_dir: ItemHandle,
    pub(crate) core_dir: ItemHandle,
    pub(crate) env: ItemHandle,
    pub(crate) restart_policy: ItemHandle,
    pub(crate) listen_ip: ItemHandle,
    pub(crate) listen_port: ItemHandle,
    pub(crate) listen_raft_port: ItemHandle,
    pub(crate) listen_client_port: ItemHandle,
    pub(crate) listen_dummy_port: ItemHandle,
    pub(crate) listen_external_ip: ItemHandle,
    pub(crate) listen_external_port: ItemHandle,
    pub(crate) copysets: ItemHandle,
    pub(crate) s3_access_key: ItemHandle,
    pub(crate) s3_secret_key: ItemHandle,
    pub(crate) s3_endpoint: ItemHandle,
    pub(crate) s3_bucket_name: ItemHandle,
}

impl DeployItems {
    /// Registers every deploy item. Call once at start-up and share the
    /// result behind an `Arc`.
    #[must_use]
    pub fn new() -> Self {
        let mut set = ItemSet::new();
        let common = Scope::Common;
        let fs = Scope::Filesystem;

        let prefix = set.register(
            common,
            "prefix",
            ValueKind::String,
            true,
            ItemDefault::computed("service root inside the container", default_prefix),
        );
        let container_image = set.register(
            common,
            "container_image",
            ValueKind::String,
            true,
            ItemDefault::computed("image of the role's product family", default_image),
        );
        let log_dir = set.register(common, "log_dir", ValueKind::String, true, ItemDefault::None);
        let data_dir = set.register(common, "data_dir", ValueKind::String, true, ItemDefault::None);
        let raft_dir = set.register(
            Scope::Store,
            "raft_dir",
            ValueKind::String,
            true,
            ItemDefault::None,
        );
        let core_dir = set.register(common, "core_dir", ValueKind::String, true, ItemDefault::None);
        let env = set.register(common, "env", ValueKind::String, true, ItemDefault::None);
        let restart_policy = set.register(
            common,
            "restart_policy",
            ValueKind::String,
            true,
            ItemDefault::literal(DEFAULT_RESTART_POLICY),
        );
        let listen_ip = set.register(
            common,
            "listen.ip",
            ValueKind::String,
            false,
            ItemDefault::computed("hostname of the service host", default_listen_ip),
        );
        let listen_port = set.register(
            common,
            "listen.port",
            ValueKind::Int,
            false,
            ItemDefault::computed("role base port + instances sequence", default_listen_port),
        );
        let listen_raft_port = set.register(
            Scope::Store,
            "listen.raft_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("listen.port + 100 for raft roles", default_raft_port),
        );
        let listen_client_port = set.register(
            fs,
            "listen.client_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("2379 + instances sequence for etcd", default_client_port),
        );
        let listen_dummy_port = set.register(
            fs,
            "listen.dummy_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("7700 + instances sequence for mds", default_dummy_port),
        );
        let listen_external_ip = set.register(
            common,
            "listen.external_ip",
            ValueKind::String,
            false,
            ItemDefault::computed("listen.ip", default_external_ip),
        );
        let listen_external_port = set.register(
            common,
            "listen.external_port",
            ValueKind::Int,
            false,
            ItemDefault::computed("listen.port", default_external_port),
        );
        let copysets = set.register(
            fs,
            "copysets",
            ValueKind::Int,
            false,
            ItemDefault::computed("100 for metaserver", default_copysets),
        );
        let s3_access_key = set.register(fs, "s3.ak", ValueKind::String, false, ItemDefault::None);
        let s3_secret_key = set.register(fs, "s3.sk", ValueKind::String, false, ItemDefault::None);
        let s3_endpoint =
            set.register(fs, "s3.endpoint", ValueKind::String, false, ItemDefault::None);
        let s3_bucket_name =
            set.register(fs, "s3.bucket_name", ValueKind::String, false, ItemDefault::None);

        Self {
            set,
            prefix,
            container_image,
            log_dir,
            data_dir,
            raft_dir,
            core_dir,
            env,
            restart_policy,
            listen_ip,
            listen_port,
            listen_raft_port,
            listen_client_port,
            listen_dummy_port,
            listen_external_ip,
            listen_external_port,
            copysets,
            s3_access_key,
            s3_secret_key,
            s3_endpoint,
            s3_bucket_name,
        }
    }

    /// Underlying item set, in registration order.
    #[must_use]
    pub const fn item_set(&self) -> &ItemSet<DeployConfig> {
        &self.set
    }
}

impl Default for DeployItems {
    fn default() -> Self {
        Self::new()
    }
}

fn default_prefix(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    let paths = layout(dc.kind(), dc.role(), dc.mds_version());
    Ok(Some(Value::String(paths.service_root_dir.into_string())))
}

fn default_image(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    let image = match (dc.kind(), dc.role()) {
        (_, Role::Executor) => EXECUTOR_IMAGE,
        (_, role) if role.uses_raft() => STORE_IMAGE,
        (Kind::Store, _) => STORE_IMAGE,
        (Kind::Filesystem, _) => FILESYSTEM_IMAGE,
    };
    Ok(Some(Value::from(image)))
}

fn default_listen_ip(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    Ok(Some(Value::from(resolver.instance().hostname())))
}

fn default_listen_port(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    Ok(Some(Value::Int(
        i64::from(dc.role().base_port()).saturating_add(sequence(dc)),
    )))
}

fn default_raft_port(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    if !dc.role().uses_raft() {
        return Ok(None);
    }
    let port = resolver.int(dc.items().listen_port)?;
    Ok(Some(Value::Int(port.saturating_add(RAFT_PORT_OFFSET))))
}

fn default_client_port(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    Ok((dc.role() == Role::Etcd).then(|| Value::Int(ETCD_CLIENT_PORT.saturating_add(sequence(dc)))))
}

fn default_dummy_port(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let dc = resolver.instance();
    Ok((dc.role() == Role::Mds).then(|| Value::Int(MDS_DUMMY_PORT.saturating_add(sequence(dc)))))
}

fn default_external_ip(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let ip = resolver.string(resolver.instance().items().listen_ip)?;
    Ok(Some(Value::String(ip)))
}

fn default_external_port(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    let port = resolver.int(resolver.instance().items().listen_port)?;
    Ok(Some(Value::Int(port)))
}

fn default_copysets(resolver: &Resolver<'_, DeployConfig>) -> Computed {
    Ok((resolver.instance().role() == Role::Metaserver).then_some(Value::Int(METASERVER_COPYSETS)))
}

fn sequence(dc: &DeployConfig) -> i64 {
    i64::try_from(dc.instances_sequence()).unwrap_or(i64::MAX)
}
