//! Resolved deploy services.
//!
//! A topology document names a product [`Kind`] and lists, per [`Role`], the
//! hosts and instance counts to deploy. [`parse_topology`] expands it into
//! one [`DeployConfig`] per `(role, host, instance)` tuple. Each instance
//! keeps its raw config map and resolves typed values lazily through the
//! shared [`DeployItems`] registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::context::Context;
use crate::item::{Configured, ItemSet, ResolveError, Resolver, Value};
use crate::layout::{Layout, layout};
use crate::variables::Variables;

mod error;
mod items;
mod parse;
mod role;

pub use error::TopologyError;
pub use items::DeployItems;
pub use parse::{parse_topology, service_id};
pub(crate) use parse::short_id;
pub use role::{Kind, MdsVersion, Role, UnknownName};

/// One deployed occurrence of a role on a host.
#[derive(Clone, Debug)]
pub struct DeployConfig {
    kind: Kind,
    version: MdsVersion,
    id: String,
    parent_id: String,
    role: Role,
    host: String,
    hostname: String,
    instances: usize,
    host_sequence: usize,
    instances_sequence: usize,
    config: BTreeMap<String, Value>,
    variables: Variables,
    context: Arc<Context>,
    items: Arc<DeployItems>,
}

/// Serialisable summary of a resolved service.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceView {
    /// Stable service id.
    pub id: String,
    /// Id of the first instance on the same host entry.
    pub parent_id: String,
    /// Product family.
    pub kind: Kind,
    /// Service role.
    pub role: Role,
    /// Host identifier.
    pub host: String,
    /// Resolved hostname.
    pub hostname: String,
    /// Position of the host entry within its role section.
    pub host_sequence: usize,
    /// Position of the instance on its host.
    pub instances_sequence: usize,
    /// Name of the service container.
    pub container_name: String,
    /// Values written to the service config files.
    pub config: BTreeMap<String, String>,
    /// Container paths.
    pub layout: Layout,
}

impl Configured for DeployConfig {
    fn item_set(&self) -> &ItemSet<Self> {
        self.items.item_set()
    }

    fn raw_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

macro_rules! string_accessors {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            ///
            /// # Errors
            ///
            /// Returns [`ResolveError`] when the value has the wrong type.
            pub fn $name(&self) -> Result<String, ResolveError> {
                self.resolver().string(self.items.$name)
            }
        )*
    };
}

macro_rules! port_accessors {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            ///
            /// # Errors
            ///
            /// Returns [`ResolveError`] when the value is not a valid port.
            pub fn $name(&self) -> Result<u16, ResolveError> {
                self.resolver().port(self.items.$name)
            }
        )*
    };
}

impl DeployConfig {
    /// Product family.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Metadata server generation of the topology.
    #[must_use]
    pub const fn mds_version(&self) -> MdsVersion {
        self.version
    }

    /// Stable id derived from role, host and sequences.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of instance zero on the same host entry.
    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Service role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Host identifier from the document.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Hostname resolved through the context.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Number of instances declared for the host entry.
    #[must_use]
    pub const fn instances(&self) -> usize {
        self.instances
    }

    /// Position of the host entry within its role section.
    #[must_use]
    pub const fn host_sequence(&self) -> usize {
        self.host_sequence
    }

    /// Position of this instance on its host.
    #[must_use]
    pub const fn instances_sequence(&self) -> usize {
        self.instances_sequence
    }

    /// Rendered raw config map.
    #[must_use]
    pub const fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    /// Variables available to this instance.
    #[must_use]
    pub const fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Shared context the topology was resolved against.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Item registry backing the accessors.
    #[must_use]
    pub fn items(&self) -> &DeployItems {
        &self.items
    }

    /// Starts a resolution chain for this instance.
    #[must_use]
    pub const fn resolver(&self) -> Resolver<'_, Self> {
        Resolver::new(self)
    }

    string_accessors! {
        /// Service root inside the container.
        prefix;
        /// Container image.
        container_image;
        /// Host log directory.
        log_dir;
        /// Host data directory.
        data_dir;
        /// Host raft directory.
        raft_dir;
        /// Host core dump directory.
        core_dir;
        /// Extra container environment, space separated `KEY=VALUE` pairs.
        env;
        /// Container restart policy.
        restart_policy;
        /// Address the service listens on.
        listen_ip;
        /// Address advertised to clients.
        listen_external_ip;
        /// Object storage access key.
        s3_access_key;
        /// Object storage secret key.
        s3_secret_key;
        /// Object storage endpoint.
        s3_endpoint;
        /// Object storage bucket.
        s3_bucket_name;
    }

    port_accessors! {
        /// Main service port.
        listen_port;
        /// Raft port; zero for roles without raft.
        listen_raft_port;
        /// etcd client port.
        listen_client_port;
        /// mds dummy port.
        listen_dummy_port;
        /// Port advertised to clients.
        listen_external_port;
    }

    /// Copyset count for metaservers.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the value is not an integer.
    pub fn copysets(&self) -> Result<i64, ResolveError> {
        self.resolver().int(self.items.copysets)
    }

    /// Container paths of this service.
    #[must_use]
    pub fn layout(&self) -> Layout {
        layout(self.kind, self.role, self.version)
    }

    /// Name of the service container.
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("{}-{}-{}", self.kind, self.role, self.id)
    }

    /// Key/value pairs written into the service config files.
    ///
    /// Holds every non-excluded item with a non-zero value plus every raw
    /// key the registry does not know.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when an item fails to resolve.
    pub fn service_config(&self) -> Result<BTreeMap<String, String>, ResolveError> {
        let resolver = self.resolver();
        let mut rendered = BTreeMap::new();
        for (handle, item) in self.item_set().entries() {
            if item.excluded() {
                continue;
            }
            if let Some(value) = resolver.value(handle)?
                && !value.is_zero()
            {
                rendered.insert(item.key().to_owned(), value.to_string());
            }
        }
        for (key, value) in &self.config {
            if self.item_set().find(key).is_none() {
                rendered.insert(key.clone(), value.to_string());
            }
        }
        Ok(rendered)
    }

    /// Builds a serialisable summary.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the service config fails to resolve.
    pub fn view(&self) -> Result<ServiceView, ResolveError> {
        Ok(ServiceView {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            kind: self.kind,
            role: self.role,
            host: self.host.clone(),
            hostname: self.hostname.clone(),
            host_sequence: self.host_sequence,
            instances_sequence: self.instances_sequence,
            container_name: self.container_name(),
            config: self.service_config()?,
            layout: self.layout(),
        })
    }
}
