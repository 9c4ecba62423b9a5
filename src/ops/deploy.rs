//! Container shape of deploy services.

use super::Service;
use crate::context::Context;
use crate::item::ResolveError;
use crate::task::steps::{ContainerSpec, Mount};
use crate::topology::DeployConfig;

impl DeployConfig {
    /// `(host dir, container dir)` pairs for every configured host directory.
    fn mount_pairs(&self) -> Result<Vec<(String, String)>, ResolveError> {
        let layout = self.layout();
        let mut pairs = vec![
            (self.log_dir()?, layout.service_log_dir.to_string()),
            (self.data_dir()?, layout.service_data_dir.to_string()),
            (self.core_dir()?, layout.core_system_dir.to_string()),
        ];
        if let Some(raft) = layout.service_raft_dir {
            pairs.push((self.raft_dir()?, raft.to_string()));
        }
        pairs.retain(|(host, _)| !host.trim().is_empty());
        Ok(pairs)
    }
}

impl Service for DeployConfig {
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
        let envs = self
            .env()?
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        Ok(ContainerSpec {
            name: self.container_name(),
            image: self.container_image()?,
            mounts,
            envs,
            restart_policy: self.restart_policy()?,
            entrypoint: None,
            args: vec![String::from("--role"), self.role().as_str().to_owned()],
        })
    }

    fn host_dirs(&self) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .mount_pairs()?
            .into_iter()
            .map(|(host, _)| host)
            .collect())
    }
}
