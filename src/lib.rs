//! Core library for the `stratadm` storage cluster deployment tool.
//!
//! A topology document is resolved into typed service instances whose
//! values come lazily from a declarative item registry. The crate derives
//! container layouts, monitoring services and structural diffs from those
//! instances, and drives container lifecycles on remote hosts through a
//! validated task pipeline.

pub mod config;
pub mod context;
pub mod diff;
pub mod exec;
pub mod item;
pub mod layout;
pub mod monitor;
pub mod ops;
pub mod store;
pub mod task;
pub mod test_support;
pub mod topology;
pub mod variables;

pub use config::{AdmConfig, ConfigError};
pub use context::{Context, HostEntry, HostsError};
pub use diff::{DiffRecord, DiffType, diff_configs, diff_monitor, diff_topology};
pub use exec::{ExecConfig, ExecError, ExecOptions, RemoteExecutor, RemoteTarget, SshExecutor};
pub use item::{ItemReference, ResolveError, Value};
pub use layout::{Layout, layout};
pub use monitor::{MonitorConfig, MonitorError, MonitorItems, MonitorRole, parse_monitor};
pub use ops::{Ops, Service, TaskReport, run_tasks};
pub use store::{
    ContainerState, FileServiceStore, MemoryServiceStore, REMOVED_CONTAINER_ID, ServiceStore,
    StoreError,
};
pub use task::{Task, TaskError, TaskOutcome};
pub use topology::{DeployConfig, DeployItems, Kind, Role, TopologyError, parse_topology};
pub use variables::{VariableError, Variables};
