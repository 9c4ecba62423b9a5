//! Command-line interface definitions for the `stratadm` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

/// Top-level CLI for the `stratadm` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stratadm",
    about = "Resolve, diff and deploy storage cluster topologies",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List every recognised configuration key.
    #[command(name = "reference", about = "List every recognised configuration key")]
    Reference(ReferenceCommand),
    /// Resolve a topology and print its services.
    #[command(name = "resolve", about = "Resolve a topology and print its services")]
    Resolve(TopologyArgs),
    /// Compare two topologies.
    #[command(name = "diff", about = "Compare two topologies")]
    Diff(DiffCommand),
    /// Resolve the monitoring services of a topology.
    #[command(name = "monitor", about = "Resolve the monitoring services of a topology")]
    Monitor(MonitorCommand),
    /// Compare two monitor documents against one topology.
    #[command(
        name = "monitor-diff",
        about = "Compare two monitor documents against one topology"
    )]
    MonitorDiff(MonitorDiffCommand),
    /// Create the containers of selected services.
    #[command(name = "create", about = "Create the containers of selected services")]
    Create(DeployCommand),
    /// Rewrite the config files inside running containers.
    #[command(name = "sync", about = "Rewrite the config files inside running containers")]
    Sync(DeployCommand),
    /// Start the containers of selected services.
    #[command(name = "start", about = "Start the containers of selected services")]
    Start(DeployCommand),
    /// Stop the containers of selected services.
    #[command(name = "stop", about = "Stop the containers of selected services")]
    Stop(DeployCommand),
    /// Remove the containers and data of selected services.
    #[command(name = "clean", about = "Remove the containers and data of selected services")]
    Clean(DeployCommand),
}

/// Which registry `reference` lists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum Registry {
    /// Keys of deployed storage services.
    #[default]
    Deploy,
    /// Keys of monitoring services.
    Monitor,
}

/// Arguments for `stratadm reference`.
#[derive(Debug, Args)]
pub(crate) struct ReferenceCommand {
    /// Registry to list.
    #[arg(long, value_enum, default_value_t = Registry::Deploy)]
    pub(crate) registry: Registry,
}

/// Topology input shared by most subcommands.
#[derive(Debug, Args)]
pub(crate) struct TopologyArgs {
    /// Topology YAML document.
    #[arg(long, short = 't', value_name = "PATH")]
    pub(crate) topology: PathBuf,
    /// Host inventory YAML document mapping hosts to addresses.
    #[arg(long, value_name = "PATH")]
    pub(crate) hosts: Option<PathBuf>,
}

/// Arguments for `stratadm diff`.
#[derive(Debug, Args)]
pub(crate) struct DiffCommand {
    /// Currently deployed topology.
    #[arg(long, value_name = "PATH")]
    pub(crate) old: PathBuf,
    /// Proposed topology.
    #[arg(long, value_name = "PATH")]
    pub(crate) new: PathBuf,
    /// Host inventory YAML document.
    #[arg(long, value_name = "PATH")]
    pub(crate) hosts: Option<PathBuf>,
}

/// Arguments for `stratadm monitor`.
#[derive(Debug, Args)]
pub(crate) struct MonitorCommand {
    /// Storage topology being monitored.
    #[command(flatten)]
    pub(crate) topology: TopologyArgs,
    /// Monitor YAML document.
    #[arg(long, short = 'm', value_name = "PATH")]
    pub(crate) monitor: PathBuf,
}

/// Arguments for `stratadm monitor-diff`.
#[derive(Debug, Args)]
pub(crate) struct MonitorDiffCommand {
    /// Storage topology being monitored.
    #[command(flatten)]
    pub(crate) topology: TopologyArgs,
    /// Currently deployed monitor document.
    #[arg(long, value_name = "PATH")]
    pub(crate) old: PathBuf,
    /// Proposed monitor document.
    #[arg(long, value_name = "PATH")]
    pub(crate) new: PathBuf,
}

/// Arguments for the container lifecycle subcommands.
#[derive(Debug, Args)]
pub(crate) struct DeployCommand {
    /// Storage topology.
    #[command(flatten)]
    pub(crate) topology: TopologyArgs,
    /// Act on the monitoring services of this monitor document instead.
    #[arg(long, short = 'm', value_name = "PATH")]
    pub(crate) monitor: Option<PathBuf>,
    /// Only services with this role.
    #[arg(long, value_name = "ROLE")]
    pub(crate) role: Option<String>,
    /// Only services on this host.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Only the service with this id.
    #[arg(long, value_name = "ID")]
    pub(crate) id: Option<String>,
    /// Run container commands through the privilege wrapper.
    #[arg(long)]
    pub(crate) sudo: bool,
}
