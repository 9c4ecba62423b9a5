//! Binary entry point for the `stratadm` CLI.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stratadm::config::{AdmConfig, ConfigError};
use stratadm::context::{Context, HostsError};
use stratadm::diff::{DiffRecord, diff_monitor, diff_topology};
use stratadm::exec::{ExecConfig, ExecOptions, RemoteExecutor, SshExecutor};
use stratadm::item::ResolveError;
use stratadm::monitor::{MonitorConfig, MonitorError, MonitorItems, parse_monitor};
use stratadm::ops::{Ops, Service, TaskReport, run_tasks};
use stratadm::store::{FileServiceStore, ServiceStore};
use stratadm::task::steps::Engine;
use stratadm::task::{Task, TaskError, TaskOutcome};
use stratadm::topology::{DeployConfig, DeployItems, TopologyError, parse_topology};

mod cli;

use cli::{
    Cli, DeployCommand, DiffCommand, MonitorCommand, MonitorDiffCommand, ReferenceCommand,
    Registry, TopologyArgs,
};

const LOG_ENV: &str = "STRATADM_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("exec configuration error: {0}")]
    ExecConfig(String),
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("host inventory error: {0}")]
    Hosts(#[from] HostsError),
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("task error: {0}")]
    Task(#[from] TaskError),
    #[error("failed to write output: {0}")]
    Output(String),
    #[error("{failed} of {total} tasks failed")]
    TasksFailed { failed: usize, total: usize },
    #[error("no service matches the given filters")]
    NoMatch,
}

/// Container lifecycle operations shared by deploy and monitor services.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Create,
    Start,
    Stop,
    Clean,
}

impl Lifecycle {
    const fn tears_down(self) -> bool {
        matches!(self, Self::Stop | Self::Clean)
    }

    fn task(self, ops: &Ops, service: &impl Service) -> Result<Task, TaskError> {
        match self {
            Self::Create => ops.create_task(service),
            Self::Start => ops.start_task(service),
            Self::Stop => ops.stop_task(service),
            Self::Clean => ops.clean_task(service),
        }
    }
}

/// Role, host and id filters of the lifecycle subcommands.
struct Selection<'a> {
    role: Option<&'a str>,
    host: Option<&'a str>,
    id: Option<&'a str>,
}

impl<'a> Selection<'a> {
    fn of(command: &'a DeployCommand) -> Self {
        Self {
            role: command.role.as_deref(),
            host: command.host.as_deref(),
            id: command.id.as_deref(),
        }
    }

    fn matches(&self, role: &str, host: &str, id: &str) -> bool {
        self.role.is_none_or(|wanted| wanted == role)
            && self.host.is_none_or(|wanted| wanted == host)
            && self.id.is_none_or(|wanted| wanted == id)
    }
}

#[derive(Serialize)]
struct DiffRow<'a> {
    diff_type: String,
    id: &'a str,
    role: &'a str,
    host: &'a str,
}

#[derive(Serialize)]
struct ReportRow {
    task: String,
    detail: String,
    host: Option<String>,
    status: &'static str,
    message: Option<String>,
}

impl From<TaskReport> for ReportRow {
    fn from(report: TaskReport) -> Self {
        let (status, message) = match report.result {
            Ok(TaskOutcome::Completed) => ("completed", None),
            Ok(TaskOutcome::Skipped { step }) => ("skipped", Some(format!("skipped at {step}"))),
            Err(err) => ("failed", Some(err.to_string())),
        };
        Self {
            task: report.name,
            detail: report.subname,
            host: report.host,
            status,
            message,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AdmConfig::load_without_cli_args();
    init_tracing(config.as_ref().map_or("warn", |cfg| cfg.log_filter.as_str()));

    let exit_code = match dispatch(cli, config).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn dispatch(cli: Cli, config: Result<AdmConfig, ConfigError>) -> Result<(), CliError> {
    match cli {
        Cli::Reference(command) => reference(&command),
        Cli::Resolve(args) => resolve(&args),
        Cli::Diff(command) => diff(&command),
        Cli::Monitor(command) => monitor(&command),
        Cli::MonitorDiff(command) => monitor_diff(&command),
        Cli::Create(command) => lifecycle(&command, Lifecycle::Create, &config?).await,
        Cli::Start(command) => lifecycle(&command, Lifecycle::Start, &config?).await,
        Cli::Stop(command) => lifecycle(&command, Lifecycle::Stop, &config?).await,
        Cli::Clean(command) => lifecycle(&command, Lifecycle::Clean, &config?).await,
        Cli::Sync(command) => sync(&command, &config?).await,
    }
}

fn reference(command: &ReferenceCommand) -> Result<(), CliError> {
    match command.registry {
        Registry::Deploy => emit(&DeployItems::new().item_set().reference()),
        Registry::Monitor => emit(&MonitorItems::new().item_set().reference()),
    }
}

fn resolve(args: &TopologyArgs) -> Result<(), CliError> {
    let services = load_services(args)?;
    let views = services
        .iter()
        .map(DeployConfig::view)
        .collect::<Result<Vec<_>, _>>()?;
    emit(&views)
}

fn diff(command: &DiffCommand) -> Result<(), CliError> {
    let context = load_context(command.hosts.as_deref())?;
    let records = diff_topology(
        &read_document(&command.old)?,
        &read_document(&command.new)?,
        &context,
        &Arc::new(DeployItems::new()),
    )?;
    emit(&diff_rows(&records, |service| service.role().as_str()))
}

fn monitor(command: &MonitorCommand) -> Result<(), CliError> {
    let monitors = load_monitors(&command.topology, &command.monitor)?;
    let views = monitors
        .iter()
        .map(MonitorConfig::view)
        .collect::<Result<Vec<_>, _>>()?;
    emit(&views)
}

fn monitor_diff(command: &MonitorDiffCommand) -> Result<(), CliError> {
    let context = load_context(command.topology.hosts.as_deref())?;
    let services = parse_topology(
        &read_document(&command.topology.topology)?,
        &context,
        &Arc::new(DeployItems::new()),
    )?;
    let records = diff_monitor(
        &read_document(&command.old)?,
        &read_document(&command.new)?,
        &services,
        &context,
        &Arc::new(MonitorItems::new()),
    )?;
    emit(&diff_rows(&records, |service| service.role().as_str()))
}

fn diff_rows<T>(records: &[DiffRecord<T>], role: impl Fn(&T) -> &str) -> Vec<DiffRow<'_>>
where
    T: Service,
{
    records
        .iter()
        .map(|record| DiffRow {
            diff_type: record.diff_type.to_string(),
            id: record.config.service_id(),
            role: role(&record.config),
            host: record.config.host(),
        })
        .collect()
}

async fn lifecycle(
    command: &DeployCommand,
    action: Lifecycle,
    config: &AdmConfig,
) -> Result<(), CliError> {
    let selection = Selection::of(command);
    let (ops, executor) = build_runtime(config, command.sudo)?;

    let Some(monitor_path) = command.monitor.as_deref() else {
        let services = load_services(&command.topology)?;
        let tasks = services
            .iter()
            .filter(|service| {
                selection.matches(service.role().as_str(), service.host(), service.id())
            })
            .map(|service| action.task(&ops, service))
            .collect::<Result<Vec<_>, _>>()?;
        return finish(run_batch(tasks, &executor).await);
    };

    let monitors = load_monitors(&command.topology, monitor_path)?;
    let mut stages: BTreeMap<u8, Vec<Task>> = BTreeMap::new();
    for service in monitors
        .iter()
        .filter(|service| selection.matches(service.role().as_str(), service.host(), service.id()))
    {
        stages
            .entry(service.order())
            .or_default()
            .push(action.task(&ops, service)?);
    }
    if stages.is_empty() {
        return Err(CliError::NoMatch);
    }

    let ordered: Vec<(u8, Vec<Task>)> = if action.tears_down() {
        stages.into_iter().rev().collect()
    } else {
        stages.into_iter().collect()
    };
    let mut rows = Vec::new();
    for (order, tasks) in ordered {
        info!(order, tasks = tasks.len(), "running monitor stage");
        let stage = run_batch(tasks, &executor).await;
        let stage_failed = stage.iter().any(|row| row.status == "failed");
        rows.extend(stage);
        if stage_failed {
            warn!(order, "monitor stage failed; later stages not run");
            break;
        }
    }
    finish(rows)
}

async fn sync(command: &DeployCommand, config: &AdmConfig) -> Result<(), CliError> {
    let selection = Selection::of(command);
    let (ops, executor) = build_runtime(config, command.sudo)?;
    let services = load_services(&command.topology)?;
    let tasks = services
        .iter()
        .filter(|service| selection.matches(service.role().as_str(), service.host(), service.id()))
        .map(|service| ops.sync_task(service))
        .collect::<Result<Vec<_>, _>>()?;
    finish(run_batch(tasks, &executor).await)
}

fn build_runtime(
    config: &AdmConfig,
    sudo: bool,
) -> Result<(Ops, Arc<dyn RemoteExecutor>), CliError> {
    config.validate()?;
    let exec_config = ExecConfig::load_without_cli_args()
        .map_err(|err| CliError::ExecConfig(err.to_string()))?;
    let engine = Engine::new(
        exec_config.engine_bin.clone(),
        ExecOptions {
            local: false,
            sudo,
            timeout_secs: exec_config.timeout_secs,
        },
    );
    let executor = SshExecutor::with_process_runner(exec_config)
        .map_err(|err| CliError::ExecConfig(err.to_string()))?;
    let store: Arc<dyn ServiceStore> =
        Arc::new(FileServiceStore::new(config.store_path.as_str()));
    Ok((
        Ops::new(config.cluster_id.as_str(), store, engine),
        Arc::new(executor),
    ))
}

async fn run_batch(tasks: Vec<Task>, executor: &Arc<dyn RemoteExecutor>) -> Vec<ReportRow> {
    run_tasks(tasks, Arc::clone(executor))
        .await
        .into_iter()
        .map(ReportRow::from)
        .collect()
}

fn finish(rows: Vec<ReportRow>) -> Result<(), CliError> {
    if rows.is_empty() {
        return Err(CliError::NoMatch);
    }
    emit(&rows)?;
    let failed = rows.iter().filter(|row| row.status == "failed").count();
    if failed > 0 {
        return Err(CliError::TasksFailed {
            failed,
            total: rows.len(),
        });
    }
    Ok(())
}

fn load_services(args: &TopologyArgs) -> Result<Vec<DeployConfig>, CliError> {
    let context = load_context(args.hosts.as_deref())?;
    Ok(parse_topology(
        &read_document(&args.topology)?,
        &context,
        &Arc::new(DeployItems::new()),
    )?)
}

fn load_monitors(args: &TopologyArgs, monitor: &Path) -> Result<Vec<MonitorConfig>, CliError> {
    let context = load_context(args.hosts.as_deref())?;
    let services = parse_topology(
        &read_document(&args.topology)?,
        &context,
        &Arc::new(DeployItems::new()),
    )?;
    Ok(parse_monitor(
        &read_document(monitor)?,
        &services,
        &context,
        &Arc::new(MonitorItems::new()),
    )?)
}

fn load_context(hosts: Option<&Path>) -> Result<Context, CliError> {
    hosts.map_or_else(
        || Ok(Context::new()),
        |path| Ok(Context::from_inventory(&read_document(path)?)?),
    )
}

fn read_document(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|err| CliError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

fn emit(value: &impl Serialize) -> Result<(), CliError> {
    let text =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{text}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
