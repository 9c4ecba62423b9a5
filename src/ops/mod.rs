//! Task library for deploy and monitor services.
//!
//! [`Ops`] turns resolved services into [`Task`]s that create, sync, start,
//! stop and clean their containers, keeping the [`ServiceStore`] in step.
//! [`run_tasks`] executes a batch with one worker per host.

use std::collections::BTreeMap;
use std::sync::Arc;

use shell_escape::unix::escape;
use tokio::task::JoinSet;
use tracing::debug;
use uuid::Uuid;

use crate::context::Context;
use crate::exec::{ExecOptions, RemoteExecutor, RemoteTarget};
use crate::item::ResolveError;
use crate::store::{ContainerState, REMOVED_CONTAINER_ID, ServiceStore};
use crate::task::steps::{
    ContainerSpec, CreateContainer, Engine, Lambda, RemoteCommand, RemoveContainer, RemoveFile,
    StartContainer, StopContainer, SyncFile,
};
use crate::task::{ErrorCode, Slot, StepOutcome, Task, TaskBuilder, TaskError, TaskOutcome};
use crate::topology::DeployConfig;

mod deploy;
mod monitor;
mod mutate;

pub use mutate::{config_mutator, delimiter_for, mutate_line};

/// Slot holding the container id of the service a task acts on.
pub const CONTAINER_ID: Slot = Slot::new("container_id");

const TEMP_DIR: &str = "/tmp";

/// A resolved service that can be run as a container.
pub trait Service {
    /// Stable service id, also the store key.
    fn service_id(&self) -> &str;

    /// Host identifier the service runs on.
    fn host(&self) -> &str;

    /// Host inventory the service was resolved against.
    fn context(&self) -> &Context;

    /// Container to create for the service.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a configured value is malformed.
    fn container_spec(&self) -> Result<ContainerSpec, ResolveError>;

    /// Host directories the container mounts.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a configured value is malformed.
    fn host_dirs(&self) -> Result<Vec<String>, ResolveError>;

    /// Extra `(step name, command)` pairs run on the host before the
    /// container is created.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a configured value is malformed.
    fn prepare_commands(&self) -> Result<Vec<(String, String)>, ResolveError> {
        Ok(Vec::new())
    }
}

/// What a task should do when the store holds no live container.
#[derive(Clone, Copy)]
enum Absent {
    Skip,
    Fail,
}

/// Builds service tasks against one cluster and store.
#[derive(Clone)]
pub struct Ops {
    cluster_id: String,
    store: Arc<dyn ServiceStore>,
    engine: Engine,
    host_options: ExecOptions,
}

impl Ops {
    /// Creates a task builder. Host file commands reuse the engine's
    /// privilege and timeout settings.
    pub fn new(cluster_id: impl Into<String>, store: Arc<dyn ServiceStore>, engine: Engine) -> Self {
        let host_options = engine.options;
        Self {
            cluster_id: cluster_id.into(),
            store,
            engine,
            host_options,
        }
    }

    /// Cluster the tasks record services under.
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Creates the host directories and the container, then records the
    /// container id. Skips when a live container is already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the service cannot be resolved.
    pub fn create_task(&self, service: &impl Service) -> Result<Task, TaskError> {
        let spec = service.container_spec()?;
        let dirs = service.host_dirs()?;
        let id = service.service_id().to_owned();

        let check_store = Arc::clone(&self.store);
        let check_id = id.clone();
        let mut builder = Self::begin("create service", service)
            .step(Lambda::new("check container", move |_| {
                match check_store.container_state(&check_id) {
                    Ok(ContainerState::Created(_)) => StepOutcome::Skip,
                    Ok(ContainerState::NeverCreated | ContainerState::Removed) => {
                        StepOutcome::Continue
                    }
                    Err(err) => StepOutcome::Fail(err.into()),
                }
            }));
        if !dirs.is_empty() {
            builder = builder.step(
                RemoteCommand::new(
                    "create directories",
                    format!("mkdir -p {}", quote_all(&dirs)),
                    self.host_options,
                )
                .code(ErrorCode::CREATE_DIRECTORY),
            );
        }
        for (name, command) in service.prepare_commands()? {
            builder = builder.step(RemoteCommand::new(name, command, self.host_options));
        }

        let record_store = Arc::clone(&self.store);
        let cluster_id = self.cluster_id.clone();
        builder
            .step(CreateContainer::new(self.engine.clone(), spec, CONTAINER_ID))
            .step(
                Lambda::new("record container", move |ctx| {
                    let container_id = match ctx.get("record container", CONTAINER_ID) {
                        Ok(value) => value.to_owned(),
                        Err(err) => return StepOutcome::Fail(err),
                    };
                    record_store
                        .insert_service(&cluster_id, &id, &container_id)
                        .map_err(TaskError::from)
                        .into()
                })
                .reads([CONTAINER_ID]),
            )
            .build()
    }

    /// Starts the recorded container.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the task cannot be assembled.
    pub fn start_task(&self, service: &impl Service) -> Result<Task, TaskError> {
        Self::begin("start service", service)
            .step(self.load_container(service.service_id(), Absent::Fail))
            .step(StartContainer::new(self.engine.clone(), CONTAINER_ID))
            .build()
    }

    /// Stops the recorded container; skips when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the task cannot be assembled.
    pub fn stop_task(&self, service: &impl Service) -> Result<Task, TaskError> {
        Self::begin("stop service", service)
            .step(self.load_container(service.service_id(), Absent::Skip))
            .step(StopContainer::new(self.engine.clone(), CONTAINER_ID))
            .build()
    }

    /// Stops and removes the container, deletes its host directories and
    /// marks it removed in the store. Skips when there is no container.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the service cannot be resolved.
    pub fn clean_task(&self, service: &impl Service) -> Result<Task, TaskError> {
        let dirs = service.host_dirs()?;
        let mut builder = Self::begin("clean service", service)
            .step(self.load_container(service.service_id(), Absent::Skip))
            .step(StopContainer::new(self.engine.clone(), CONTAINER_ID))
            .step(RemoveContainer::new(self.engine.clone(), CONTAINER_ID));
        if !dirs.is_empty() {
            builder = builder.step(
                RemoteCommand::new(
                    "remove directories",
                    format!("rm -rf {}", quote_all(&dirs)),
                    self.host_options,
                )
                .code(ErrorCode::REMOVE_FILE),
            );
        }
        let store = Arc::clone(&self.store);
        let id = service.service_id().to_owned();
        builder
            .step(Lambda::new("mark removed", move |_| {
                store
                    .set_container_id(&id, REMOVED_CONTAINER_ID)
                    .map_err(TaskError::from)
                    .into()
            }))
            .build()
    }

    /// Rewrites every config file of a deploy service from its template
    /// with the service's resolved values. Temp files are removed by post
    /// steps.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the service cannot be resolved.
    pub fn sync_task(&self, service: &DeployConfig) -> Result<Task, TaskError> {
        let values = service.service_config()?;
        let layout = service.layout();
        let mut builder = Self::begin("sync config", service)
            .step(self.load_container(service.id(), Absent::Fail));
        for file in &layout.service_conf_files {
            let Some(delimiter) = delimiter_for(&file.name) else {
                continue;
            };
            let temp_path = format!("{TEMP_DIR}/stratadm-{}", Uuid::new_v4());
            builder = builder
                .step(SyncFile::new(
                    self.engine.clone(),
                    CONTAINER_ID,
                    file.source_path.as_str(),
                    file.target_path.as_str(),
                    temp_path.clone(),
                    config_mutator(values.clone(), delimiter),
                ))
                .post_step(RemoveFile::new(temp_path, self.host_options));
        }
        builder.build()
    }

    fn begin(name: &str, service: &impl Service) -> TaskBuilder {
        let target = RemoteTarget::from_context(service.context(), service.host());
        Task::builder(name)
            .subname(format!("host={} id={}", service.host(), service.service_id()))
            .target(target)
    }

    fn load_container(&self, service_id: &str, absent: Absent) -> Lambda {
        let store = Arc::clone(&self.store);
        let id = service_id.to_owned();
        Lambda::new("load container", move |ctx| {
            let removed = match store.container_state(&id) {
                Ok(ContainerState::Created(container_id)) => {
                    ctx.set(CONTAINER_ID, container_id);
                    return StepOutcome::Continue;
                }
                Ok(ContainerState::Removed) => true,
                Ok(ContainerState::NeverCreated) => false,
                Err(err) => return StepOutcome::Fail(err.into()),
            };
            match absent {
                Absent::Skip => StepOutcome::Skip,
                Absent::Fail => StepOutcome::Fail(TaskError::ContainerMissing {
                    service_id: id.clone(),
                    removed,
                }),
            }
        })
        .writes([CONTAINER_ID])
    }
}

fn quote_all(paths: &[String]) -> String {
    paths
        .iter()
        .map(|path| escape(path.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome of one task from [`run_tasks`].
#[derive(Debug)]
pub struct TaskReport {
    /// Task name.
    pub name: String,
    /// Task detail.
    pub subname: String,
    /// Target host, if any.
    pub host: Option<String>,
    /// Task result.
    pub result: Result<TaskOutcome, TaskError>,
}

struct Pending {
    index: usize,
    name: String,
    subname: String,
    host: Option<String>,
}

impl Pending {
    fn of(index: usize, task: &Task) -> Self {
        Self {
            index,
            name: task.name().to_owned(),
            subname: task.subname().to_owned(),
            host: task.target().map(|target| target.host.clone()),
        }
    }

    fn report(self, result: Result<TaskOutcome, TaskError>) -> TaskReport {
        TaskReport {
            name: self.name,
            subname: self.subname,
            host: self.host,
            result,
        }
    }
}

/// Runs `tasks` with one blocking worker per host.
///
/// Tasks for the same host run sequentially in the given order; different
/// hosts run concurrently. Reports come back in input order. A task whose
/// worker panicked is reported as [`TaskError::Join`].
pub async fn run_tasks(tasks: Vec<Task>, executor: Arc<dyn RemoteExecutor>) -> Vec<TaskReport> {
    let pending: Vec<Pending> = tasks
        .iter()
        .enumerate()
        .map(|(index, task)| Pending::of(index, task))
        .collect();
    let mut groups: BTreeMap<Option<String>, Vec<(usize, Task)>> = BTreeMap::new();
    for (index, task) in tasks.into_iter().enumerate() {
        let host = task.target().map(|target| target.host.clone());
        groups.entry(host).or_default().push((index, task));
    }

    let mut workers = JoinSet::new();
    for (host, group) in groups {
        debug!(host = ?host, tasks = group.len(), "starting host worker");
        let worker_executor = Arc::clone(&executor);
        workers.spawn_blocking(move || {
            group
                .into_iter()
                .map(|(index, task)| (index, task.execute(worker_executor.as_ref())))
                .collect::<Vec<_>>()
        });
    }

    let mut results: BTreeMap<usize, Result<TaskOutcome, TaskError>> = BTreeMap::new();
    let mut worker_failure = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(finished) => results.extend(finished),
            Err(err) => worker_failure = Some(err.to_string()),
        }
    }

    pending
        .into_iter()
        .map(|entry| {
            let result = results.remove(&entry.index).unwrap_or_else(|| {
                Err(TaskError::Join(
                    worker_failure
                        .clone()
                        .unwrap_or_else(|| String::from("worker did not report")),
                ))
            });
            entry.report(result)
        })
        .collect()
}
