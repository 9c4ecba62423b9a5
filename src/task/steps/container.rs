//! Container engine lifecycle steps.

use super::{quote, run_checked, settle};
use crate::exec::ExecOptions;
use crate::task::{ErrorCode, Slot, Step, StepOutcome, TaskContext, TaskError};

/// Container engine binary plus the options its commands run with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Engine {
    /// Engine binary, such as `docker`.
    pub bin: String,
    /// Execution options for engine commands.
    pub options: ExecOptions,
}

impl Engine {
    /// Creates an engine handle.
    pub fn new(bin: impl Into<String>, options: ExecOptions) -> Self {
        Self {
            bin: bin.into(),
            options,
        }
    }

    pub(super) fn command(&self, args: &[&str]) -> String {
        let mut command = self.bin.clone();
        for arg in args {
            command.push(' ');
            command.push_str(&quote(arg));
        }
        command
    }
}

/// Which container a step acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerRef {
    /// A known container id or name.
    Id(String),
    /// A container id written by an earlier step.
    Slot(Slot),
}

impl ContainerRef {
    pub(super) fn resolve(&self, step: &str, ctx: &TaskContext<'_>) -> Result<String, TaskError> {
        match self {
            Self::Id(id) => Ok(id.clone()),
            Self::Slot(slot) => ctx.get(step, *slot).map(|id| id.trim().to_owned()),
        }
    }

    pub(super) fn reads(&self) -> Vec<Slot> {
        match self {
            Self::Id(_) => Vec::new(),
            Self::Slot(slot) => vec![*slot],
        }
    }
}

impl From<Slot> for ContainerRef {
    fn from(slot: Slot) -> Self {
        Self::Slot(slot)
    }
}

/// Bind mount from a host path into the container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mount {
    /// Host directory.
    pub host: String,
    /// Container directory.
    pub container: String,
}

/// Everything `create` needs to know about a container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// `KEY=value` environment entries.
    pub envs: Vec<String>,
    /// Restart policy; omitted when empty.
    pub restart_policy: String,
    /// Entrypoint override.
    pub entrypoint: Option<String>,
    /// Arguments appended after the image.
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Renders the engine `create` command. Containers share the host network.
    #[must_use]
    pub fn create_command(&self, engine: &Engine) -> String {
        let volumes: Vec<String> = self
            .mounts
            .iter()
            .map(|mount| format!("{}:{}", mount.host, mount.container))
            .collect();
        let mut args = vec!["create", "--name", self.name.as_str(), "--network", "host"];
        if !self.restart_policy.is_empty() {
            args.extend(["--restart", self.restart_policy.as_str()]);
        }
        for volume in &volumes {
            args.extend(["--volume", volume.as_str()]);
        }
        for env in &self.envs {
            args.extend(["--env", env.as_str()]);
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.extend(["--entrypoint", entrypoint.as_str()]);
        }
        args.push(self.image.as_str());
        args.extend(self.args.iter().map(String::as_str));
        engine.command(&args)
    }
}

/// Creates a container and stores its id in a slot.
pub struct CreateContainer {
    engine: Engine,
    spec: ContainerSpec,
    out: Slot,
}

impl CreateContainer {
    /// Creates the step.
    #[must_use]
    pub const fn new(engine: Engine, spec: ContainerSpec, out: Slot) -> Self {
        Self { engine, spec, out }
    }
}

impl Step for CreateContainer {
    fn name(&self) -> &str {
        "create container"
    }

    fn writes(&self) -> Vec<Slot> {
        vec![self.out]
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        let command = self.spec.create_command(&self.engine);
        match run_checked(ctx, &command, &self.engine.options, ErrorCode::CREATE_CONTAINER) {
            Ok(stdout) => {
                let id = stdout.trim();
                if id.is_empty() {
                    return StepOutcome::Fail(TaskError::Step {
                        step: self.name().to_owned(),
                        message: format!("engine returned no id for {}", self.spec.name),
                    });
                }
                ctx.set(self.out, id);
                StepOutcome::Continue
            }
            Err(err) => StepOutcome::Fail(err),
        }
    }
}

macro_rules! lifecycle_step {
    ($(#[$meta:meta])* $step:ident, $name:literal, $verb:literal, $code:expr) => {
        $(#[$meta])*
        pub struct $step {
            engine: Engine,
            container: ContainerRef,
        }

        impl $step {
            /// Creates the step.
            pub fn new(engine: Engine, container: impl Into<ContainerRef>) -> Self {
                Self {
                    engine,
                    container: container.into(),
                }
            }
        }

        impl Step for $step {
            fn name(&self) -> &str {
                $name
            }

            fn reads(&self) -> Vec<Slot> {
                self.container.reads()
            }

            fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
                let id = match self.container.resolve(self.name(), ctx) {
                    Ok(id) => id,
                    Err(err) => return StepOutcome::Fail(err),
                };
                let command = self.engine.command(&[$verb, &id]);
                run_checked(ctx, &command, &self.engine.options, $code)
                    .map(|_| ())
                    .into()
            }
        }
    };
}

lifecycle_step!(
    /// Starts a container.
    StartContainer,
    "start container",
    "start",
    ErrorCode::START_CONTAINER
);
lifecycle_step!(
    /// Stops a container.
    StopContainer,
    "stop container",
    "stop",
    ErrorCode::STOP_CONTAINER
);
lifecycle_step!(
    /// Removes a stopped container.
    RemoveContainer,
    "remove container",
    "rm",
    ErrorCode::REMOVE_CONTAINER
);

/// Runs a shell command inside a container.
pub struct ExecContainer {
    engine: Engine,
    container: ContainerRef,
    command: String,
    output: Option<Slot>,
}

impl ExecContainer {
    /// Creates the step.
    pub fn new(
        engine: Engine,
        container: impl Into<ContainerRef>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            container: container.into(),
            command: command.into(),
            output: None,
        }
    }

    /// Binds the command output to `slot`.
    #[must_use]
    pub const fn output(mut self, slot: Slot) -> Self {
        self.output = Some(slot);
        self
    }
}

impl Step for ExecContainer {
    fn name(&self) -> &str {
        "exec in container"
    }

    fn reads(&self) -> Vec<Slot> {
        self.container.reads()
    }

    fn writes(&self) -> Vec<Slot> {
        self.output.into_iter().collect()
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        let id = match self.container.resolve(self.name(), ctx) {
            Ok(id) => id,
            Err(err) => return StepOutcome::Fail(err),
        };
        let command = self.engine.command(&["exec", &id, "/bin/bash", "-c", &self.command]);
        let result = ctx.run(&command, &self.engine.options);
        settle(ctx, result, self.output, None, ErrorCode::EXEC_CONTAINER)
    }
}
