//! Step implementations shared by the task library.

use shell_escape::unix::escape;

use super::{ErrorCode, Slot, Step, StepOutcome, TaskContext, TaskError, post_handle};
use crate::exec::{ExecError, ExecOptions};

mod container;
mod file;

pub use container::{
    ContainerRef, ContainerSpec, CreateContainer, Engine, ExecContainer, Mount, RemoveContainer,
    StartContainer, StopContainer,
};
pub use file::{LineMutator, RemoveFile, SyncFile};

type LambdaFn = dyn Fn(&mut TaskContext<'_>) -> StepOutcome + Send + Sync;

/// Local computation expressed as a closure.
pub struct Lambda {
    name: String,
    reads: Vec<Slot>,
    writes: Vec<Slot>,
    body: Box<LambdaFn>,
}

impl Lambda {
    /// Wraps `body` as a step.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut TaskContext<'_>) -> StepOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            body: Box::new(body),
        }
    }

    /// Declares the slots `body` reads.
    #[must_use]
    pub fn reads(mut self, slots: impl IntoIterator<Item = Slot>) -> Self {
        self.reads.extend(slots);
        self
    }

    /// Declares the slots `body` writes.
    #[must_use]
    pub fn writes(mut self, slots: impl IntoIterator<Item = Slot>) -> Self {
        self.writes.extend(slots);
        self
    }
}

impl Step for Lambda {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> Vec<Slot> {
        self.reads.clone()
    }

    fn writes(&self) -> Vec<Slot> {
        self.writes.clone()
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        (self.body)(ctx)
    }
}

/// Shell command on the target host.
///
/// With an output slot bound, the step stores stdout (or the failure text)
/// there and never fails; the success slot, when bound, receives `true` or
/// `false`.
pub struct RemoteCommand {
    name: String,
    command: String,
    options: ExecOptions,
    code: ErrorCode,
    output: Option<Slot>,
    success: Option<Slot>,
}

impl RemoteCommand {
    /// Creates a command step.
    pub fn new(name: impl Into<String>, command: impl Into<String>, options: ExecOptions) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            options,
            code: ErrorCode::RUN_COMMAND,
            output: None,
            success: None,
        }
    }

    /// Overrides the error code reported on failure.
    #[must_use]
    pub const fn code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Binds the command output to `slot`.
    #[must_use]
    pub const fn output(mut self, slot: Slot) -> Self {
        self.output = Some(slot);
        self
    }

    /// Binds the success flag to `slot`.
    #[must_use]
    pub const fn success(mut self, slot: Slot) -> Self {
        self.success = Some(slot);
        self
    }
}

impl Step for RemoteCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> Vec<Slot> {
        self.output.into_iter().chain(self.success).collect()
    }

    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome {
        let result = ctx.run(&self.command, &self.options);
        settle(ctx, result, self.output, self.success, self.code)
    }
}

/// Records a remote result into bound slots and classifies failures.
fn settle(
    ctx: &mut TaskContext<'_>,
    result: Result<String, ExecError>,
    output: Option<Slot>,
    success: Option<Slot>,
    code: ErrorCode,
) -> StepOutcome {
    if let Some(slot) = success {
        ctx.set(slot, if result.is_ok() { "true" } else { "false" });
    }
    match result {
        Ok(stdout) => {
            if let Some(slot) = output {
                ctx.set(slot, stdout);
            }
            StepOutcome::Continue
        }
        Err(err) => {
            if let Some(slot) = output {
                ctx.set(
                    slot,
                    err.output().map_or_else(|| err.to_string(), str::to_owned),
                );
            }
            post_handle(output.is_some(), Some(err), code).into()
        }
    }
}

/// Runs a command and maps any failure through [`post_handle`] with no
/// output binding.
fn run_checked(
    ctx: &TaskContext<'_>,
    command: &str,
    options: &ExecOptions,
    code: ErrorCode,
) -> Result<String, TaskError> {
    match ctx.run(command, options) {
        Ok(stdout) => Ok(stdout),
        Err(err) => post_handle(false, Some(err), code).map(|()| String::new()),
    }
}

fn quote(text: &str) -> String {
    escape(text.into()).into_owned()
}

#[cfg(test)]
mod tests;
