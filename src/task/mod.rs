//! Ordered remote operations with skip and cleanup semantics.
//!
//! A [`Task`] runs its steps strictly in order against one target host.
//! Each step returns a [`StepOutcome`]: continue, skip the rest of the
//! primary steps while still reporting success, or fail. Post steps always
//! run afterwards. Steps exchange values only through named [`Slot`]s held
//! by the [`TaskContext`], and [`TaskBuilder::build`] rejects a task whose
//! steps read a slot before an earlier step writes it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::exec::{ExecError, ExecOptions, RemoteExecutor, RemoteTarget};

mod error;
pub mod steps;

pub use error::{ErrorCode, TaskError, post_handle};

/// Named value cell shared between the steps of one task.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Slot(&'static str);

impl Slot {
    /// Declares a slot.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Slot name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Result of a single step.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Run the next step.
    Continue,
    /// Stop the primary steps and report success.
    Skip,
    /// Stop the primary steps and report failure.
    Fail(TaskError),
}

impl From<Result<(), TaskError>> for StepOutcome {
    fn from(result: Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(err) => Self::Fail(err),
        }
    }
}

/// How a task finished when it did not fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Every primary step ran.
    Completed,
    /// A step short-circuited the remaining primary steps.
    Skipped {
        /// Step that asked to skip.
        step: String,
    },
}

/// Per-run state handed to every step.
pub struct TaskContext<'a> {
    executor: &'a dyn RemoteExecutor,
    target: Option<&'a RemoteTarget>,
    slots: BTreeMap<Slot, String>,
}

impl<'a> TaskContext<'a> {
    /// Creates a context with the given seed values.
    #[must_use]
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        target: Option<&'a RemoteTarget>,
        seeds: BTreeMap<Slot, String>,
    ) -> Self {
        Self {
            executor,
            target,
            slots: seeds,
        }
    }

    /// Host the task runs against, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&RemoteTarget> {
        self.target
    }

    /// Runs `command` on the task target.
    ///
    /// # Errors
    ///
    /// Returns the executor's [`ExecError`].
    pub fn run(&self, command: &str, options: &ExecOptions) -> Result<String, ExecError> {
        self.executor.execute(self.target, command, options)
    }

    /// Reads a slot written earlier in the task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::EmptySlot`] when nothing was written.
    pub fn get(&self, step: &str, slot: Slot) -> Result<&str, TaskError> {
        self.slots
            .get(&slot)
            .map(String::as_str)
            .ok_or_else(|| TaskError::EmptySlot {
                step: step.to_owned(),
                slot: slot.name().to_owned(),
            })
    }

    /// Reads a slot that may legitimately be empty, as post steps do.
    #[must_use]
    pub fn try_get(&self, slot: Slot) -> Option<&str> {
        self.slots.get(&slot).map(String::as_str)
    }

    /// Writes a slot.
    pub fn set(&mut self, slot: Slot, value: impl Into<String>) {
        self.slots.insert(slot, value.into());
    }
}

/// One unit of work inside a task.
pub trait Step: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Slots the step reads.
    fn reads(&self) -> Vec<Slot> {
        Vec::new()
    }

    /// Slots the step writes.
    fn writes(&self) -> Vec<Slot> {
        Vec::new()
    }

    /// Performs the step.
    fn execute(&self, ctx: &mut TaskContext<'_>) -> StepOutcome;
}

/// Ordered steps plus cleanup steps for one target.
pub struct Task {
    name: String,
    subname: String,
    target: Option<RemoteTarget>,
    seeds: BTreeMap<Slot, String>,
    steps: Vec<Box<dyn Step>>,
    post_steps: Vec<Box<dyn Step>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("subname", &self.subname)
            .field("target", &self.target)
            .field("steps", &self.step_names())
            .field("post_steps", &self.post_step_names())
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Starts building a task.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            subname: String::new(),
            target: None,
            seeds: BTreeMap::new(),
            steps: Vec::new(),
            post_steps: Vec::new(),
        }
    }

    /// Task name, such as `create service`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishing detail, such as the host and service id.
    #[must_use]
    pub fn subname(&self) -> &str {
        &self.subname
    }

    /// Target host; `None` for control-machine tasks.
    #[must_use]
    pub const fn target(&self) -> Option<&RemoteTarget> {
        self.target.as_ref()
    }

    /// Names of the primary steps in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Names of the post steps in order.
    #[must_use]
    pub fn post_step_names(&self) -> Vec<&str> {
        self.post_steps.iter().map(|step| step.name()).collect()
    }

    /// Runs the task.
    ///
    /// Primary steps run in order until one skips or fails. Post steps then
    /// run unconditionally. A post step failure is reported only when the
    /// primary steps succeeded; otherwise it is logged.
    ///
    /// # Errors
    ///
    /// Returns the first failing primary step's error, or the first post
    /// step error when the primary steps succeeded.
    pub fn execute(&self, executor: &dyn RemoteExecutor) -> Result<TaskOutcome, TaskError> {
        let mut ctx = TaskContext::new(executor, self.target.as_ref(), self.seeds.clone());
        let primary = self.run_primary(&mut ctx);
        let post_errors = self.run_post(&mut ctx);

        let result = match primary {
            Ok(outcome) => post_errors.into_iter().next().map_or(Ok(outcome), Err),
            Err(err) => {
                for post_err in &post_errors {
                    warn!(task = %self.name, subname = %self.subname, error = %post_err, "post step failed after task failure");
                }
                Err(err)
            }
        };

        match &result {
            Ok(TaskOutcome::Completed) => {
                info!(task = %self.name, subname = %self.subname, "task completed");
            }
            Ok(TaskOutcome::Skipped { step }) => {
                warn!(task = %self.name, subname = %self.subname, step = %step, "task skipped");
            }
            Err(err) => {
                info!(task = %self.name, subname = %self.subname, error = %err, "task failed");
            }
        }
        result
    }

    fn run_primary(&self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome, TaskError> {
        for step in &self.steps {
            debug!(task = %self.name, step = step.name(), "step started");
            match step.execute(ctx) {
                StepOutcome::Continue => {
                    debug!(task = %self.name, step = step.name(), "step finished");
                }
                StepOutcome::Skip => {
                    debug!(task = %self.name, step = step.name(), "step skipped the task");
                    return Ok(TaskOutcome::Skipped {
                        step: step.name().to_owned(),
                    });
                }
                StepOutcome::Fail(err) => {
                    debug!(task = %self.name, step = step.name(), error = %err, "step failed");
                    return Err(err);
                }
            }
        }
        Ok(TaskOutcome::Completed)
    }

    fn run_post(&self, ctx: &mut TaskContext<'_>) -> Vec<TaskError> {
        let mut errors = Vec::new();
        for step in &self.post_steps {
            debug!(task = %self.name, step = step.name(), "post step started");
            match step.execute(ctx) {
                StepOutcome::Continue | StepOutcome::Skip => {}
                StepOutcome::Fail(err) => {
                    warn!(task = %self.name, step = step.name(), error = %err, "post step failed");
                    errors.push(err);
                }
            }
        }
        errors
    }
}

/// Builder that validates slot wiring before a [`Task`] exists.
pub struct TaskBuilder {
    name: String,
    subname: String,
    target: Option<RemoteTarget>,
    seeds: BTreeMap<Slot, String>,
    steps: Vec<Box<dyn Step>>,
    post_steps: Vec<Box<dyn Step>>,
}

impl TaskBuilder {
    /// Sets the distinguishing detail.
    #[must_use]
    pub fn subname(mut self, subname: impl Into<String>) -> Self {
        self.subname = subname.into();
        self
    }

    /// Sets the host the task runs against.
    #[must_use]
    pub fn target(mut self, target: RemoteTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Pre-fills a slot before the first step runs.
    #[must_use]
    pub fn seed(mut self, slot: Slot, value: impl Into<String>) -> Self {
        self.seeds.insert(slot, value.into());
        self
    }

    /// Appends a primary step.
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Appends a post step.
    #[must_use]
    pub fn post_step(mut self, step: impl Step + 'static) -> Self {
        self.post_steps.push(Box::new(step));
        self
    }

    /// Checks slot wiring and produces the task.
    ///
    /// Primary steps may read seeds and slots written by earlier primary
    /// steps. Post steps may additionally read any slot a primary step
    /// writes, since they run after the primary sequence.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnwrittenSlot`] for the first read that no
    /// earlier step satisfies.
    pub fn build(self) -> Result<Task, TaskError> {
        let mut written: BTreeSet<Slot> = self.seeds.keys().copied().collect();
        for step in &self.steps {
            check_reads(&self.name, step.as_ref(), &written)?;
            written.extend(step.writes());
        }
        for step in &self.post_steps {
            check_reads(&self.name, step.as_ref(), &written)?;
            written.extend(step.writes());
        }
        Ok(Task {
            name: self.name,
            subname: self.subname,
            target: self.target,
            seeds: self.seeds,
            steps: self.steps,
            post_steps: self.post_steps,
        })
    }
}

fn check_reads(task: &str, step: &dyn Step, written: &BTreeSet<Slot>) -> Result<(), TaskError> {
    step.reads()
        .into_iter()
        .find(|slot| !written.contains(slot))
        .map_or(Ok(()), |slot| {
            Err(TaskError::UnwrittenSlot {
                task: task.to_owned(),
                step: step.name().to_owned(),
                slot: slot.name().to_owned(),
            })
        })
}

#[cfg(test)]
mod tests;
