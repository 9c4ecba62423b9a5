//! Task failures and remote error classification.

use std::fmt;

use thiserror::Error;

use crate::exec::ExecError;
use crate::item::ResolveError;
use crate::store::StoreError;

/// Domain error code attached to a failed remote operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorCode {
    /// Numeric code, stable across releases.
    pub code: u32,
    /// Short description of the failed operation.
    pub description: &'static str,
}

impl ErrorCode {
    /// Creating a container failed.
    pub const CREATE_CONTAINER: Self = Self::new(620_001, "create container failed");
    /// Starting a container failed.
    pub const START_CONTAINER: Self = Self::new(620_002, "start container failed");
    /// Stopping a container failed.
    pub const STOP_CONTAINER: Self = Self::new(620_003, "stop container failed");
    /// Removing a container failed.
    pub const REMOVE_CONTAINER: Self = Self::new(620_004, "remove container failed");
    /// Running a command inside a container failed.
    pub const EXEC_CONTAINER: Self = Self::new(620_005, "run command in container failed");
    /// Copying a file out of a container failed.
    pub const COPY_FROM_CONTAINER: Self = Self::new(620_006, "copy file from container failed");
    /// Copying a file into a container failed.
    pub const COPY_INTO_CONTAINER: Self = Self::new(620_007, "copy file into container failed");
    /// Reading a host file failed.
    pub const READ_FILE: Self = Self::new(620_008, "read file failed");
    /// Writing a host file failed.
    pub const WRITE_FILE: Self = Self::new(620_009, "write file failed");
    /// Removing a host file failed.
    pub const REMOVE_FILE: Self = Self::new(620_010, "remove file failed");
    /// Creating host directories failed.
    pub const CREATE_DIRECTORY: Self = Self::new(620_011, "create directory failed");
    /// A plain host command failed.
    pub const RUN_COMMAND: Self = Self::new(620_012, "run command failed");

    /// Creates a code.
    #[must_use]
    pub const fn new(code: u32, description: &'static str) -> Self {
        Self { code, description }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.description)
    }
}

/// Errors surfaced by tasks and their steps.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// Raised at build time when a step reads a slot no earlier step writes.
    #[error("step {step} of task {task} reads slot {slot} before any earlier step writes it")]
    UnwrittenSlot {
        /// Task name.
        task: String,
        /// Offending step.
        step: String,
        /// Slot that is read too early.
        slot: String,
    },
    /// Raised when a step reads a slot that holds no value at run time.
    #[error("step {step} found slot {slot} empty")]
    EmptySlot {
        /// Step that read the slot.
        step: String,
        /// Slot name.
        slot: String,
    },
    /// Raised when a remote command outlives its timeout.
    #[error("timed out: {description}")]
    TimedOut {
        /// Human readable description of what timed out.
        description: String,
    },
    /// Raised when a remote command fails and produced output.
    #[error("{code}: {output}")]
    Command {
        /// Domain error code.
        code: ErrorCode,
        /// Captured command output.
        output: String,
    },
    /// Raised when a remote command fails without useful output.
    #[error("{code}: {source}")]
    Exec {
        /// Domain error code.
        code: ErrorCode,
        /// Underlying executor error.
        #[source]
        source: ExecError,
    },
    /// Raised when the service store fails.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when a service value cannot be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Raised when an operation needs a container the store does not know.
    #[error("service {service_id} has no container{}", if *removed { " (removed)" } else { "" })]
    ContainerMissing {
        /// Service id.
        service_id: String,
        /// Whether the container was removed rather than never created.
        removed: bool,
    },
    /// Raised by steps that fail for their own reasons.
    #[error("{step}: {message}")]
    Step {
        /// Step name.
        step: String,
        /// Failure description.
        message: String,
    },
    /// Raised when a task worker panics or is cancelled.
    #[error("task worker failed: {0}")]
    Join(String),
}

/// Classifies the result of a remote call once a step has finished with it.
///
/// When the caller bound the command output to a slot it owns the
/// interpretation of failures, so no error is reported. Otherwise a timeout
/// becomes [`TaskError::TimedOut`] and any other failure carries `code`,
/// along with the captured output when there is some.
///
/// # Errors
///
/// Returns the classified [`TaskError`] for an unbound failure.
pub fn post_handle(
    output_bound: bool,
    error: Option<ExecError>,
    code: ErrorCode,
) -> Result<(), TaskError> {
    let Some(err) = error else {
        return Ok(());
    };
    if output_bound {
        return Ok(());
    }
    if err.is_timeout() {
        return Err(TaskError::TimedOut {
            description: err.to_string(),
        });
    }
    let captured = err.output().map(str::to_owned);
    Err(captured.map_or(TaskError::Exec { code, source: err }, |output| {
        TaskError::Command { code, output }
    }))
}
