//! Remote command execution over SSH.
//!
//! Steps talk to hosts only through [`RemoteExecutor`]. The production
//! implementation, [`SshExecutor`], wraps each command with an optional
//! privilege prefix and a `timeout` guard, then runs it through `ssh` or a
//! local shell. Exit status 124 from `timeout` is reported as
//! [`ExecError::TimedOut`].

use std::ffi::OsString;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::context::Context;

mod config;
mod runner;

pub use config::{DEFAULT_TIMEOUT_SECS, ExecConfig, ExecConfigLoadError};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, expand_tilde};

const TIMEOUT_EXIT_CODE: i32 = 124;
const DEFAULT_SSH_PORT: u16 = 22;

/// Host a command runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Host identifier from the topology.
    pub host: String,
    /// Address to connect to.
    pub hostname: String,
    /// Login user; the configured default applies when absent.
    pub user: Option<String>,
    /// SSH port.
    pub ssh_port: u16,
}

impl RemoteTarget {
    /// Looks `host` up in the inventory, falling back to the bare identifier
    /// on port 22.
    #[must_use]
    pub fn from_context(context: &Context, host: &str) -> Self {
        context.host(host).map_or_else(
            || Self {
                host: host.to_owned(),
                hostname: host.to_owned(),
                user: None,
                ssh_port: DEFAULT_SSH_PORT,
            },
            |entry| Self {
                host: entry.host.clone(),
                hostname: entry.hostname.clone(),
                user: entry.user.clone(),
                ssh_port: entry.ssh_port,
            },
        )
    }
}

/// Per-command execution options.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecOptions {
    /// Run on the control machine instead of the target host.
    pub local: bool,
    /// Run with elevated privileges.
    pub sudo: bool,
    /// Seconds before the command is killed; zero disables the guard.
    pub timeout_secs: u64,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            local: false,
            sudo: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Errors surfaced while executing commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set STRATADM_EXEC_{env_suffix} or add {field} to [exec] in stratadm.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the command outlived its timeout.
    #[error("command timed out after {timeout_secs}s on {host}: {command}")]
    TimedOut {
        /// Host the command ran on.
        host: String,
        /// Command text.
        command: String,
        /// Timeout that expired.
        timeout_secs: u64,
    },
    /// Raised when the command exits with a non-zero status.
    #[error("command failed on {host} with status {status_text}: {output}")]
    Failed {
        /// Host the command ran on.
        host: String,
        /// Exit status, if the process reported one.
        status: Option<i32>,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr, or stdout when stderr is empty.
        output: String,
    },
    /// Raised when a remote command has no target host.
    #[error("no target host for remote command: {command}")]
    MissingTarget {
        /// Command text.
        command: String,
    },
}

impl ExecError {
    /// Returns `true` for [`ExecError::TimedOut`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Captured command output, when any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } if !output.trim().is_empty() => Some(output),
            _ => None,
        }
    }
}

/// Capability to run a shell command on a host and capture its output.
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` on `target`, or locally when `options.local` is set.
    ///
    /// Returns captured stdout on success.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the command cannot start, times out, or
    /// exits with a non-zero status.
    fn execute(
        &self,
        target: Option<&RemoteTarget>,
        command: &str,
        options: &ExecOptions,
    ) -> Result<String, ExecError>;
}

/// Executes commands through `ssh`, or a local shell.
#[derive(Clone, Debug)]
pub struct SshExecutor<R: CommandRunner> {
    config: ExecConfig,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: ExecConfig) -> Result<Self, ExecError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates an executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: ExecConfig, runner: R) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecConfig {
        &self.config
    }

    fn wrap_command(&self, command: &str, options: &ExecOptions) -> String {
        let mut wrapped = String::new();
        if options.sudo {
            wrapped.push_str(&self.config.sudo_alias);
            wrapped.push(' ');
        }
        if options.timeout_secs > 0 {
            wrapped.push_str(&format!("timeout {} ", options.timeout_secs));
        }
        wrapped.push_str(&self.config.shell_bin);
        wrapped.push_str(" -c ");
        wrapped.push_str(escape(command.into()).as_ref());
        wrapped
    }

    fn build_ssh_args(&self, target: &RemoteTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = self.common_ssh_options(target.ssh_port);
        let user = target.user.as_deref().unwrap_or(&self.config.ssh_user);
        args.push(OsString::from(format!("{user}@{}", target.hostname)));
        args.push(OsString::from(remote_command));
        args
    }

    fn common_ssh_options(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }

    fn classify(
        host: &str,
        command: &str,
        options: &ExecOptions,
        output: CommandOutput,
    ) -> Result<String, ExecError> {
        if output.is_success() {
            return Ok(output.stdout);
        }
        if options.timeout_secs > 0 && output.code == Some(TIMEOUT_EXIT_CODE) {
            return Err(ExecError::TimedOut {
                host: host.to_owned(),
                command: command.to_owned(),
                timeout_secs: options.timeout_secs,
            });
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(ExecError::Failed {
            host: host.to_owned(),
            status: output.code,
            status_text,
            output: output.captured().to_owned(),
        })
    }
}

impl<R: CommandRunner + Send + Sync> RemoteExecutor for SshExecutor<R> {
    fn execute(
        &self,
        target: Option<&RemoteTarget>,
        command: &str,
        options: &ExecOptions,
    ) -> Result<String, ExecError> {
        let wrapped = self.wrap_command(command, options);
        let (host, output) = if options.local {
            let args = [OsString::from("-c"), OsString::from(&wrapped)];
            ("localhost", self.runner.run(&self.config.shell_bin, &args)?)
        } else {
            let Some(remote) = target else {
                return Err(ExecError::MissingTarget {
                    command: command.to_owned(),
                });
            };
            let args = self.build_ssh_args(remote, &wrapped);
            (
                remote.host.as_str(),
                self.runner.run(&self.config.ssh_bin, &args)?,
            )
        };
        debug!(host, command, code = ?output.code, "executed command");
        Self::classify(host, command, options, output)
    }
}

#[cfg(test)]
mod tests;
