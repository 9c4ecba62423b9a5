//! Remote execution configuration and validation.
//!
//! [`ExecConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and `STRATADM_EXEC_*` environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::ExecError;

/// Default timeout applied to remote commands, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// SSH, shell and container engine settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATADM_EXEC",
    discovery(
        app_name = "stratadm",
        env_var = "STRATADM_CONFIG_PATH",
        config_file_name = "stratadm.toml",
        dotfile_name = ".stratadm.toml",
        project_file_name = "stratadm.toml"
    )
)]
pub struct ExecConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// User to log in as when the inventory names none.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Whether to force batch mode so SSH never prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Private key used for authentication. Supports `~/` expansion.
    pub ssh_identity_file: Option<String>,
    /// Shell used to run commands locally and remotely.
    #[ortho_config(default = "bash".to_owned())]
    pub shell_bin: String,
    /// Command used to elevate privileges.
    #[ortho_config(default = "sudo".to_owned())]
    pub sudo_alias: String,
    /// Container engine CLI on the hosts.
    #[ortho_config(default = "docker".to_owned())]
    pub engine_bin: String,
    /// Timeout applied to every command; zero disables it.
    #[ortho_config(default = 120)]
    pub timeout_secs: u64,
}

/// Errors raised when loading the execution configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ExecConfigLoadError {
    /// Parsing or merging configuration layers failed.
    #[error("exec configuration parsing failed: {0}")]
    Parse(String),
}

impl ExecConfig {
    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ExecError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_value(&self.shell_bin, "shell_bin")?;
        Self::require_value(&self.sudo_alias, "sudo_alias")?;
        Self::require_value(&self.engine_bin, "engine_bin")?;
        Ok(())
    }

    /// Loads configuration from defaults, files and the environment only.
    ///
    /// # Errors
    ///
    /// Returns [`ExecConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ExecConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("stratadm")])
            .map_err(|err| ExecConfigLoadError::Parse(err.to_string()))
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), ExecError> {
        match value {
            None => Ok(()),
            Some(text) if !text.trim().is_empty() => Ok(()),
            Some(_) => Err(ExecError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ExecError> {
        Self::require_optional_value(Some(value), field)
    }
}
