//! Tool configuration loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// General settings: where service state lives and how chatty logs are.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATADM",
    discovery(
        app_name = "stratadm",
        env_var = "STRATADM_CONFIG_PATH",
        config_file_name = "stratadm.toml",
        dotfile_name = ".stratadm.toml",
        project_file_name = "stratadm.toml"
    )
)]
pub struct AdmConfig {
    /// JSON file recording the container of every service.
    #[ortho_config(default = "stratadm-services.json".to_owned())]
    pub store_path: String,
    /// Cluster the services are recorded under.
    #[ortho_config(default = "default".to_owned())]
    pub cluster_id: String,
    /// Log filter used when `STRATADM_LOG` is unset.
    #[ortho_config(default = "warn".to_owned())]
    pub log_filter: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl AdmConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to stratadm.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments. Values merge
    /// defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stratadm")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that required fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.store_path,
            &FieldMetadata::new("service store path", "STRATADM_STORE_PATH", "store_path"),
        )?;
        Self::require_field(
            &self.cluster_id,
            &FieldMetadata::new("cluster id", "STRATADM_CLUSTER_ID", "cluster_id"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
