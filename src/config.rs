//! Tool settings loaded via `ortho-config`.
//!
//! These describe the local environment (which binaries to drive, where
//! local images live) rather than the pipeline being synchronised, which is
//! read from its own YAML file by [`crate::pipeline`].

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::DEFAULT_DOCKER_BIN;
use crate::provider::{DEFAULT_AWS_BIN, DEFAULT_CAPACITY_PROVIDER};

/// Default local image repository prefixing every `local_uri`.
pub const DEFAULT_LOCAL_NAMESPACE: &str = "tapline";

/// Tool settings derived from defaults, configuration files and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TAPLINE",
    discovery(
        app_name = "tapline",
        env_var = "TAPLINE_CONFIG_PATH",
        config_file_name = "tapline.toml",
        dotfile_name = ".tapline.toml",
        project_file_name = "tapline.toml"
    )
)]
pub struct ToolConfig {
    /// Path to the `docker` executable.
    #[ortho_config(default = DEFAULT_DOCKER_BIN.to_owned())]
    pub docker_bin: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Local image repository used for `<namespace>:<fingerprint>` tags.
    #[ortho_config(default = DEFAULT_LOCAL_NAMESPACE.to_owned())]
    pub local_namespace: String,
    /// Named AWS CLI profile. When absent the CLI's own resolution applies.
    pub aws_profile: Option<String>,
    /// Capacity provider attached to new compute clusters.
    #[ortho_config(default = DEFAULT_CAPACITY_PROVIDER.to_owned())]
    pub capacity_provider: String,
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

impl ToolConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to tapline.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("tapline")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and file key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank,
    /// or [`ConfigError::Invalid`] when the local namespace is not a valid
    /// image repository name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.docker_bin,
            &FieldMetadata::new("docker executable", "TAPLINE_DOCKER_BIN", "docker_bin"),
        )?;
        Self::require_field(
            &self.aws_bin,
            &FieldMetadata::new("aws executable", "TAPLINE_AWS_BIN", "aws_bin"),
        )?;
        Self::require_field(
            &self.local_namespace,
            &FieldMetadata::new(
                "local image namespace",
                "TAPLINE_LOCAL_NAMESPACE",
                "local_namespace",
            ),
        )?;
        Self::require_field(
            &self.capacity_provider,
            &FieldMetadata::new(
                "cluster capacity provider",
                "TAPLINE_CAPACITY_PROVIDER",
                "capacity_provider",
            ),
        )?;
        if let Some(profile) = self.aws_profile.as_deref() {
            Self::require_field(
                profile,
                &FieldMetadata::new("AWS profile", "TAPLINE_AWS_PROFILE", "aws_profile"),
            )?;
        }
        if !is_repository_name(&self.local_namespace) {
            return Err(ConfigError::Invalid(format!(
                "local_namespace '{}' must be a lowercase image repository name",
                self.local_namespace
            )));
        }
        Ok(())
    }
}

// Docker repository names: lowercase alphanumerics separated by `.`, `_`,
// `-` or `/`, never starting or ending with a separator.
fn is_repository_name(value: &str) -> bool {
    let is_separator = |ch: char| matches!(ch, '.' | '_' | '-' | '/');
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || is_separator(ch))
        && !value.starts_with(is_separator)
        && !value.ends_with(is_separator)
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
