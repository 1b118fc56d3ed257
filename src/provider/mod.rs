//! Cloud providers that host the pipeline image and the infrastructure that
//! runs it.
//!
//! Every provider ensures the same minimal resource set (object store
//! bucket, container registry repository, compute cluster) and exposes the
//! registry facts the image synchroniser needs. Providers form a closed set:
//! new variants are added to [`Provider`], never looked up by name at run
//! time.

mod aws;

use std::fmt;

use thiserror::Error;

use crate::config::ToolConfig;
use crate::pipeline::{ProviderConfig, ProviderKind};
use crate::runner::CommandRunner;

pub use aws::{AwsProvider, AwsSettings, DEFAULT_AWS_BIN, DEFAULT_CAPACITY_PROVIDER};

/// Short-lived registry credentials.
#[derive(Clone, Eq, PartialEq)]
pub struct RegistryAuth {
    /// Registry user name.
    pub username: String,
    /// Registry password or token.
    pub password: String,
    /// Registry endpoint to authenticate against.
    pub registry_endpoint: String,
    /// Whether cached credentials must be replaced.
    pub force_reauth: bool,
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("registry_endpoint", &self.registry_endpoint)
            .field("force_reauth", &self.force_reauth)
            .finish()
    }
}

/// Kinds of resources a provider manages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Object store bucket.
    Bucket,
    /// Container registry repository.
    Registry,
    /// Compute cluster.
    Cluster,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket => f.write_str("bucket"),
            Self::Registry => f.write_str("registry repository"),
            Self::Cluster => f.write_str("cluster"),
        }
    }
}

/// Errors raised by providers. Resources that already exist are not errors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the provider rejects or cannot serve a request.
    #[error("{resource} '{name}': provider unavailable: {message}")]
    Unavailable {
        /// Resource being managed.
        resource: ResourceKind,
        /// Resource name.
        name: String,
        /// Provider message.
        message: String,
    },
    /// Raised when the provider answers with data that cannot be used.
    #[error("{resource} '{name}': unexpected provider response: {message}")]
    MalformedResponse {
        /// Resource being described.
        resource: ResourceKind,
        /// Resource name.
        name: String,
        /// Description of what was wrong.
        message: String,
    },
}

/// Capabilities every provider offers. Implementations are idempotent: each
/// operation is safe to call on every invocation.
pub trait CloudProvider {
    /// Ensures the bucket, registry repository and cluster exist, in that
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProviderError`] other than already-exists.
    fn sync(&self) -> Result<(), ProviderError>;

    /// Returns the fully qualified registry repository path.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the repository cannot be ensured or
    /// described.
    fn registry_uri(&self) -> Result<String, ProviderError>;

    /// Exchanges a registry authorization token for credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the token cannot be obtained or
    /// decoded.
    fn registry_auth(&self) -> Result<RegistryAuth, ProviderError>;
}

/// The supported providers.
#[derive(Debug)]
pub enum Provider<R: CommandRunner> {
    /// Amazon Web Services.
    Aws(AwsProvider<R>),
}

impl<R: CommandRunner> Provider<R> {
    /// Builds the provider variant named by `config`.
    #[must_use]
    pub fn new(config: ProviderConfig, tool: &ToolConfig, runner: R) -> Self {
        match config.kind {
            ProviderKind::Aws => Self::Aws(AwsProvider::new(
                config,
                AwsSettings::from_tool_config(tool),
                runner,
            )),
        }
    }
}

impl<R: CommandRunner> CloudProvider for Provider<R> {
    fn sync(&self) -> Result<(), ProviderError> {
        match self {
            Self::Aws(provider) => provider.sync(),
        }
    }

    fn registry_uri(&self) -> Result<String, ProviderError> {
        match self {
            Self::Aws(provider) => provider.registry_uri(),
        }
    }

    fn registry_auth(&self) -> Result<RegistryAuth, ProviderError> {
        match self {
            Self::Aws(provider) => provider.registry_auth(),
        }
    }
}
