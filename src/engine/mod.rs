//! Container engine boundary used by the image synchroniser.
//!
//! Long-running operations (build, pull, push) return an [`ImageStream`]: a
//! finite, non-restartable sequence of [`StreamMessage`]s. Consumers stop at
//! the first [`StreamMessage::Error`]; dropping the stream abandons the
//! operation.

mod docker;

use thiserror::Error;

use crate::provider::RegistryAuth;
use crate::recipe::BuildRecipe;
use crate::runner::RunnerError;

pub use docker::{DEFAULT_DOCKER_BIN, DockerCli, error_payload};

/// One message observed while an engine operation runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamMessage {
    /// Informational output.
    Progress(String),
    /// The operation failed; no further messages are meaningful.
    Error(String),
}

/// Output of a streamed engine operation.
pub type ImageStream = Box<dyn Iterator<Item = StreamMessage>>;

/// A local image known to the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHandle {
    /// Engine-specific image identifier.
    pub id: String,
    /// Reference the image was looked up by.
    pub reference: String,
}

/// Errors raised by container engine operations outside of streamed output.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// Raised when the engine command fails for a reason other than a
    /// distinguished not-found outcome.
    #[error("{program} {operation} failed with status {status_text}: {stderr}")]
    CommandFailure {
        /// Engine binary.
        program: String,
        /// Operation being performed, for example `tag`.
        operation: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the engine cannot be executed at all.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Operations the synchroniser needs from a container engine.
pub trait ContainerEngine {
    /// Authenticates against the registry described by `auth`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the registry rejects the credentials.
    fn login(&self, auth: &RegistryAuth) -> Result<(), EngineError>;

    /// Looks up a local image by reference; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for failures other than not-found.
    fn find_local_image(&self, reference: &str) -> Result<Option<ImageHandle>, EngineError>;

    /// Checks whether the registry holds `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for failures other than not-found.
    fn remote_image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    /// Builds `recipe` and tags the result as `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the build cannot be started.
    fn build(
        &self,
        recipe: &BuildRecipe,
        tag: &str,
        no_cache: bool,
    ) -> Result<ImageStream, EngineError>;

    /// Pulls `reference` from its registry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the pull cannot be started.
    fn pull(&self, reference: &str) -> Result<ImageStream, EngineError>;

    /// Adds `repository:tag` as a name for `image`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when tagging fails.
    fn tag(&self, image: &ImageHandle, repository: &str, tag: &str) -> Result<(), EngineError>;

    /// Pushes `repository:tag` to its registry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the push cannot be started.
    fn push(&self, repository: &str, tag: &str) -> Result<ImageStream, EngineError>;
}
