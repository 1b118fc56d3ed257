//! Inputs, outcomes and errors of image synchronisation.

use std::fmt;

use thiserror::Error;

use crate::engine::EngineError;
use crate::fingerprint::ContentFingerprint;
use crate::provider::ProviderError;

/// Switches that alter the synchronisation decision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SyncOptions {
    /// Skip existence checks; always build and push.
    pub force_new_image: bool,
    /// Ask the engine not to reuse cached build layers.
    pub bypass_build_cache: bool,
}

/// Names of one image in the local store and in the registry. Both share the
/// fingerprint as their tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageReference {
    /// `<local-namespace>:<fingerprint>`.
    pub local_uri: String,
    /// `<registry-repository>:<fingerprint>`.
    pub remote_uri: String,
}

/// Where the synchronised image came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageSource {
    /// Reused from the local image store.
    Local,
    /// Pulled from the registry.
    Remote,
    /// Built during this run.
    Built,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local image store"),
            Self::Remote => f.write_str("registry"),
            Self::Built => f.write_str("fresh build"),
        }
    }
}

/// Result of a completed synchronisation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncOutcome {
    /// Identity of the recipe.
    pub fingerprint: ContentFingerprint,
    /// Local and remote names of the image.
    pub reference: ImageReference,
    /// How the image was obtained.
    pub source: ImageSource,
    /// Whether the image was pushed during this run.
    pub pushed: bool,
}

/// Errors raised while synchronising an image. Any error aborts the run;
/// nothing is retried.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ImageSyncError {
    /// Raised when registry facts cannot be obtained from the provider.
    #[error("registry unavailable: {0}")]
    Registry(#[source] ProviderError),
    /// Raised when the engine cannot authenticate against the registry.
    #[error("registry login failed: {0}")]
    Authentication(#[source] EngineError),
    /// Raised when a build stream reports an error.
    #[error("image build failed: {message}")]
    BuildFailure {
        /// Offending stream message.
        message: String,
    },
    /// Raised when a pull stream reports an error.
    #[error("image pull failed: {message}")]
    PullFailure {
        /// Offending stream message.
        message: String,
    },
    /// Raised when a push stream reports an error.
    #[error("image push failed: {message}")]
    PushFailure {
        /// Offending stream message.
        message: String,
    },
    /// Raised when an operation reported success but the image is absent.
    #[error("image {reference} not found after a successful operation")]
    MissingImage {
        /// Reference that was looked up.
        reference: String,
    },
    /// Raised for any other container engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
