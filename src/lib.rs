//! Core library for the Tapline pipeline image tool.
//!
//! A pipeline configuration lists taps and targets; the crate renders them
//! into a deterministic build recipe, fingerprints the recipe, provisions the
//! cloud resources that host the image, and synchronises the image between
//! the local image store and the provider's registry (build, tag and push
//! only when the fingerprint is new).

pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod pipeline;
pub mod provider;
pub mod recipe;
pub mod runner;
pub mod sync;
pub mod test_support;

pub use config::{ConfigError, DEFAULT_LOCAL_NAMESPACE, ToolConfig};
pub use engine::{ContainerEngine, DockerCli, EngineError, ImageHandle, ImageStream, StreamMessage};
pub use fingerprint::{ContentFingerprint, fingerprint};
pub use pipeline::{
    ConfigurationError, PipelineComponentConfig, PipelineConfig, ProviderConfig, ProviderKind,
};
pub use provider::{
    AwsProvider, CloudProvider, Provider, ProviderError, RegistryAuth, ResourceKind,
};
pub use recipe::{BuildRecipe, RecipeBuilder};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use sync::{
    ImageReference, ImageSource, ImageSyncError, ImageSynchronizer, SyncOptions, SyncOutcome,
};
