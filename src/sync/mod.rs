//! Content-addressed image synchronisation between the local image store and
//! the provider's registry.
//!
//! The recipe fingerprint is the only identity: it tags the image locally
//! and remotely, so cache checks are string lookups. Each run re-queries the
//! engine and registry; nothing is remembered between runs.

use tracing::{debug, info};

use crate::engine::{ContainerEngine, ImageHandle, ImageStream, StreamMessage};
use crate::provider::CloudProvider;
use crate::recipe::BuildRecipe;

mod types;

pub use types::{ImageReference, ImageSource, ImageSyncError, SyncOptions, SyncOutcome};

/// What the existence check found.
enum Existing {
    Local { image: ImageHandle, in_registry: bool },
    RemoteOnly,
    Absent,
}

/// Builds, tags and pushes the image for a recipe only when needed.
#[derive(Clone, Debug)]
pub struct ImageSynchronizer<E, P> {
    engine: E,
    provider: P,
    local_namespace: String,
    options: SyncOptions,
}

impl<E: ContainerEngine, P: CloudProvider> ImageSynchronizer<E, P> {
    /// Creates a synchroniser tagging local images under `local_namespace`.
    #[must_use]
    pub fn new(engine: E, provider: P, local_namespace: impl Into<String>) -> Self {
        Self {
            engine,
            provider,
            local_namespace: local_namespace.into(),
            options: SyncOptions::default(),
        }
    }

    /// Replaces the synchronisation options.
    #[must_use]
    pub const fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Makes the image for `recipe` available locally and in the registry.
    ///
    /// Steps run strictly in order: fingerprint, registry login, existence
    /// check (skipped when forced), build if nothing usable exists, tag with
    /// the registry name, push when the registry lacks the image.
    ///
    /// # Errors
    ///
    /// Returns [`ImageSyncError::Registry`] or
    /// [`ImageSyncError::Authentication`] when the registry is unreachable,
    /// the matching stream failure when a build, pull or push reports an
    /// error, and [`ImageSyncError::Engine`] for other engine failures.
    pub fn sync_image(&self, recipe: &BuildRecipe) -> Result<SyncOutcome, ImageSyncError> {
        let fingerprint = recipe.fingerprint();
        let tag = fingerprint.as_str();
        let local_uri = format!("{}:{tag}", self.local_namespace);
        info!(fingerprint = %fingerprint, local_uri = %local_uri, "synchronising image");

        let remote_base = self
            .provider
            .registry_uri()
            .map_err(ImageSyncError::Registry)?;
        let auth = self
            .provider
            .registry_auth()
            .map_err(ImageSyncError::Registry)?;
        self.engine
            .login(&auth)
            .map_err(ImageSyncError::Authentication)?;
        let remote_uri = format!("{remote_base}:{tag}");
        info!(registry = %auth.registry_endpoint, "authenticated against registry");

        let (image, source, push_needed) = if self.options.force_new_image {
            info!("forced rebuild; skipping existence checks");
            (self.build(recipe, &local_uri)?, ImageSource::Built, true)
        } else {
            match self.find_existing(&local_uri, &remote_uri)? {
                Existing::Local { image, in_registry } => {
                    info!(reference = %local_uri, in_registry, "reusing local image");
                    (image, ImageSource::Local, !in_registry)
                }
                Existing::RemoteOnly => {
                    info!(reference = %remote_uri, "image only in registry; pulling");
                    (self.pull(&remote_uri, tag)?, ImageSource::Remote, false)
                }
                Existing::Absent => {
                    info!(reference = %local_uri, "no existing image; building");
                    (self.build(recipe, &local_uri)?, ImageSource::Built, true)
                }
            }
        };

        self.engine.tag(&image, &remote_base, tag)?;
        if push_needed {
            info!(reference = %remote_uri, "pushing image");
            drain(self.engine.push(&remote_base, tag)?, "push", |message| {
                ImageSyncError::PushFailure { message }
            })?;
        }
        info!(reference = %remote_uri, source = %source, pushed = push_needed, "image synchronised");

        Ok(SyncOutcome {
            fingerprint,
            reference: ImageReference {
                local_uri,
                remote_uri,
            },
            source,
            pushed: push_needed,
        })
    }

    fn find_existing(&self, local_uri: &str, remote_uri: &str) -> Result<Existing, ImageSyncError> {
        let local = self.engine.find_local_image(local_uri)?;
        let in_registry = self.engine.remote_image_exists(remote_uri)?;
        Ok(match local {
            Some(image) => Existing::Local { image, in_registry },
            None if in_registry => Existing::RemoteOnly,
            None => Existing::Absent,
        })
    }

    fn build(&self, recipe: &BuildRecipe, local_uri: &str) -> Result<ImageHandle, ImageSyncError> {
        let stream = self
            .engine
            .build(recipe, local_uri, self.options.bypass_build_cache)?;
        drain(stream, "build", |message| ImageSyncError::BuildFailure {
            message,
        })?;
        self.require_local(local_uri)
    }

    fn pull(&self, remote_uri: &str, tag: &str) -> Result<ImageHandle, ImageSyncError> {
        drain(self.engine.pull(remote_uri)?, "pull", |message| {
            ImageSyncError::PullFailure { message }
        })?;
        let image = self.require_local(remote_uri)?;
        // Name it locally too so the next run is a local cache hit.
        self.engine.tag(&image, &self.local_namespace, tag)?;
        Ok(image)
    }

    fn require_local(&self, reference: &str) -> Result<ImageHandle, ImageSyncError> {
        self.engine
            .find_local_image(reference)?
            .ok_or_else(|| ImageSyncError::MissingImage {
                reference: reference.to_owned(),
            })
    }
}

/// Consumes `stream` until it ends or reports an error. The stream is
/// dropped at the first error, abandoning the operation.
fn drain(
    stream: ImageStream,
    operation: &str,
    failure: fn(String) -> ImageSyncError,
) -> Result<(), ImageSyncError> {
    for message in stream {
        match message {
            StreamMessage::Progress(line) => debug!(operation, "{line}"),
            StreamMessage::Error(text) => return Err(failure(text)),
        }
    }
    Ok(())
}
