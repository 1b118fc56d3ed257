//! Deterministic rendering of the image build recipe.
//!
//! The recipe is a Dockerfile made of a fixed preamble (base runtime image
//! plus a pinned release of the pipeline runner in its own environment) and a
//! single `RUN` instruction holding one install step per component. Taps are
//! rendered before targets, each in declared order. The rendered text is the
//! input to [`crate::fingerprint`], so any byte change here invalidates every
//! cached image.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;

use crate::fingerprint::{ContentFingerprint, fingerprint};
use crate::pipeline::{ComponentKind, ConfigurationError, PipelineComponentConfig, PipelineConfig};

/// Base runtime image of every recipe.
pub const BASE_IMAGE: &str = "python:3.8";

/// Repository of the pipeline runner installed next to the components.
pub const RUNNER_REPOSITORY: &str = "https://github.com/datamill-co/singer-runner.git";

/// Pinned runner release.
pub const RUNNER_VERSION: &str = "0.0.2";

/// Directory the runner is cloned into.
pub const RUNNER_DIR: &str = "singer-runner";

/// Directory holding one virtual environment per component.
pub const ENVIRONMENTS_DIR: &str = "virtualenvs";

/// Directory names the preamble claims; components must not reuse them.
pub const RESERVED_NAMES: [&str; 2] = [RUNNER_DIR, ENVIRONMENTS_DIR];

/// File name used when a recipe is written to a build directory.
pub const RECIPE_FILE_NAME: &str = "Dockerfile";

const STEP_SEPARATOR: &str = " && \\\n    ";

/// A rendered build recipe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildRecipe {
    text: String,
}

impl BuildRecipe {
    /// Returns the recipe text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    /// Returns the recipe text as bytes, as fed to the container engine.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Computes the content fingerprint of the recipe.
    #[must_use]
    pub fn fingerprint(&self) -> ContentFingerprint {
        fingerprint(&self.text)
    }

    /// Writes the recipe as `Dockerfile` into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the directory cannot be created
    /// or the file cannot be written.
    pub fn write_to(&self, dir: &Utf8Path) -> io::Result<Utf8PathBuf> {
        Dir::create_ambient_dir_all(dir, ambient_authority())?;
        let handle = Dir::open_ambient_dir(dir, ambient_authority())?;
        handle.write(RECIPE_FILE_NAME, self.as_bytes())?;
        Ok(dir.join(RECIPE_FILE_NAME))
    }
}

/// Renders build recipes from pipeline configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecipeBuilder {
    base_image: String,
    runner_repository: String,
    runner_version: String,
}

impl Default for RecipeBuilder {
    fn default() -> Self {
        Self {
            base_image: BASE_IMAGE.to_owned(),
            runner_repository: RUNNER_REPOSITORY.to_owned(),
            runner_version: RUNNER_VERSION.to_owned(),
        }
    }
}

impl RecipeBuilder {
    /// Creates a builder using the pinned template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders the recipe for every tap and target in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingRepo`] when a component has no
    /// repository, [`ConfigurationError::UnsafeComponentName`] or
    /// [`ConfigurationError::ReservedComponentName`] when a name cannot be
    /// used as a directory, and [`ConfigurationError::SharedComponentName`]
    /// when a tap and a target share a name.
    pub fn render(&self, config: &PipelineConfig) -> Result<BuildRecipe, ConfigurationError> {
        config.ensure_disjoint_sets()?;
        let mut components = config.taps.resolve(ComponentKind::Tap)?;
        components.extend(config.targets.resolve(ComponentKind::Target)?);
        Ok(self.render_components(&components))
    }

    /// Renders the recipe for an already resolved component list.
    #[must_use]
    pub fn render_components(&self, components: &[PipelineComponentConfig]) -> BuildRecipe {
        let mut text = self.preamble();
        if !components.is_empty() {
            let steps: Vec<String> = components.iter().map(install_step).collect();
            text.push_str("\nRUN ");
            text.push_str(&steps.join(STEP_SEPARATOR));
            text.push('\n');
        }
        BuildRecipe { text }
    }

    fn preamble(&self) -> String {
        format!(
            "\
FROM {base}

WORKDIR /usr/src/app

RUN mkdir {envs}
RUN pip3 install virtualenv

RUN virtualenv {envs}/{runner} && \\
    git clone --branch {version} {repo} {runner} && \\
    {envs}/{runner}/bin/pip3 install ./{runner}/
",
            base = self.base_image,
            envs = ENVIRONMENTS_DIR,
            runner = RUNNER_DIR,
            version = self.runner_version,
            repo = escape(self.runner_repository.as_str().into()),
        )
    }
}

fn install_step(component: &PipelineComponentConfig) -> String {
    let name = &component.name;
    let repo = escape(component.repository_url.as_str().into());
    [
        format!("virtualenv {ENVIRONMENTS_DIR}/{name}"),
        format!("mkdir {name}"),
        format!("git clone {repo} {name}"),
        format!("{ENVIRONMENTS_DIR}/{name}/bin/pip install ./{name}/"),
    ]
    .join(STEP_SEPARATOR)
}

#[cfg(test)]
mod tests;
