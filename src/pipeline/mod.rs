//! Pipeline configuration consumed by the recipe builder and cloud providers.
//!
//! The configuration is a YAML document:
//!
//! ```yaml
//! name: analytics
//! cloud:
//!   provider: aws
//!   region: eu-west-1
//!   bucket_name: analytics-state
//! taps:
//!   tap-csv:
//!     repo: https://example.com/tap-csv.git
//! targets:
//!   target-postgres:
//!     repo: https://example.com/target-postgres.git
//! ```
//!
//! Component order is part of the image identity, so `taps` and `targets`
//! keep the order in which they are declared.

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::recipe::RESERVED_NAMES;

/// Region used when the configuration does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors raised for malformed or incomplete pipeline configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigurationError {
    /// Raised when the configuration file cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the YAML document does not match the expected shape.
    #[error("failed to parse pipeline configuration: {0}")]
    Parse(String),
    /// Raised when the instance name is blank.
    #[error("pipeline configuration is missing a name")]
    MissingName,
    /// Raised when a component name is not a safe identifier token.
    #[error("{kind} name '{name}' must only contain letters, digits, '.', '_' or '-'")]
    UnsafeComponentName {
        /// Set the component belongs to.
        kind: ComponentKind,
        /// Offending name.
        name: String,
    },
    /// Raised when a component name collides with a directory the recipe
    /// preamble creates.
    #[error("{kind} name '{name}' is reserved by the build recipe")]
    ReservedComponentName {
        /// Set the component belongs to.
        kind: ComponentKind,
        /// Offending name.
        name: String,
    },
    /// Raised when a tap and a target share a name, and so a directory.
    #[error("'{0}' is declared as both a tap and a target")]
    SharedComponentName(String),
    /// Raised when the instance name cannot name cloud resources.
    #[error(
        "pipeline name '{0}' must be 3 to 63 lowercase letters, digits or '-', \
         starting and ending with a letter or digit"
    )]
    InvalidName(String),
    /// Raised when a component has no `repo` key.
    #[error("{kind} '{name}' is missing a repo")]
    MissingRepo {
        /// Set the component belongs to.
        kind: ComponentKind,
        /// Component name.
        name: String,
    },
    /// Raised when `cloud.provider` names an unknown provider.
    #[error("cloud provider \"{0}\" not supported")]
    UnsupportedProvider(String),
}

/// Which component set an entry was declared in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComponentKind {
    /// Data source component.
    Tap,
    /// Data destination component.
    Target,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tap => f.write_str("tap"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PipelineConfig {
    /// Instance name; prefixes the registry repository and compute cluster.
    pub name: String,
    /// Cloud account settings.
    pub cloud: CloudSettings,
    /// Source components in declared order.
    #[serde(default)]
    pub taps: ComponentSet,
    /// Destination components in declared order.
    #[serde(default)]
    pub targets: ComponentSet,
}

/// The `cloud` section of the pipeline configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct CloudSettings {
    /// Provider name, for example `aws`.
    pub provider: String,
    /// Provider region; defaults to [`DEFAULT_REGION`].
    pub region: Option<String>,
    /// Object store bucket; defaults to the instance name.
    pub bucket_name: Option<String>,
}

/// One entry of a component set as written in the configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComponentEntry {
    /// Component name.
    pub name: String,
    /// Source repository, when present.
    pub repo: Option<String>,
}

/// A named installable component with a resolved source repository.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineComponentConfig {
    /// Component name, also used as its directory and environment name.
    pub name: String,
    /// Repository cloned into the image.
    pub repository_url: String,
}

/// Ordered, duplicate-free set of components.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComponentSet(Vec<ComponentEntry>);

impl ComponentSet {
    /// Builds a set from `(name, repo)` pairs, keeping their order.
    #[must_use]
    pub fn from_entries<I, N, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, Option<R>)>,
        N: Into<String>,
        R: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(name, repo)| ComponentEntry {
                    name: name.into(),
                    repo: repo.map(Into::into),
                })
                .collect(),
        )
    }

    /// Iterates over the raw entries in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentEntry> {
        self.0.iter()
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the set has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves every entry into a [`PipelineComponentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsafeComponentName`] for names that are
    /// not safe path tokens and [`ConfigurationError::MissingRepo`] for
    /// entries without a repository.
    pub fn resolve(
        &self,
        kind: ComponentKind,
    ) -> Result<Vec<PipelineComponentConfig>, ConfigurationError> {
        self.0
            .iter()
            .map(|entry| {
                check_component_name(kind, &entry.name)?;
                match entry.repo.as_deref().map(str::trim) {
                    Some(repo) if !repo.is_empty() => Ok(PipelineComponentConfig {
                        name: entry.name.clone(),
                        repository_url: repo.to_owned(),
                    }),
                    _ => Err(ConfigurationError::MissingRepo {
                        kind,
                        name: entry.name.clone(),
                    }),
                }
            })
            .collect()
    }
}

fn check_component_name(kind: ComponentKind, name: &str) -> Result<(), ConfigurationError> {
    if !is_safe_name(name) {
        return Err(ConfigurationError::UnsafeComponentName {
            kind,
            name: name.to_owned(),
        });
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ConfigurationError::ReservedComponentName {
            kind,
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['.', '-'])
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

#[derive(Deserialize)]
struct RawComponent {
    repo: Option<String>,
}

struct ComponentSetVisitor;

impl<'de> Visitor<'de> for ComponentSetVisitor {
    type Value = ComponentSet;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a mapping of component name to {repo}")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ComponentSet::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<ComponentEntry> = Vec::new();
        while let Some(name) = map.next_key::<String>()? {
            let raw = map.next_value::<Option<RawComponent>>()?;
            if entries.iter().any(|entry| entry.name == name) {
                return Err(de::Error::custom(format!(
                    "duplicate component name '{name}'"
                )));
            }
            entries.push(ComponentEntry {
                name,
                repo: raw.and_then(|component| component.repo),
            });
        }
        Ok(ComponentSet(entries))
    }
}

impl<'de> Deserialize<'de> for ComponentSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ComponentSetVisitor)
    }
}

/// Closed set of supported cloud providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderKind {
    /// Amazon Web Services.
    Aws,
}

impl FromStr for ProviderKind {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "aws" => Ok(Self::Aws),
            other => Err(ConfigurationError::UnsupportedProvider(other.to_owned())),
        }
    }
}

/// Account-level facts a provider needs to manage one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderConfig {
    /// Which provider variant to use.
    pub kind: ProviderKind,
    /// Provider region.
    pub region: String,
    /// Object store bucket name.
    pub bucket_name: String,
    /// Name shared by the registry repository and the compute cluster.
    pub resource_prefix: String,
}

impl PipelineConfig {
    /// Reads and validates a pipeline configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Read`] when the file cannot be read and
    /// any error from [`PipelineConfig::from_yaml_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigurationError> {
        let contents = read_file(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses and validates a pipeline configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parse`] for malformed YAML or duplicate
    /// component names, and any error from [`PipelineConfig::validate`].
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|err| ConfigurationError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the instance name, component names and provider.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::MissingName);
        }
        if !is_resource_name(name) {
            return Err(ConfigurationError::InvalidName(name.to_owned()));
        }
        for (kind, set) in [
            (ComponentKind::Tap, &self.taps),
            (ComponentKind::Target, &self.targets),
        ] {
            for entry in set.iter() {
                check_component_name(kind, &entry.name)?;
            }
        }
        self.ensure_disjoint_sets()?;
        self.provider_kind()?;
        Ok(())
    }

    /// Checks that no name appears among both the taps and the targets.
    /// Every component is installed into a directory of its own name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::SharedComponentName`] for the first
    /// shared name, in tap order.
    pub fn ensure_disjoint_sets(&self) -> Result<(), ConfigurationError> {
        self.taps
            .iter()
            .find(|tap| self.targets.iter().any(|target| target.name == tap.name))
            .map_or(Ok(()), |tap| {
                Err(ConfigurationError::SharedComponentName(tap.name.clone()))
            })
    }

    /// Resolves `cloud.provider` to a supported variant.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedProvider`] for unknown names.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigurationError> {
        self.cloud.provider.parse()
    }

    /// Derives the provider settings for this instance.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedProvider`] for unknown names.
    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigurationError> {
        let name = self.name.trim().to_owned();
        Ok(ProviderConfig {
            kind: self.provider_kind()?,
            region: non_blank(self.cloud.region.as_deref())
                .unwrap_or(DEFAULT_REGION)
                .to_owned(),
            bucket_name: non_blank(self.cloud.bucket_name.as_deref())
                .map_or_else(|| name.clone(), str::to_owned),
            resource_prefix: name,
        })
    }
}

// The instance name becomes the S3 bucket (by default), ECR repository and
// ECS cluster name; this is the subset all three accept.
fn is_resource_name(name: &str) -> bool {
    let is_edge = |ch: char| ch.is_ascii_lowercase() || ch.is_ascii_digit();
    (3..=63).contains(&name.len())
        && name.chars().all(|ch| is_edge(ch) || ch == '-')
        && name.starts_with(is_edge)
        && name.ends_with(is_edge)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn read_file(path: &Utf8Path) -> Result<String, ConfigurationError> {
    let read_error = |message: String| ConfigurationError::Read {
        path: path.to_string(),
        message,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| read_error(String::from("path has no file name")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| read_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| read_error(err.to_string()))
}
