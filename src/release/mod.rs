//! Release artifacts: build and publish
//!
//! The release job builds one binary artifact per matrix cell. Once every
//! cell succeeded the single source artifact is built and the union is
//! uploaded to the package index.

mod artifact;
mod builder;
mod errors;
mod index;
mod publisher;

pub use artifact::{Artifact, ArtifactKey, ArtifactKind, normalize_package};
pub use builder::ArtifactBuilder;
pub use errors::{BuildError, PublishError};
pub use index::{DirectoryIndex, HttpIndex, IndexError, PackageIndex};
pub use publisher::{Credential, PublishReport, Publisher, RetryPolicy};

use crate::pipeline::{MatrixCell, Trigger, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default name of the variable holding the publish credential
pub const DEFAULT_TOKEN_ENV: &str = "RELAYLINE_PUBLISH_TOKEN";

fn default_platform_axis() -> String {
    "os".to_string()
}

fn default_interpreter_axis() -> String {
    "version".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    500
}

/// Where artifacts are published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexConfig {
    /// HTTP upload endpoint
    Url(String),
    /// Local directory, relative to the pipeline root
    Directory(PathBuf),
}

/// Release block of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Package name
    pub package: String,

    /// Release version; derived from a `v`-prefixed tag when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Matrix axis holding the runner platform
    #[serde(default = "default_platform_axis")]
    pub platform_axis: String,

    /// Matrix axis holding the interpreter version
    #[serde(default = "default_interpreter_axis")]
    pub interpreter_axis: String,

    /// Platform value -> platform tag
    #[serde(default)]
    pub platforms: BTreeMap<String, String>,

    /// Interpreter value -> interpreter tag, overriding the derived tag
    #[serde(default)]
    pub interpreters: BTreeMap<String, String>,

    /// Command building one binary artifact at `${ARTIFACT_PATH}`
    pub build: String,

    /// Command building the source artifact at `${ARTIFACT_PATH}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdist: Option<String>,

    /// Directory artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Package index; without one artifacts are built but not published
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub index: Option<IndexConfig>,

    /// Variable holding the bearer credential
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Upload attempts per artifact
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl ReleaseConfig {
    /// Creates a release block with defaults
    pub fn new(package: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: None,
            platform_axis: default_platform_axis(),
            interpreter_axis: default_interpreter_axis(),
            platforms: BTreeMap::new(),
            interpreters: BTreeMap::new(),
            build: build.into(),
            sdist: None,
            output_dir: default_output_dir(),
            index: None,
            token_env: default_token_env(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }

    /// Checks names, commands and retry bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = ValidationError::InvalidRelease;

        if self.package.is_empty()
            || !self
                .package
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(format!("invalid package name '{}'", self.package)));
        }

        crate::pipeline::environment::validate_command_line("release", &self.build)?;
        if let Some(ref sdist) = self.sdist {
            crate::pipeline::environment::validate_command_line("release", sdist)?;
        }

        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1".to_string()));
        }
        if self.token_env.is_empty() {
            return Err(invalid("token_env must name a variable".to_string()));
        }
        if let Some(IndexConfig::Url(ref url)) = self.index {
            url::Url::parse(url).map_err(|e| invalid(format!("invalid index url '{url}': {e}")))?;
        }
        Ok(())
    }

    /// The version to release for a trigger
    pub fn resolve_version(&self, trigger: &Trigger) -> Result<String, BuildError> {
        if let Some(ref version) = self.version {
            return Ok(version.clone());
        }
        trigger
            .tag()
            .map(|tag| tag.strip_prefix('v').unwrap_or(tag).to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BuildError::MissingVersion {
                git_ref: trigger.git_ref.clone(),
            })
    }

    /// Platform and interpreter tags of a cell
    pub fn tags_for_cell(&self, cell: &MatrixCell) -> Result<(String, String), BuildError> {
        let platform = cell
            .get(&self.platform_axis)
            .ok_or_else(|| BuildError::MissingAxis {
                cell: cell.name.clone(),
                axis: self.platform_axis.clone(),
            })?;
        let platform_tag = self
            .platforms
            .get(platform)
            .cloned()
            .ok_or_else(|| BuildError::UnmappedPlatform {
                value: platform.to_string(),
            })?;

        let interpreter_tag = match cell.get(&self.interpreter_axis) {
            Some(value) => self.interpreter_tag(value)?,
            None => "py3".to_string(),
        };

        Ok((platform_tag, interpreter_tag))
    }

    /// Interpreter tag for a version value; `3.8` becomes `cp38`
    pub fn interpreter_tag(&self, value: &str) -> Result<String, BuildError> {
        if let Some(tag) = self.interpreters.get(value) {
            return Ok(tag.clone());
        }
        let unmapped = || BuildError::UnmappedInterpreter {
            value: value.to_string(),
        };
        let mut parts = value.split('.');
        let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
            return Err(unmapped());
        };
        let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !numeric(major) || !numeric(minor) {
            return Err(unmapped());
        }
        Ok(format!("cp{major}{minor}"))
    }

    /// Binary artifact key of a cell
    pub fn key_for_cell(
        &self,
        cell: &MatrixCell,
        version: &str,
    ) -> Result<ArtifactKey, BuildError> {
        let (platform, interpreter) = self.tags_for_cell(cell)?;
        Ok(ArtifactKey::binary(&self.package, version, platform, interpreter))
    }

    /// Source artifact key
    #[must_use]
    pub fn source_key(&self, version: &str) -> ArtifactKey {
        ArtifactKey::source(&self.package, version)
    }

    /// Retry policy for uploads
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    /// Builds the configured index client; `root` anchors directory indexes
    pub fn open_index(
        &self,
        root: &std::path::Path,
    ) -> Result<Arc<dyn PackageIndex>, PublishError> {
        match &self.index {
            Some(IndexConfig::Url(url)) => Ok(Arc::new(HttpIndex::new(url)?)),
            Some(IndexConfig::Directory(dir)) => Ok(Arc::new(DirectoryIndex::new(root.join(dir)))),
            None => Err(PublishError::NoIndex),
        }
    }
}
