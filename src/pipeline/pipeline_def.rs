//! Pipeline file definition and loading.
//!
//! A pipeline file (`relayline.yml` by default) declares every environment,
//! job and release setting of a project. It is read once at start-up into
//! an immutable [`Pipeline`].

use super::errors::{ConfigError, ValidationError};
use super::graph::JobGraph;
use super::job::{Job, Step};
use super::registry::EnvironmentRegistry;
use super::types::Validate;
use super::Environment;
use crate::coverage::CoverageConfig;
use crate::executor::IsolationConfig;
use crate::infrastructure::Settings;
use crate::release::ReleaseConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default pipeline file name
pub const DEFAULT_PIPELINE_FILE: &str = "relayline.yml";

/// Raw, deserialised form of a pipeline file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Runtime settings
    #[serde(default)]
    pub settings: Settings,

    /// How isolated environment contexts are created
    #[serde(default)]
    pub isolation: IsolationConfig,

    /// Environment registry entries
    #[serde(default)]
    pub environments: Vec<Environment>,

    /// CI jobs
    #[serde(default)]
    pub jobs: Vec<Job>,

    /// Coverage aggregation settings
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Release build and publish settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseConfig>,
}

impl PipelineConfig {
    /// Parses a pipeline definition from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads and parses a pipeline file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

/// Validated pipeline, immutable for the duration of a run
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Directory relative paths are resolved against
    pub root: PathBuf,
    /// Runtime settings
    pub settings: Settings,
    /// Isolation settings
    pub isolation: IsolationConfig,
    /// Environment registry
    pub registry: EnvironmentRegistry,
    /// Job graph
    pub graph: JobGraph,
    /// Coverage settings
    pub coverage: CoverageConfig,
    /// Release settings
    pub release: Option<ReleaseConfig>,
}

impl Pipeline {
    /// Loads and validates a pipeline file; its directory becomes the root
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_path(path)?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut pipeline = Self::from_config(config, root)?;
        pipeline.settings.apply_env_overrides();
        Ok(pipeline)
    }

    /// Validates a parsed definition
    pub fn from_config(
        config: PipelineConfig,
        root: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let registry = EnvironmentRegistry::new(config.environments)?;

        for job in &config.jobs {
            job.validate()?;
            for env in job.environments() {
                if !registry.contains(env) {
                    return Err(ValidationError::UnknownEnvironment {
                        job: job.name.clone(),
                        env: env.to_string(),
                    }
                    .into());
                }
            }
        }

        validate_release(&config.jobs, config.release.as_ref())?;
        config.coverage.validate()?;

        let graph = JobGraph::new(config.jobs)?;

        Ok(Self {
            root: root.into(),
            settings: config.settings,
            isolation: config.isolation,
            registry,
            graph,
            coverage: config.coverage,
            release: config.release,
        })
    }

    /// Directory holding isolated contexts and other run state
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.root.join(&self.settings.work_dir)
    }

    /// Resolves a path relative to the pipeline root
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// The release job, if one is declared
    #[must_use]
    pub fn release_job(&self) -> Option<&Job> {
        self.graph.jobs().find(|j| j.release).map(AsRef::as_ref)
    }
}

fn validate_release(jobs: &[Job], release: Option<&ReleaseConfig>) -> Result<(), ValidationError> {
    let release_jobs: Vec<&Job> = jobs.iter().filter(|j| j.release).collect();

    let job = match release_jobs.as_slice() {
        [] => return Ok(()),
        [job] => *job,
        _ => {
            return Err(ValidationError::InvalidRelease(
                "only one job may be marked as release".to_string(),
            ));
        }
    };

    let Some(release) = release else {
        return Err(ValidationError::InvalidRelease(format!(
            "job '{}' is a release job but no release section is declared",
            job.name
        )));
    };
    release.validate()?;

    if !job.steps.iter().any(|s| matches!(s, Step::Build)) {
        return Err(ValidationError::InvalidRelease(format!(
            "release job '{}' has no build step",
            job.name
        )));
    }

    let mut seen: BTreeMap<(String, String), String> = BTreeMap::new();
    for cell in job.cells() {
        let tags = release
            .tags_for_cell(&cell)
            .map_err(|e| ValidationError::InvalidRelease(e.to_string()))?;
        if let Some(other) = seen.get(&tags) {
            return Err(ValidationError::InvalidRelease(format!(
                "cells '{other}' and '{}' both build the {}-{} artifact",
                cell.name, tags.0, tags.1
            )));
        }
        seen.insert(tags, cell.name);
    }

    Ok(())
}
