//! Artifact builder
//!
//! Runs the configured build command once per release cell and once for
//! the source artifact. The command is told where to write through
//! `ARTIFACT_PATH`; a zero exit without that file is still a failure.

use super::{Artifact, ArtifactKey, BuildError, ReleaseConfig};
use crate::executor::{CommandSpec, ProcessLauncher, SPAWN_FAILURE_EXIT_CODE, split_command};
use crate::pipeline::MatrixCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds release artifacts through a [`ProcessLauncher`]
#[derive(Clone)]
pub struct ArtifactBuilder {
    launcher: Arc<dyn ProcessLauncher>,
    config: ReleaseConfig,
    root: PathBuf,
}

impl std::fmt::Debug for ArtifactBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBuilder")
            .field("config", &self.config)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ArtifactBuilder {
    /// Creates a builder; commands run in `root`
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        config: ReleaseConfig,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            launcher,
            config,
            root: root.into(),
        }
    }

    /// Directory artifacts are written to
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.output_dir)
    }

    /// Deterministic location of an artifact
    #[must_use]
    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.output_dir().join(key.file_name())
    }

    /// Builds the binary artifact of one cell
    #[tracing::instrument(skip_all, fields(cell = %cell.name))]
    pub async fn build_cell(
        &self,
        cell: &MatrixCell,
        version: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<Artifact, BuildError> {
        let key = self.config.key_for_cell(cell, version)?;
        let mut vars = vars.clone();
        vars.extend(cell.template_vars());
        self.run_build(&self.config.build, key, vars).await
    }

    /// Builds the source artifact; `None` when no `sdist` command is set
    pub async fn build_source(
        &self,
        version: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<Option<Artifact>, BuildError> {
        let Some(ref template) = self.config.sdist else {
            return Ok(None);
        };
        let key = self.config.source_key(version);
        self.run_build(template, key, vars.clone()).await.map(Some)
    }

    /// Collects the artifacts of every cell, failing unless all exist
    pub fn collect(
        &self,
        cells: &[MatrixCell],
        version: &str,
    ) -> Result<Vec<Artifact>, BuildError> {
        let mut artifacts = Vec::with_capacity(cells.len());
        let mut missing = Vec::new();

        for cell in cells {
            let key = self.config.key_for_cell(cell, version)?;
            let path = self.path_for(&key);
            if path.is_file() {
                artifacts.push(Artifact::from_file(key, &path)?);
            } else {
                missing.push(key.file_name());
            }
        }

        if missing.is_empty() {
            Ok(artifacts)
        } else {
            Err(BuildError::Incomplete { missing })
        }
    }

    async fn run_build(
        &self,
        template: &str,
        key: ArtifactKey,
        mut vars: BTreeMap<String, String>,
    ) -> Result<Artifact, BuildError> {
        let out_dir = self.output_dir();
        let path = self.path_for(&key);
        std::fs::create_dir_all(&out_dir).map_err(|source| BuildError::Io {
            path: out_dir.clone(),
            source,
        })?;

        let lossy = |p: &PathBuf| p.to_string_lossy().to_string();
        vars.insert("ARTIFACT_PATH".to_string(), lossy(&path));
        vars.insert("ARTIFACT_DIR".to_string(), lossy(&out_dir));
        vars.insert("PACKAGE".to_string(), self.config.package.clone());
        vars.insert("VERSION".to_string(), key.version.clone());
        vars.insert(
            "PLATFORM_TAG".to_string(),
            key.platform_tag.clone().unwrap_or_default(),
        );
        vars.insert(
            "INTERPRETER_TAG".to_string(),
            key.interpreter_tag.clone().unwrap_or_default(),
        );

        let mut words = split_command(template, &vars, &BTreeMap::new()).map_err(|e| {
            BuildError::InvalidCommand {
                command: template.to_string(),
                reason: e.to_string(),
            }
        })?;
        let program = words.remove(0);
        let spec = CommandSpec {
            program,
            args: words,
            cwd: self.root.clone(),
            env: vars,
        };

        let artifact = key.file_name();
        tracing::info!(artifact = %artifact, command = %spec.display(), "Building artifact");
        let (exit_code, stderr) = match self.launcher.launch(&spec).await {
            Ok(output) => (output.exit_code, output.stderr),
            Err(e) => (SPAWN_FAILURE_EXIT_CODE, e.to_string()),
        };
        if exit_code != 0 {
            return Err(BuildError::CommandFailed {
                artifact,
                exit_code,
                stderr,
            });
        }

        if !path.is_file() {
            return Err(BuildError::MissingOutput { path });
        }
        let artifact = Artifact::from_file(key, &path)?;
        tracing::info!(
            artifact = %artifact.file_name(),
            sha256 = %artifact.sha256,
            size = artifact.size,
            "Artifact built"
        );
        Ok(artifact)
    }
}
