//! Cell executor running steps on this machine

use super::state::{CellOutcome, CellResult};
use super::{CellExecutor, JobError};
use crate::coverage::{Aggregator, COVERAGE_FILE_VAR, COVERAGE_RUN_VAR};
use crate::executor::{
    BaseEnv, EnvironmentOutcome, EnvironmentRunner, IsolationConfig, ProcessLauncher,
};
use crate::pipeline::{Environment, Job, MatrixCell, Pipeline, Step, Trigger};
use crate::release::{ArtifactBuilder, Credential, PublishError, Publisher, ReleaseConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Variable holding the job name
pub const JOB_VAR: &str = "RELAYLINE_JOB";
/// Variable holding the cell name
pub const CELL_VAR: &str = "RELAYLINE_CELL";

/// A line of output a job produced for the run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNote {
    /// Job name
    pub job: String,
    /// Rendered text
    pub text: String,
}

/// Runs `run`, `env` and `build` steps through local processes
pub struct LocalCellExecutor {
    pipeline: Arc<Pipeline>,
    trigger: Trigger,
    base: BaseEnv,
    launcher: Arc<dyn ProcessLauncher>,
    adhoc: EnvironmentRunner,
    aggregator: Aggregator,
    builder: Option<ArtifactBuilder>,
    run_token: String,
    notes: Mutex<Vec<JobNote>>,
}

impl std::fmt::Debug for LocalCellExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCellExecutor")
            .field("trigger", &self.trigger)
            .field("run_token", &self.run_token)
            .finish_non_exhaustive()
    }
}

impl LocalCellExecutor {
    /// Creates an executor for one run of `pipeline`
    pub fn new(
        pipeline: Arc<Pipeline>,
        launcher: Arc<dyn ProcessLauncher>,
        base: BaseEnv,
        trigger: Trigger,
    ) -> Self {
        let adhoc = EnvironmentRunner::new(
            Arc::clone(&launcher),
            IsolationConfig {
                enabled: false,
                ..pipeline.isolation.clone()
            },
            pipeline.root.clone(),
            pipeline.work_dir(),
        );
        let aggregator = Aggregator::new(pipeline.coverage.clone(), pipeline.root.clone());
        let builder = pipeline.release.clone().map(|release| {
            ArtifactBuilder::new(Arc::clone(&launcher), release, pipeline.root.clone())
        });
        let run_token = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        Self {
            pipeline,
            trigger,
            base,
            launcher,
            adhoc,
            aggregator,
            builder,
            run_token,
            notes: Mutex::new(Vec::new()),
        }
    }

    /// Notes recorded by finished jobs, in completion order
    #[must_use]
    pub fn notes(&self) -> Vec<JobNote> {
        self.notes.lock().clone()
    }

    /// Identifier of the coverage fragment a cell writes
    #[must_use]
    pub fn coverage_run_id(&self, job: &Job, cell: &MatrixCell) -> String {
        format!("{}-{}-{}", job.name, cell.slug(), self.run_token)
    }

    /// Runner whose contexts belong to one cell, so cells sharing an
    /// environment never prepare the same directory
    fn runner_for(&self, job: &Job, cell: &MatrixCell) -> EnvironmentRunner {
        let work_dir = self
            .pipeline
            .work_dir()
            .join("jobs")
            .join(&job.name)
            .join(cell.slug());
        EnvironmentRunner::new(
            Arc::clone(&self.launcher),
            self.pipeline.isolation.clone(),
            self.pipeline.root.clone(),
            work_dir,
        )
    }

    fn note(&self, job: &Job, text: String) {
        self.notes.lock().push(JobNote {
            job: job.name.clone(),
            text,
        });
    }

    fn release_parts(&self, job: &Job) -> Result<(&ArtifactBuilder, &ReleaseConfig), JobError> {
        match (&self.builder, &self.pipeline.release) {
            (Some(builder), Some(release)) => Ok((builder, release)),
            _ => Err(JobError::MissingRelease {
                job: job.name.clone(),
            }),
        }
    }

    fn cell_vars(&self, job: &Job, cell: &MatrixCell) -> BTreeMap<String, String> {
        let mut vars = cell.env_vars();
        vars.insert(JOB_VAR.to_string(), job.name.clone());
        vars.insert(CELL_VAR.to_string(), cell.name.clone());
        if job.coverage {
            let run_id = self.coverage_run_id(job, cell);
            let path = self.aggregator.store().path_for(&run_id);
            vars.insert(COVERAGE_FILE_VAR.to_string(), path.to_string_lossy().to_string());
            vars.insert(COVERAGE_RUN_VAR.to_string(), run_id);
        }
        vars
    }

    /// Variables visible to build commands: the allow-listed base
    /// environment plus the cell variables
    fn build_vars(
        &self,
        extra: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, JobError> {
        let globs = self.pipeline.isolation.passenv_globs(&[])?;
        let mut vars = self.base.filtered(&globs);
        vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(vars)
    }

    async fn run_step(
        &self,
        job: &Job,
        cell: &MatrixCell,
        index: usize,
        step: &Step,
        vars: &BTreeMap<String, String>,
    ) -> Result<Option<CellResult>, JobError> {
        let outcome = match step {
            Step::Run(command) => {
                let env = Environment::new(
                    format!("{}.step{}", job.name, index + 1),
                    vec![command.clone()],
                );
                self.adhoc.run_with(&env, &self.base, vars).await?
            }
            Step::Env(name) => {
                let Some(env) = self.pipeline.registry.get(name) else {
                    return Ok(Some(CellResult::error(format!("unknown environment '{name}'"))));
                };
                self.runner_for(job, cell).run_with(&env, &self.base, vars).await?
            }
            Step::Build => {
                let (builder, release) = self.release_parts(job)?;
                let version = release.resolve_version(&self.trigger)?;
                let build_vars = self.build_vars(vars)?;
                builder.build_cell(cell, &version, &build_vars).await?;
                return Ok(None);
            }
        };
        Ok(failure(&outcome))
    }

    fn combine_coverage(&self, job: &Job, cells: &[CellOutcome]) -> Result<(), JobError> {
        let expected: Vec<String> = cells
            .iter()
            .map(|o| self.coverage_run_id(job, &o.cell))
            .collect();
        let outcome = self.aggregator.combine(&expected)?;
        let text = outcome
            .summary
            .render_text(self.aggregator.config().precision);
        self.note(job, text);
        self.aggregator.check_threshold(&outcome.summary)?;
        Ok(())
    }

    async fn release(&self, job: &Job, cells: &[CellOutcome]) -> Result<(), JobError> {
        if self.trigger.tag().is_none() {
            return Err(JobError::NotTagPush {
                job: job.name.clone(),
                git_ref: self.trigger.git_ref.clone(),
            });
        }
        let (builder, release) = self.release_parts(job)?;
        let version = release.resolve_version(&self.trigger)?;

        let matrix: Vec<MatrixCell> = cells.iter().map(|o| o.cell.clone()).collect();
        let mut artifacts = builder.collect(&matrix, &version)?;
        let vars = self.build_vars(&self.cell_vars(job, &MatrixCell::single()))?;
        if let Some(source) = builder.build_source(&version, &vars).await? {
            artifacts.push(source);
        }

        if release.index.is_none() {
            tracing::warn!(
                job = %job.name,
                artifacts = artifacts.len(),
                "No index configured, skipping publish"
            );
            self.note(job, format!("built {} artifact(s), publishing skipped", artifacts.len()));
            return Ok(());
        }

        let credential = self
            .base
            .get(&release.token_env)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Credential::new)
            .ok_or_else(|| PublishError::MissingCredential {
                var: release.token_env.clone(),
            })?;
        let index = release.open_index(&self.pipeline.root)?;
        let report = Publisher::new(index, release.retry_policy())
            .publish(&artifacts, &credential)
            .await?;

        self.note(
            job,
            format!(
                "published {} artifact(s), {} already present",
                report.confirmed.len(),
                report.already_present.len()
            ),
        );
        Ok(())
    }
}

/// Maps a failed environment run to the cell failure shown to the user
fn failure(outcome: &EnvironmentOutcome) -> Option<CellResult> {
    let failed = outcome.failure.as_ref()?;
    tracing::error!(
        env = %outcome.environment,
        command = %failed.command,
        exit_code = failed.exit_code,
        "Command failed"
    );
    Some(CellResult::Failed {
        exit_code: Some(failed.exit_code),
        message: format!("$ {}\n{}{}", failed.command, failed.stdout, failed.stderr),
    })
}

#[async_trait]
impl CellExecutor for LocalCellExecutor {
    async fn run_cell(&self, job: &Job, cell: &MatrixCell) -> CellResult {
        let vars = self.cell_vars(job, cell);
        if job.coverage {
            let dir = self.aggregator.store().dir().to_path_buf();
            if let Err(e) = std::fs::create_dir_all(&dir) {
                return CellResult::error(format!("cannot create {}: {e}", dir.display()));
            }
        }

        for (index, step) in job.steps.iter().enumerate() {
            tracing::debug!(job = %job.name, cell = %cell.name, step = %step, "Running step");
            match self.run_step(job, cell, index, step, &vars).await {
                Ok(None) => {}
                Ok(Some(result)) => return result,
                Err(e) => return CellResult::error(e.to_string()),
            }
        }
        CellResult::Succeeded
    }

    async fn finish_job(&self, job: &Job, cells: &[CellOutcome]) -> Result<(), JobError> {
        if job.coverage {
            self.combine_coverage(job, cells)?;
        }
        if job.release {
            self.release(job, cells).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageFragment;
    use crate::engine::{Engine, SkipReason};
    use crate::executor::{CommandOutput, CommandSpec, DEPS_MARKER};
    use crate::pipeline::{JobStatus, PipelineConfig};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Pretends to be a test runner and a build backend: writes a coverage
    /// fragment or an artifact when asked to, and fails listed programs
    #[derive(Default)]
    struct FakeToolchain {
        failing: Vec<String>,
        launched: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeToolchain {
        async fn launch(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.launched.lock().push(spec.clone());
            let cell = spec.env.get(CELL_VAR).cloned().unwrap_or_default();
            if self.failing.iter().any(|f| *f == spec.program || *f == cell) {
                return Ok(CommandOutput {
                    exit_code: 3,
                    stdout: "1 failed\n".to_string(),
                    stderr: String::new(),
                    duration: Duration::ZERO,
                });
            }

            if spec.program == "pytest"
                && let (Some(path), Some(run)) =
                    (spec.env.get(COVERAGE_FILE_VAR), spec.env.get(COVERAGE_RUN_VAR))
            {
                let hit = u64::from(cell.ends_with("3.9"));
                let fragment = CoverageFragment::new(run.clone())
                    .with_lines("src/pkg/core.py", &[(1, 1), (2, hit)]);
                std::fs::write(path, fragment.to_json().map_err(std::io::Error::other)?)?;
            }
            if let Some(path) = spec.env.get("ARTIFACT_PATH") {
                std::fs::write(path, format!("built by {}", spec.display()))?;
            }

            Ok(CommandOutput {
                exit_code: 0,
                stdout: format!("{}\n", spec.display()),
                stderr: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    const PIPELINE: &str = r#"
isolation:
  create: "venv ${ENV_DIR}"
  install: "pip install ${DEPS}"
environments:
  - name: py
    deps: [pytest]
    commands:
      - pytest tests
jobs:
  - name: test
    coverage: true
    matrix:
      axes:
        - name: os
          values: [ubuntu-latest]
        - name: version
          values: ["3.8", "3.9"]
    steps:
      - env: py
  - name: deploy
    needs: [test]
    release: true
    if:
      tag: "v*"
    matrix:
      axes:
        - name: os
          values: [ubuntu-latest, macos-latest]
        - name: version
          values: ["3.9"]
    steps:
      - build
coverage:
  xml_output: coverage.xml
release:
  package: My-Package
  platforms:
    ubuntu-latest: manylinux_2_17_x86_64
    macos-latest: macosx_11_0_arm64
  build: "build-wheel --out ${ARTIFACT_PATH}"
  sdist: "build-sdist --out ${ARTIFACT_PATH}"
  index:
    directory: index
  backoff_ms: 1
"#;

    fn pipeline(root: &TempDir) -> Arc<Pipeline> {
        let config = PipelineConfig::from_yaml_str(PIPELINE).unwrap();
        Arc::new(Pipeline::from_config(config, root.path()).unwrap())
    }

    fn base() -> BaseEnv {
        BaseEnv::from_vars([
            ("PATH", "/usr/bin"),
            ("RELAYLINE_PUBLISH_TOKEN", "s3cret"),
        ])
    }

    #[tokio::test]
    async fn test_full_release_run() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root);
        let launcher = Arc::new(FakeToolchain::default());
        let trigger = Trigger::tag_push("v1.4.0");
        let executor = Arc::new(LocalCellExecutor::new(
            pipeline.clone(),
            launcher.clone(),
            base(),
            trigger.clone(),
        ));

        let report = Engine::new(executor.clone(), &pipeline.settings)
            .run(&pipeline.graph, &trigger)
            .await;

        assert!(report.is_success(), "{}", report.render_summary());
        assert_eq!(report.job("deploy").unwrap().status, JobStatus::Succeeded);

        let published: Vec<String> = {
            let mut names: Vec<String> = std::fs::read_dir(root.path().join("index"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        };
        assert_eq!(
            published,
            vec![
                "my_package-1.4.0-macosx_11_0_arm64-cp39.whl",
                "my_package-1.4.0-manylinux_2_17_x86_64-cp39.whl",
                "my_package-1.4.0.tar.gz",
            ]
        );

        assert!(root.path().join("coverage.xml").is_file());
        let notes = executor.notes();
        assert!(notes.iter().any(|n| n.job == "test" && n.text.contains("100")));
        assert!(notes.iter().any(|n| n.job == "deploy" && n.text.contains("published 3")));

        for spec in launcher.launched.lock().iter() {
            assert!(
                !spec.env.contains_key("RELAYLINE_PUBLISH_TOKEN"),
                "credential leaked to {}",
                spec.display()
            );
        }
        let context = root
            .path()
            .join(".relayline/jobs/test/os_ubuntu-latest_version_3.8/envs/py");
        assert!(context.join(DEPS_MARKER).is_file());
    }

    #[tokio::test]
    async fn test_failing_cell_reports_output_and_skips_release() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root);
        let launcher = Arc::new(FakeToolchain {
            failing: vec!["os=ubuntu-latest,version=3.8".to_string()],
            ..FakeToolchain::default()
        });
        let trigger = Trigger::tag_push("v1.4.0");
        let executor = Arc::new(LocalCellExecutor::new(
            pipeline.clone(),
            launcher,
            base(),
            trigger.clone(),
        ));

        let report = Engine::new(executor, &pipeline.settings)
            .run(&pipeline.graph, &trigger)
            .await;

        assert_eq!(report.exit_code(), 3);
        let (job, cell) = report.first_failure().unwrap();
        assert_eq!(job.name, "test");
        match &cell.status {
            crate::engine::CellStatus::Failed { message, .. } => {
                assert!(message.ends_with("1 failed\n"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(report.job("deploy").unwrap().status, JobStatus::Skipped);
        assert!(!root.path().join("index").exists());
    }

    #[tokio::test]
    async fn test_missing_credential_fails_release() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root);
        let trigger = Trigger::tag_push("v1.4.0");
        let executor = Arc::new(LocalCellExecutor::new(
            pipeline.clone(),
            Arc::new(FakeToolchain::default()),
            BaseEnv::from_vars([("PATH", "/usr/bin")]),
            trigger.clone(),
        ));

        let report = Engine::new(executor, &pipeline.settings)
            .run(&pipeline.graph, &trigger)
            .await;

        let deploy = report.job("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Failed);
        assert!(deploy.error.as_deref().unwrap().contains("RELAYLINE_PUBLISH_TOKEN"));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_branch_push_never_publishes() {
        let yaml = PIPELINE
            .replace("    if:\n      tag: \"v*\"\n", "")
            .replace("  package: My-Package\n", "  package: My-Package\n  version: \"1.0\"\n");
        assert!(!yaml.contains("tag: \"v*\""));
        let root = TempDir::new().unwrap();
        let config = PipelineConfig::from_yaml_str(&yaml).unwrap();
        let pipeline = Arc::new(Pipeline::from_config(config, root.path()).unwrap());
        let trigger = Trigger::branch_push("main");
        let executor = Arc::new(LocalCellExecutor::new(
            pipeline.clone(),
            Arc::new(FakeToolchain::default()),
            base(),
            trigger.clone(),
        ));

        let report = Engine::new(executor.clone(), &pipeline.settings)
            .run(&pipeline.graph, &trigger)
            .await;

        let deploy = report.job("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Skipped);
        assert_eq!(deploy.skip_reason, Some(SkipReason::ConditionFalse));
        assert!(!root.path().join("index").exists());

        let job = pipeline.graph.job("deploy").unwrap();
        let err = executor.finish_job(job, &[]).await.unwrap_err();
        assert!(matches!(err, JobError::NotTagPush { .. }), "{err}");
        assert!(!root.path().join("index").exists());
    }

    #[tokio::test]
    async fn test_cell_variables() {
        let root = TempDir::new().unwrap();
        let pipeline = pipeline(&root);
        let launcher = Arc::new(FakeToolchain::default());
        let executor = LocalCellExecutor::new(
            pipeline.clone(),
            launcher.clone(),
            base(),
            Trigger::branch_push("main"),
        );

        let job = pipeline.graph.job("test").unwrap();
        let cell = job.cells().remove(1);
        assert_eq!(executor.run_cell(job, &cell).await, CellResult::Succeeded);

        let launched = launcher.launched.lock();
        let pytest = launched.iter().find(|s| s.program == "pytest").unwrap();
        assert_eq!(pytest.env["MATRIX_VERSION"], "3.9");
        assert_eq!(pytest.env[JOB_VAR], "test");
        assert_eq!(pytest.env[COVERAGE_RUN_VAR], executor.coverage_run_id(job, &cell));
        assert!(pytest.env.contains_key("VIRTUAL_ENV"));
    }
}
