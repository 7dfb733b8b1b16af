//! Job definitions for the CI graph.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::environment::validate_command_line;
use super::errors::ValidationError;
use super::matrix::{MatrixCell, MatrixConfig};
use super::trigger::{RunCondition, Trigger};
use super::types::{Validate, validate_identifier};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_runs_on() -> String {
    "local".to_string()
}

/// A single step of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Run a command line in the job's working directory
    Run(String),
    /// Run a named environment from the registry
    Env(String),
    /// Build this cell's binary artifact
    Build,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(command) => write!(f, "run: {command}"),
            Self::Env(name) => write!(f, "env: {name}"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// A job in the CI graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    /// Job identifier
    pub name: String,

    /// Runner platform; may reference matrix axes as `${os}`
    #[serde(default = "default_runs_on")]
    pub runs_on: String,

    /// Matrix configuration; a job without one runs as a single cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixConfig>,

    /// Steps executed in order inside every cell
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<Step>,

    /// Jobs that must succeed before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    /// Run condition
    #[serde(
        default,
        rename = "if",
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub condition: Option<RunCondition>,

    /// Per-cell timeout in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,

    /// Merge coverage fragments of all cells once the job finishes
    #[serde(default)]
    pub coverage: bool,

    /// Build and publish release artifacts once the job finishes
    #[serde(default)]
    pub release: bool,
}

impl Job {
    /// Creates a job with the given steps
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            runs_on: default_runs_on(),
            matrix: None,
            steps,
            needs: Vec::new(),
            condition: None,
            timeout_minutes: None,
            coverage: false,
            release: false,
        }
    }

    /// Adds a dependency
    pub fn needs(mut self, job: impl Into<String>) -> Self {
        self.needs.push(job.into());
        self
    }

    /// Sets the matrix
    pub fn with_matrix(mut self, matrix: MatrixConfig) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Sets the run condition
    pub fn when(mut self, condition: RunCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the per-cell timeout
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    /// Enables coverage merging
    pub fn with_coverage(mut self) -> Self {
        self.coverage = true;
        self
    }

    /// Marks the job as the release job
    pub fn as_release(mut self) -> Self {
        self.release = true;
        self
    }

    /// Expands the job into its matrix cells
    pub fn cells(&self) -> Vec<MatrixCell> {
        match &self.matrix {
            Some(matrix) => matrix.expand(),
            None => vec![MatrixCell::single()],
        }
    }

    /// Returns true if the job body should run for this trigger
    ///
    /// A release job runs for tag pushes only, whatever its condition.
    pub fn should_run(&self, trigger: &Trigger) -> bool {
        if self.release && trigger.tag().is_none() {
            return false;
        }
        self.condition.as_ref().is_none_or(|c| c.evaluate(trigger))
    }

    /// Returns the timeout applied to each cell
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_minutes.map(|m| Duration::from_secs(m * 60))
    }

    /// Names of environments referenced by `env` steps
    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            Step::Env(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Renders `runs_on` for a cell
    pub fn runs_on_for(&self, cell: &MatrixCell) -> String {
        crate::executor::expand_variables(&self.runs_on, &cell.template_vars())
    }
}

impl Validate for Job {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        validate_identifier(&self.name)?;

        if self.steps.is_empty() {
            return Err(ValidationError::EmptyJob {
                job: self.name.clone(),
            });
        }

        for step in &self.steps {
            match step {
                Step::Run(command) => validate_command_line(&self.name, command)?,
                Step::Build if !self.release => {
                    return Err(ValidationError::BuildOutsideRelease {
                        job: self.name.clone(),
                    });
                }
                Step::Env(_) | Step::Build => {}
            }
        }

        if let Some(ref matrix) = self.matrix {
            matrix.validate()?;
        }

        if let Some(ref condition) = self.condition {
            condition.validate()?;
        }

        if let Some(0) = self.timeout_minutes {
            return Err(ValidationError::InvalidTimeout { value: 0 });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EventKind, MatrixAxis};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_without_matrix_has_single_cell() {
        let job = Job::new("lint", vec![Step::Env("lint".to_string())]);
        let cells = job.cells();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].name, "default");
    }

    #[test]
    fn test_job_condition() {
        let deploy = Job::new("deploy", vec![Step::Build])
            .as_release()
            .when(RunCondition::tag("v*"));
        assert!(deploy.should_run(&Trigger::tag_push("v1.0")));
        assert!(!deploy.should_run(&Trigger::branch_push("main")));

        let lint = Job::new("lint", vec![Step::Run("true".to_string())]);
        assert!(lint.should_run(&Trigger::branch_push("main")));
    }

    #[test]
    fn test_release_job_requires_tag_push() {
        let deploy = Job::new("deploy", vec![Step::Build]).as_release();
        assert!(deploy.should_run(&Trigger::tag_push("v2.0")));
        assert!(!deploy.should_run(&Trigger::branch_push("main")));
        assert!(!deploy.should_run(&Trigger::new(
            EventKind::PullRequest,
            "refs/tags/v2.0"
        )));

        let permissive = deploy.when(RunCondition::branch("*"));
        assert!(!permissive.should_run(&Trigger::branch_push("main")));
    }

    #[test]
    fn test_job_validation() {
        assert!(
            Job::new("x", Vec::new()).validate().is_err(),
            "empty job must be rejected"
        );
        assert_eq!(
            Job::new("test", vec![Step::Build]).validate(),
            Err(ValidationError::BuildOutsideRelease {
                job: "test".to_string()
            })
        );
        assert!(
            Job::new("t", vec![Step::Run("true".to_string())])
                .with_timeout_minutes(0)
                .validate()
                .is_err()
        );
        assert!(
            Job::new("deploy", vec![Step::Build])
                .as_release()
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_runs_on_expands_matrix_values() {
        let mut job = Job::new("test", vec![Step::Env("py".to_string())]).with_matrix(
            MatrixConfig::new(vec![MatrixAxis::values("os", ["ubuntu-latest"])]),
        );
        job.runs_on = "${os}".to_string();
        let cell = &job.cells()[0];
        assert_eq!(job.runs_on_for(cell), "ubuntu-latest");
    }

    #[test]
    fn test_job_deserialize() {
        let yaml = r#"
name: deploy
needs: [lint, test]
if:
  tag: "v*"
release: true
timeout_minutes: 30
matrix:
  axes:
    - name: os
      values: [ubuntu-latest, macos-latest]
steps:
  - run: echo building
  - build
"#;
        let job: Job = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.needs, vec!["lint", "test"]);
        assert_eq!(job.condition, Some(RunCondition::tag("v*")));
        assert_eq!(
            job.steps,
            vec![Step::Run("echo building".to_string()), Step::Build]
        );
        assert_eq!(job.timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(job.cells().len(), 2);
        assert!(job.validate().is_ok());
    }
}
