//! Run results

use super::state::{CellOutcome, SkipReason};
use crate::pipeline::{JobStatus, Trigger};
use std::fmt::Write as _;
use std::time::Duration;

/// Result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Job name
    pub name: String,
    /// Aggregate status; always terminal
    pub status: JobStatus,
    /// Set when the job was skipped
    pub skip_reason: Option<SkipReason>,
    /// Outcome of every cell, in matrix order; empty for skipped jobs
    pub cells: Vec<CellOutcome>,
    /// Error raised while finishing the job
    pub error: Option<String>,
    /// Wall time from dispatch to completion
    pub duration: Duration,
}

impl JobReport {
    pub(crate) fn skipped(name: &str, reason: SkipReason) -> Self {
        Self {
            name: name.to_string(),
            status: JobStatus::Skipped,
            skip_reason: Some(reason),
            cells: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Cells that failed or timed out
    pub fn failed_cells(&self) -> impl Iterator<Item = &CellOutcome> {
        self.cells.iter().filter(|c| c.status.is_failure())
    }

    /// Exit code this job contributes; `None` unless it failed
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        if !self.status.is_failure() {
            return None;
        }
        Some(
            self.failed_cells()
                .find_map(|c| c.status.exit_code())
                .unwrap_or(1),
        )
    }

    fn count(&self, pred: impl Fn(&CellOutcome) -> bool) -> usize {
        self.cells.iter().filter(|c| pred(c)).count()
    }
}

/// Result of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// What the run was started for
    pub trigger: Trigger,
    /// Every job, in topological order
    pub jobs: Vec<JobReport>,
    /// Wall time of the run
    pub duration: Duration,
}

impl RunReport {
    /// Looks up a job
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Returns true when no job failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.jobs.iter().any(|j| j.status.is_failure())
    }

    /// Process exit code: 0, or the code of the first failure
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.jobs
            .iter()
            .find_map(JobReport::exit_code)
            .unwrap_or(0)
    }

    /// The first failed cell of the run, if any
    #[must_use]
    pub fn first_failure(&self) -> Option<(&JobReport, &CellOutcome)> {
        self.jobs
            .iter()
            .find_map(|j| j.failed_cells().next().map(|c| (j, c)))
    }

    /// Human readable summary listing every job and failed cell
    #[must_use]
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run summary ({}, {:.1}s)",
            self.trigger,
            self.duration.as_secs_f64()
        );

        for job in &self.jobs {
            match job.status {
                JobStatus::Skipped => {
                    let reason = job
                        .skip_reason
                        .as_ref()
                        .map_or_else(String::new, |r| format!(": {r}"));
                    let _ = writeln!(out, "  {:<9}  {}{reason}", job.status, job.name);
                }
                _ => {
                    let ok = job.count(|c| c.status.is_success());
                    let _ = writeln!(
                        out,
                        "  {:<9}  {} ({ok}/{} cells, {:.1}s)",
                        job.status,
                        job.name,
                        job.cells.len(),
                        job.duration.as_secs_f64()
                    );
                }
            }
            for cell in job.cells.iter().filter(|c| !c.status.is_success()) {
                let _ = writeln!(out, "             - {}: {}", cell.cell.name, cell.status);
            }
            if let Some(ref error) = job.error {
                let _ = writeln!(out, "             - {error}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CellStatus;
    use crate::pipeline::MatrixCell;

    fn cell(name: &str, status: CellStatus) -> CellOutcome {
        CellOutcome {
            cell: MatrixCell {
                name: name.to_string(),
                ..MatrixCell::single()
            },
            status,
            duration: Duration::from_millis(10),
        }
    }

    fn job(name: &str, status: JobStatus, cells: Vec<CellOutcome>) -> JobReport {
        JobReport {
            name: name.to_string(),
            status,
            skip_reason: None,
            cells,
            error: None,
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_exit_code_is_first_failure_in_order() {
        let report = RunReport {
            trigger: Trigger::branch_push("main"),
            jobs: vec![
                job("lint", JobStatus::Succeeded, vec![cell("default", CellStatus::Succeeded)]),
                job(
                    "test",
                    JobStatus::Failed,
                    vec![
                        cell("py38", CellStatus::Succeeded),
                        cell(
                            "py39",
                            CellStatus::Failed {
                                exit_code: Some(4),
                                message: "E".to_string(),
                            },
                        ),
                    ],
                ),
                JobReport::skipped(
                    "deploy",
                    SkipReason::DependencyNotSucceeded {
                        dependency: "test".to_string(),
                    },
                ),
            ],
            duration: Duration::from_secs(3),
        };

        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 4);
        let (job, failed) = report.first_failure().unwrap();
        assert_eq!((job.name.as_str(), failed.cell.name.as_str()), ("test", "py39"));

        let summary = report.render_summary();
        assert!(summary.contains("py39: failed (exit 4)"));
        assert!(summary.contains("deploy: dependency 'test' did not succeed"));
    }

    #[test]
    fn test_finish_error_exits_with_one() {
        let mut failed = job(
            "coverage",
            JobStatus::Failed,
            vec![cell("default", CellStatus::Succeeded)],
        );
        failed.error = Some("coverage below threshold".to_string());
        assert_eq!(failed.exit_code(), Some(1));

        let report = RunReport {
            trigger: Trigger::branch_push("main"),
            jobs: vec![failed],
            duration: Duration::ZERO,
        };
        assert_eq!(report.exit_code(), 1);
        assert!(report.first_failure().is_none());
    }
}
