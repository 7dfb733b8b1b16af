//! Job and cell state for one run

use super::JobError;
use crate::pipeline::{JobStatus, MatrixCell};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a job never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The job's `if` condition is false for the trigger
    ConditionFalse,
    /// A dependency failed or was skipped
    DependencyNotSucceeded {
        /// First such dependency, in declaration order
        dependency: String,
    },
    /// The job's matrix expanded to no cells
    EmptyMatrix,
    /// Every cell was cancelled before starting
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionFalse => write!(f, "condition is false"),
            Self::DependencyNotSucceeded { dependency } => {
                write!(f, "dependency '{dependency}' did not succeed")
            }
            Self::EmptyMatrix => write!(f, "matrix has no cells"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a [`CellExecutor`](super::CellExecutor) reports for one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellResult {
    /// Every step succeeded
    Succeeded,
    /// A step failed
    Failed {
        /// Exit code of the failing process, if there was one
        exit_code: Option<i32>,
        /// Output or error text shown to the user verbatim
        message: String,
    },
}

impl CellResult {
    /// Failure without a process exit code
    pub fn error(message: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            message: message.into(),
        }
    }
}

/// Final state of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellStatus {
    /// Every step succeeded
    Succeeded,
    /// A step failed
    Failed {
        /// Exit code of the failing process, if there was one
        exit_code: Option<i32>,
        /// Output or error text
        message: String,
    },
    /// The job timeout expired; counts as a failure
    TimedOut {
        /// The timeout that expired
        #[serde(with = "duration_secs")]
        after: Duration,
    },
    /// Never started because another cell of the job failed
    Cancelled,
}

impl CellStatus {
    /// Returns true for [`CellStatus::Succeeded`]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true for failed and timed out cells
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }

    /// Process exit code the failure maps to
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Succeeded | Self::Cancelled => None,
            Self::Failed { exit_code, .. } => Some(exit_code.unwrap_or(1)),
            Self::TimedOut { .. } => Some(1),
        }
    }
}

impl From<CellResult> for CellStatus {
    fn from(result: CellResult) -> Self {
        match result {
            CellResult::Succeeded => Self::Succeeded,
            CellResult::Failed { exit_code, message } => Self::Failed { exit_code, message },
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed {
                exit_code: Some(code),
                ..
            } => write!(f, "failed (exit {code})"),
            Self::Failed { exit_code: None, .. } => write!(f, "failed"),
            Self::TimedOut { after } => write!(f, "timed out after {}s", after.as_secs()),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Outcome of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellOutcome {
    /// The cell
    pub cell: MatrixCell,
    /// How it ended
    #[serde(flatten)]
    pub status: CellStatus,
    /// Wall time; zero for cancelled cells
    #[serde(skip)]
    pub duration: Duration,
}

impl CellOutcome {
    /// A cell that never started
    #[must_use]
    pub fn cancelled(cell: MatrixCell) -> Self {
        Self {
            cell,
            status: CellStatus::Cancelled,
            duration: Duration::ZERO,
        }
    }
}

/// Lifecycle of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    status: JobStatus,
    skip_reason: Option<SkipReason>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    /// A pending job
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            skip_reason: None,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Why the job was skipped
    #[must_use]
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        self.skip_reason.as_ref()
    }

    /// Moves to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_advance_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Moves to [`JobStatus::Skipped`] recording why
    pub fn skip(&mut self, reason: SkipReason) -> Result<(), JobError> {
        self.advance(JobStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }
}

/// Aggregate status of a job whose cells all ended
///
/// `None` means every cell succeeded and the job still has to pass its
/// finishing barrier.
#[must_use]
pub fn aggregate(outcomes: &[CellOutcome]) -> Option<(JobStatus, Option<SkipReason>)> {
    let failed = outcomes.iter().any(|o| o.status.is_failure());
    let cancelled = outcomes
        .iter()
        .filter(|o| o.status == CellStatus::Cancelled)
        .count();

    if failed {
        Some((JobStatus::Failed, None))
    } else if cancelled == 0 {
        None
    } else if cancelled == outcomes.len() {
        Some((JobStatus::Skipped, Some(SkipReason::Cancelled)))
    } else {
        Some((JobStatus::Failed, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: CellStatus) -> CellOutcome {
        CellOutcome {
            cell: MatrixCell::single(),
            status,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_job_state_transitions() {
        let mut state = JobState::new();
        state.advance(JobStatus::Ready).unwrap();
        state.advance(JobStatus::Running).unwrap();
        state.advance(JobStatus::Succeeded).unwrap();

        let err = state.advance(JobStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Succeeded,
                to: JobStatus::Running
            }
        ));
        assert_eq!(state.status(), JobStatus::Succeeded);
    }

    #[test]
    fn test_pending_cannot_jump_to_running() {
        let mut state = JobState::new();
        assert!(state.advance(JobStatus::Running).is_err());
        assert_eq!(state.status(), JobStatus::Pending);
    }

    #[test]
    fn test_skip_records_reason() {
        let mut state = JobState::new();
        state.skip(SkipReason::ConditionFalse).unwrap();
        assert_eq!(state.status(), JobStatus::Skipped);
        assert_eq!(state.skip_reason(), Some(&SkipReason::ConditionFalse));
        assert!(state.skip(SkipReason::Cancelled).is_err());
    }

    #[test]
    fn test_aggregate() {
        let ok = outcome(CellStatus::Succeeded);
        let failed = outcome(CellStatus::Failed {
            exit_code: Some(2),
            message: String::new(),
        });
        let timed_out = outcome(CellStatus::TimedOut {
            after: Duration::from_secs(60),
        });
        let cancelled = outcome(CellStatus::Cancelled);

        assert_eq!(aggregate(&[ok.clone(), ok.clone()]), None);
        assert_eq!(
            aggregate(&[ok.clone(), failed, cancelled.clone()]).map(|a| a.0),
            Some(JobStatus::Failed)
        );
        assert_eq!(aggregate(&[timed_out]).map(|a| a.0), Some(JobStatus::Failed));
        assert_eq!(
            aggregate(&[ok, cancelled.clone()]).map(|a| a.0),
            Some(JobStatus::Failed)
        );
        assert_eq!(
            aggregate(&[cancelled.clone(), cancelled]),
            Some((JobStatus::Skipped, Some(SkipReason::Cancelled)))
        );
    }

    #[test]
    fn test_cell_status_exit_code() {
        assert_eq!(CellStatus::Succeeded.exit_code(), None);
        assert_eq!(
            CellStatus::Failed {
                exit_code: None,
                message: "boom".to_string()
            }
            .exit_code(),
            Some(1)
        );
        assert_eq!(
            CellStatus::Failed {
                exit_code: Some(3),
                message: String::new()
            }
            .exit_code(),
            Some(3)
        );
    }
}
