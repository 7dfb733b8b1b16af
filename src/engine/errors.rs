//! Engine errors

use crate::coverage::CoverageError;
use crate::executor::RunnerError;
use crate::pipeline::{JobStatus, ValidationError};
use crate::release::{BuildError, PublishError};
use thiserror::Error;

/// Failure of a job outside its cells' own commands
#[derive(Debug, Error)]
pub enum JobError {
    /// A state change the job lifecycle does not allow
    #[error("illegal job transition {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// The job builds artifacts but the pipeline has no release block
    #[error("job '{job}' builds artifacts but no release section is declared")]
    MissingRelease {
        /// Job name
        job: String,
    },

    /// A release was requested for a trigger that is not a tag push
    #[error("job '{job}' publishes releases only for tag pushes, not {git_ref}")]
    NotTagPush {
        /// Job name
        job: String,
        /// Reference of the trigger
        git_ref: String,
    },

    /// The finishing task panicked
    #[error("job task failed: {0}")]
    Panicked(String),

    /// Environment setup failed
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Coverage could not be combined or is below the threshold
    #[error(transparent)]
    Coverage(#[from] CoverageError),

    /// An artifact could not be built
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Publishing stopped before every artifact was confirmed
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Invalid configuration discovered at run time
    #[error(transparent)]
    Config(#[from] ValidationError),
}
