//! Job graph execution
//!
//! The [`Engine`] walks a [`JobGraph`](crate::pipeline::JobGraph) in
//! dependency order. Every job is expanded into its matrix cells, cells run
//! concurrently up to the configured parallelism, and a job only starts once
//! all of its dependencies succeeded. The work done inside a cell is
//! delegated to a [`CellExecutor`]; [`LocalCellExecutor`] is the one used by
//! the command line.

mod errors;
mod local;
mod plan;
mod report;
mod scheduler;
mod state;

pub use errors::JobError;
pub use local::{CELL_VAR, JOB_VAR, JobNote, LocalCellExecutor};
pub use plan::{PlannedCell, PlannedJob, plan, render_plan};
pub use report::{JobReport, RunReport};
pub use scheduler::Engine;
pub use state::{CellOutcome, CellResult, CellStatus, JobState, SkipReason, aggregate};

use crate::pipeline::{Job, MatrixCell};
use async_trait::async_trait;

/// Runs the body of matrix cells
#[async_trait]
pub trait CellExecutor: Send + Sync {
    /// Runs every step of `job` for one cell
    async fn run_cell(&self, job: &Job, cell: &MatrixCell) -> CellResult;

    /// Called once after every cell of `job` succeeded
    ///
    /// An error fails the job.
    async fn finish_job(&self, _job: &Job, _cells: &[CellOutcome]) -> Result<(), JobError> {
        Ok(())
    }
}
