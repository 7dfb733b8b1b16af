//! `relayline ci` - Run the job graph
//!
//! ```bash
//! relayline ci --event push --ref refs/tags/v1.2.0
//! relayline ci --dry-run
//! ```
//!
//! On GitHub Actions the event and ref default to `GITHUB_EVENT_NAME` and
//! `GITHUB_REF`.

use anyhow::Result;
use relayline::engine::{CellStatus, Engine, LocalCellExecutor, plan, render_plan};
use relayline::executor::{BaseEnv, SystemLauncher};
use relayline::pipeline::{Pipeline, Trigger};
use std::sync::Arc;

/// Renders the plan for `trigger`
pub fn dry_run(pipeline: &Pipeline, trigger: &Trigger) -> String {
    format!(
        "Plan for {trigger}\n{}",
        render_plan(&plan(&pipeline.graph, trigger))
    )
}

/// Runs the pipeline and returns the exit code
pub async fn run_pipeline(pipeline: Pipeline, trigger: Trigger) -> Result<i32> {
    let pipeline = Arc::new(pipeline);
    let executor = Arc::new(LocalCellExecutor::new(
        Arc::clone(&pipeline),
        Arc::new(SystemLauncher),
        BaseEnv::from_process(),
        trigger.clone(),
    ));
    let engine = Engine::new(executor.clone(), &pipeline.settings);
    let report = engine.run(&pipeline.graph, &trigger).await;

    if let Some((job, cell)) = report.first_failure() {
        eprintln!("First failure: {} / {}", job.name, cell.cell.name);
        if let CellStatus::Failed { ref message, .. } = cell.status {
            eprint!("{message}");
            if !message.ends_with('\n') {
                eprintln!();
            }
        }
    }

    for note in executor.notes() {
        println!("[{}]\n{}", note.job, note.text.trim_end());
    }
    eprint!("{}", report.render_summary());

    let metrics = engine.metrics();
    for job in metrics.get_all() {
        tracing::debug!(
            job = %job.job,
            status = %job.status,
            duration_ms = job.duration.as_millis(),
            succeeded = job.succeeded,
            failed = job.failed,
            cancelled = job.cancelled,
            "Job metrics"
        );
    }
    tracing::info!(cells = metrics.total_cells(), "Cells executed");

    Ok(report.exit_code())
}
