//! Job graph scheduler
//!
//! Single coordinating loop: jobs are dispatched once every dependency is
//! terminal, their cells are spawned onto a [`JoinSet`] and bounded by a
//! semaphore, and completions flow back through the same set. All job state
//! lives in the loop, so no locks are needed around it.

use super::report::{JobReport, RunReport};
use super::state::{CellOutcome, CellResult, CellStatus, JobState, SkipReason, aggregate};
use super::{CellExecutor, JobError};
use crate::infrastructure::{JobMetrics, MetricsCollector, Settings};
use crate::pipeline::{Job, JobGraph, JobStatus, MatrixCell, Trigger};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

enum Event {
    Cell {
        job: String,
        index: usize,
        outcome: CellOutcome,
    },
    Finished {
        job: String,
        result: Result<(), JobError>,
    },
}

struct RunningJob {
    outcomes: Vec<Option<CellOutcome>>,
    remaining: usize,
    cancel: Arc<AtomicBool>,
    started: Instant,
}

impl RunningJob {
    fn cells(&self) -> Vec<CellOutcome> {
        self.outcomes.iter().flatten().cloned().collect()
    }
}

struct CellTask {
    executor: Arc<dyn CellExecutor>,
    semaphore: Arc<Semaphore>,
    job: Arc<Job>,
    cell: MatrixCell,
    cancel: Arc<AtomicBool>,
    fail_fast: bool,
    timeout: Option<Duration>,
}

/// Executes job graphs
#[derive(Clone)]
pub struct Engine {
    executor: Arc<dyn CellExecutor>,
    max_parallel: usize,
    fail_fast: bool,
    default_timeout: Option<Duration>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("max_parallel", &self.max_parallel)
            .field("fail_fast", &self.fail_fast)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine configured from `settings`
    pub fn new(executor: Arc<dyn CellExecutor>, settings: &Settings) -> Self {
        Self {
            executor,
            max_parallel: settings.parallelism(),
            fail_fast: settings.fail_fast,
            default_timeout: (settings.default_timeout_minutes > 0)
                .then(|| Duration::from_secs(settings.default_timeout_minutes * 60)),
            metrics: MetricsCollector::new(),
        }
    }

    /// Overrides the cell timeout used for jobs without their own
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Metrics recorded by the runs of this engine
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Runs every job of `graph` for `trigger`
    #[tracing::instrument(skip_all, fields(trigger = %trigger, jobs = graph.len()))]
    pub async fn run(&self, graph: &JobGraph, trigger: &Trigger) -> RunReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut states: HashMap<String, JobState> = graph
            .topological_order()
            .iter()
            .map(|name| (name.clone(), JobState::new()))
            .collect();
        let mut running: HashMap<String, RunningJob> = HashMap::new();
        let mut reports: HashMap<String, JobReport> = HashMap::new();
        let mut tasks: JoinSet<Event> = JoinSet::new();

        tracing::info!(max_parallel = self.max_parallel, "Starting run");

        loop {
            self.dispatch(
                graph,
                trigger,
                &semaphore,
                &mut states,
                &mut running,
                &mut reports,
                &mut tasks,
            );

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let event = match joined {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Engine task aborted");
                    continue;
                }
            };

            match event {
                Event::Cell { job, index, outcome } => {
                    let Some(run) = running.get_mut(&job) else {
                        continue;
                    };
                    run.outcomes[index] = Some(outcome);
                    run.remaining -= 1;
                    if run.remaining > 0 {
                        continue;
                    }

                    let cells = run.cells();
                    if let Some((status, reason)) = aggregate(&cells) {
                        if let Some(run) = running.remove(&job) {
                            self.complete(
                                &job,
                                run,
                                status,
                                reason,
                                None,
                                &mut states,
                                &mut reports,
                            );
                        }
                    } else if let Some(job_def) = graph.job(&job) {
                        let executor = Arc::clone(&self.executor);
                        let job_def = Arc::clone(job_def);
                        tracing::debug!(job = %job, "All cells succeeded, finishing job");
                        tasks.spawn(async move {
                            let name = job_def.name.clone();
                            let handle = tokio::spawn(async move {
                                executor.finish_job(&job_def, &cells).await
                            });
                            let result = handle
                                .await
                                .unwrap_or_else(|e| Err(JobError::Panicked(e.to_string())));
                            Event::Finished { job: name, result }
                        });
                    }
                }
                Event::Finished { job, result } => {
                    let Some(run) = running.remove(&job) else {
                        continue;
                    };
                    match result {
                        Ok(()) => {
                            self.complete(
                                &job,
                                run,
                                JobStatus::Succeeded,
                                None,
                                None,
                                &mut states,
                                &mut reports,
                            );
                        }
                        Err(e) => {
                            tracing::error!(job = %job, error = %e, "Job failed while finishing");
                            let error = Some(e.to_string());
                            self.complete(
                                &job,
                                run,
                                JobStatus::Failed,
                                None,
                                error,
                                &mut states,
                                &mut reports,
                            );
                        }
                    }
                }
            }
        }

        let jobs = graph
            .topological_order()
            .iter()
            .map(|name| {
                reports.remove(name).unwrap_or_else(|| JobReport {
                    name: name.clone(),
                    status: JobStatus::Failed,
                    skip_reason: None,
                    cells: Vec::new(),
                    error: Some("job did not complete".to_string()),
                    duration: Duration::ZERO,
                })
            })
            .collect();

        let report = RunReport {
            trigger: trigger.clone(),
            jobs,
            duration: start.elapsed(),
        };
        tracing::info!(
            success = report.is_success(),
            duration_ms = report.duration.as_millis(),
            "Run finished"
        );
        report
    }

    /// Resolves every pending job whose dependencies are terminal
    ///
    /// Jobs are visited in topological order, so a skip propagates through
    /// a whole chain of dependents in one pass.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        graph: &JobGraph,
        trigger: &Trigger,
        semaphore: &Arc<Semaphore>,
        states: &mut HashMap<String, JobState>,
        running: &mut HashMap<String, RunningJob>,
        reports: &mut HashMap<String, JobReport>,
        tasks: &mut JoinSet<Event>,
    ) {
        for name in graph.topological_order() {
            let Some(job) = graph.job(name) else {
                continue;
            };
            if states.get(name).map(JobState::status) != Some(JobStatus::Pending) {
                continue;
            }

            let mut blocked = false;
            let mut failed_dependency = None;
            for dep in graph.dependencies(name) {
                match states.get(dep).map(JobState::status) {
                    Some(JobStatus::Succeeded) => {}
                    Some(status) if status.is_terminal() => {
                        failed_dependency.get_or_insert_with(|| dep.clone());
                    }
                    _ => blocked = true,
                }
            }
            if blocked {
                continue;
            }

            let cells = job.cells();
            let skip = if let Some(dependency) = failed_dependency {
                Some(SkipReason::DependencyNotSucceeded { dependency })
            } else if !job.should_run(trigger) {
                Some(SkipReason::ConditionFalse)
            } else if cells.is_empty() {
                Some(SkipReason::EmptyMatrix)
            } else {
                None
            };

            let Some(state) = states.get_mut(name) else {
                continue;
            };
            if let Some(reason) = skip {
                tracing::info!(job = %name, reason = %reason, "Skipping job");
                if state.skip(reason.clone()).is_ok() {
                    self.metrics.record(JobMetrics {
                        job: name.clone(),
                        status: JobStatus::Skipped,
                        duration: Duration::ZERO,
                        cells: 0,
                        succeeded: 0,
                        failed: 0,
                        cancelled: 0,
                    });
                    reports.insert(name.clone(), JobReport::skipped(name, reason));
                }
                continue;
            }

            if let Err(e) = state
                .advance(JobStatus::Ready)
                .and_then(|()| state.advance(JobStatus::Running))
            {
                tracing::error!(job = %name, error = %e, "Cannot start job");
                continue;
            }

            tracing::info!(job = %name, cells = cells.len(), "Starting job");
            let cancel = Arc::new(AtomicBool::new(false));
            let timeout = job.timeout().or(self.default_timeout);
            running.insert(
                name.clone(),
                RunningJob {
                    outcomes: vec![None; cells.len()],
                    remaining: cells.len(),
                    cancel: Arc::clone(&cancel),
                    started: Instant::now(),
                },
            );

            for (index, cell) in cells.into_iter().enumerate() {
                let task = CellTask {
                    executor: Arc::clone(&self.executor),
                    semaphore: Arc::clone(semaphore),
                    job: Arc::clone(job),
                    cell,
                    cancel: Arc::clone(&cancel),
                    fail_fast: self.fail_fast,
                    timeout,
                };
                let job = name.clone();
                tasks.spawn(async move {
                    let outcome = task.execute().await;
                    Event::Cell { job, index, outcome }
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        name: &str,
        run: RunningJob,
        status: JobStatus,
        skip_reason: Option<SkipReason>,
        error: Option<String>,
        states: &mut HashMap<String, JobState>,
        reports: &mut HashMap<String, JobReport>,
    ) {
        let cells = run.cells();
        let duration = run.started.elapsed();

        if let Some(state) = states.get_mut(name) {
            let advanced = match skip_reason.clone() {
                Some(reason) => state.skip(reason),
                None => state.advance(status),
            };
            if let Err(e) = advanced {
                tracing::error!(job = %name, error = %e, "Invalid job completion");
            }
        }

        let succeeded = cells.iter().filter(|c| c.status.is_success()).count();
        let failed = cells.iter().filter(|c| c.status.is_failure()).count();
        let cancelled = cells.len() - succeeded - failed;
        self.metrics.record(JobMetrics {
            job: name.to_string(),
            status,
            duration,
            cells: cells.len(),
            succeeded,
            failed,
            cancelled,
        });

        if status.is_failure() {
            tracing::warn!(job = %name, failed, cancelled, "Job failed");
        } else {
            tracing::info!(
                job = %name,
                status = %status,
                duration_ms = duration.as_millis(),
                "Job finished"
            );
        }

        reports.insert(
            name.to_string(),
            JobReport {
                name: name.to_string(),
                status,
                skip_reason,
                cells,
                error,
                duration,
            },
        );
    }
}

impl CellTask {
    async fn execute(self) -> CellOutcome {
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return CellOutcome::cancelled(self.cell);
        };
        if self.cancel.load(Ordering::SeqCst) {
            tracing::debug!(job = %self.job.name, cell = %self.cell.name, "Cancelled before start");
            return CellOutcome::cancelled(self.cell);
        }

        let start = Instant::now();
        tracing::info!(job = %self.job.name, cell = %self.cell.name, "Starting cell");

        let handle = {
            let executor = Arc::clone(&self.executor);
            let job = Arc::clone(&self.job);
            let cell = self.cell.clone();
            tokio::spawn(async move { executor.run_cell(&job, &cell).await })
        };

        // On timeout the handle is dropped, which detaches the task; the
        // process it launched keeps running.
        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined_status(joined),
                Err(_) => {
                    tracing::warn!(
                        job = %self.job.name,
                        cell = %self.cell.name,
                        timeout_s = limit.as_secs(),
                        "Cell timed out"
                    );
                    CellStatus::TimedOut { after: limit }
                }
            },
            None => joined_status(handle.await),
        };

        if status.is_failure() {
            tracing::warn!(
                job = %self.job.name,
                cell = %self.cell.name,
                status = %status,
                "Cell failed"
            );
            if self.fail_fast {
                self.cancel.store(true, Ordering::SeqCst);
            }
        } else {
            tracing::info!(job = %self.job.name, cell = %self.cell.name, "Cell succeeded");
        }

        CellOutcome {
            cell: self.cell,
            status,
            duration: start.elapsed(),
        }
    }
}

fn joined_status(joined: Result<CellResult, JoinError>) -> CellStatus {
    match joined {
        Ok(result) => result.into(),
        Err(e) => CellStatus::Failed {
            exit_code: None,
            message: format!("cell task failed: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MatrixAxis, MatrixConfig, RunCondition, Step};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Fails cells whose `<job>/<cell>` key is listed
    #[derive(Default)]
    struct FakeExecutor {
        failing: HashMap<String, i32>,
        slow: Option<(String, Duration)>,
        ran: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
        finish_error: Option<String>,
    }

    impl FakeExecutor {
        fn failing(mut self, key: &str, code: i32) -> Self {
            self.failing.insert(key.to_string(), code);
            self
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().clone()
        }
    }

    #[async_trait]
    impl CellExecutor for FakeExecutor {
        async fn run_cell(&self, job: &Job, cell: &MatrixCell) -> CellResult {
            let key = format!("{}/{}", job.name, cell.name);
            self.ran.lock().push(key.clone());
            if let Some((ref slow, delay)) = self.slow
                && *slow == key
            {
                tokio::time::sleep(delay).await;
            }
            match self.failing.get(&key) {
                Some(&code) => CellResult::Failed {
                    exit_code: Some(code),
                    message: format!("{key} failed"),
                },
                None => CellResult::Succeeded,
            }
        }

        async fn finish_job(&self, job: &Job, _cells: &[CellOutcome]) -> Result<(), JobError> {
            self.finished.lock().push(job.name.clone());
            match (&self.finish_error, job.name.as_str()) {
                (Some(error), "test") => Err(JobError::Panicked(error.clone())),
                _ => Ok(()),
            }
        }
    }

    fn settings(max_parallel: usize, fail_fast: bool) -> Settings {
        Settings {
            max_parallel,
            fail_fast,
            ..Settings::default()
        }
    }

    fn step() -> Vec<Step> {
        vec![Step::Run("true".to_string())]
    }

    fn python_matrix() -> MatrixConfig {
        MatrixConfig::new(vec![MatrixAxis::values("python", ["3.8", "3.9", "3.10"])])
    }

    fn ci_graph() -> JobGraph {
        JobGraph::new(vec![
            Job::new("lint", step()),
            Job::new("test", step()).with_matrix(python_matrix()),
            Job::new("coverage", step()).needs("test").with_coverage(),
            Job::new("deploy", vec![Step::Build])
                .as_release()
                .needs("lint")
                .needs("test")
                .when(RunCondition::tag("v*")),
        ])
        .unwrap()
    }

    async fn run(
        executor: FakeExecutor,
        settings: &Settings,
        trigger: &Trigger,
    ) -> (RunReport, Arc<FakeExecutor>) {
        let executor = Arc::new(executor);
        let engine = Engine::new(executor.clone(), settings);
        (engine.run(&ci_graph(), trigger).await, executor)
    }

    #[tokio::test]
    async fn test_all_jobs_succeed_on_tag_push() {
        let (report, executor) = run(
            FakeExecutor::default(),
            &settings(4, true),
            &Trigger::tag_push("v1.2.0"),
        )
        .await;

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        for job in &report.jobs {
            assert_eq!(job.status, JobStatus::Succeeded, "{}", job.name);
        }
        assert_eq!(report.job("test").unwrap().cells.len(), 3);
        assert_eq!(executor.ran().len(), 6);

        let finished = executor.finished.lock().clone();
        assert_eq!(finished.len(), 4);
    }

    #[tokio::test]
    async fn test_deploy_skipped_on_branch_push() {
        let (report, executor) = run(
            FakeExecutor::default(),
            &settings(4, true),
            &Trigger::branch_push("main"),
        )
        .await;

        let deploy = report.job("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Skipped);
        assert_eq!(deploy.skip_reason, Some(SkipReason::ConditionFalse));
        assert!(deploy.cells.is_empty());
        assert!(!executor.ran().iter().any(|k| k.starts_with("deploy/")));
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failed_cell_fails_job_and_skips_dependents() {
        let executor = FakeExecutor::default().failing("test/python=3.9", 2);
        let (report, executor) =
            run(executor, &settings(4, false), &Trigger::tag_push("v1.0")).await;

        let test = report.job("test").unwrap();
        assert_eq!(test.status, JobStatus::Failed);
        let succeeded: Vec<&str> = test
            .cells
            .iter()
            .filter(|c| c.status.is_success())
            .map(|c| c.cell.name.as_str())
            .collect();
        assert_eq!(succeeded, vec!["python=3.8", "python=3.10"]);

        for name in ["coverage", "deploy"] {
            let job = report.job(name).unwrap();
            assert_eq!(job.status, JobStatus::Skipped);
            assert_eq!(
                job.skip_reason,
                Some(SkipReason::DependencyNotSucceeded {
                    dependency: "test".to_string()
                })
            );
        }
        assert_eq!(report.job("lint").unwrap().status, JobStatus::Succeeded);
        assert_eq!(report.exit_code(), 2);
        assert!(!executor.finished.lock().contains(&"test".to_string()));
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_unstarted_cells() {
        let executor = FakeExecutor::default().failing("test/python=3.8", 1);
        let (report, executor) =
            run(executor, &settings(1, true), &Trigger::branch_push("main")).await;

        let test = report.job("test").unwrap();
        assert_eq!(test.status, JobStatus::Failed);
        let statuses: Vec<&CellStatus> = test.cells.iter().map(|c| &c.status).collect();
        assert!(statuses[0].is_failure());
        assert_eq!(statuses[1], &CellStatus::Cancelled);
        assert_eq!(statuses[2], &CellStatus::Cancelled);
        assert!(!executor.ran().contains(&"test/python=3.9".to_string()));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let executor = FakeExecutor {
            slow: Some(("lint/default".to_string(), Duration::from_secs(30))),
            ..FakeExecutor::default()
        };
        let executor = Arc::new(executor);
        let engine = Engine::new(executor.clone(), &settings(4, true))
            .with_default_timeout(Some(Duration::from_millis(50)));
        let report = engine.run(&ci_graph(), &Trigger::branch_push("main")).await;

        let lint = report.job("lint").unwrap();
        assert_eq!(lint.status, JobStatus::Failed);
        assert!(matches!(lint.cells[0].status, CellStatus::TimedOut { .. }));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.job("test").unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_finish_error_fails_job() {
        let executor = FakeExecutor {
            finish_error: Some("coverage below threshold".to_string()),
            ..FakeExecutor::default()
        };
        let (report, _) = run(executor, &settings(2, true), &Trigger::branch_push("main")).await;

        let test = report.job("test").unwrap();
        assert_eq!(test.status, JobStatus::Failed);
        assert!(test.cells.iter().all(|c| c.status.is_success()));
        assert!(test.error.as_deref().unwrap().contains("coverage below threshold"));
        assert_eq!(report.job("coverage").unwrap().status, JobStatus::Skipped);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_engine_records_metrics() {
        let executor = Arc::new(FakeExecutor::default());
        let engine = Engine::new(executor, &settings(4, true));
        let _ = engine.run(&ci_graph(), &Trigger::branch_push("main")).await;

        let test = engine.metrics().get("test").unwrap();
        assert_eq!((test.cells, test.succeeded), (3, 3));
        assert_eq!(engine.metrics().get("deploy").unwrap().status, JobStatus::Skipped);
        assert_eq!(engine.metrics().total_cells(), 5);
    }

    #[tokio::test]
    async fn test_jobs_reported_in_topological_order() {
        let (report, _) = run(
            FakeExecutor::default(),
            &settings(4, true),
            &Trigger::branch_push("main"),
        )
        .await;
        let names: Vec<&str> = report.jobs.iter().map(|j| j.name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("test") < pos("coverage"));
        assert!(pos("lint") < pos("deploy"));
        assert!(pos("test") < pos("deploy"));
    }
}
