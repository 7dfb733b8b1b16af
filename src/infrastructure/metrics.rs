//! Metrics collection
//!
//! Per-job timings and cell counts, reported in the run summary.

use crate::pipeline::JobStatus;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Metrics for one job of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetrics {
    /// Job name
    pub job: String,

    /// Aggregate status
    pub status: JobStatus,

    /// Time from start of the first cell to the end of the job
    pub duration: Duration,

    /// Number of cells
    pub cells: usize,

    /// Cells that succeeded
    pub succeeded: usize,

    /// Cells that failed or timed out
    pub failed: usize,

    /// Cells that never started
    pub cancelled: usize,
}

/// Thread-safe collector shared by every task of a run
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<HashMap<String, JobMetrics>>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records metrics for a job, replacing earlier ones
    pub fn record(&self, metrics: JobMetrics) {
        self.metrics.write().insert(metrics.job.clone(), metrics);
    }

    /// Gets metrics for a specific job
    #[must_use]
    pub fn get(&self, job: &str) -> Option<JobMetrics> {
        self.metrics.read().get(job).cloned()
    }

    /// Gets all recorded metrics, sorted by job name
    #[must_use]
    pub fn get_all(&self) -> Vec<JobMetrics> {
        let mut all: Vec<JobMetrics> = self.metrics.read().values().cloned().collect();
        all.sort_by(|a, b| a.job.cmp(&b.job));
        all
    }

    /// Sum of all cell counts
    #[must_use]
    pub fn total_cells(&self) -> usize {
        self.metrics.read().values().map(|m| m.cells).sum()
    }
}
