//! Infrastructure layer
//!
//! Runtime settings, logging setup and run metrics.

mod config;
mod logging;
mod metrics;

pub use config::{LOG_ENV, MAX_PARALLEL_ENV, Settings, WORK_DIR_ENV};
pub use logging::{LogFormat, init_logging};
pub use metrics::{JobMetrics, MetricsCollector};
