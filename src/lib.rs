//! # Relayline - CI pipelines for Python-style projects
//!
//! Relayline reads one declarative pipeline file and drives a project
//! through continuous integration:
//!
//! - **Environments**: named, isolated command lists with their own
//!   dependencies and an allow-listed view of the invoking environment
//! - **Job graph**: jobs with dependencies, run conditions and matrices,
//!   executed concurrently in dependency order
//! - **Coverage**: per-cell fragments merged into one report, rendered as
//!   text and Cobertura XML
//! - **Release**: one binary artifact per platform and interpreter plus a
//!   source artifact, published idempotently to a package index
//!
//! ## Quick Start
//!
//! ```no_run
//! use relayline::engine::{Engine, LocalCellExecutor};
//! use relayline::executor::{BaseEnv, SystemLauncher};
//! use relayline::pipeline::{Pipeline, Trigger};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pipeline = Arc::new(Pipeline::load("relayline.yml".as_ref())?);
//! let trigger = Trigger::branch_push("main");
//! let executor = Arc::new(LocalCellExecutor::new(
//!     pipeline.clone(),
//!     Arc::new(SystemLauncher),
//!     BaseEnv::from_process(),
//!     trigger.clone(),
//! ));
//! let report = Engine::new(executor, &pipeline.settings)
//!     .run(&pipeline.graph, &trigger)
//!     .await;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <https://www.apache.org/licenses/LICENSE-2.0>)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <https://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod coverage;
pub mod engine;
pub mod executor;
pub mod infrastructure;
pub mod pipeline;
pub mod release;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use coverage::{Aggregator, CoverageConfig, CoverageError, CoverageReport};
pub use engine::{CellExecutor, Engine, JobError, LocalCellExecutor, RunReport};
pub use executor::{
    BaseEnv, EnvironmentRunner, ProcessLauncher, RunnerError, SystemLauncher, expand_variables,
};
pub use infrastructure::{MetricsCollector, Settings};
pub use pipeline::{
    ConfigError, Environment, Job, JobGraph, JobStatus, Pipeline, Step, Trigger, Validate,
};
pub use release::{ArtifactBuilder, BuildError, PublishError, Publisher, ReleaseConfig};

/// Version of the relayline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
