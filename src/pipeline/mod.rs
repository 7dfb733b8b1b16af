//! Pipeline domain types and logic
//!
//! Environments, jobs, matrices, run conditions and the job graph. These
//! types are plain data: loading a pipeline file produces an immutable
//! [`Pipeline`] that the executor and engine read from.

pub mod environment;
pub mod errors;
pub mod glob;
pub mod graph;
pub mod job;
pub mod matrix;
pub mod pipeline_def;
pub mod registry;
pub mod trigger;
pub mod types;

pub use environment::Environment;
pub use errors::{ConfigError, GraphError, ValidationError};
pub use glob::Glob;
pub use graph::JobGraph;
pub use job::{Job, Step};
pub use matrix::{MatrixAxis, MatrixCell, MatrixConfig};
pub use pipeline_def::{DEFAULT_PIPELINE_FILE, Pipeline, PipelineConfig};
pub use registry::EnvironmentRegistry;
pub use trigger::{EventKind, RunCondition, Trigger};
pub use types::{JobStatus, Validate};
