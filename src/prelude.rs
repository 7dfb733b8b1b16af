//! Prelude module for common imports

// Pipeline definition
pub use crate::pipeline::{
    ConfigError, Environment, EventKind, GraphError, Job, JobGraph, JobStatus, MatrixAxis,
    MatrixCell, MatrixConfig, Pipeline, PipelineConfig, RunCondition, Step, Trigger, Validate,
    ValidationError,
};

// Execution
pub use crate::engine::{
    CellExecutor, CellOutcome, CellResult, CellStatus, Engine, JobError, LocalCellExecutor,
    RunReport, SkipReason,
};
pub use crate::executor::{
    BaseEnv, EnvironmentRunner, IsolationConfig, ProcessLauncher, SystemLauncher,
};

// Coverage and release
pub use crate::coverage::{Aggregator, CoverageConfig, CoverageFragment, CoverageReport};
pub use crate::release::{Artifact, ArtifactBuilder, Credential, Publisher, ReleaseConfig};

// Runtime
pub use crate::infrastructure::{MetricsCollector, Settings};
