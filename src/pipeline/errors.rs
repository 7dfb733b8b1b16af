//! Error types for pipeline domain

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a pipeline definition
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The pipeline file could not be read
    #[error("Failed to read pipeline file '{}': {source}", path.display())]
    Io {
        /// Path of the pipeline file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The pipeline file is not valid YAML for the expected schema
    #[error("Failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The definition parsed but is semantically invalid
    #[error("Invalid pipeline definition: {0}")]
    Validation(#[from] ValidationError),

    /// The job graph is malformed
    #[error("Invalid job graph: {0}")]
    Graph(#[from] GraphError),
}

/// Validation errors for pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Two environments share a name
    #[error("Environment '{0}' is declared more than once")]
    DuplicateEnvironment(String),

    /// Environment must have at least one command
    #[error("Environment '{env}' must have at least one command")]
    EmptyEnvironment {
        /// Name of the empty environment.
        env: String,
    },

    /// A command line could not be split into words
    #[error("Invalid command in '{owner}': '{command}' ({reason})")]
    InvalidCommand {
        /// Environment or job owning the command.
        owner: String,
        /// The offending command line.
        command: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A job references an environment that is not declared
    #[error("Job '{job}' references unknown environment '{env}'")]
    UnknownEnvironment {
        /// Referencing job.
        job: String,
        /// Missing environment name.
        env: String,
    },

    /// Job must have at least one step
    #[error("Job '{job}' must have at least one step")]
    EmptyJob {
        /// Name of the empty job.
        job: String,
    },

    /// Matrix declaration is unusable
    #[error("Invalid matrix: {reason}")]
    InvalidMatrix {
        /// Explanation of the problem.
        reason: String,
    },

    /// Invalid timeout value
    #[error("Invalid timeout: must be positive, got {value}")]
    InvalidTimeout {
        /// The invalid timeout value.
        value: u64,
    },

    /// A glob or regex pattern failed to compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A `build` step appears outside the release job
    #[error("Job '{job}' has a build step but is not a release job")]
    BuildOutsideRelease {
        /// Offending job.
        job: String,
    },

    /// Release configuration is missing or inconsistent
    #[error("Invalid release configuration: {0}")]
    InvalidRelease(String),

    /// Coverage configuration is inconsistent
    #[error("Invalid coverage configuration: {0}")]
    InvalidCoverage(String),
}

/// Structural errors in the job dependency graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two jobs share an identifier
    #[error("Job '{0}' is declared more than once")]
    DuplicateJob(String),

    /// A `needs` entry names a job that does not exist
    #[error("Job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency {
        /// Job declaring the edge.
        job: String,
        /// Missing dependency.
        dependency: String,
    },

    /// The `needs` relation contains a cycle
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle {
        /// Jobs forming the cycle, first job repeated at the end.
        cycle: Vec<String>,
    },
}
