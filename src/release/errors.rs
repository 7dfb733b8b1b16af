//! Release errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors producing release artifacts; any of them is fatal to the deploy
#[derive(Error, Debug)]
pub enum BuildError {
    /// No version configured and the trigger is not a tag push
    #[error("Release version is not configured and cannot be derived from '{git_ref}'")]
    MissingVersion {
        /// The trigger's ref
        git_ref: String,
    },

    /// The cell has no value for an axis the release needs
    #[error("Matrix cell '{cell}' has no '{axis}' axis")]
    MissingAxis {
        /// Cell name
        cell: String,
        /// Axis name
        axis: String,
    },

    /// A platform value has no platform tag
    #[error("Platform '{value}' has no platform tag in the release configuration")]
    UnmappedPlatform {
        /// Matrix value
        value: String,
    },

    /// An interpreter value cannot be turned into a tag
    #[error("Cannot derive an interpreter tag from '{value}'")]
    UnmappedInterpreter {
        /// Matrix value
        value: String,
    },

    /// The build command line is unusable
    #[error("Invalid build command '{command}': {reason}")]
    InvalidCommand {
        /// The template
        command: String,
        /// What went wrong
        reason: String,
    },

    /// The build command exited non-zero
    #[error("Building {artifact} failed with exit code {exit_code}")]
    CommandFailed {
        /// Artifact file name
        artifact: String,
        /// Exit code
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The build command succeeded but did not produce the artifact
    #[error("Build succeeded but '{}' was not produced", path.display())]
    MissingOutput {
        /// Expected artifact path
        path: PathBuf,
    },

    /// Some cells have no artifact; nothing is published
    #[error("Release is incomplete, missing artifacts: {}", missing.join(", "))]
    Incomplete {
        /// File names of missing artifacts
        missing: Vec<String>,
    },

    /// Reading an artifact failed
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors publishing artifacts
#[derive(Error, Debug)]
pub enum PublishError {
    /// The credential variable is unset or empty
    #[error("Publish credential variable '{var}' is not set")]
    MissingCredential {
        /// Variable name
        var: String,
    },

    /// No index is configured
    #[error("No package index is configured")]
    NoIndex,

    /// The index client could not be constructed
    #[error("Invalid package index: {0}")]
    InvalidIndex(String),

    /// Publishing stopped with artifacts still unconfirmed
    #[error("Publishing {failed} failed: {reason}; not published: {}", pending.join(", "))]
    Incomplete {
        /// Artifact that failed
        failed: String,
        /// Why it failed
        reason: String,
        /// Every artifact not confirmed, including the failed one
        pending: Vec<String>,
    },
}
