//! Coverage aggregation errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that make an aggregated report untrustworthy
///
/// All of them are fatal to aggregation: no partial report is produced.
#[derive(Error, Debug)]
pub enum CoverageError {
    /// A fragment or source file could not be read or written
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A fragment file is not valid
    #[error("Malformed coverage fragment '{}': {reason}", path.display())]
    Malformed {
        /// Fragment file
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Two fragments carry the same run identifier
    #[error("Coverage fragment for run '{0}' was already merged")]
    DuplicateFragment(String),

    /// Expected runs produced no fragment
    #[error("Missing coverage fragments for: {}", missing.join(", "))]
    MissingFragment {
        /// Run identifiers without a fragment
        missing: Vec<String>,
    },

    /// No fragments were found at all
    #[error("No coverage fragments found in '{}'", dir.display())]
    NoData {
        /// Fragment directory
        dir: PathBuf,
    },

    /// A recorded path matches no configured path group
    #[error("Path '{0}' does not match any configured path group")]
    UnmappedPath(String),

    /// A measured file is absent from the source root
    #[error("Source file '{}' not found", path.display())]
    MissingSource {
        /// Expected location
        path: PathBuf,
    },

    /// Total coverage is below `fail_under`
    #[error("Total coverage {total:.2}% is below the required {required:.2}%")]
    BelowThreshold {
        /// Measured percentage
        total: f64,
        /// Configured minimum
        required: f64,
    },

    /// The XML report could not be rendered
    #[error("Cannot render coverage XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The configuration is invalid
    #[error(transparent)]
    Config(#[from] crate::pipeline::ValidationError),
}

impl CoverageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
