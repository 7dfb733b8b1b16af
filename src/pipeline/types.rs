//! Core types for pipeline domain
//!
//! This module contains the status vocabulary shared by jobs and
//! environment runs.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting on dependencies
    Pending,
    /// All dependencies succeeded, not yet dispatched
    Ready,
    /// Matrix cells are executing
    Running,
    /// Every cell succeeded
    Succeeded,
    /// At least one cell failed
    Failed,
    /// Never ran (condition false, dependency not succeeded, or cancelled)
    Skipped,
}

impl JobStatus {
    /// Returns true if no further transition is possible
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if status is succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if status is failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if status is skipped
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Returns true if `next` is a legal successor of this status
    #[must_use]
    pub fn can_advance_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready | Self::Skipped)
                | (Self::Ready, Self::Running | Self::Skipped)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Skipped)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}

/// Checks that a job or environment identifier is usable
///
/// Identifiers end up in directory names and fragment file names, so they
/// are limited to ASCII alphanumerics, `-`, `_` and `.`.
pub fn validate_identifier(name: &str) -> Result<(), super::ValidationError> {
    use super::ValidationError;

    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > 100 {
        return Err(ValidationError::NameTooLong {
            max: 100,
            len: name.len(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || name.starts_with('.')
    {
        return Err(ValidationError::InvalidNameChars {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ValidationError;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Ready.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Ready));
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Skipped));
        assert!(JobStatus::Ready.can_advance_to(JobStatus::Running));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Succeeded.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Succeeded));
        assert!(!JobStatus::Skipped.can_advance_to(JobStatus::Ready));
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(JobStatus::Skipped.to_string(), "SKIPPED");
    }

    #[test]
    fn test_job_status_serialize() {
        let json = serde_json::to_string(&JobStatus::Failed).unwrap();
        assert_eq!(json, r#""failed""#);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("py38").is_ok());
        assert!(validate_identifier("type-check").is_ok());
        assert_eq!(validate_identifier(""), Err(ValidationError::EmptyName));
        assert!(matches!(
            validate_identifier("bad name"),
            Err(ValidationError::InvalidNameChars { .. })
        ));
        assert!(matches!(
            validate_identifier(".hidden"),
            Err(ValidationError::InvalidNameChars { .. })
        ));
        assert!(matches!(
            validate_identifier(&"x".repeat(101)),
            Err(ValidationError::NameTooLong { max: 100, len: 101 })
        ));
    }
}
