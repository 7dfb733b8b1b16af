//! CI trigger events and job run conditions.

use super::Glob;
use super::errors::ValidationError;
use super::types::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of event that started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A push to a branch or a tag
    Push,
    /// A pull request was opened or updated
    PullRequest,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::PullRequest => write!(f, "pull_request"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "pull_request" | "pull-request" | "pr" => Ok(Self::PullRequest),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}

/// The event and git reference a run was started for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Event kind
    pub event: EventKind,
    /// Full git reference, e.g. `refs/heads/main` or `refs/tags/v1.0`
    pub git_ref: String,
}

impl Trigger {
    /// Creates a trigger
    #[must_use]
    pub fn new(event: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            event,
            git_ref: git_ref.into(),
        }
    }

    /// A push of the given branch
    #[must_use]
    pub fn branch_push(branch: &str) -> Self {
        Self::new(EventKind::Push, format!("refs/heads/{branch}"))
    }

    /// A push of the given tag
    #[must_use]
    pub fn tag_push(tag: &str) -> Self {
        Self::new(EventKind::Push, format!("refs/tags/{tag}"))
    }

    /// Returns the tag name if this is a tag push
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self.event {
            EventKind::Push => self.git_ref.strip_prefix("refs/tags/"),
            EventKind::PullRequest => None,
        }
    }

    /// Returns the branch name if the reference names a branch
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event, self.git_ref)
    }
}

/// Predicate deciding whether a job body runs for a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    /// Tag push whose tag name matches the glob
    Tag(String),
    /// Reference is a branch matching the glob
    Branch(String),
    /// Event kind equals the given one
    Event(EventKind),
    /// All conditions must be true
    AllOf(Vec<RunCondition>),
    /// At least one condition must be true
    AnyOf(Vec<RunCondition>),
    /// Negation
    Not(Box<RunCondition>),
}

impl RunCondition {
    /// Creates a tag condition
    pub fn tag(pattern: impl Into<String>) -> Self {
        Self::Tag(pattern.into())
    }

    /// Creates a branch condition
    pub fn branch(pattern: impl Into<String>) -> Self {
        Self::Branch(pattern.into())
    }

    /// Evaluates the condition against a trigger
    ///
    /// Patterns are validated when the pipeline is loaded; an invalid
    /// pattern here evaluates to false.
    #[must_use]
    pub fn evaluate(&self, trigger: &Trigger) -> bool {
        match self {
            Self::Tag(pattern) => trigger
                .tag()
                .is_some_and(|tag| Glob::new(pattern).is_ok_and(|g| g.is_match(tag))),
            Self::Branch(pattern) => trigger
                .branch()
                .is_some_and(|branch| Glob::new(pattern).is_ok_and(|g| g.is_match(branch))),
            Self::Event(kind) => trigger.event == *kind,
            Self::AllOf(conditions) => conditions.iter().all(|c| c.evaluate(trigger)),
            Self::AnyOf(conditions) => conditions.iter().any(|c| c.evaluate(trigger)),
            Self::Not(condition) => !condition.evaluate(trigger),
        }
    }
}

impl Validate for RunCondition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Tag(pattern) | Self::Branch(pattern) => {
                if pattern.is_empty() {
                    return Err(ValidationError::InvalidPattern {
                        pattern: String::new(),
                        reason: "pattern cannot be empty".to_string(),
                    });
                }
                Glob::new(pattern)?;
            }
            Self::Event(_) => {}
            Self::AllOf(conditions) | Self::AnyOf(conditions) => {
                for cond in conditions {
                    cond.validate()?;
                }
            }
            Self::Not(condition) => condition.validate()?,
        }
        Ok(())
    }
}
