//! Execution environment declarations.
//!
//! An environment is an isolated, declaratively defined execution
//! context: the packages installed into it, the variables visible to its
//! commands, and the ordered command list itself.

use super::errors::ValidationError;
use super::types::{Validate, validate_identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named execution environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    /// Environment identifier, e.g. `py38` or `lint`
    pub name: String,

    /// Human readable description shown by `relayline list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Package specifiers installed into the isolated context, in order
    #[serde(default)]
    pub deps: Vec<String>,

    /// Variables set on top of the inherited environment
    #[serde(default)]
    pub setenv: BTreeMap<String, String>,

    /// Extra variable names (or `*` globs) inherited from the invoking process
    #[serde(default)]
    pub passenv: Vec<String>,

    /// Working directory for commands, relative to the pipeline root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changedir: Option<PathBuf>,

    /// Command lines, executed strictly in order
    pub commands: Vec<String>,
}

impl Environment {
    /// Creates an environment with the given commands and nothing else
    #[must_use]
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            deps: Vec::new(),
            setenv: BTreeMap::new(),
            passenv: Vec::new(),
            changedir: None,
            commands,
        }
    }

    /// Adds a dependency
    #[must_use]
    pub fn with_dep(mut self, spec: impl Into<String>) -> Self {
        self.deps.push(spec.into());
        self
    }

    /// Adds a variable override
    #[must_use]
    pub fn with_setenv(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setenv.insert(key.into(), value.into());
        self
    }

    /// Adds an inherited variable name or pattern
    #[must_use]
    pub fn with_passenv(mut self, pattern: impl Into<String>) -> Self {
        self.passenv.push(pattern.into());
        self
    }
}

impl Validate for Environment {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        validate_identifier(&self.name)?;

        if self.commands.is_empty() {
            return Err(ValidationError::EmptyEnvironment {
                env: self.name.clone(),
            });
        }

        for command in &self.commands {
            validate_command_line(&self.name, command)?;
        }

        for pattern in &self.passenv {
            super::Glob::new(pattern)?;
        }

        Ok(())
    }
}

/// Checks that a command line splits into at least one word
pub(crate) fn validate_command_line(owner: &str, command: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidCommand {
        owner: owner.to_string(),
        command: command.to_string(),
        reason,
    };

    let words = shell_words::split(command).map_err(|e| invalid(e.to_string()))?;
    if words.is_empty() {
        return Err(invalid("command is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_environment_builder() {
        let env = Environment::new("py38", vec!["pytest".to_string()])
            .with_dep("pytest>=6")
            .with_dep("coverage")
            .with_setenv("PYTHONDEVMODE", "1")
            .with_passenv("SSH_*");

        assert_eq!(env.deps, vec!["pytest>=6", "coverage"]);
        assert_eq!(env.setenv["PYTHONDEVMODE"], "1");
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_environment_requires_commands() {
        let env = Environment::new("docs", Vec::new());
        assert_eq!(
            env.validate(),
            Err(ValidationError::EmptyEnvironment {
                env: "docs".to_string()
            })
        );
    }

    #[test]
    fn test_environment_rejects_unbalanced_quotes() {
        let env = Environment::new("lint", vec!["flake8 'src".to_string()]);
        assert!(matches!(
            env.validate(),
            Err(ValidationError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_environment_rejects_blank_command() {
        let env = Environment::new("lint", vec!["   ".to_string()]);
        assert!(matches!(
            env.validate(),
            Err(ValidationError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_environment_deserialize() {
        let yaml = r#"
name: py38
deps: [pytest, coverage]
setenv:
  PYTHONHASHSEED: "0"
commands:
  - coverage run -m pytest tests
"#;
        let env: Environment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(env.name, "py38");
        assert_eq!(env.deps.len(), 2);
        assert_eq!(env.setenv["PYTHONHASHSEED"], "0");
        assert_eq!(env.commands, vec!["coverage run -m pytest tests"]);
    }

    #[test]
    fn test_environment_rejects_unknown_fields() {
        let yaml = "name: x\ncommands: [a]\ncomands: [b]\n";
        assert!(serde_yaml::from_str::<Environment>(yaml).is_err());
    }
}
