//! Command line handling and the system process launcher.
//!
//! Command lines are split into words with POSIX shell rules
//! ([`shell_words`]) and executed directly, without an intermediate shell.
//! Variables are expanded per word using the `${VAR}` syntax:
//!
//! ```rust
//! use relayline::expand_variables;
//! use std::collections::BTreeMap;
//!
//! let vars = BTreeMap::from([("ENV_DIR".to_string(), "/tmp/py38".to_string())]);
//! assert_eq!(expand_variables("${ENV_DIR}/bin/python", &vars), "/tmp/py38/bin/python");
//! ```

use super::traits::{CommandOutput, CommandSpec, ProcessLauncher};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Errors turning a command line into an invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Quoting is unbalanced or otherwise invalid
    #[error("cannot split '{command}': {reason}")]
    Split {
        /// The command line
        command: String,
        /// Parser message
        reason: String,
    },

    /// The command line has no words after expansion
    #[error("command line '{0}' is empty")]
    Empty(String),
}

/// Expands environment variables in a string
///
/// Variables are expanded using the `${VAR_NAME}` syntax.
/// If a variable is not found, it remains unchanged in the output.
pub fn expand_variables(input: &str, vars: &BTreeMap<String, String>) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = caps.get(1).map_or("", |m| m.as_str());
            match vars.get(var_name) {
                Some(value) => value.clone(),
                // Keep the original if not found
                None => caps
                    .get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .to_string()
}

/// Splits a command line and expands variables in each word
///
/// A word consisting of exactly `${NAME}` where `NAME` is a key of `lists`
/// is replaced by the list's items as separate words (possibly none).
pub fn split_command(
    command: &str,
    vars: &BTreeMap<String, String>,
    lists: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, ShellError> {
    let words = shell_words::split(command).map_err(|e| ShellError::Split {
        command: command.to_string(),
        reason: e.to_string(),
    })?;

    let mut expanded = Vec::with_capacity(words.len());
    for word in words {
        let list = VAR_PATTERN
            .captures(&word)
            .filter(|caps| caps.get(0).is_some_and(|m| m.as_str() == word))
            .and_then(|caps| caps.get(1))
            .and_then(|name| lists.get(name.as_str()));

        match list {
            Some(items) => expanded.extend(items.iter().cloned()),
            None => expanded.push(expand_variables(&word, vars)),
        }
    }

    if expanded.is_empty() {
        return Err(ShellError::Empty(command.to_string()));
    }
    Ok(expanded)
}

/// Launches real operating system processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        tracing::debug!(command = %spec.display(), cwd = %spec.cwd.display(), "Launching process");

        let start = Instant::now();
        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}
