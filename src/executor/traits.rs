//! Process launching seam
//!
//! Everything that starts an external process goes through
//! [`ProcessLauncher`], so runners and builders can be exercised with a
//! scripted launcher in tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute, looked up on the child's `PATH`
    pub program: String,

    /// Arguments
    pub args: Vec<String>,

    /// Working directory
    pub cwd: PathBuf,

    /// Complete child environment; nothing else is inherited
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Renders the invocation as a shell-quoted command line
    #[must_use]
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutput {
    /// Returns true if command succeeded (exit code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Starts processes and waits for them
#[allow(clippy::missing_errors_doc)]
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Runs the command to completion, capturing its output
    ///
    /// An `Err` means the process could not be started at all.
    async fn launch(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}
