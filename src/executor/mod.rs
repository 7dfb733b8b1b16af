//! Environment execution layer
//!
//! Process launching, isolated dependency contexts and the sequential
//! environment runner built on top of them.

mod isolation;
mod runner;
mod shell;
mod traits;

#[cfg(test)]
pub(crate) use runner::testing;

pub use isolation::{BaseEnv, DEPS_MARKER, IsolatedContext, IsolationConfig};
pub use runner::{
    CommandFailure, CommandRecord, EnvironmentOutcome, EnvironmentRunner, RunnerError,
    SPAWN_FAILURE_EXIT_CODE,
};
pub use shell::{ShellError, SystemLauncher, expand_variables, split_command};
pub use traits::{CommandOutput, CommandSpec, ProcessLauncher};
