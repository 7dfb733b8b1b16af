//! Environment runner
//!
//! Prepares an environment's isolated context, then executes its command
//! list strictly in order, stopping at the first non-zero exit.

use super::isolation::{BaseEnv, DepsMarker, IsolatedContext, IsolationConfig};
use super::shell::{expand_variables, split_command};
use super::traits::{CommandOutput, CommandSpec, ProcessLauncher};
use crate::pipeline::Environment;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Exit code recorded when a command could not be started
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Errors that prevent an environment from running its commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The isolated context could not be created or populated
    #[error("failed to set up environment '{env}': {reason}")]
    Setup {
        /// Environment name
        env: String,
        /// What went wrong
        reason: String,
    },

    /// A command line could not be turned into an invocation
    #[error("invalid command in environment '{env}': '{command}': {reason}")]
    InvalidCommand {
        /// Environment name
        env: String,
        /// The command line
        command: String,
        /// Parser message
        reason: String,
    },
}

/// One executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// The command as launched, shell quoted
    pub command: String,
    /// Exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

/// The command that stopped an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Position in the environment's command list
    pub index: usize,
    /// The command as launched
    pub command: String,
    /// Non-zero exit code
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Result of running one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOutcome {
    /// Environment name
    pub environment: String,
    /// Commands that were launched, in order
    pub commands: Vec<CommandRecord>,
    /// Set when a command exited non-zero
    pub failure: Option<CommandFailure>,
    /// Total duration including setup
    pub duration: Duration,
}

impl EnvironmentOutcome {
    /// Returns true if every command exited zero
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// `0` on success, otherwise the failing command's exit code
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map_or(0, |f| f.exit_code)
    }
}

/// Runs environments through a [`ProcessLauncher`]
#[derive(Clone)]
pub struct EnvironmentRunner {
    launcher: Arc<dyn ProcessLauncher>,
    isolation: IsolationConfig,
    root: PathBuf,
    work_dir: PathBuf,
}

impl std::fmt::Debug for EnvironmentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentRunner")
            .field("isolation", &self.isolation)
            .field("root", &self.root)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

impl EnvironmentRunner {
    /// Creates a runner; commands run in `root`, contexts live in `work_dir`
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        isolation: IsolationConfig,
        root: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            launcher,
            isolation,
            root: root.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Directory of an environment's isolated context
    #[must_use]
    pub fn context_dir(&self, env: &str) -> PathBuf {
        self.work_dir.join("envs").join(env)
    }

    /// Runs an environment with the filtered base environment
    pub async fn run(
        &self,
        env: &Environment,
        base: &BaseEnv,
    ) -> Result<EnvironmentOutcome, RunnerError> {
        self.run_with(env, base, &BTreeMap::new()).await
    }

    /// Runs an environment, additionally exporting `extra` variables
    ///
    /// `extra` is applied after the allow-list filter and the context
    /// variables, but before `setenv`, so environments may still override it.
    #[tracing::instrument(skip_all, fields(env = %env.name))]
    pub async fn run_with(
        &self,
        env: &Environment,
        base: &BaseEnv,
        extra: &BTreeMap<String, String>,
    ) -> Result<EnvironmentOutcome, RunnerError> {
        let start = Instant::now();
        let setup = |reason: String| RunnerError::Setup {
            env: env.name.clone(),
            reason,
        };

        let globs = self
            .isolation
            .passenv_globs(&env.passenv)
            .map_err(|e| setup(e.to_string()))?;
        let mut vars = base.filtered(&globs);

        if self.isolation.enabled {
            let context = self.prepare(env, &vars).await?;
            let exported = context.variables(vars.get("PATH").map(String::as_str));
            vars.extend(exported);
        } else if !env.deps.is_empty() {
            tracing::warn!(deps = ?env.deps, "Isolation disabled, dependencies are not installed");
        }

        vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        for (key, value) in &env.setenv {
            let value = expand_variables(value, &vars);
            vars.insert(key.clone(), value);
        }

        let cwd = env
            .changedir
            .as_ref()
            .map_or_else(|| self.root.clone(), |dir| self.root.join(dir));

        let mut outcome = EnvironmentOutcome {
            environment: env.name.clone(),
            commands: Vec::with_capacity(env.commands.len()),
            failure: None,
            duration: Duration::ZERO,
        };

        for (index, line) in env.commands.iter().enumerate() {
            let words = split_command(line, &vars, &BTreeMap::new()).map_err(|e| {
                RunnerError::InvalidCommand {
                    env: env.name.clone(),
                    command: line.clone(),
                    reason: e.to_string(),
                }
            })?;
            let spec = to_spec(words, cwd.clone(), vars.clone());
            let command = spec.display();

            tracing::info!(index, command = %command, "Running command");
            let output = self.launch(&spec).await;
            tracing::debug!(
                index,
                exit_code = output.exit_code,
                duration_ms = output.duration.as_millis(),
                "Command finished"
            );

            outcome.commands.push(CommandRecord {
                command: command.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
                duration: output.duration,
            });

            if !output.is_success() {
                tracing::error!(
                    index,
                    command = %command,
                    exit_code = output.exit_code,
                    "Command failed, stopping environment"
                );
                outcome.failure = Some(CommandFailure {
                    index,
                    command,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
                break;
            }
        }

        outcome.duration = start.elapsed();
        Ok(outcome)
    }

    async fn launch(&self, spec: &CommandSpec) -> CommandOutput {
        match self.launcher.launch(spec).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(command = %spec.display(), error = %e, "Failed to start process");
                CommandOutput {
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!("{}: {e}\n", spec.program),
                    duration: Duration::ZERO,
                }
            }
        }
    }

    /// Creates the context or reuses it when its dependency marker matches
    async fn prepare(
        &self,
        env: &Environment,
        vars: &BTreeMap<String, String>,
    ) -> Result<IsolatedContext, RunnerError> {
        let setup = |reason: String| RunnerError::Setup {
            env: env.name.clone(),
            reason,
        };

        let dir = self.context_dir(&env.name);
        let bin_dir = dir.join(&self.isolation.bin_dir);
        let marker = DepsMarker::new(&self.isolation, &env.deps);

        if DepsMarker::read(&dir).as_ref() == Some(&marker) {
            tracing::debug!(dir = %dir.display(), "Reusing isolated context");
            return Ok(IsolatedContext {
                dir,
                bin_dir,
                reused: true,
            });
        }

        if dir.exists() {
            tracing::info!(dir = %dir.display(), "Dependencies changed, recreating context");
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| setup(format!("cannot remove {}: {e}", dir.display())))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| setup(format!("cannot create {}: {e}", dir.display())))?;

        let mut setup_vars = vars.clone();
        setup_vars.insert("ENV_DIR".to_string(), dir.to_string_lossy().to_string());

        tracing::info!(dir = %dir.display(), "Creating isolated context");
        self.setup_command(env, &self.isolation.create, &setup_vars, &BTreeMap::new())
            .await?;

        if env.deps.is_empty() {
            tracing::debug!("No dependencies to install");
        } else {
            tracing::info!(deps = ?env.deps, "Installing dependencies");
            let lists = BTreeMap::from([("DEPS".to_string(), env.deps.clone())]);
            self.setup_command(env, &self.isolation.install, &setup_vars, &lists)
                .await?;
        }

        marker
            .write(&dir)
            .map_err(|e| setup(format!("cannot write dependency marker: {e}")))?;

        Ok(IsolatedContext {
            dir,
            bin_dir,
            reused: false,
        })
    }

    async fn setup_command(
        &self,
        env: &Environment,
        template: &str,
        vars: &BTreeMap<String, String>,
        lists: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), RunnerError> {
        let setup = |reason: String| RunnerError::Setup {
            env: env.name.clone(),
            reason,
        };

        let words = split_command(template, vars, lists).map_err(|e| setup(e.to_string()))?;
        let spec = to_spec(words, self.root.clone(), vars.clone());
        let output = self.launch(&spec).await;
        if output.is_success() {
            Ok(())
        } else {
            Err(setup(format!(
                "'{}' exited with {}: {}",
                spec.display(),
                output.exit_code,
                output.stderr.trim_end()
            )))
        }
    }
}

fn to_spec(mut words: Vec<String>, cwd: PathBuf, env: BTreeMap<String, String>) -> CommandSpec {
    let program = words.remove(0);
    CommandSpec {
        program,
        args: words,
        cwd,
        env,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted launcher shared by runner and engine tests

    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every launch; exit codes are looked up by the full command
    /// line, then by program name, defaulting to zero
    #[derive(Default)]
    pub(crate) struct ScriptedLauncher {
        pub(crate) exit_codes: Mutex<BTreeMap<String, i32>>,
        pub(crate) unspawnable: Mutex<Vec<String>>,
        pub(crate) launched: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedLauncher {
        pub(crate) fn failing(self, key: &str, code: i32) -> Self {
            self.exit_codes.lock().insert(key.to_string(), code);
            self
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.launched.lock().iter().map(CommandSpec::display).collect()
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptedLauncher {
        async fn launch(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.launched.lock().push(spec.clone());
            if self.unspawnable.lock().contains(&spec.program) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such file or directory",
                ));
            }

            let codes = self.exit_codes.lock();
            let exit_code = codes
                .get(&spec.display())
                .or_else(|| codes.get(&spec.program))
                .copied()
                .unwrap_or(0);
            Ok(CommandOutput {
                exit_code,
                stdout: format!("{}\n", spec.display()),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "boom\n".to_string()
                },
                duration: Duration::from_millis(1),
            })
        }
    }
}
