//! `relayline env` - Run environments
//!
//! Environments run in the order given and stop at the first failure. The
//! failing command's output is printed verbatim and its exit code becomes
//! the exit code of the process.
//!
//! ```bash
//! relayline env lint type-check run-tests
//! ```

use anyhow::Result;
use relayline::executor::{BaseEnv, EnvironmentOutcome, EnvironmentRunner, SystemLauncher};
use relayline::pipeline::Pipeline;
use std::io::Write as _;
use std::sync::Arc;

/// Runs `names` and returns the exit code
pub async fn run_environments(pipeline: &Pipeline, names: &[String]) -> Result<i32> {
    let envs = pipeline.registry.resolve(names)?;
    let runner = EnvironmentRunner::new(
        Arc::new(SystemLauncher),
        pipeline.isolation.clone(),
        pipeline.root.clone(),
        pipeline.work_dir(),
    );
    let base = BaseEnv::from_process();

    for env in envs {
        let outcome = runner.run(&env, &base).await?;
        report(&outcome)?;
        if !outcome.is_success() {
            return Ok(outcome.exit_code());
        }
    }
    Ok(0)
}

fn report(outcome: &EnvironmentOutcome) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    for record in &outcome.commands {
        stdout.write_all(record.stdout.as_bytes())?;
        stderr.write_all(record.stderr.as_bytes())?;
    }
    stdout.flush()?;

    match outcome.failure {
        Some(ref failure) => {
            writeln!(
                stderr,
                "{}: command {} '{}' failed with exit code {}",
                outcome.environment,
                failure.index + 1,
                failure.command,
                failure.exit_code
            )?;
        }
        None => {
            writeln!(
                stderr,
                "{}: {} command(s) succeeded in {:.1}s",
                outcome.environment,
                outcome.commands.len(),
                outcome.duration.as_secs_f64()
            )?;
        }
    }
    Ok(())
}
