//! Command line interface
//!
//! - `list`: Show environments and jobs
//! - `check`: Validate the pipeline file
//! - `env`: Run environments
//! - `ci`: Run the job graph for a trigger
//! - `coverage`: Combine fragments or print the combined report
//! - `completions`: Generate shell completions

pub mod check;
pub mod ci;
pub mod completions;
pub mod coverage;
pub mod env;
pub mod list;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use relayline::infrastructure::{LogFormat, init_logging};
use relayline::pipeline::{DEFAULT_PIPELINE_FILE, EventKind, Pipeline};
use std::path::{Path, PathBuf};

/// CLI arguments for relayline
#[derive(Parser, Debug)]
#[command(name = "relayline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline file
    #[arg(short, long, global = true, default_value = DEFAULT_PIPELINE_FILE)]
    file: PathBuf,

    /// Log level or filter directive; `RUST_LOG` takes precedence
    #[arg(long, global = true, env = "RELAYLINE_LOG")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List environments and jobs
    List,

    /// Validate the pipeline file
    Check,

    /// Run environments in order
    Env {
        /// Environment names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Run the job graph
    Ci {
        /// Event that started the run
        #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "push")]
        event: EventKind,

        /// Git reference, e.g. refs/heads/main or refs/tags/v1.0
        #[arg(long = "ref", env = "GITHUB_REF", default_value = "refs/heads/main")]
        git_ref: String,

        /// Print the expanded plan without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Coverage fragments
    Coverage {
        #[command(subcommand)]
        action: CoverageAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CoverageAction {
    /// Merge every fragment in the fragment directory
    Combine {
        /// Digits after the decimal point
        #[arg(long)]
        precision: Option<usize>,
        /// Cobertura XML destination
        #[arg(long)]
        xml: Option<PathBuf>,
    },
    /// Print the last combined report
    Report {
        /// Digits after the decimal point
        #[arg(long)]
        precision: Option<usize>,
        /// Also write Cobertura XML here
        #[arg(long)]
        xml: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<ShellArg> for clap_complete::Shell {
    fn from(shell: ShellArg) -> Self {
        match shell {
            ShellArg::Bash => Self::Bash,
            ShellArg::Zsh => Self::Zsh,
            ShellArg::Fish => Self::Fish,
            ShellArg::PowerShell => Self::PowerShell,
            ShellArg::Elvish => Self::Elvish,
        }
    }
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

fn load(file: &Path) -> Result<Pipeline> {
    Pipeline::load(file).with_context(|| format!("Failed to load pipeline: {}", file.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Parse and execute CLI arguments, returning the process exit code
pub fn run() -> Result<i32> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref().unwrap_or("info"), args.log_format);

    match args.command {
        Command::List => {
            let pipeline = load(&args.file)?;
            print!("{}", list::render(&pipeline));
            Ok(0)
        }
        Command::Check => {
            let pipeline = load(&args.file)?;
            println!("{}", check::summary(&args.file, &pipeline));
            Ok(0)
        }
        Command::Env { names } => {
            let pipeline = load(&args.file)?;
            runtime()?.block_on(env::run_environments(&pipeline, &names))
        }
        Command::Ci {
            event,
            git_ref,
            dry_run,
        } => {
            let pipeline = load(&args.file)?;
            let trigger = relayline::pipeline::Trigger::new(event, git_ref);
            if dry_run {
                print!("{}", ci::dry_run(&pipeline, &trigger));
                return Ok(0);
            }
            runtime()?.block_on(ci::run_pipeline(pipeline, trigger))
        }
        Command::Coverage { action } => {
            let pipeline = load(&args.file)?;
            match action {
                CoverageAction::Combine { precision, xml } => {
                    coverage::combine(&pipeline, precision, xml.as_deref())
                }
                CoverageAction::Report { precision, xml } => {
                    coverage::report(&pipeline, precision, xml.as_deref())
                }
            }
        }
        Command::Completions { shell, output } => {
            let completions = completions::generate_completions(shell.into())?;
            match output {
                Some(path) => {
                    completions::save_completions(&completions, &path)?;
                    eprintln!("Completions written to {}", path.display());
                }
                None => print!("{completions}"),
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_parse_ci_arguments() {
        let args = Args::try_parse_from([
            "relayline",
            "ci",
            "--event",
            "pull_request",
            "--ref",
            "refs/pull/7/merge",
            "--dry-run",
        ])
        .unwrap();
        match args.command {
            Command::Ci {
                event,
                git_ref,
                dry_run,
            } => {
                assert_eq!(event, EventKind::PullRequest);
                assert_eq!(git_ref, "refs/pull/7/merge");
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(args.file, PathBuf::from(DEFAULT_PIPELINE_FILE));
    }

    #[test]
    fn test_env_requires_a_name() {
        assert!(Args::try_parse_from(["relayline", "env"]).is_err());
        let args =
            Args::try_parse_from(["relayline", "-f", "ci.yml", "env", "lint", "type-check"])
                .unwrap();
        assert_eq!(args.file, PathBuf::from("ci.yml"));
        assert!(matches!(args.command, Command::Env { ref names } if names.len() == 2));
    }
}
