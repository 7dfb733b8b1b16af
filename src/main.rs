//! relayline - CI pipeline runner
//!
//! ## Commands
//!
//! - `relayline list` - Show environments and jobs
//! - `relayline check` - Validate the pipeline file
//! - `relayline env <name>...` - Run environments
//! - `relayline ci` - Run the job graph for an event and ref
//! - `relayline coverage combine|report` - Merge and report coverage
//! - `relayline completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate the pipeline
//! relayline check
//!
//! # Run the lint and test environments
//! relayline env lint run-tests
//!
//! # Show what a tag push would run
//! relayline ci --event push --ref refs/tags/v1.0.0 --dry-run
//!
//! # Generate shell completions
//! relayline completions bash > /etc/bash_completion.d/relayline
//! ```

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("RELAYLINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
