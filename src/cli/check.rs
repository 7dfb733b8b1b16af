//! `relayline check` - Validate the pipeline file
//!
//! Loading already rejects unknown references, cycles, invalid matrices and
//! release blocks. This command reports what was loaded.
//!
//! ```bash
//! relayline check
//! # Exit code 0: pipeline is valid
//! # Exit code 1: the error is printed
//! ```

use relayline::pipeline::Pipeline;
use std::path::Path;

/// One-line description of a valid pipeline
pub fn summary(file: &Path, pipeline: &Pipeline) -> String {
    let cells: usize = pipeline.graph.jobs().map(|job| job.cells().len()).sum();
    let levels = pipeline.graph.levels().len();
    let mut line = format!(
        "{}: OK ({} environment(s), {} job(s) in {} level(s), {} cell(s)",
        file.display(),
        pipeline.registry.len(),
        pipeline.graph.len(),
        levels,
        cells
    );
    if let Some(job) = pipeline.release_job() {
        line.push_str(&format!(", release job '{}'", job.name));
    }
    line.push(')');
    line
}
