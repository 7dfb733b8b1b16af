//! `relayline coverage` - Combine and report coverage fragments
//!
//! ```bash
//! relayline coverage combine --xml coverage.xml
//! relayline coverage report --precision 1
//! ```

use anyhow::{Context, Result};
use relayline::coverage::{Aggregator, CoverageConfig, CoverageSummary};
use relayline::pipeline::Pipeline;
use std::path::Path;

fn aggregator(pipeline: &Pipeline, precision: Option<usize>, xml: Option<&Path>) -> Aggregator {
    let mut config: CoverageConfig = pipeline.coverage.clone();
    if let Some(precision) = precision {
        config.precision = precision;
    }
    if let Some(xml) = xml {
        config.xml_output = Some(xml.to_path_buf());
    }
    Aggregator::new(config, pipeline.root.clone())
}

/// Merges every fragment on disk and prints the report
pub fn combine(pipeline: &Pipeline, precision: Option<usize>, xml: Option<&Path>) -> Result<i32> {
    let aggregator = aggregator(pipeline, precision, xml);
    let outcome = aggregator.combine(&[]).context("Failed to combine coverage")?;

    print!("{}", outcome.summary.render_text(aggregator.config().precision));
    if let Some(ref path) = outcome.xml_path {
        eprintln!("Wrote {}", path.display());
    }
    eprintln!("Combined {} run(s)", outcome.runs.len());

    threshold(&aggregator, &outcome.summary)
}

/// Prints the last combined report
pub fn report(pipeline: &Pipeline, precision: Option<usize>, xml: Option<&Path>) -> Result<i32> {
    let aggregator = aggregator(pipeline, precision, xml);
    let report = aggregator
        .load_combined()
        .context("No combined report, run `relayline coverage combine` first")?;
    let summary = CoverageSummary::new(&report);

    print!("{}", summary.render_text(aggregator.config().precision));
    if let Some(path) = xml {
        let written = aggregator.write_xml(&report, path)?;
        eprintln!("Wrote {}", written.display());
    }

    threshold(&aggregator, &summary)
}

fn threshold(aggregator: &Aggregator, summary: &CoverageSummary) -> Result<i32> {
    match aggregator.check_threshold(summary) {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("{e}");
            Ok(2)
        }
    }
}
