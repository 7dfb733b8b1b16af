//! Coverage aggregation
//!
//! Test processes write one fragment each into the fragment directory.
//! After the owning job's cells have all finished, the [`Aggregator`]
//! canonicalises paths, merges the fragments, applies exclusion rules and
//! renders the reports.

mod errors;
mod exclusion;
mod fragment;
mod merge;
mod paths;
mod report;
mod store;

pub use errors::CoverageError;
pub use exclusion::{DEFAULT_EXCLUDE_LINES, ExclusionRules};
pub use fragment::{BranchHit, CoverageFragment, FileData};
pub use merge::{CoverageReport, FileCoverage, FragmentSet};
pub use paths::PathMapper;
pub use report::{CoverageCounts, CoverageSummary, render_cobertura};
pub use store::FragmentStore;

use crate::pipeline::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Variable telling a test process where to write its fragment
pub const COVERAGE_FILE_VAR: &str = "RELAYLINE_COVERAGE_FILE";

/// Variable holding the run identifier the fragment must carry
pub const COVERAGE_RUN_VAR: &str = "RELAYLINE_COVERAGE_RUN";

/// File name of the persisted combined report inside the fragment directory
pub const COMBINED_FILE: &str = "combined.json";

const MAX_PRECISION: usize = 10;

fn default_fragment_dir() -> PathBuf {
    PathBuf::from(".relayline/coverage")
}

fn default_exclude_lines() -> Vec<String> {
    DEFAULT_EXCLUDE_LINES.iter().map(ToString::to_string).collect()
}

const fn default_precision() -> usize {
    2
}

#[allow(clippy::unnecessary_wraps)]
fn default_xml_output() -> Option<PathBuf> {
    Some(PathBuf::from("coverage.xml"))
}

/// Coverage settings of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageConfig {
    /// Where fragments are written, relative to the pipeline root
    #[serde(default = "default_fragment_dir")]
    pub fragment_dir: PathBuf,

    /// Path groups, each `[canonical, alias...]`
    #[serde(default)]
    pub paths: Vec<Vec<String>>,

    /// Exclusion marker regexes
    #[serde(default = "default_exclude_lines")]
    pub exclude_lines: Vec<String>,

    /// Directory measured sources are read from for exclusion rules,
    /// defaulting to the pipeline root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,

    /// Digits after the decimal point in percentages
    #[serde(default = "default_precision")]
    pub precision: usize,

    /// Cobertura XML destination written by `combine`
    #[serde(default = "default_xml_output")]
    pub xml_output: Option<PathBuf>,

    /// Minimum total percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_under: Option<f64>,

    /// Keep fragment files after a successful combine
    #[serde(default)]
    pub keep_fragments: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            fragment_dir: default_fragment_dir(),
            paths: Vec::new(),
            exclude_lines: default_exclude_lines(),
            source_root: None,
            precision: default_precision(),
            xml_output: default_xml_output(),
            fail_under: None,
            keep_fragments: false,
        }
    }
}

impl CoverageConfig {
    /// Checks patterns and numeric bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        PathMapper::new(&self.paths)?;
        ExclusionRules::new(&self.exclude_lines)?;

        if self.precision > MAX_PRECISION {
            return Err(ValidationError::InvalidCoverage(format!(
                "precision must be at most {MAX_PRECISION}, got {}",
                self.precision
            )));
        }
        if let Some(threshold) = self.fail_under
            && !(0.0..=100.0).contains(&threshold)
        {
            return Err(ValidationError::InvalidCoverage(format!(
                "fail_under must be between 0 and 100, got {threshold}"
            )));
        }
        Ok(())
    }
}

/// Result of combining a fragment set
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    /// Merged report after exclusions
    pub report: CoverageReport,
    /// Summary of the merged report
    pub summary: CoverageSummary,
    /// Run identifiers that contributed
    pub runs: BTreeSet<String>,
    /// Where the Cobertura document was written
    pub xml_path: Option<PathBuf>,
}

/// Merges the fragments of a pipeline
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: CoverageConfig,
    root: PathBuf,
}

impl Aggregator {
    /// Creates an aggregator; relative paths resolve against `root`
    pub fn new(config: CoverageConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    /// The configuration in use
    #[must_use]
    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Fragment store of the pipeline
    #[must_use]
    pub fn store(&self) -> FragmentStore {
        FragmentStore::new(self.resolve(&self.config.fragment_dir))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Merges fragments from the store
    ///
    /// With an empty `expected` list every fragment present is merged.
    /// Otherwise exactly the listed runs are merged and each must have
    /// produced a fragment. On success the combined report is persisted,
    /// the XML report written and (unless `keep_fragments`) the consumed
    /// fragments removed.
    #[tracing::instrument(skip_all, fields(expected = expected.len()))]
    pub fn combine(&self, expected: &[String]) -> Result<AggregateOutcome, CoverageError> {
        let store = self.store();
        let paths = if expected.is_empty() {
            let paths = store.discover()?;
            if paths.is_empty() {
                return Err(CoverageError::NoData {
                    dir: store.dir().to_path_buf(),
                });
            }
            paths
        } else {
            let (present, missing): (Vec<_>, Vec<_>) = expected
                .iter()
                .map(|run| (run, store.path_for(run)))
                .partition(|(_, path)| path.is_file());
            if !missing.is_empty() {
                return Err(CoverageError::MissingFragment {
                    missing: missing.into_iter().map(|(run, _)| run.clone()).collect(),
                });
            }
            present.into_iter().map(|(_, path)| path).collect()
        };

        let mut set = FragmentSet::new(PathMapper::new(&self.config.paths)?);
        for path in &paths {
            let fragment = store.load(path)?;
            tracing::debug!(
                run_id = %fragment.run_id,
                files = fragment.files.len(),
                "Merging fragment"
            );
            set.ingest(&fragment)?;
        }

        let runs = set.run_ids().clone();
        let mut report = set.into_report();
        let rules = ExclusionRules::new(&self.config.exclude_lines)?;
        rules.apply(
            &mut report,
            &self.source_root(),
            self.config.source_root.is_some(),
        )?;

        let combined = store.dir().join(COMBINED_FILE);
        let text = report
            .to_fragment("combined")
            .to_json()
            .map_err(|e| CoverageError::Malformed {
                path: combined.clone(),
                reason: e.to_string(),
            })?;
        std::fs::write(&combined, text).map_err(|e| CoverageError::io(&combined, e))?;

        let xml_path = match &self.config.xml_output {
            Some(path) => Some(self.write_xml(&report, path)?),
            None => None,
        };

        if !self.config.keep_fragments {
            store.remove(&paths)?;
        }

        let summary = CoverageSummary::new(&report);
        tracing::info!(
            runs = runs.len(),
            files = report.files.len(),
            total = %summary.total.display_percent(self.config.precision),
            "Coverage combined"
        );

        Ok(AggregateOutcome {
            report,
            summary,
            runs,
            xml_path,
        })
    }

    /// Loads the last combined report
    pub fn load_combined(&self) -> Result<CoverageReport, CoverageError> {
        let store = self.store();
        let path = store.dir().join(COMBINED_FILE);
        if !path.exists() {
            return Err(CoverageError::NoData {
                dir: store.dir().to_path_buf(),
            });
        }
        let fragment = store.load(&path)?;
        CoverageReport::from_fragment(&fragment, &PathMapper::default())
    }

    /// Directory sources are read from; the pipeline root unless configured
    fn source_root(&self) -> PathBuf {
        self.config
            .source_root
            .as_deref()
            .map_or_else(|| self.root.clone(), |p| self.resolve(p))
    }

    /// Writes the Cobertura document for a report
    pub fn write_xml(
        &self,
        report: &CoverageReport,
        path: &Path,
    ) -> Result<PathBuf, CoverageError> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoverageError::io(parent, e))?;
        }
        let source = self.source_root();
        let xml = render_cobertura(report, &source.to_string_lossy())?;
        std::fs::write(&path, xml).map_err(|e| CoverageError::io(&path, e))?;
        Ok(path)
    }

    /// Enforces `fail_under`
    pub fn check_threshold(&self, summary: &CoverageSummary) -> Result<(), CoverageError> {
        match self.config.fail_under {
            Some(required) if summary.total.percent() < required => {
                Err(CoverageError::BelowThreshold {
                    total: summary.total.percent(),
                    required,
                })
            }
            _ => Ok(()),
        }
    }
}
