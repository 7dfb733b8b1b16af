//! Per-process coverage fragments.
//!
//! A fragment is the raw measurement written by one test process. Paths are
//! whatever the process saw; canonicalisation happens at merge time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hits recorded for one branch arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHit {
    /// Source line of the arc
    pub from: u32,
    /// Destination line; negative values are exits from a code object
    pub to: i64,
    /// Times the arc was taken
    pub hits: u64,
}

/// Measurements for one source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    /// Executable line -> hit count; zero means measured but never run
    #[serde(default)]
    pub lines: BTreeMap<u32, u64>,

    /// Branch arcs, empty when branch measurement was off
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchHit>,
}

/// Coverage written by one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageFragment {
    /// Unique identifier of the producing run
    pub run_id: String,

    /// Recorded path -> measurements
    #[serde(default)]
    pub files: BTreeMap<String, FileData>,
}

impl CoverageFragment {
    /// Creates an empty fragment
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            files: BTreeMap::new(),
        }
    }

    /// Records line hits for a file
    #[must_use]
    pub fn with_lines(mut self, path: &str, lines: &[(u32, u64)]) -> Self {
        let file = self.files.entry(path.to_string()).or_default();
        for &(line, hits) in lines {
            *file.lines.entry(line).or_insert(0) += hits;
        }
        self
    }

    /// Records a branch arc for a file
    #[must_use]
    pub fn with_branch(mut self, path: &str, from: u32, to: i64, hits: u64) -> Self {
        self.files
            .entry(path.to_string())
            .or_default()
            .branches
            .push(BranchHit { from, to, hits });
        self
    }

    /// Parses a fragment from JSON
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialises the fragment as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
