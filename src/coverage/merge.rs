//! The coverage merge monoid.
//!
//! [`CoverageReport::combine`] sums hits element-wise. It is commutative and
//! associative with [`CoverageReport::default`] as identity, so fragments can
//! be merged in any order or grouping with the same result.

use super::fragment::{BranchHit, CoverageFragment};
use super::paths::PathMapper;
use super::CoverageError;
use std::collections::{BTreeMap, BTreeSet};

/// Merged measurements for one canonical file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCoverage {
    /// Line -> total hits
    pub lines: BTreeMap<u32, u64>,
    /// `(from, to)` arc -> total hits
    pub branches: BTreeMap<(u32, i64), u64>,
}

impl FileCoverage {
    fn add(&mut self, other: &Self) {
        for (&line, &hits) in &other.lines {
            let entry = self.lines.entry(line).or_insert(0);
            *entry = entry.saturating_add(hits);
        }
        for (&arc, &hits) in &other.branches {
            let entry = self.branches.entry(arc).or_insert(0);
            *entry = entry.saturating_add(hits);
        }
    }

    /// Drops excluded lines and every arc leaving them
    pub fn exclude(&mut self, lines: &BTreeSet<u32>) {
        self.lines.retain(|line, _| !lines.contains(line));
        self.branches.retain(|(from, _), _| !lines.contains(from));
    }

    /// Number of executable lines
    #[must_use]
    pub fn statements(&self) -> usize {
        self.lines.len()
    }

    /// Number of executable lines never hit
    #[must_use]
    pub fn missed(&self) -> usize {
        self.lines.values().filter(|&&hits| hits == 0).count()
    }

    /// Number of branch arcs
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Number of arcs never taken
    #[must_use]
    pub fn branches_missed(&self) -> usize {
        self.branches.values().filter(|&&hits| hits == 0).count()
    }

    /// Source lines with at least one untaken arc while another was taken
    #[must_use]
    pub fn partial_lines(&self) -> usize {
        let mut by_line: BTreeMap<u32, (bool, bool)> = BTreeMap::new();
        for (&(from, _), &hits) in &self.branches {
            let (taken, untaken) = by_line.entry(from).or_default();
            if hits > 0 {
                *taken = true;
            } else {
                *untaken = true;
            }
        }
        by_line.values().filter(|(t, u)| *t && *u).count()
    }
}

/// Merged coverage of any number of fragments, keyed by canonical path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    /// Canonical path -> measurements
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    /// Converts a fragment, canonicalising its paths
    ///
    /// Several recorded paths mapping to the same canonical file are summed.
    pub fn from_fragment(
        fragment: &CoverageFragment,
        mapper: &PathMapper,
    ) -> Result<Self, CoverageError> {
        let mut report = Self::default();
        for (path, data) in &fragment.files {
            let canonical = mapper.map(path)?;
            let mut file = FileCoverage {
                lines: data.lines.clone(),
                branches: BTreeMap::new(),
            };
            for branch in &data.branches {
                let entry = file.branches.entry((branch.from, branch.to)).or_insert(0);
                *entry = entry.saturating_add(branch.hits);
            }
            report.files.entry(canonical).or_default().add(&file);
        }
        Ok(report)
    }

    /// Element-wise sum of two reports
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place form of [`combine`](Self::combine)
    pub fn merge_from(&mut self, other: &Self) {
        for (path, file) in &other.files {
            self.files.entry(path.clone()).or_default().add(file);
        }
    }

    /// Returns true if no file was measured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Stores the report in fragment form, e.g. to persist a combined result
    #[must_use]
    pub fn to_fragment(&self, run_id: &str) -> CoverageFragment {
        let mut fragment = CoverageFragment::new(run_id);
        for (path, file) in &self.files {
            let data = fragment.files.entry(path.clone()).or_default();
            data.lines.clone_from(&file.lines);
            data.branches = file
                .branches
                .iter()
                .map(|(&(from, to), &hits)| BranchHit { from, to, hits })
                .collect();
        }
        fragment
    }
}

/// Fragments ingested so far, merged eagerly
///
/// Refuses a run identifier it has already seen so the same process can
/// never be counted twice.
#[derive(Debug, Default)]
pub struct FragmentSet {
    mapper: PathMapper,
    run_ids: BTreeSet<String>,
    report: CoverageReport,
}

impl FragmentSet {
    /// Creates an empty set using the given path mapper
    #[must_use]
    pub fn new(mapper: PathMapper) -> Self {
        Self {
            mapper,
            run_ids: BTreeSet::new(),
            report: CoverageReport::default(),
        }
    }

    /// Merges a fragment
    pub fn ingest(&mut self, fragment: &CoverageFragment) -> Result<(), CoverageError> {
        if self.run_ids.contains(&fragment.run_id) {
            return Err(CoverageError::DuplicateFragment(fragment.run_id.clone()));
        }
        let report = CoverageReport::from_fragment(fragment, &self.mapper)?;
        self.report.merge_from(&report);
        self.run_ids.insert(fragment.run_id.clone());
        Ok(())
    }

    /// Run identifiers ingested so far
    #[must_use]
    pub fn run_ids(&self) -> &BTreeSet<String> {
        &self.run_ids
    }

    /// The merged report
    #[must_use]
    pub fn into_report(self) -> CoverageReport {
        self.report
    }
}
