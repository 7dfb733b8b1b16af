//! Source-based exclusion rules.
//!
//! A line matching any marker regex leaves both the numerator and the
//! denominator. When the matched line opens a block (it ends with `:`), the
//! lines indented below it are excluded with it.

use super::CoverageError;
use super::merge::CoverageReport;
use crate::pipeline::ValidationError;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Default exclusion markers
pub const DEFAULT_EXCLUDE_LINES: &[&str] = &[
    r"#\s*(pragma|PRAGMA)[:\s]?\s*(no|NO)\s*(cover|COVER)",
    r"def __repr__",
];

/// Compiled exclusion markers
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    markers: Vec<Regex>,
}

impl ExclusionRules {
    /// Compiles the given markers
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ValidationError> {
        let markers = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| ValidationError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { markers })
    }

    /// Returns true if no marker is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Line numbers (1-based) excluded from a source text
    #[must_use]
    pub fn excluded_lines(&self, source: &str) -> BTreeSet<u32> {
        let lines: Vec<&str> = source.lines().collect();
        let mut excluded = BTreeSet::new();

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if !self.markers.iter().any(|m| m.is_match(line)) {
                i += 1;
                continue;
            }
            excluded.insert(line_number(i));

            if opens_block(line) {
                let indent = indentation(line);
                let mut j = i + 1;
                while j < lines.len() {
                    let next = lines[j];
                    if !next.trim().is_empty() && indentation(next) <= indent {
                        break;
                    }
                    excluded.insert(line_number(j));
                    j += 1;
                }
                i = j;
            } else {
                i += 1;
            }
        }

        excluded
    }

    /// Removes excluded lines from every file of a report
    ///
    /// Sources are read relative to `source_root`. With `require_sources`
    /// a missing file is an error, otherwise the file is left as measured.
    pub fn apply(
        &self,
        report: &mut CoverageReport,
        source_root: &Path,
        require_sources: bool,
    ) -> Result<(), CoverageError> {
        if self.is_empty() {
            return Ok(());
        }

        for (path, file) in &mut report.files {
            let source_path = resolve(source_root, path);
            let source = match std::fs::read_to_string(&source_path) {
                Ok(source) => source,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if require_sources {
                        return Err(CoverageError::MissingSource { path: source_path });
                    }
                    tracing::debug!(file = %path, "Source not found, exclusions not applied");
                    continue;
                }
                Err(e) => return Err(CoverageError::io(&source_path, e)),
            };
            let excluded = self.excluded_lines(&source);
            if !excluded.is_empty() {
                tracing::debug!(file = %path, lines = excluded.len(), "Excluding lines");
                file.exclude(&excluded);
            }
        }
        Ok(())
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            markers: DEFAULT_EXCLUDE_LINES
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

fn opens_block(line: &str) -> bool {
    let code = line.split('#').next().unwrap_or(line);
    code.trim_end().ends_with(':')
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::fragment::CoverageFragment;
    use crate::coverage::paths::PathMapper;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "\
class Read:
    def __init__(self, name):
        self.name = name

    def __repr__(self):
        return f\"Read({self.name})\"

    def trim(self):  # pragma: no cover
        if self.name:
            return 1

        return 0

def main():
    debug = 1  # pragma: no cover
    return debug
";

    #[test]
    fn test_default_markers_exclude_blocks() {
        let rules = ExclusionRules::default();
        let excluded: Vec<u32> = rules.excluded_lines(SOURCE).into_iter().collect();
        assert_eq!(excluded, vec![5, 6, 7, 8, 9, 10, 11, 12, 13, 15]);
    }

    #[test]
    fn test_marker_variants() {
        let rules = ExclusionRules::default();
        assert_eq!(rules.excluded_lines("x = 1  #pragma:no cover\n").len(), 1);
        assert_eq!(rules.excluded_lines("x = 1  # PRAGMA NO COVER\n").len(), 1);
        assert!(rules.excluded_lines("x = 1  # pragma: cover\n").is_empty());
    }

    #[test]
    fn test_apply_reads_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("read.py"), SOURCE).unwrap();

        let fragment = CoverageFragment::new("a").with_lines(
            "read.py",
            &[(1, 1), (2, 1), (3, 1), (5, 1), (6, 0), (8, 1), (9, 0), (14, 1), (15, 1), (16, 1)],
        );
        let mut report = CoverageReport::from_fragment(&fragment, &PathMapper::default()).unwrap();

        ExclusionRules::default()
            .apply(&mut report, dir.path(), true)
            .unwrap();
        let file = &report.files["read.py"];
        assert_eq!(file.statements(), 5);
        assert_eq!(file.missed(), 0);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let fragment = CoverageFragment::new("a").with_lines("gone.py", &[(1, 1)]);
        let mut report = CoverageReport::from_fragment(&fragment, &PathMapper::default()).unwrap();

        let err = ExclusionRules::default()
            .apply(&mut report, dir.path(), true)
            .unwrap_err();
        assert!(matches!(err, CoverageError::MissingSource { .. }));
    }

    #[test]
    fn test_missing_source_skipped_when_optional() {
        let dir = tempfile::TempDir::new().unwrap();
        let fragment = CoverageFragment::new("a").with_lines("gone.py", &[(1, 1), (2, 0)]);
        let mut report = CoverageReport::from_fragment(&fragment, &PathMapper::default()).unwrap();

        ExclusionRules::default()
            .apply(&mut report, dir.path(), false)
            .unwrap();
        assert_eq!(report.files["gone.py"].statements(), 2);
    }

    #[test]
    fn test_invalid_marker() {
        assert!(ExclusionRules::new(&["(unclosed"]).is_err());
    }
}
