//! Canonicalisation of recorded file paths.
//!
//! Processes in different cells see the same source under different
//! prefixes (a checkout, an installed `site-packages` tree, a Windows
//! drive). A path group lists the canonical location first and the aliases
//! after it; the matched prefix is replaced by the canonical one.

use super::CoverageError;
use crate::pipeline::{Glob, ValidationError};

#[derive(Debug, Clone)]
struct PathGroup {
    canonical: String,
    patterns: Vec<Glob>,
}

/// Maps recorded paths to canonical paths
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    groups: Vec<PathGroup>,
}

impl PathMapper {
    /// Compiles path groups; each group is `[canonical, alias...]`
    pub fn new(groups: &[Vec<String>]) -> Result<Self, ValidationError> {
        let mut compiled = Vec::with_capacity(groups.len());
        for group in groups {
            let Some(canonical) = group.first() else {
                return Err(ValidationError::InvalidCoverage(
                    "path group must name a canonical path".to_string(),
                ));
            };
            let patterns = group
                .iter()
                .map(|p| Glob::path_prefix(&normalize(p)))
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push(PathGroup {
                canonical: normalize(canonical).trim_end_matches('/').to_string(),
                patterns,
            });
        }
        Ok(Self { groups: compiled })
    }

    /// Returns true if no groups are configured
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.groups.is_empty()
    }

    /// Maps a recorded path to its canonical form
    ///
    /// With no groups the (separator-normalised) path is returned as is.
    pub fn map(&self, path: &str) -> Result<String, CoverageError> {
        let path = normalize(path);
        if self.groups.is_empty() {
            return Ok(path);
        }

        for group in &self.groups {
            for pattern in &group.patterns {
                if let Some(end) = pattern.match_prefix(&path) {
                    let rest = path[end..].trim_start_matches('/');
                    return Ok(if rest.is_empty() {
                        group.canonical.clone()
                    } else {
                        format!("{}/{rest}", group.canonical)
                    });
                }
            }
        }

        Err(CoverageError::UnmappedPath(path))
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mapper() -> PathMapper {
        PathMapper::new(&[vec![
            "src/pkg".to_string(),
            "*/site-packages/pkg".to_string(),
            "C:\\*\\pkg".to_string(),
        ]])
        .unwrap()
    }

    #[test]
    fn test_passthrough_without_groups() {
        let mapper = PathMapper::default();
        assert!(mapper.is_passthrough());
        assert_eq!(mapper.map("anything/at/all.py").unwrap(), "anything/at/all.py");
    }

    #[test]
    fn test_aliases_map_to_canonical() {
        let mapper = mapper();
        assert_eq!(
            mapper
                .map("/opt/py38/lib/python3.8/site-packages/pkg/core.py")
                .unwrap(),
            "src/pkg/core.py"
        );
        assert_eq!(
            mapper.map("C:\\hostedtoolcache\\pkg\\io\\reader.py").unwrap(),
            "src/pkg/io/reader.py"
        );
    }

    #[test]
    fn test_canonical_root_is_accepted() {
        let mapper = mapper();
        assert_eq!(
            mapper.map("/home/ci/work/src/pkg/core.py").unwrap(),
            "src/pkg/core.py"
        );
        assert_eq!(mapper.map("src/pkg/core.py").unwrap(), "src/pkg/core.py");
    }

    #[test]
    fn test_unmapped_path_is_fatal() {
        let err = mapper().map("/usr/lib/python3.8/json/decoder.py").unwrap_err();
        assert!(matches!(err, CoverageError::UnmappedPath(ref p) if p.ends_with("decoder.py")));
    }

    #[test]
    fn test_empty_group_is_rejected() {
        assert!(PathMapper::new(&[Vec::new()]).is_err());
    }
}
