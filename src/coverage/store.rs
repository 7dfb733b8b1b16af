//! Fragment files on disk.
//!
//! Each writer owns a distinct file `.coverage.<run_id>.json`, so concurrent
//! processes never contend; the aggregator is the only reader.

use super::CoverageError;
use super::fragment::CoverageFragment;
use std::path::{Path, PathBuf};

const PREFIX: &str = ".coverage.";
const SUFFIX: &str = ".json";

/// Directory of coverage fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentStore {
    dir: PathBuf,
}

impl FragmentStore {
    /// Opens a store rooted at `dir`; the directory need not exist yet
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The fragment directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a run writes its fragment to
    #[must_use]
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{PREFIX}{run_id}{SUFFIX}"))
    }

    /// Fragment files currently present, sorted by name
    pub fn discover(&self) -> Result<Vec<PathBuf>, CoverageError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoverageError::io(&self.dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoverageError::io(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PREFIX) && name.ends_with(SUFFIX) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Reads one fragment file
    pub fn load(&self, path: &Path) -> Result<CoverageFragment, CoverageError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
        CoverageFragment::from_json(&text).map_err(|e| CoverageError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes a fragment under its run identifier
    pub fn write(&self, fragment: &CoverageFragment) -> Result<PathBuf, CoverageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CoverageError::io(&self.dir, e))?;
        let path = self.path_for(&fragment.run_id);
        let text = fragment.to_json().map_err(|e| CoverageError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, text).map_err(|e| CoverageError::io(&path, e))?;
        Ok(path)
    }

    /// Removes consumed fragment files
    pub fn remove(&self, paths: &[PathBuf]) -> Result<(), CoverageError> {
        for path in paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CoverageError::io(path, e)),
            }
        }
        Ok(())
    }
}
