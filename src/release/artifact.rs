//! Release artifacts and their identity.

use super::BuildError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Binary or source distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Platform specific wheel
    Binary,
    /// Source archive
    Source,
}

/// Identity of an artifact; at most one artifact per key is published
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    /// Package name as configured
    pub package: String,
    /// Release version
    pub version: String,
    /// Platform tag, binaries only
    pub platform_tag: Option<String>,
    /// Interpreter tag, binaries only
    pub interpreter_tag: Option<String>,
}

impl ArtifactKey {
    /// Key of a binary artifact
    pub fn binary(
        package: impl Into<String>,
        version: impl Into<String>,
        platform_tag: impl Into<String>,
        interpreter_tag: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            platform_tag: Some(platform_tag.into()),
            interpreter_tag: Some(interpreter_tag.into()),
        }
    }

    /// Key of the source artifact
    pub fn source(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            platform_tag: None,
            interpreter_tag: None,
        }
    }

    /// Binary or source
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        if self.platform_tag.is_some() {
            ArtifactKind::Binary
        } else {
            ArtifactKind::Source
        }
    }

    /// Deterministic file name
    #[must_use]
    pub fn file_name(&self) -> String {
        let package = normalize_package(&self.package);
        match (&self.platform_tag, &self.interpreter_tag) {
            (Some(platform), Some(interpreter)) => {
                format!("{package}-{}-{platform}-{interpreter}.whl", self.version)
            }
            (Some(platform), None) => format!("{package}-{}-{platform}.whl", self.version),
            _ => format!("{package}-{}.tar.gz", self.version),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Normalises a package name for file names: `-` and `.` become `_`
#[must_use]
pub fn normalize_package(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' | '.' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// A built artifact on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Identity
    pub key: ArtifactKey,
    /// Location of the file
    pub path: PathBuf,
    /// Hex encoded SHA-256 of the contents
    pub sha256: String,
    /// Size in bytes
    pub size: u64,
}

impl Artifact {
    /// Describes an existing file
    pub fn from_file(key: ArtifactKey, path: &Path) -> Result<Self, BuildError> {
        let io = |source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::open(path).map_err(io)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).map_err(io)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(Self {
            key,
            path: path.to_path_buf(),
            sha256: hex::encode(hasher.finalize()),
            size,
        })
    }

    /// File name used on the index
    #[must_use]
    pub fn file_name(&self) -> String {
        self.key.file_name()
    }
}
