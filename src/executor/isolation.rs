//! Isolated dependency contexts.
//!
//! Every environment runs inside its own context under
//! `<work_dir>/envs/<name>`, created from the configured templates. The
//! inherited process environment is reduced to an allow-list before any
//! command sees it.

use crate::pipeline::{Glob, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the marker file recording what a context was built from
pub const DEPS_MARKER: &str = ".relayline-deps.json";

fn default_create() -> String {
    "python -m venv ${ENV_DIR}".to_string()
}

fn default_install() -> String {
    "${ENV_DIR}/bin/python -m pip install ${DEPS}".to_string()
}

fn default_bin_dir() -> String {
    "bin".to_string()
}

fn default_passenv() -> Vec<String> {
    [
        "PATH", "HOME", "LANG", "LC_*", "TMPDIR", "TERM", "USER", "SYSTEMROOT", "COMSPEC",
        "PATHEXT", "CI",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

const fn default_enabled() -> bool {
    true
}

/// How isolated contexts are created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationConfig {
    /// Create a context per environment; when false commands run against
    /// the host toolchain and `deps` are not installed
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Command creating an empty context at `${ENV_DIR}`
    #[serde(default = "default_create")]
    pub create: String,

    /// Command installing `${DEPS}` into the context
    #[serde(default = "default_install")]
    pub install: String,

    /// Executables directory inside the context, prepended to `PATH`
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,

    /// Variables every environment inherits from the invoking process
    #[serde(default = "default_passenv")]
    pub passenv: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            create: default_create(),
            install: default_install(),
            bin_dir: default_bin_dir(),
            passenv: default_passenv(),
        }
    }
}

impl IsolationConfig {
    /// Compiles the allow-list for an environment: the global patterns
    /// followed by the environment's own
    pub fn passenv_globs(&self, extra: &[String]) -> Result<Vec<Glob>, ValidationError> {
        self.passenv
            .iter()
            .chain(extra)
            .map(|pattern| Glob::new(pattern))
            .collect()
    }
}

/// The environment of the invoking process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseEnv(BTreeMap<String, String>);

impl BaseEnv {
    /// Captures the current process environment
    #[must_use]
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    /// Builds a base environment from explicit pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Looks up a variable
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Variables whose name matches at least one pattern
    #[must_use]
    pub fn filtered(&self, patterns: &[Glob]) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|(name, _)| patterns.iter().any(|p| p.is_match(name)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A prepared context an environment's commands run in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedContext {
    /// Root directory of the context
    pub dir: PathBuf,

    /// Directory prepended to `PATH`
    pub bin_dir: PathBuf,

    /// True if an existing context was reused as-is
    pub reused: bool,
}

impl IsolatedContext {
    /// Variables exported to commands running in this context
    #[must_use]
    pub fn variables(&self, inherited_path: Option<&str>) -> BTreeMap<String, String> {
        let dir = self.dir.to_string_lossy().to_string();
        let mut path = vec![self.bin_dir.clone()];
        if let Some(existing) = inherited_path {
            path.extend(std::env::split_paths(existing));
        }
        let path = std::env::join_paths(path)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| self.bin_dir.to_string_lossy().to_string());

        BTreeMap::from([
            ("ENV_DIR".to_string(), dir.clone()),
            ("VIRTUAL_ENV".to_string(), dir),
            ("PATH".to_string(), path),
        ])
    }
}

/// What a context was built from; a context is reused only when the
/// recorded marker equals the wanted one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DepsMarker {
    pub create: String,
    pub install: String,
    pub deps: Vec<String>,
}

impl DepsMarker {
    pub(crate) fn new(config: &IsolationConfig, deps: &[String]) -> Self {
        Self {
            create: config.create.clone(),
            install: config.install.clone(),
            deps: deps.to_vec(),
        }
    }

    /// Reads the marker of a context directory; any problem means "absent"
    pub(crate) fn read(dir: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(dir.join(DEPS_MARKER)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub(crate) fn write(&self, dir: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(dir.join(DEPS_MARKER), text)
    }
}
