//! Runtime settings
//!
//! Read from the `settings` block of the pipeline file, then overridden by
//! `RELAYLINE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Overrides [`Settings::work_dir`]
pub const WORK_DIR_ENV: &str = "RELAYLINE_WORK_DIR";
/// Overrides [`Settings::max_parallel`]
pub const MAX_PARALLEL_ENV: &str = "RELAYLINE_MAX_PARALLEL";
/// Overrides [`Settings::log_level`]
pub const LOG_ENV: &str = "RELAYLINE_LOG";

fn default_work_dir() -> PathBuf {
    PathBuf::from(".relayline")
}

fn default_max_parallel() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

const fn default_fail_fast() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_timeout_minutes() -> u64 {
    360
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory for isolated contexts and run state, relative to the root
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Cells executing at the same time
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Stop starting cells of a job once one of them failed
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Cell timeout for jobs without `timeout_minutes`
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            max_parallel: default_max_parallel(),
            fail_fast: default_fail_fast(),
            log_level: default_log_level(),
            default_timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl Settings {
    /// Applies `RELAYLINE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(WORK_DIR_ENV).filter(|v| !v.is_empty()) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(MAX_PARALLEL_ENV) {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => self.max_parallel = n,
                _ => tracing::warn!(value = %value, "Ignoring invalid {MAX_PARALLEL_ENV}"),
            }
        }
        if let Some(level) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    /// Parallelism actually used; never zero
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.max_parallel.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.work_dir, PathBuf::from(".relayline"));
        assert_eq!(settings.log_level, "info");
        assert!(settings.fail_fast);
        assert!(settings.max_parallel >= 1);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (WORK_DIR_ENV, "/tmp/relayline"),
            (MAX_PARALLEL_ENV, "2"),
            (LOG_ENV, "debug"),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(settings.work_dir, PathBuf::from("/tmp/relayline"));
        assert_eq!(settings.max_parallel, 2);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_invalid_parallelism_is_ignored() {
        let mut settings = Settings {
            max_parallel: 3,
            ..Settings::default()
        };
        settings.apply_overrides(|name| (name == MAX_PARALLEL_ENV).then(|| "zero".to_string()));
        assert_eq!(settings.max_parallel, 3);
    }

    #[test]
    fn test_parse_settings_block() {
        let settings: Settings =
            serde_yaml::from_str("max_parallel: 8\nfail_fast: false\n").unwrap();
        assert_eq!(settings.max_parallel, 8);
        assert!(!settings.fail_fast);
        assert_eq!(settings.default_timeout_minutes, 360);
    }
}
