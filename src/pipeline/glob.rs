//! Minimal glob patterns used by run conditions, passenv lists and
//! coverage path aliases.
//!
//! Only `*` (any run of characters) and `?` (one character) are special.
//! Everything else matches literally.

use super::ValidationError;
use regex::Regex;

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// Compiles a pattern that must match the whole input
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        Self::compile(pattern, &format!("^{}$", translate(pattern, ".*")))
    }

    /// Compiles a path prefix pattern
    ///
    /// `*` stops at `/`. Relative patterns (and patterns starting with `*/`)
    /// may be preceded by any number of directories, so `*/site-packages/pkg`
    /// matches an installed tree under any interpreter prefix. The match must
    /// end on a path separator or at the end of input.
    pub fn path_prefix(pattern: &str) -> Result<Self, ValidationError> {
        let trimmed = pattern.trim_end_matches('/');
        let anchored = if trimmed.starts_with('/') {
            format!("^{}(?:/|$)", translate(trimmed, "[^/]*"))
        } else {
            let relative = trimmed.strip_prefix("*/").unwrap_or(trimmed);
            format!("^(?:.*/)?{}(?:/|$)", translate(relative, "[^/]*"))
        };
        Self::compile(pattern, &anchored)
    }

    fn compile(pattern: &str, source: &str) -> Result<Self, ValidationError> {
        let regex = Regex::new(source).map_err(|e| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Returns true if the input matches
    #[must_use]
    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Returns the length of the matched prefix, if any
    #[must_use]
    pub fn match_prefix(&self, input: &str) -> Option<usize> {
        self.regex.find(input).map(|m| m.end())
    }

    /// Returns the pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn translate(pattern: &str, star: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(star),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}
