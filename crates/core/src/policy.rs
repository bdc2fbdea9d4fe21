//! Allow/block artifact filtering.
//!
//! Registries carry two glob lists evaluated against `image:tag`. An empty
//! allow list matches everything; any blocked match denies, regardless of
//! the allow list.

use crate::error::{Error, Result};
use regex::Regex;

/// Compiled allow/block filter for a registry.
#[derive(Debug, Default)]
pub struct ArtifactFilter {
    allowed: Vec<Regex>,
    blocked: Vec<Regex>,
}

impl ArtifactFilter {
    /// Compile a filter from glob pattern lists.
    pub fn compile(allowed: &[String], blocked: &[String]) -> Result<Self> {
        Ok(Self {
            allowed: compile_globs(allowed)?,
            blocked: compile_globs(blocked)?,
        })
    }

    /// Whether `image:tag` passes the filter.
    pub fn allows(&self, artifact: &str) -> bool {
        if self.blocked.iter().any(|re| re.is_match(artifact)) {
            return false;
        }
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.iter().any(|re| re.is_match(artifact))
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| glob_to_regex(p)).collect()
}

/// Translate a glob into an anchored regex. `*` matches any run of
/// characters including `/` (so `*:latest` blocks nested images too), `?`
/// matches a single character, everything else is literal.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(Error::InvalidPattern("empty pattern".to_string()));
    }
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))
}
