//! Exclude pattern matching for sync runs.
//!
//! Patterns are globs matched against the relative path, the file name and
//! each path component; matching any one pattern excludes the path.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, SyncError};

/// Pattern matching for file exclusion.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    /// Compiled glob set for matching.
    glob_set: GlobSet,
    /// Raw pattern strings (for display/serialization).
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcludePatterns {
    /// Create a new empty exclude pattern set.
    pub fn new() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Create from a list of patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|source| SyncError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        let glob_set = builder.build().map_err(|source| SyncError::InvalidPattern {
            pattern: pattern_list.join(", "),
            source,
        })?;

        Ok(Self {
            glob_set,
            patterns: pattern_list,
        })
    }

    /// Check if a path should be excluded.
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        if self.glob_set.is_match(path) {
            return true;
        }

        // Check each path component for patterns like ".DS_Store" or "drafts"
        for component in std::path::Path::new(path).components() {
            if let std::path::Component::Normal(name) = component {
                if self.glob_set.is_match(name.to_string_lossy().as_ref()) {
                    return true;
                }
            }
        }

        false
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
