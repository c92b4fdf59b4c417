//! Glob patterns for paths that never trigger a restart

use crate::error::WatchError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Compiled ignore patterns.
///
/// A path is ignored when a pattern matches either its absolute form or
/// its form relative to the watched root.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    set: GlobSet,
}

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, WatchError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(Glob::new(pattern).map_err(|source| WatchError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?);
        }
        let set = builder.build().map_err(|source| WatchError::Pattern {
            pattern: "<set>".to_string(),
            source,
        })?;
        Ok(Self { set })
    }

    /// Rules that ignore nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        if self.set.is_match(path) {
            return true;
        }
        path.strip_prefix(root)
            .map(|relative| self.set.is_match(relative))
            .unwrap_or(false)
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_relative_and_absolute() {
        let rules = IgnoreRules::new(&["**/*.swp", "target/**"]).unwrap();
        let root = Path::new("/work/app");

        assert!(rules.is_ignored(root, Path::new("/work/app/src/.main.rs.swp")));
        assert!(rules.is_ignored(root, Path::new("/work/app/target/debug/app")));
        assert!(!rules.is_ignored(root, Path::new("/work/app/src/main.rs")));
    }

    #[test]
    fn test_empty_ignores_nothing() {
        let rules = IgnoreRules::empty();
        assert!(!rules.is_ignored(Path::new("/r"), Path::new("/r/a.swp")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = IgnoreRules::new(&["src/[a"]).unwrap_err();
        assert!(matches!(err, WatchError::Pattern { ref pattern, .. } if pattern == "src/[a"));
    }
}
