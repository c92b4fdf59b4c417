use super::{SnapshotDiff, SourceFile};
use crate::ignore::IgnoreRules;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Files under one root keyed by path relative to that root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFiles {
    files: BTreeMap<PathBuf, SourceFile>,
}

impl SourceFiles {
    /// Walk `root` and record every regular file's modification time.
    ///
    /// A missing root yields an empty snapshot. Entries that vanish during
    /// the walk are skipped.
    pub fn snapshot(root: &Path, ignore: &IgnoreRules) -> Self {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !ignore.is_ignored(root, entry.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    trace!("Skipping unreadable entry under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|metadata| metadata.modified());
            let Ok(last_modified) = modified else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.insert(relative, SourceFile::Present { last_modified });
        }
        trace!("Snapshot of {} holds {} files", root.display(), files.len());
        Self { files }
    }

    pub fn get(&self, path: &Path) -> Option<&SourceFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    /// Copy without `Deleted` markers.
    pub fn without_deletes(&self) -> Self {
        Self {
            files: self
                .files
                .iter()
                .filter(|(_, file)| !file.is_deleted())
                .map(|(path, file)| (path.clone(), *file))
                .collect(),
        }
    }

    /// Classify how `current` differs from this snapshot.
    ///
    /// Files marked deleted here count as added when they reappear and are
    /// never reported as deleted twice.
    pub fn diff(&self, current: &SourceFiles) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (path, file) in &self.files {
            if !file.is_deleted() && !current.files.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }

        for (path, file) in &current.files {
            match self.files.get(path) {
                None | Some(SourceFile::Deleted) => diff.added.push(path.clone()),
                Some(previous) if previous != file => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }

        diff
    }

    /// The snapshot to store once `diff` (computed against `current`) is applied.
    pub fn advance(current: SourceFiles, diff: &SnapshotDiff) -> SourceFiles {
        let mut files = current.files;
        for path in &diff.removed {
            files.insert(path.clone(), SourceFile::Deleted);
        }
        SourceFiles { files }
    }
}

impl FromIterator<(PathBuf, SourceFile)> for SourceFiles {
    fn from_iter<T: IntoIterator<Item = (PathBuf, SourceFile)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn at(secs: u64) -> SourceFile {
        SourceFile::Present {
            last_modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    fn files(entries: &[(&str, SourceFile)]) -> SourceFiles {
        entries
            .iter()
            .map(|(path, file)| (PathBuf::from(path), *file))
            .collect()
    }

    #[test]
    fn test_snapshot_records_files_relative_to_root() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("nested/deeper")).unwrap();
        std::fs::write(temp_dir.path().join("top.txt"), "a").unwrap();
        std::fs::write(temp_dir.path().join("nested/deeper/inner.txt"), "b").unwrap();
        std::fs::write(temp_dir.path().join("nested/skip.swp"), "c").unwrap();

        let ignore = IgnoreRules::new(&["**/*.swp"]).unwrap();
        let snapshot = SourceFiles::snapshot(temp_dir.path(), &ignore);

        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![PathBuf::from("nested/deeper/inner.txt"), PathBuf::from("top.txt")]
        );
    }

    #[test]
    fn test_snapshot_of_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = SourceFiles::snapshot(&temp_dir.path().join("gone"), &IgnoreRules::empty());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_diff_classifies_changes() {
        let previous = files(&[("a", at(1)), ("b", at(1)), ("c", at(1))]);
        let current = files(&[("a", at(1)), ("b", at(2)), ("d", at(1))]);

        let diff = previous.diff(&current);
        assert_eq!(diff.added, vec![PathBuf::from("d")]);
        assert_eq!(diff.removed, vec![PathBuf::from("c")]);
        assert_eq!(diff.modified, vec![PathBuf::from("b")]);
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let previous = files(&[("a", at(1))]);
        assert!(previous.diff(&previous.clone()).is_empty());
    }

    #[test]
    fn test_deleted_marker_not_reported_twice_and_readded() {
        let previous = files(&[("a", at(1)), ("b", at(1))]);
        let current = files(&[("a", at(1))]);
        let diff = previous.diff(&current);
        let stored = SourceFiles::advance(current.clone(), &diff);
        assert_eq!(stored.get(Path::new("b")), Some(&SourceFile::Deleted));

        // Still gone: no change.
        assert!(stored.diff(&current).is_empty());

        // Recreated: reported as added, not modified.
        let recreated = files(&[("a", at(1)), ("b", at(5))]);
        let diff = stored.diff(&recreated);
        assert_eq!(diff.added, vec![PathBuf::from("b")]);
        assert!(diff.modified.is_empty());
        assert_eq!(stored.without_deletes().len(), 1);
    }
}
