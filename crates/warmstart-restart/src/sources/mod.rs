//! Point-in-time snapshots of watched roots and their differences

mod diff;
mod snapshot;

pub use diff::SnapshotDiff;
pub use snapshot::SourceFiles;

use crate::ignore::IgnoreRules;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// State of one file in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFile {
    /// The file existed with this modification time
    Present { last_modified: SystemTime },
    /// The file disappeared since an earlier snapshot
    Deleted,
}

impl SourceFile {
    pub fn is_deleted(&self) -> bool {
        matches!(self, SourceFile::Deleted)
    }
}

/// Every directory under `root`, `root` included, minus ignored ones.
pub fn directories(root: &Path, ignore: &IgnoreRules) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !ignore.is_ignored(root, entry.path()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}
