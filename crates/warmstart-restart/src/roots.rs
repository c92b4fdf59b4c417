//! Discovery of the process's resource roots

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path-list environment variable naming the directories to watch.
pub const CLASSPATH_ENV: &str = "WARMSTART_CLASSPATH";

/// Directories whose contents make up the running application.
///
/// Uses `configured` when it names any existing directory, then the
/// directory entries of `WARMSTART_CLASSPATH`, then the directory holding the
/// current executable.
pub fn app_roots(configured: &[PathBuf]) -> Vec<PathBuf> {
    let roots = existing_dirs(configured.iter().map(PathBuf::as_path));
    if !roots.is_empty() {
        return roots;
    }

    if let Some(classpath) = std::env::var_os(CLASSPATH_ENV) {
        let entries: Vec<PathBuf> = std::env::split_paths(&classpath).collect();
        let roots = existing_dirs(entries.iter().map(PathBuf::as_path));
        if !roots.is_empty() {
            return roots;
        }
    }

    match std::env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| vec![dir.to_path_buf()])
            .unwrap_or_default(),
        Err(e) => {
            warn!("Cannot locate the current executable: {e}");
            Vec::new()
        }
    }
}

fn existing_dirs<'a>(paths: impl Iterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for path in paths {
        if path.as_os_str().is_empty() {
            continue;
        }
        if !path.is_dir() {
            debug!("Skipping resource root {}: not a directory", path.display());
            continue;
        }
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !roots.contains(&path) {
            roots.push(path);
        }
    }
    roots
}
