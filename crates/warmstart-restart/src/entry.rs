//! Application entry points
//!
//! An [`EntryPoint`] is what the restart session launches for every
//! generation. [`FnEntryPoint`] runs an in-process function; code changes are
//! only picked up by [`DylibEntryPoint`], which loads a fresh copy of a
//! compiled library for each generation.

use crate::error::EntryError;
use crate::session::RestartSession;
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Name of the thread every generation is launched on.
pub const RESTARTED_THREAD_NAME: &str = "restartedMain";

/// Symbol a dynamic entry point must export.
pub const WARMSTART_MAIN_SYMBOL: &str = "warmstart_main";

/// Signature of the exported entry symbol.
///
/// Libraries export it as
/// `#[unsafe(no_mangle)] pub fn warmstart_main(ctx: LaunchContext) -> anyhow::Result<()>`
/// and must be built with the same toolchain as the host.
pub type DylibMain = fn(LaunchContext) -> anyhow::Result<()>;

/// Everything a launched generation gets to see.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    generation: u64,
    args: Arc<[String]>,
    session: RestartSession,
}

impl LaunchContext {
    pub(crate) fn new(generation: u64, args: Arc<[String]>, session: RestartSession) -> Self {
        Self {
            generation,
            args,
            session,
        }
    }

    /// 1 for the initial launch, incremented by every restart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Arguments passed to [`crate::Restarter::initialize`].
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The session that launched this generation.
    pub fn session(&self) -> &RestartSession {
        &self.session
    }
}

/// Something the restart session can launch and later release.
pub trait EntryPoint: Send + Sync {
    /// Human-readable name used in logs and errors
    fn name(&self) -> &str;

    /// Start the application.
    ///
    /// Runs on the [`RESTARTED_THREAD_NAME`] thread and should return once the
    /// application is up; long-running work belongs on threads the
    /// application stops from a pre-stop listener.
    fn launch(&self, ctx: LaunchContext) -> anyhow::Result<()>;

    /// Release whatever the last launch loaded. Called after the pre-stop
    /// listeners ran.
    fn unload(&self) {}
}

/// Entry point backed by a function compiled into the host binary.
pub struct FnEntryPoint<F> {
    name: String,
    main: F,
}

impl<F> FnEntryPoint<F>
where
    F: Fn(LaunchContext) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, main: F) -> Self {
        Self {
            name: name.into(),
            main,
        }
    }
}

impl<F> EntryPoint for FnEntryPoint<F>
where
    F: Fn(LaunchContext) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(&self, ctx: LaunchContext) -> anyhow::Result<()> {
        (self.main)(ctx)
    }
}

/// A library copy loaded for one generation
struct LoadedLibrary {
    generation: u64,
    copy: PathBuf,
    library: Library,
}

/// Entry point loaded from a `cdylib`/`dylib` on every launch.
///
/// Each generation loads its own shadow copy of the library so the build
/// can overwrite the original file while the previous copy is mapped.
/// The previous copy is unloaded in [`EntryPoint::unload`]; threads spawned
/// by the library must be stopped by its pre-stop listeners before that.
pub struct DylibEntryPoint {
    name: String,
    path: PathBuf,
    shadow_dir: TempDir,
    loaded: Mutex<Option<LoadedLibrary>>,
}

impl DylibEntryPoint {
    /// Create an entry point for the library at `path`.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let shadow_dir = tempfile::Builder::new().prefix("warmstart-").tempdir()?;

        Ok(Self {
            name,
            path,
            shadow_dir,
            loaded: Mutex::new(None),
        })
    }

    /// Path of the library being reloaded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation whose copy is currently loaded, if any.
    pub fn loaded_generation(&self) -> Option<u64> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|loaded| loaded.generation)
    }

    fn shadow_copy(&self, generation: u64) -> Result<PathBuf, EntryError> {
        let file_name = self
            .path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        let copy = self.shadow_dir.path().join(format!("{generation}-{file_name}"));

        std::fs::copy(&self.path, &copy).map_err(|source| EntryError::ShadowCopy {
            path: self.path.clone(),
            generation,
            source,
        })?;
        Ok(copy)
    }

    fn load(&self, generation: u64) -> Result<(LoadedLibrary, DylibMain), EntryError> {
        let copy = self.shadow_copy(generation)?;

        // Safety: the library is trusted application code built for this host;
        // its initializers run here like they would for a linked binary.
        let library = unsafe {
            Library::new(&copy).map_err(|source| EntryError::Load {
                path: self.path.clone(),
                source,
            })?
        };

        // Safety: the exported symbol must have the `DylibMain` signature.
        // The fn pointer stays valid for as long as `library` stays loaded,
        // which the caller guarantees by storing both together.
        let main = unsafe {
            let symbol: Symbol<DylibMain> = library
                .get(WARMSTART_MAIN_SYMBOL.as_bytes())
                .map_err(|source| EntryError::MissingSymbol {
                    path: self.path.clone(),
                    symbol: WARMSTART_MAIN_SYMBOL.to_string(),
                    source,
                })?;
            *symbol
        };

        Ok((
            LoadedLibrary {
                generation,
                copy,
                library,
            },
            main,
        ))
    }
}

impl EntryPoint for DylibEntryPoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn launch(&self, ctx: LaunchContext) -> anyhow::Result<()> {
        let generation = ctx.generation();
        // A failed launch may have left its copy behind.
        self.unload();

        let (loaded, main) = self.load(generation)?;
        debug!(
            "Loaded {} generation {generation} from {}",
            self.name,
            loaded.copy.display()
        );
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(loaded);

        // Errors may reference code inside the library; keep only their text.
        main(ctx).map_err(|e| anyhow::anyhow!("{e:#}"))
    }

    fn unload(&self) {
        let loaded = self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(LoadedLibrary {
            generation,
            copy,
            library,
        }) = loaded
        else {
            return;
        };

        if let Err(e) = library.close() {
            warn!("Failed to unload {} generation {generation}: {e}", self.name);
        }
        if let Err(e) = std::fs::remove_file(&copy) {
            warn!("Failed to remove {}: {e}", copy.display());
        }
        debug!("Unloaded {} generation {generation}", self.name);
    }
}

impl Drop for DylibEntryPoint {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dylib_missing_library_fails_to_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let entry = DylibEntryPoint::new(temp_dir.path().join("libmissing.so")).unwrap();

        assert_eq!(entry.name(), "libmissing");
        let err = entry.load(1).err().unwrap();
        assert!(matches!(err, EntryError::ShadowCopy { generation: 1, .. }));
        assert_eq!(entry.loaded_generation(), None);
    }

    #[test]
    fn test_dylib_rejects_non_library_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("libnot_a_library.so");
        std::fs::write(&path, "definitely not ELF").unwrap();

        let entry = DylibEntryPoint::new(&path).unwrap();
        let err = entry.load(3).err().unwrap();
        assert!(matches!(err, EntryError::Load { .. }));
        assert_eq!(entry.path(), path.as_path());
    }

    #[test]
    fn test_unload_without_launch_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let entry = DylibEntryPoint::new(temp_dir.path().join("libapp.so")).unwrap();
        entry.unload();
        assert_eq!(entry.loaded_generation(), None);
    }
}
