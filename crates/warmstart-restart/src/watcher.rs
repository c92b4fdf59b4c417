//! Source change watcher
//!
//! Snapshots every watched root, subscribes to file system events for each
//! directory under it, and once events settle for the restart delay, diffs
//! the roots and restarts the target. After firing, the watcher stays
//! disarmed until the next generation calls [`ChangeWatcher::arm`] (through
//! `RestartSession::watch`), so a generation that never comes up is not
//! restarted again by stray events. A failed restart re-arms immediately.

use crate::debounce::{DebounceScheduler, PendingRestartBatch};
use crate::error::{RestartError, WatchError};
use crate::ignore::IgnoreRules;
use crate::roots::app_roots;
use crate::sources::{SourceFiles, directories};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use warmstart_core::{ConfigError, RestartConfig};

/// What the watcher restarts.
pub trait RestartTarget: Send + Sync {
    fn restart(&self) -> Result<(), RestartError>;
}

impl<F> RestartTarget for F
where
    F: Fn() -> Result<(), RestartError> + Send + Sync,
{
    fn restart(&self) -> Result<(), RestartError> {
        self()
    }
}

/// Watcher configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    /// Quiet period after the last event before restarting
    pub restart_delay: Duration,
    /// Directories to watch
    pub roots: Vec<PathBuf>,
    /// Glob patterns that never trigger a restart
    pub ignore: Vec<String>,
}

impl WatchSettings {
    pub fn new(restart_delay: Duration, roots: Vec<PathBuf>) -> Self {
        Self {
            restart_delay,
            roots,
            ignore: Vec::new(),
        }
    }

    pub fn with_ignore<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Settings from the `[restart]` section, roots resolved with [`app_roots`].
    pub fn from_config(config: &RestartConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            restart_delay: config.restart_delay()?,
            roots: app_roots(&config.watch_roots),
            ignore: config.ignore.clone(),
        })
    }
}

struct WatchState {
    roots: Vec<PathBuf>,
    snapshots: Mutex<Vec<SourceFiles>>,
    registered: Mutex<HashSet<PathBuf>>,
    backend: Mutex<RecommendedWatcher>,
    ignore: IgnoreRules,
    armed: Mutex<Option<Duration>>,
    target: Arc<dyn RestartTarget>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WatchState {
    fn root_of(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    /// Subscribe to every directory under `root` not yet registered.
    fn register_directories(&self, root: &Path) {
        let mut registered = lock(&self.registered);
        registered.retain(|dir| dir.is_dir());

        let mut backend = lock(&self.backend);
        for dir in directories(root, &self.ignore) {
            if registered.contains(&dir) {
                continue;
            }
            match backend.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    trace!("Listening to {}", dir.display());
                    registered.insert(dir);
                }
                Err(e) => warn!("Failed to watch {}: {e}", dir.display()),
            }
        }
    }

    /// Drop the subscription of a directory that went away.
    fn forget_directory(&self, dir: &Path) {
        let mut registered = lock(&self.registered);
        if registered.remove(dir) {
            warn!("{} is no longer valid", dir.display());
            // The backend usually dropped the watch along with the directory.
            let _ = lock(&self.backend).unwatch(dir);
        }
    }

    fn handle_event(&self, scheduler: &DebounceScheduler, event: Event) {
        if matches!(event.kind, EventKind::Access(_)) || event.paths.is_empty() {
            return;
        }
        trace!("File system event: {:?} {:?}", event.kind, event.paths);

        if matches!(event.kind, EventKind::Remove(_)) {
            for path in &event.paths {
                self.forget_directory(path);
            }
        }

        let root = event.paths.iter().find_map(|path| {
            self.root_of(path)
                .filter(|root| !self.ignore.is_ignored(root, path))
        });
        let Some(root) = root else {
            trace!("Ignoring change to {:?}", event.paths);
            return;
        };

        match *lock(&self.armed) {
            Some(delay) => scheduler.schedule(delay, root),
            None => trace!("No restart armed, ignoring change under {}", root.display()),
        }
    }

    fn try_restart(&self, batch: PendingRestartBatch) {
        let Some(delay) = lock(&self.armed).take() else {
            return;
        };
        debug!(
            "Attempting to restart after {} events in {} roots",
            batch.events(),
            batch.roots().count()
        );

        if let Err(e) = self.restart_once() {
            error!("Restart failed, waiting for the next change: {e}");
            lock(&self.armed).get_or_insert(delay);
        }
    }

    fn restart_once(&self) -> Result<(), WatchError> {
        let mut snapshots = lock(&self.snapshots);
        let mut next = Vec::with_capacity(self.roots.len());
        let mut changed = false;

        for (root, stored) in self.roots.iter().zip(snapshots.iter()) {
            let current = SourceFiles::snapshot(root, &self.ignore);
            let diff = stored.diff(&current);
            if !diff.removed.is_empty() {
                info!(
                    "{} files were deleted in {}: {:?}",
                    diff.removed.len(),
                    root.display(),
                    diff.removed
                );
            }
            if !diff.added.is_empty() {
                info!(
                    "{} files were added in {}: {:?}",
                    diff.added.len(),
                    root.display(),
                    diff.added
                );
            }
            if !diff.modified.is_empty() {
                info!(
                    "{} files were modified in {}: {:?}",
                    diff.modified.len(),
                    root.display(),
                    diff.modified
                );
            }
            changed |= !diff.is_empty();
            next.push(SourceFiles::advance(current, &diff));
        }

        if !changed {
            return Err(WatchError::NoChanges);
        }

        for root in &self.roots {
            self.register_directories(root);
        }

        self.target.restart()?;
        *snapshots = next;
        Ok(())
    }
}

/// Watches source roots and restarts a target when they change.
pub struct ChangeWatcher {
    state: Arc<WatchState>,
    scheduler: Arc<DebounceScheduler>,
    cancel: CancellationToken,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeWatcher {
    /// Snapshot the roots, subscribe to them and arm with `settings.restart_delay`.
    pub fn start(settings: WatchSettings, target: Arc<dyn RestartTarget>) -> Result<Self, WatchError> {
        let ignore = IgnoreRules::new(&settings.ignore)?;

        let (tx, rx) = mpsc::channel();
        let backend = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if tx.send(event).is_err() {
                    trace!("Source watcher closed, dropping event");
                }
            }
            Err(e) => error!("File system watcher error: {e}"),
        })?;

        let roots: Vec<PathBuf> = settings
            .roots
            .iter()
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
            .collect();
        let snapshots = roots
            .iter()
            .map(|root| {
                trace!("Creating snapshot of {}", root.display());
                SourceFiles::snapshot(root, &ignore)
            })
            .collect();

        let state = Arc::new(WatchState {
            roots,
            snapshots: Mutex::new(snapshots),
            registered: Mutex::new(HashSet::new()),
            backend: Mutex::new(backend),
            ignore,
            armed: Mutex::new(Some(settings.restart_delay)),
            target,
        });
        for root in &state.roots {
            state.register_directories(root);
        }

        let scheduler = {
            let state = Arc::clone(&state);
            DebounceScheduler::spawn("restart-scheduler", move |batch| state.try_restart(batch))
                .map_err(WatchError::Spawn)?
        };
        let scheduler = Arc::new(scheduler);

        let cancel = CancellationToken::new();
        let event_thread = {
            let state = Arc::clone(&state);
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("source-watcher".to_string())
                .spawn(move || event_loop(rx, &state, &scheduler, &cancel))
                .map_err(WatchError::Spawn)?
        };

        info!(
            "Watching {} roots for changes (restart delay {:?})",
            state.roots.len(),
            settings.restart_delay
        );

        Ok(Self {
            state,
            scheduler,
            cancel,
            event_thread: Mutex::new(Some(event_thread)),
        })
    }

    /// Allow the next change to schedule a restart after `delay`.
    pub fn arm(&self, delay: Duration) {
        *lock(&self.state.armed) = Some(delay);
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state.armed).is_some()
    }

    /// Whether a restart is scheduled and waiting for the window to elapse.
    pub fn is_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Canonical watched roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.state.roots
    }

    /// Directories currently subscribed to.
    pub fn registered_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = lock(&self.state.registered).iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Stop watching. Pending restarts never fire.
    pub fn close(self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.shutdown();
        let handle = lock(&self.event_thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_loop(
    rx: Receiver<Event>,
    state: &WatchState,
    scheduler: &DebounceScheduler,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            trace!("Source watcher cancelled");
            break;
        }

        // Use recv_timeout to avoid busy-wait polling
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => state.handle_event(scheduler, event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Watcher channel disconnected");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn idle_watcher(root: &Path) -> ChangeWatcher {
        let target: Arc<dyn RestartTarget> = Arc::new(|| Ok::<(), RestartError>(()));
        ChangeWatcher::start(
            WatchSettings::new(Duration::from_secs(60), vec![root.to_path_buf()])
                .with_ignore(["**/*.tmp"]),
            target,
        )
        .unwrap()
    }

    #[test]
    fn test_registers_every_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("c")).unwrap();

        let watcher = idle_watcher(temp_dir.path());
        let root = temp_dir.path().canonicalize().unwrap();
        assert_eq!(
            watcher.registered_directories(),
            vec![root.clone(), root.join("a"), root.join("a/b"), root.join("c")]
        );
        assert!(watcher.is_armed());
        watcher.close();
    }

    #[test]
    fn test_event_schedules_restart_when_armed() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher(temp_dir.path());
        let root = watcher.roots()[0].clone();

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("x.rs"));
        watcher.state.handle_event(&watcher.scheduler, event);
        assert!(watcher.is_pending());
    }

    #[test]
    fn test_ignored_and_foreign_paths_do_not_schedule() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher(temp_dir.path());
        let root = watcher.roots()[0].clone();

        let ignored = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("x.tmp"));
        watcher.state.handle_event(&watcher.scheduler, ignored);
        let foreign =
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/elsewhere/x.rs"));
        watcher.state.handle_event(&watcher.scheduler, foreign);

        assert!(!watcher.is_pending());
    }

    #[test]
    fn test_disarmed_watcher_ignores_events() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher(temp_dir.path());
        let root = watcher.roots()[0].clone();
        lock(&watcher.state.armed).take();

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("x.rs"));
        watcher.state.handle_event(&watcher.scheduler, event);
        assert!(!watcher.is_pending());
    }

    #[test]
    fn test_removed_directory_is_forgotten() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("gone")).unwrap();
        let watcher = idle_watcher(temp_dir.path());
        let gone = watcher.roots()[0].join("gone");
        assert!(watcher.registered_directories().contains(&gone));

        std::fs::remove_dir(&gone).unwrap();
        let event = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(gone.clone());
        watcher.state.handle_event(&watcher.scheduler, event);

        assert!(!watcher.registered_directories().contains(&gone));
    }

    #[test]
    fn test_no_changes_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("same.txt"), "x").unwrap();
        let watcher = idle_watcher(temp_dir.path());

        assert!(matches!(
            watcher.state.restart_once(),
            Err(WatchError::NoChanges)
        ));
    }

    #[test]
    #[traced_test]
    fn test_failed_restart_rearms_and_keeps_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let target: Arc<dyn RestartTarget> = Arc::new(move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RestartError::NotInitialized);
            }
            Ok(())
        });
        let watcher = ChangeWatcher::start(
            WatchSettings::new(Duration::from_secs(60), vec![temp_dir.path().to_path_buf()]),
            target,
        )
        .unwrap();

        std::fs::write(temp_dir.path().join("new.rs"), "fn main() {}").unwrap();
        watcher.state.try_restart(PendingRestartBatch::default());
        assert!(logs_contain("Restart failed, waiting for the next change"));
        assert!(watcher.is_armed());

        // The change is still pending against the kept snapshot.
        watcher.state.try_restart(PendingRestartBatch::default());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(logs_contain("1 files were added"));
        assert!(!watcher.is_armed());
    }
}
