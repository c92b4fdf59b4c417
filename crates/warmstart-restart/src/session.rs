//! The process-wide restart session
//!
//! Holds the entry point, the original arguments and the pre-stop listeners,
//! and performs every stop/start cycle on a leak-safe worker. One lock spans
//! both phases, so concurrent `restart()` calls are serialized.

use crate::entry::{EntryPoint, LaunchContext, RESTARTED_THREAD_NAME};
use crate::error::{RestartError, WatchError};
use crate::executor::{LeakSafeExecutor, panic_message};
use crate::watcher::{ChangeWatcher, RestartTarget, WatchSettings};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;
use tracing::{debug, info, warn};

/// Hook run before the current generation is stopped.
///
/// Listeners run once, in registration order, then the list is cleared; the
/// next generation registers its own.
pub trait RestartListener: Send {
    fn before_stop(self: Box<Self>);
}

impl<F> RestartListener for F
where
    F: FnOnce() + Send,
{
    fn before_stop(self: Box<Self>) {
        (*self)()
    }
}

/// Shared, read-only view of "is the process exiting".
#[derive(Debug, Clone, Default)]
pub struct ExitFlag(Arc<AtomicBool>);

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }
}

type ExitHook = Box<dyn FnOnce() + Send>;

struct SessionInner {
    entry: Arc<dyn EntryPoint>,
    args: Arc<[String]>,
    executor: LeakSafeExecutor,
    listeners: Mutex<Vec<Box<dyn RestartListener>>>,
    restart_lock: Mutex<()>,
    generation: AtomicU64,
    exiting: ExitFlag,
    exited: (Mutex<bool>, Condvar),
    exit_hooks: Mutex<Vec<ExitHook>>,
    watcher: Mutex<Option<ChangeWatcher>>,
}

/// Handle to the restart session. Cheap to clone.
#[derive(Clone)]
pub struct RestartSession {
    inner: Arc<SessionInner>,
}

impl RestartSession {
    pub(crate) fn new(
        entry: Arc<dyn EntryPoint>,
        args: Arc<[String]>,
        executor: LeakSafeExecutor,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                entry,
                args,
                executor,
                listeners: Mutex::new(Vec::new()),
                restart_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                exiting: ExitFlag::new(),
                exited: (Mutex::new(false), Condvar::new()),
                exit_hooks: Mutex::new(Vec::new()),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Register a pre-stop hook for the current generation.
    pub fn add_listener<L>(&self, listener: L)
    where
        L: RestartListener + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// Number of the generation most recently launched.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Name of the entry point this session launches.
    pub fn entry_name(&self) -> &str {
        self.inner.entry.name()
    }

    /// Stop the current generation and launch the next one.
    ///
    /// Blocks until the new generation's entry point returned. A launch
    /// failure is returned to the caller, which decides whether to retry.
    /// Must not be called from inside [`EntryPoint::launch`].
    pub fn restart(&self) -> Result<(), RestartError> {
        if self.is_exiting() {
            return Err(RestartError::Exiting);
        }
        let session = self.clone();
        self.inner.executor.call(move || {
            let _guard = session
                .inner
                .restart_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if session.is_exiting() {
                return Err(RestartError::Exiting);
            }
            session.stop();
            session.start()
        })?
    }

    /// Launch the first generation on a leak-safe worker.
    pub(crate) fn launch_initial(&self) -> Result<(), RestartError> {
        let session = self.clone();
        self.inner.executor.call(move || {
            let _guard = session
                .inner
                .restart_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            session.start()
        })?
    }

    /// Run and clear the pre-stop listeners, then release the entry point.
    fn stop(&self) {
        let listeners = std::mem::take(
            &mut *self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!(
            "Stopping generation {} ({} listeners)",
            self.generation(),
            listeners.len()
        );
        for listener in listeners {
            listener.before_stop();
        }
        self.inner.entry.unload();
        debug!("Released generation {}", self.generation());
    }

    /// Launch the next generation on a dedicated thread and wait for it.
    fn start(&self) -> Result<(), RestartError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Arc::clone(&self.inner.entry);
        let name = entry.name().to_string();
        let ctx = LaunchContext::new(generation, Arc::clone(&self.inner.args), self.clone());

        debug!("Launching {name} generation {generation}");
        let handle = thread::Builder::new()
            .name(RESTARTED_THREAD_NAME.to_string())
            .spawn(move || entry.launch(ctx).map_err(|e| format!("{e:#}")))
            .map_err(|source| RestartError::Spawn {
                thread: RESTARTED_THREAD_NAME.to_string(),
                source,
            })?;

        match handle.join() {
            Ok(Ok(())) => {
                info!("Launched {name} generation {generation}");
                Ok(())
            }
            Ok(Err(message)) => Err(RestartError::LaunchFailed {
                entry: name,
                generation,
                message,
            }),
            Err(payload) => Err(RestartError::LaunchPanicked {
                entry: name,
                generation,
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Start watching sources, or re-arm the existing watcher.
    ///
    /// The first call creates the session's watcher. Each generation calls
    /// this again once it is up; later calls only update the restart delay.
    pub fn watch(&self, settings: WatchSettings) -> Result<(), WatchError> {
        if self.is_exiting() {
            debug!("Process is exiting, not watching sources");
            return Ok(());
        }
        let mut slot = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(watcher) => watcher.arm(settings.restart_delay),
            None => {
                let target: Arc<dyn RestartTarget> = Arc::new(SessionTarget {
                    inner: Arc::downgrade(&self.inner),
                });
                *slot = Some(ChangeWatcher::start(settings, target)?);
            }
        }
        Ok(())
    }

    /// Register a hook that runs once when the process exits.
    pub fn add_exit_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .exit_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Whether [`RestartSession::request_exit`] was called.
    pub fn is_exiting(&self) -> bool {
        self.inner.exiting.is_set()
    }

    /// Shared exit flag for components that must tell exit from restart.
    pub fn exit_flag(&self) -> ExitFlag {
        self.inner.exiting.clone()
    }

    /// Tear everything down for good.
    ///
    /// Stops the watcher, runs the pre-stop listeners (now a real shutdown),
    /// unloads the entry point, runs the exit hooks and wakes
    /// [`RestartSession::await_exit`]. Later calls are no-ops.
    pub fn request_exit(&self) {
        if self.inner.exiting.set() {
            return;
        }
        info!("Exit requested, shutting down generation {}", self.generation());

        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.close();
        }

        {
            let _guard = self
                .inner
                .restart_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.stop();
        }

        let hooks = std::mem::take(
            &mut *self
                .inner
                .exit_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }

        let (lock, cvar) = &self.inner.exited;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Block until [`RestartSession::request_exit`] completed.
    pub fn await_exit(&self) {
        let (lock, cvar) = &self.inner.exited;
        let mut exited = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*exited {
            exited = cvar.wait(exited).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl std::fmt::Debug for RestartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartSession")
            .field("entry", &self.inner.entry.name())
            .field("generation", &self.generation())
            .field("exiting", &self.is_exiting())
            .finish_non_exhaustive()
    }
}

/// Watcher-facing handle that does not keep the session alive.
struct SessionTarget {
    inner: Weak<SessionInner>,
}

impl RestartTarget for SessionTarget {
    fn restart(&self) -> Result<(), RestartError> {
        match self.inner.upgrade() {
            Some(inner) => RestartSession { inner }.restart(),
            None => {
                warn!("Restart session is gone, ignoring source change");
                Err(RestartError::NotInitialized)
            }
        }
    }
}
