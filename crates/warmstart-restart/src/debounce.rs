//! Trailing-edge debounce on a dedicated timer thread
//!
//! Every `schedule` call cancels the pending deadline and replaces it, so the
//! action fires once, `delay` after the last call of a burst.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

/// Changes accumulated since the last time the action fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRestartBatch {
    roots: BTreeSet<PathBuf>,
    events: usize,
}

impl PendingRestartBatch {
    pub fn record(&mut self, root: &Path) {
        self.roots.insert(root.to_path_buf());
        self.events += 1;
    }

    /// Roots that saw at least one event.
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path)
    }

    /// Number of events folded into this batch.
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }
}

#[derive(Default)]
struct SchedulerState {
    deadline: Option<Instant>,
    batch: PendingRestartBatch,
    shutdown: bool,
}

#[derive(Default)]
struct SchedulerShared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

impl SchedulerShared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancel-and-replace timer that hands the accumulated batch to an action.
pub struct DebounceScheduler {
    shared: Arc<SchedulerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceScheduler {
    /// Start the timer thread. `action` runs on that thread.
    pub fn spawn<F>(name: &str, mut action: F) -> std::io::Result<Self>
    where
        F: FnMut(PendingRestartBatch) + Send + 'static,
    {
        let shared = Arc::new(SchedulerShared::default());
        let worker = Arc::clone(&shared);

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = worker.lock();
            loop {
                if state.shutdown {
                    return;
                }
                match state.deadline {
                    None => {
                        state = worker.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now < deadline {
                            state = worker
                                .wake
                                .wait_timeout(state, deadline - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                            continue;
                        }
                        state.deadline = None;
                        let batch = std::mem::take(&mut state.batch);
                        drop(state);

                        trace!("Debounce window elapsed after {} events", batch.events());
                        action(batch);
                        state = worker.lock();
                    }
                }
            }
        })?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Fire `delay` from now, replacing any pending deadline.
    pub fn schedule(&self, delay: Duration, root: &Path) {
        let mut state = self.shared.lock();
        if state.shutdown {
            return;
        }
        if state.deadline.is_some() {
            trace!("Replacing pending restart");
        }
        state.deadline = Some(Instant::now() + delay);
        state.batch.record(root);
        self.shared.wake.notify_all();
    }

    /// Drop the pending deadline and batch. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        state.batch = PendingRestartBatch::default();
        state.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Stop the timer thread; a pending deadline never fires.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.wake.notify_all();
        }
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The action may be what is shutting us down.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
