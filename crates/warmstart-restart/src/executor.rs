//! Leak-safe execution on disposable threads
//!
//! Every task runs on a brand-new worker thread. The worker's first action is
//! to provision its replacement into a single-slot handoff, so no thread ever
//! serves two restart generations and none keeps a stack frame pointing into a
//! stopped application.

use crate::error::ExecutorError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, trace};

/// Called with the panic message when a task panics.
///
/// The default handler terminates the process with status 1.
pub type FatalHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Token for the next worker; holding one is the right to spawn it.
#[derive(Debug)]
struct LeakSafeWorker {
    id: u64,
}

/// Runs tasks on fresh threads, one thread per invocation.
#[derive(Clone)]
pub struct LeakSafeExecutor {
    slot_tx: SyncSender<LeakSafeWorker>,
    slot_rx: Arc<Mutex<Receiver<LeakSafeWorker>>>,
    next_id: Arc<AtomicU64>,
    on_fatal: FatalHandler,
}

impl LeakSafeExecutor {
    /// Create an executor whose fatal handler exits the process.
    pub fn new() -> Self {
        Self::with_fatal_handler(Arc::new(|_message: &str| std::process::exit(1)))
    }

    /// Create an executor with a custom fatal handler.
    pub fn with_fatal_handler(on_fatal: FatalHandler) -> Self {
        let (slot_tx, slot_rx) = mpsc::sync_channel(1);
        let next_id = Arc::new(AtomicU64::new(1));
        let first = LeakSafeWorker {
            id: next_id.fetch_add(1, Ordering::SeqCst),
        };
        // The slot is empty and we hold the receiver, so this cannot fail.
        let _ = slot_tx.try_send(first);

        Self {
            slot_tx,
            slot_rx: Arc::new(Mutex::new(slot_rx)),
            next_id,
            on_fatal,
        }
    }

    /// Run `task` on a fresh worker without waiting for it.
    pub fn run<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_worker(task).map(|_| ())
    }

    /// Run `task` on a fresh worker and block until it returns.
    pub fn call<T, F>(&self, task: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let (worker, handle) = self.spawn_worker(move || {
            let _ = result_tx.send(task());
        })?;

        match result_rx.recv() {
            Ok(value) => Ok(value),
            Err(_) => {
                // Let the fatal handler finish before reporting.
                let _ = handle.join();
                Err(ExecutorError::Panicked { worker })
            }
        }
    }

    /// Take the parked worker token and start its thread.
    fn spawn_worker<F>(&self, job: F) -> Result<(String, JoinHandle<()>), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = {
            let slot = self.slot_rx.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.recv() {
                Ok(worker) => worker,
                // Cannot happen while we own a sender.
                Err(_) => self.fresh_worker(),
            }
        };
        let name = format!("leak-safe-{}", worker.id);

        let slot_tx = self.slot_tx.clone();
        let next_id = Arc::clone(&self.next_id);
        let on_fatal = Arc::clone(&self.on_fatal);
        let thread_name = name.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let replacement = LeakSafeWorker {
                id: next_id.fetch_add(1, Ordering::SeqCst),
            };
            trace!("Provisioned leak-safe worker {}", replacement.id);
            let _ = slot_tx.send(replacement);

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                let message = panic_message(payload.as_ref());
                error!("Unexpected panic in {thread_name}, terminating: {message}");
                on_fatal(&message);
            }
        });

        match spawned {
            Ok(handle) => Ok((name, handle)),
            Err(e) => {
                // The token was consumed without a worker running; refill the slot.
                let _ = self.slot_tx.send(self.fresh_worker());
                Err(ExecutorError::Spawn(e))
            }
        }
    }

    fn fresh_worker(&self) -> LeakSafeWorker {
        LeakSafeWorker {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

impl Default for LeakSafeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LeakSafeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakSafeExecutor")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn recording_executor() -> (LeakSafeExecutor, Arc<Mutex<Vec<String>>>) {
        let fatal = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fatal);
        let executor = LeakSafeExecutor::with_fatal_handler(Arc::new(move |message: &str| {
            sink.lock().unwrap().push(message.to_string());
        }));
        (executor, fatal)
    }

    #[test]
    fn test_call_returns_task_value() {
        let (executor, _) = recording_executor();
        let value = executor.call(|| 21 * 2).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_every_call_uses_a_fresh_thread() {
        let (executor, _) = recording_executor();
        let mut seen = HashSet::new();
        for _ in 0..5 {
            let (id, name) = executor
                .call(|| {
                    let current = thread::current();
                    (current.id(), current.name().map(str::to_string))
                })
                .unwrap();
            assert!(seen.insert(id), "thread reused across invocations");
            assert!(name.unwrap().starts_with("leak-safe-"));
        }
    }

    #[test]
    fn test_run_is_fire_and_forget() {
        let (executor, _) = recording_executor();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let c = Arc::clone(&counter);
        executor
            .run(move || {
                c.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            })
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_invokes_fatal_handler() {
        let (executor, fatal) = recording_executor();
        let result: Result<(), _> = executor.call(|| panic!("boom"));

        assert!(matches!(result, Err(ExecutorError::Panicked { .. })));
        assert_eq!(fatal.lock().unwrap().as_slice(), ["boom".to_string()]);

        // A replacement worker was provisioned before the panic.
        assert_eq!(executor.call(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
