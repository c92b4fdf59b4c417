//! Live restarts for long-running processes.
//!
//! A [`Restarter`] owns the process-wide [`RestartSession`]: it launches the
//! application [`EntryPoint`] on a fresh thread, runs pre-stop listeners, and
//! relaunches on demand or when the [`ChangeWatcher`] sees source changes
//! settle for the configured restart delay.

pub mod debounce;
pub mod entry;
pub mod error;
pub mod executor;
pub mod ignore;
pub mod restarter;
pub mod roots;
pub mod session;
pub mod sources;
pub mod watcher;

pub use debounce::{DebounceScheduler, PendingRestartBatch};
pub use entry::{
    DylibEntryPoint, DylibMain, EntryPoint, FnEntryPoint, LaunchContext, RESTARTED_THREAD_NAME,
    WARMSTART_MAIN_SYMBOL,
};
pub use error::{EntryError, ExecutorError, RestartError, WatchError};
pub use executor::{FatalHandler, LeakSafeExecutor};
pub use ignore::IgnoreRules;
pub use restarter::{Restarter, finish};
pub use roots::app_roots;
pub use session::{ExitFlag, RestartListener, RestartSession};
pub use sources::{SnapshotDiff, SourceFile, SourceFiles};
pub use watcher::{ChangeWatcher, RestartTarget, WatchSettings};
