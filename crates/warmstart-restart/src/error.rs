//! Error types for restart orchestration

use crate::session::RestartSession;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the leak-safe executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The OS refused to create a worker thread
    #[error("Failed to spawn leak-safe worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The task panicked before producing a value
    #[error("Leak-safe worker {worker} panicked before returning a result")]
    Panicked { worker: String },
}

/// Errors raised while loading an entry point
#[derive(Debug, Error)]
pub enum EntryError {
    /// Could not create the per-generation copy of the library
    #[error("Failed to copy {path} for generation {generation}: {source}")]
    ShadowCopy {
        path: PathBuf,
        generation: u64,
        source: std::io::Error,
    },

    /// The dynamic loader rejected the library
    #[error("Failed to load library {path}: {source}")]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },

    /// The library does not export the entry symbol
    #[error("Library {path} does not export '{symbol}': {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        source: libloading::Error,
    },
}

/// Errors returned by the restart orchestrator
#[derive(Debug, Error)]
pub enum RestartError {
    /// The application was launched by [`crate::Restarter::initialize`].
    ///
    /// The original entry thread must not run any further application code;
    /// hand this to [`crate::finish`], which waits for the process to exit.
    #[error("Application launched on a restartable thread; the original entry point must stop")]
    ImmediateRestart { session: RestartSession },

    /// The entry point returned an error
    #[error("Entry point '{entry}' failed on generation {generation}: {message}")]
    LaunchFailed {
        entry: String,
        generation: u64,
        message: String,
    },

    /// The entry point panicked
    #[error("Entry point '{entry}' panicked on generation {generation}: {message}")]
    LaunchPanicked {
        entry: String,
        generation: u64,
        message: String,
    },

    /// Could not spawn the thread that runs the entry point
    #[error("Failed to spawn thread '{thread}': {source}")]
    Spawn {
        thread: String,
        source: std::io::Error,
    },

    /// The session has not been initialized yet
    #[error("Restarter has not been initialized")]
    NotInitialized,

    /// Process exit was requested, no further generations are launched
    #[error("Process is exiting, restart refused")]
    Exiting,

    /// Executor failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors reported by the change watcher
#[derive(Debug, Error)]
pub enum WatchError {
    /// File system notification backend error
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// Ignore pattern could not be compiled
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    /// A file system event woke the watcher but no root differs from its snapshot
    #[error("Received a file system event but no changes were detected")]
    NoChanges,

    /// Could not spawn a watcher thread
    #[error("Failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The restart itself failed
    #[error(transparent)]
    Restart(#[from] RestartError),
}
