//! Error types for connection continuity

use thiserror::Error;

/// Errors from event sinks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// A buffering sink was asked to delegate to a buffering sink
    #[error("A buffering event sink cannot delegate to a buffering event sink")]
    Loop,

    /// Listener management needs a delegate
    #[error("Event sink is detached; listeners can only be managed while a delegate is set")]
    Detached,
}

/// Errors from connection sessions and the continuity context
#[derive(Debug, Error)]
pub enum ContinuityError {
    /// No session was ever opened for the key
    #[error("No connection session registered for key '{key}'")]
    UnknownSession { key: String },

    /// `build` was called twice on one session
    #[error("Connection session{} was already built", key_suffix(.key))]
    AlreadyBuilt { key: Option<String> },

    /// The application configured a buffering sink itself
    #[error("Buffering event sinks are managed by the continuity layer and cannot be configured")]
    BufferingSinkConfigured,

    /// Event sink failure
    #[error(transparent)]
    Sink(#[from] SinkError),
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_ref()
        .map(|key| format!(" for key '{key}'"))
        .unwrap_or_default()
}
