//! Connection continuity across restarts.
//!
//! Applications build their external connections through a
//! [`ConnectionBuilder`]. When a restart tears the application down, the
//! connection is parked in the [`ResourceCache`] instead of being shut down,
//! with its events buffered by a [`BufferingEventSink`]. If the next
//! generation asks for a connection with the same key and an identical
//! configuration, the parked connection is handed back and the buffered
//! events are replayed; otherwise it is shut down and a new one is built.

pub mod builder;
pub mod cache;
pub mod configuration;
pub mod connection;
pub mod context;
pub mod error;
pub mod registry;
pub mod session;
pub mod sink;

pub use builder::{ConnectionBuilder, ManagedConnection};
pub use cache::{CacheEntry, ResourceCache, ShutdownFn};
pub use configuration::{
    Activity, ActivityKind, CacheFlag, CacheFlags, ChunkingFilter, ConnectionConfiguration,
    Intents, MemberCachePolicy, OnlineStatus, SettingKind, SettingValue,
};
pub use connection::Connection;
pub use context::ContinuityContext;
pub use error::{ContinuityError, SinkError};
pub use registry::{SessionRecord, SessionRegistry};
pub use session::{ConnectionSession, SessionState};
pub use sink::{BufferingEventSink, EventListener, EventSink, ListenerSink, SharedListener};
