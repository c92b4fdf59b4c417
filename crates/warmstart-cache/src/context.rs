//! Process-scoped continuity state
//!
//! A [`ContinuityContext`] owns the resource cache and the session registry.
//! Create one per process (tests create their own), attach it to the restart
//! session, and open connection sessions through it.

use crate::builder::ConnectionBuilder;
use crate::cache::{ResourceCache, ShutdownFn};
use crate::configuration::Intents;
use crate::connection::Connection;
use crate::error::ContinuityError;
use crate::registry::{SessionRecord, SessionRegistry};
use crate::session::ConnectionSession;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use warmstart_restart::{ExitFlag, RestartSession};

struct ContextInner<R: Connection> {
    cache: ResourceCache<R>,
    registry: SessionRegistry,
    exit: OnceLock<ExitFlag>,
}

/// Cache, registry and exit state shared by all connection sessions.
pub struct ContinuityContext<R: Connection> {
    inner: Arc<ContextInner<R>>,
}

impl<R: Connection> Clone for ContinuityContext<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Connection> ContinuityContext<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cache: ResourceCache::new(),
                registry: SessionRegistry::new(),
                exit: OnceLock::new(),
            }),
        }
    }

    /// Tie this context to the restart session.
    ///
    /// Parked connections are only kept while attached, and are all shut
    /// down when the process exits. Attaching more than once is a no-op.
    pub fn attach(&self, session: &RestartSession) {
        if self.inner.exit.set(session.exit_flag()).is_err() {
            debug!("Continuity context already attached");
            return;
        }
        let context = self.clone();
        session.add_exit_hook(move || context.shutdown_all());
    }

    pub fn is_attached(&self) -> bool {
        self.inner.exit.get().is_some()
    }

    /// Whether the attached restart session is exiting for good.
    pub fn is_exiting(&self) -> bool {
        self.inner.exit.get().is_some_and(ExitFlag::is_set)
    }

    pub fn cache(&self) -> &ResourceCache<R> {
        &self.inner.cache
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Open a build attempt. Sessions without a key are never cached.
    pub fn open_session(&self, key: Option<&str>) -> ConnectionSession<R> {
        if let Some(key) = key {
            let attempt = self.inner.registry.open(key);
            debug!("Opened connection session {attempt} for key '{key}'");
        }
        ConnectionSession::new(key.map(str::to_string), self.clone())
    }

    /// Run `block` with a fresh session for `key`.
    pub fn with_session<T>(
        &self,
        key: Option<&str>,
        block: impl FnOnce(&mut ConnectionSession<R>) -> T,
    ) -> T {
        let mut session = self.open_session(key);
        block(&mut session)
    }

    /// Start configuring a connection through the builder adapter.
    pub fn builder(
        &self,
        key: Option<&str>,
        identity: impl Into<String>,
        intents: Intents,
    ) -> ConnectionBuilder<R> {
        ConnectionBuilder::new(self.open_session(key), identity, intents)
    }

    /// Defer the shutdown signal of the connection parked under `key`.
    ///
    /// When exiting, unkeyed, or with nothing parked under `key`, `schedule`
    /// runs now. Otherwise `after_signal` runs now and `schedule` waits with
    /// the cache entry: dropped on reuse, run after the real teardown on
    /// discard.
    pub fn on_schedule_shutdown_signal(
        &self,
        key: Option<&str>,
        schedule: ShutdownFn,
        after_signal: ShutdownFn,
    ) {
        let key = match key {
            Some(key) if !self.is_exiting() => key,
            _ => {
                schedule();
                return;
            }
        };
        match self.inner.cache.attach_shutdown_signal(key, schedule) {
            Ok(()) => {
                debug!("Deferred shutdown signal for key '{key}'");
                after_signal();
            }
            Err(schedule) => schedule(),
        }
    }

    /// Registry record for `key`.
    pub fn get_session(&self, key: &str) -> Result<SessionRecord, ContinuityError> {
        self.inner.registry.get_session(key)
    }

    /// Shut down every parked connection.
    pub fn shutdown_all(&self) {
        let entries = self.inner.cache.drain();
        if !entries.is_empty() {
            info!("Shutting down {} parked connections", entries.len());
        }
        for (key, entry) in entries {
            debug!("Shutting down parked connection for key '{key}'");
            entry.discard();
        }
    }
}

impl<R: Connection> Default for ContinuityContext<R> {
    fn default() -> Self {
        Self::new()
    }
}
