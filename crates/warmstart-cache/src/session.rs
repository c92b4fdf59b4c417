//! One connection build attempt
//!
//! A session collects the configuration, then decides in [`ConnectionSession::build`]
//! whether the connection parked under its key can be reused:
//!
//! ```text
//! Open ──build──▶ Building ──┬──▶ Reused   (same key, same settings, buffering sink)
//!                            └──▶ Created  (anything else; stale entry torn down first)
//! ```

use crate::cache::{CacheEntry, ShutdownFn};
use crate::configuration::ConnectionConfiguration;
use crate::connection::Connection;
use crate::context::ContinuityContext;
use crate::error::ContinuityError;
use crate::sink::{BufferingEventSink, EventSink};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Collecting configuration
    Open,
    /// Deciding between reuse and construction
    Building,
    /// Handed back a parked connection
    Reused,
    /// Constructed a new connection
    Created,
}

/// Build attempt for one connection, optionally keyed for reuse.
pub struct ConnectionSession<R: Connection> {
    key: Option<String>,
    configuration: ConnectionConfiguration<R::Event>,
    state: SessionState,
    context: ContinuityContext<R>,
}

impl<R: Connection> ConnectionSession<R> {
    pub(crate) fn new(key: Option<String>, context: ContinuityContext<R>) -> Self {
        Self {
            key,
            configuration: ConnectionConfiguration::new(),
            state: SessionState::Open,
            context,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn configuration(&self) -> &ConnectionConfiguration<R::Event> {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut ConnectionConfiguration<R::Event> {
        &mut self.configuration
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        if let Some(key) = &self.key {
            self.context.registry().transition(key, state);
        }
    }

    /// Reuse the parked connection if compatible, otherwise construct one.
    ///
    /// `constructor` receives the sink the new connection must deliver its
    /// events to. A session builds at most once; a failed construction
    /// leaves it open.
    pub fn build<F>(&mut self, constructor: F) -> anyhow::Result<Arc<R>>
    where
        F: FnOnce(Arc<dyn EventSink<R::Event>>) -> anyhow::Result<Arc<R>>,
    {
        if self.state != SessionState::Open {
            return Err(ContinuityError::AlreadyBuilt {
                key: self.key.clone(),
            }
            .into());
        }
        if self.configuration.event_sink().as_buffering().is_some() {
            return Err(ContinuityError::BufferingSinkConfigured.into());
        }

        self.transition(SessionState::Building);
        match self.build_or_reuse(constructor) {
            Ok((resource, state)) => {
                self.transition(state);
                Ok(resource)
            }
            Err(e) => {
                self.transition(SessionState::Open);
                Err(e)
            }
        }
    }

    fn build_or_reuse<F>(&self, constructor: F) -> anyhow::Result<(Arc<R>, SessionState)>
    where
        F: FnOnce(Arc<dyn EventSink<R::Event>>) -> anyhow::Result<Arc<R>>,
    {
        let Some(key) = self.key.as_deref() else {
            debug!("No session key, building a new connection");
            let resource = constructor(self.configuration.event_sink())?;
            return Ok((resource, SessionState::Created));
        };
        let cache = self.context.cache();

        if self.configuration.has_unsupported_values() {
            debug!("Configuration has unsupported values, building a new connection (key '{key}')");
            if let Some(stale) = cache.remove(key) {
                stale.discard();
            }
            return self.create(constructor);
        }

        let Some(entry) = cache.remove(key) else {
            debug!("Creating a new connection (key '{key}')");
            return self.create(constructor);
        };

        if !entry.configuration().is_same_as(&self.configuration) {
            debug!("Creating a new connection as its configuration changed (key '{key}')");
            entry.discard();
            return self.create(constructor);
        }

        let Some(buffering) = entry.resource().event_sink().as_buffering() else {
            warn!("Parked connection for key '{key}' does not deliver through a buffering sink, building a new one");
            entry.discard();
            return self.create(constructor);
        };

        debug!("Reusing connection with compatible configuration (key '{key}')");
        let (_, resource) = entry.reclaim();
        buffering.reattach(self.configuration.event_sink(), resource.ready_events())?;
        Ok((resource, SessionState::Reused))
    }

    fn create<F>(&self, constructor: F) -> anyhow::Result<(Arc<R>, SessionState)>
    where
        F: FnOnce(Arc<dyn EventSink<R::Event>>) -> anyhow::Result<Arc<R>>,
    {
        let buffering = BufferingEventSink::with_delegate(self.configuration.event_sink())?;
        let resource = constructor(Arc::new(buffering))?;
        Ok((resource, SessionState::Created))
    }

    /// Hand-off point for the application tearing the connection down.
    ///
    /// On process exit, for unkeyed sessions, or when no restart session is
    /// attached, `shutdown` runs now. Otherwise the connection's sink is
    /// detached and the connection is parked with `shutdown` un-run until the
    /// next incompatible build or process exit.
    pub fn on_shutdown(&self, resource: Arc<R>, shutdown: ShutdownFn) {
        if self.context.is_exiting() {
            debug!("Process is exiting, shutting down connection");
            shutdown();
            return;
        }
        let Some(key) = self.key.as_deref() else {
            shutdown();
            return;
        };
        if !self.context.is_attached() {
            warn!("No restart session attached, connection for key '{key}' cannot be kept across restarts");
            shutdown();
            return;
        }
        if self.configuration.has_unsupported_values() {
            debug!("Configuration has unsupported values, shutting down connection (key '{key}')");
            shutdown();
            return;
        }
        let Some(buffering) = resource.event_sink().as_buffering() else {
            warn!("Connection for key '{key}' does not deliver through a buffering sink, shutting it down");
            shutdown();
            return;
        };

        buffering.detach();
        let entry = CacheEntry::new(self.configuration.clone(), resource, shutdown);
        if let Some(previous) = self.context.cache().set(key, entry) {
            warn!("Replacing connection already parked under key '{key}'");
            previous.discard();
        }
        debug!("Parked connection for key '{key}'");
    }

    /// Defer the shutdown signal of this session's parked connection.
    ///
    /// See [`ContinuityContext::on_schedule_shutdown_signal`].
    pub fn on_schedule_shutdown_signal(&self, schedule: ShutdownFn, after_signal: ShutdownFn) {
        self.context
            .on_schedule_shutdown_signal(self.key.as_deref(), schedule, after_signal);
    }
}

impl<R: Connection> Drop for ConnectionSession<R> {
    fn drop(&mut self) {
        if let Some(key) = &self.key {
            if self.state == SessionState::Open {
                warn!("Could not save or restore any connection for key '{key}' as none were built");
            }
        }
    }
}

impl<R: Connection> std::fmt::Debug for ConnectionSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}
