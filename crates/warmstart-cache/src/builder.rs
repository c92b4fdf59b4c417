//! Builder adapter
//!
//! The application configures connections through [`ConnectionBuilder`]
//! instead of the connection library's own builder. Every recognized setter
//! is captured for reuse decisions; anything else goes through
//! [`ConnectionBuilder::option`] and disables reuse for that attempt.

use crate::cache::ShutdownFn;
use crate::configuration::{
    Activity, CacheFlag, ChunkingFilter, ConnectionConfiguration, Intents, MemberCachePolicy,
    OnlineStatus,
};
use crate::connection::Connection;
use crate::session::{ConnectionSession, SessionState};
use crate::sink::EventSink;
use std::ops::Deref;
use std::sync::Arc;

pub struct ConnectionBuilder<R: Connection> {
    session: ConnectionSession<R>,
}

impl<R: Connection> ConnectionBuilder<R> {
    pub(crate) fn new(
        mut session: ConnectionSession<R>,
        identity: impl Into<String>,
        intents: Intents,
    ) -> Self {
        session.configuration_mut().on_init(identity, intents);
        Self { session }
    }

    fn configure(mut self, f: impl FnOnce(&mut ConnectionConfiguration<R::Event>)) -> Self {
        f(self.session.configuration_mut());
        self
    }

    pub fn status(self, status: OnlineStatus) -> Self {
        self.configure(|c| c.set_status(status))
    }

    pub fn event_sink(self, sink: Arc<dyn EventSink<R::Event>>) -> Self {
        self.configure(|c| c.set_event_sink(sink))
    }

    pub fn event_passthrough(self, enabled: bool) -> Self {
        self.configure(|c| c.set_event_passthrough(enabled))
    }

    pub fn enable_cache(self, flags: impl IntoIterator<Item = CacheFlag>) -> Self {
        self.configure(|c| c.enable_cache(flags))
    }

    pub fn disable_cache(self, flags: impl IntoIterator<Item = CacheFlag>) -> Self {
        self.configure(|c| c.disable_cache(flags))
    }

    pub fn member_cache_policy(self, policy: MemberCachePolicy) -> Self {
        self.configure(|c| c.set_member_cache_policy(policy))
    }

    pub fn chunking_filter(self, filter: ChunkingFilter) -> Self {
        self.configure(|c| c.set_chunking_filter(filter))
    }

    pub fn large_threshold(self, threshold: u32) -> Self {
        self.configure(|c| c.set_large_threshold(threshold))
    }

    pub fn activity(self, activity: Option<Activity>) -> Self {
        self.configure(|c| c.set_activity(activity))
    }

    /// Any builder call without a dedicated setter, named by its signature.
    pub fn option(self, signature: impl Into<String>) -> Self {
        self.configure(|c| c.mark_unsupported_value(signature))
    }

    pub fn configuration(&self) -> &ConnectionConfiguration<R::Event> {
        self.session.configuration()
    }

    /// Reuse or construct the connection.
    pub fn build<F>(mut self, constructor: F) -> anyhow::Result<ManagedConnection<R>>
    where
        F: FnOnce(
            &ConnectionConfiguration<R::Event>,
            Arc<dyn EventSink<R::Event>>,
        ) -> anyhow::Result<Arc<R>>,
    {
        let configuration = self.session.configuration().clone();
        let resource = self
            .session
            .build(|sink| constructor(&configuration, sink))?;
        Ok(ManagedConnection {
            resource,
            session: self.session,
        })
    }
}

/// A connection together with the session that produced it.
pub struct ManagedConnection<R: Connection> {
    resource: Arc<R>,
    session: ConnectionSession<R>,
}

impl<R: Connection> ManagedConnection<R> {
    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Whether a parked connection was handed back.
    pub fn was_reused(&self) -> bool {
        self.session.state() == SessionState::Reused
    }

    pub fn session(&self) -> &ConnectionSession<R> {
        &self.session
    }

    /// Tear down; parked instead when the process is only restarting.
    ///
    /// Returns the session so the caller can defer its shutdown signal with
    /// [`ConnectionSession::on_schedule_shutdown_signal`].
    pub fn shutdown<F>(self, shutdown: F) -> ConnectionSession<R>
    where
        F: FnOnce() + Send + 'static,
    {
        let ManagedConnection { resource, session } = self;
        let shutdown: ShutdownFn = Box::new(shutdown);
        session.on_shutdown(resource, shutdown);
        session
    }
}

impl<R: Connection> Deref for ManagedConnection<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}
